use image::RgbaImage;

use crate::pose::{LandmarkIndex, PoseSnapshot};

use LandmarkIndex::*;

/// MediaPipe Pose の骨格接続 (開始ランドマーク, 終了ランドマーク)
pub const POSE_CONNECTIONS: [(LandmarkIndex, LandmarkIndex); 35] = [
    // 顔
    (Nose, LeftEyeInner),
    (LeftEyeInner, LeftEye),
    (LeftEye, LeftEyeOuter),
    (LeftEyeOuter, LeftEar),
    (Nose, RightEyeInner),
    (RightEyeInner, RightEye),
    (RightEye, RightEyeOuter),
    (RightEyeOuter, RightEar),
    (MouthLeft, MouthRight),
    // 上半身
    (LeftShoulder, RightShoulder),
    (LeftShoulder, LeftElbow),
    (LeftElbow, LeftWrist),
    (LeftWrist, LeftPinky),
    (LeftWrist, LeftIndex),
    (LeftWrist, LeftThumb),
    (LeftPinky, LeftIndex),
    (RightShoulder, RightElbow),
    (RightElbow, RightWrist),
    (RightWrist, RightPinky),
    (RightWrist, RightIndex),
    (RightWrist, RightThumb),
    (RightPinky, RightIndex),
    // 胴体
    (LeftShoulder, LeftHip),
    (RightShoulder, RightHip),
    (LeftHip, RightHip),
    // 下半身
    (LeftHip, LeftKnee),
    (RightHip, RightKnee),
    (LeftKnee, LeftAnkle),
    (RightKnee, RightAnkle),
    (LeftAnkle, LeftHeel),
    (RightAnkle, RightHeel),
    (LeftHeel, LeftFootIndex),
    (RightHeel, RightFootIndex),
    (LeftAnkle, LeftFootIndex),
    (RightAnkle, RightFootIndex),
];

/// ランドマークの色 (RGBA)
pub const LANDMARK_COLOR: [u8; 4] = [0, 255, 0, 255]; // 緑

/// 骨格線の色 (RGBA)
pub const SKELETON_COLOR: [u8; 4] = [255, 255, 0, 255]; // 黄色

/// 可視度が低いランドマークの色 (RGBA)
pub const LOW_VISIBILITY_COLOR: [u8; 4] = [255, 0, 0, 255]; // 赤

/// ブレンド進捗バーの色 (RGBA)
pub const PROGRESS_COLOR: [u8; 4] = [80, 160, 255, 255];

/// ポーズを骨格として描画
pub fn draw_pose(image: &mut RgbaImage, pose: &PoseSnapshot, visibility_threshold: f32) {
    let (w, h) = image.dimensions();

    for (start_idx, end_idx) in POSE_CONNECTIONS.iter() {
        let start = pose.get(*start_idx);
        let end = pose.get(*end_idx);

        if start.is_visible(visibility_threshold) && end.is_visible(visibility_threshold) {
            let (x1, y1) = start.to_pixel(w, h);
            let (x2, y2) = end.to_pixel(w, h);
            draw_line(image, x1, y1, x2, y2, SKELETON_COLOR);
        }
    }

    for lm in pose.landmarks.iter() {
        let (px, py) = lm.to_pixel(w, h);
        let color = if lm.is_visible(visibility_threshold) {
            LANDMARK_COLOR
        } else {
            LOW_VISIBILITY_COLOR
        };
        draw_circle(image, px, py, 3, color);
    }
}

/// 画面下端に進捗バー (0.0〜1.0) を描く
pub fn draw_progress_bar(image: &mut RgbaImage, progress: f32) {
    let (w, h) = image.dimensions();
    let filled = (progress.clamp(0.0, 1.0) * w as f32) as i32;
    let thickness = (h / 120).max(2) as i32;
    for y in (h as i32 - thickness)..h as i32 {
        for x in 0..filled {
            set_pixel(image, x, y, PROGRESS_COLOR);
        }
    }
}

/// Bresenhamのアルゴリズムで線を描画
pub fn draw_line(image: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: [u8; 4]) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut x = x0;
    let mut y = y0;

    loop {
        set_pixel(image, x, y, color);

        if x == x1 && y == y1 {
            break;
        }

        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// 円を描画（塗りつぶし）
pub fn draw_circle(image: &mut RgbaImage, cx: i32, cy: i32, radius: i32, color: [u8; 4]) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                set_pixel(image, cx + dx, cy + dy, color);
            }
        }
    }
}

/// ピクセルをセット（境界チェック付き）
fn set_pixel(image: &mut RgbaImage, x: i32, y: i32, color: [u8; 4]) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, image::Rgba(color));
    }
}
