use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::math::distance_2d;

/// MediaPipe Pose の 33 ランドマークインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum LandmarkIndex {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkIndex {
    pub const COUNT: usize = 33;

    const ALL: [LandmarkIndex; Self::COUNT] = [
        Self::Nose,
        Self::LeftEyeInner,
        Self::LeftEye,
        Self::LeftEyeOuter,
        Self::RightEyeInner,
        Self::RightEye,
        Self::RightEyeOuter,
        Self::LeftEar,
        Self::RightEar,
        Self::MouthLeft,
        Self::MouthRight,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftPinky,
        Self::RightPinky,
        Self::LeftIndex,
        Self::RightIndex,
        Self::LeftThumb,
        Self::RightThumb,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
        Self::LeftHeel,
        Self::RightHeel,
        Self::LeftFootIndex,
        Self::RightFootIndex,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// 単一ランドマーク
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    /// 正規化X座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化Y座標 (0.0〜1.0、下向きが正)
    pub y: f32,
    /// 腰中心基準の相対深度
    #[serde(default)]
    pub z: f32,
    /// 可視度 (0.0〜1.0)
    #[serde(default)]
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }

    /// 可視度が閾値を超えているか
    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility > threshold
    }

    /// ピクセル座標に変換
    pub fn to_pixel(&self, width: u32, height: u32) -> (i32, i32) {
        let px = (self.x * width as f32) as i32;
        let py = (self.y * height as f32) as i32;
        (px, py)
    }
}

/// 1回の検出結果。33点すべてが揃っているときだけ存在する
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSnapshot {
    pub landmarks: [Landmark; LandmarkIndex::COUNT],
    pub timestamp: Instant,
}

impl PoseSnapshot {
    pub fn new(landmarks: [Landmark; LandmarkIndex::COUNT], timestamp: Instant) -> Self {
        Self { landmarks, timestamp }
    }

    /// 検出器の出力から作る。点数が33でなければ None（部分的なポーズは出さない）
    pub fn from_slice(landmarks: &[Landmark], timestamp: Instant) -> Option<Self> {
        let landmarks: [Landmark; LandmarkIndex::COUNT] = landmarks.try_into().ok()?;
        Some(Self::new(landmarks, timestamp))
    }

    pub fn get(&self, index: LandmarkIndex) -> &Landmark {
        &self.landmarks[index as usize]
    }

    /// 両肩間の 2D 距離
    pub fn shoulder_width(&self) -> f32 {
        let l = self.get(LandmarkIndex::LeftShoulder);
        let r = self.get(LandmarkIndex::RightShoulder);
        distance_2d(l.x, l.y, r.x, r.y)
    }

    /// 肩ベクトル (左→右) の角度 atan2(dy, dx)
    pub fn body_yaw(&self) -> f32 {
        let l = self.get(LandmarkIndex::LeftShoulder);
        let r = self.get(LandmarkIndex::RightShoulder);
        f32::atan2(r.y - l.y, r.x - l.x)
    }

    /// 両肩の中点 (x, y, z)
    pub fn shoulder_center(&self) -> [f32; 3] {
        midpoint(
            self.get(LandmarkIndex::LeftShoulder),
            self.get(LandmarkIndex::RightShoulder),
        )
    }

    /// 両腰の中点 (x, y, z)
    pub fn hip_center(&self) -> [f32; 3] {
        midpoint(self.get(LandmarkIndex::LeftHip), self.get(LandmarkIndex::RightHip))
    }

    /// 胴体中心: 肩中点と腰中点の中点
    pub fn body_center(&self) -> [f32; 3] {
        let s = self.shoulder_center();
        let h = self.hip_center();
        [(s[0] + h[0]) / 2.0, (s[1] + h[1]) / 2.0, (s[2] + h[2]) / 2.0]
    }

    /// 上半身主要点（肩・肘・腰）の平均可視度
    pub fn pose_confidence(&self) -> f32 {
        use LandmarkIndex::*;
        let key = [LeftShoulder, RightShoulder, LeftElbow, RightElbow, LeftHip, RightHip];
        let sum: f32 = key.iter().map(|&i| self.get(i).visibility).sum();
        sum / key.len() as f32
    }

    /// 両肩の奥行き差が閾値未満なら正面向き
    pub fn is_frontal(&self, threshold: f32) -> bool {
        let l = self.get(LandmarkIndex::LeftShoulder);
        let r = self.get(LandmarkIndex::RightShoulder);
        (l.z - r.z).abs() < threshold
    }
}

fn midpoint(a: &Landmark, b: &Landmark) -> [f32; 3] {
    [(a.x + b.x) / 2.0, (a.y + b.y) / 2.0, (a.z + b.z) / 2.0]
}
