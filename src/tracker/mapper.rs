use serde::Serialize;
use std::f32::consts::PI;

use crate::config::{AnchorMode, CalibrationProfile, MapperConfig};
use crate::math::clamp;
use crate::pose::{LandmarkIndex, PoseSnapshot};
use crate::scene::SharedGarment;

use super::smooth::TransformSmoother;
use super::transform::SkeletalTransform;

/// 衣服メッシュは -Z 向きで作られているため、yaw に π を足してカメラへ向ける
pub const MESH_FACING_BIAS: f32 = PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MapperState {
    Uninitialized,
    Ready,
}

/// getTransformInfo 相当のデバッグ用スナップショット
#[derive(Debug, Clone, Serialize)]
pub struct TransformInfo {
    pub state: MapperState,
    pub raw: Option<SkeletalTransform>,
    pub smoothed: Option<SkeletalTransform>,
    pub accepted: u64,
    pub skipped: u64,
    /// 直近の (左肩, 右肩) visibility
    pub shoulder_visibility: Option<[f32; 2]>,
    #[serde(skip)]
    pub calibration: CalibrationProfile,
}

/// ポーズのランドマークから衣服ノードの変換を求め、シーンへ書き込む
///
/// 肩の visibility が閾値以下のポーズ・ポーズ消失 (None) は無視し、
/// 衣服は最後の変換のまま止まる。ポーズ消失後の最初の検出は平滑化せずに使う。
pub struct SkeletalMapper {
    config: MapperConfig,
    calibration: CalibrationProfile,
    state: MapperState,
    aspect: f32,
    smoother: TransformSmoother,
    garment: SharedGarment,
    last_raw: Option<SkeletalTransform>,
    accepted: u64,
    skipped: u64,
    last_visibility: Option<[f32; 2]>,
    tracking_lost: bool,
}

impl SkeletalMapper {
    pub fn new(config: &MapperConfig, calibration: CalibrationProfile, garment: SharedGarment) -> Self {
        Self {
            config: config.clone(),
            calibration,
            state: MapperState::Uninitialized,
            aspect: 1.0,
            smoother: TransformSmoother::from_config(config),
            garment,
            last_raw: None,
            accepted: 0,
            skipped: 0,
            last_visibility: None,
            tracking_lost: false,
        }
    }

    pub fn initialize(&mut self, viewport_width: u32, viewport_height: u32) {
        self.set_viewport(viewport_width, viewport_height);
        self.state = MapperState::Ready;
        tracing::debug!(
            "skeletal mapper ready ({}x{}, anchor={:?})",
            viewport_width,
            viewport_height,
            self.config.anchor
        );
    }

    /// ビューポートのアスペクト比だけ更新（状態は変えない）
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn state(&self) -> MapperState {
        self.state
    }

    pub fn calibration(&self) -> CalibrationProfile {
        self.calibration
    }

    /// 以降の計算に使うキャリブレーションを差し替える
    pub fn set_calibration(&mut self, calibration: CalibrationProfile) {
        tracing::info!("calibration updated: {:?}", calibration);
        self.calibration = calibration;
    }

    /// 1サイクル分の更新。変換を書き込んだら true
    pub fn update(&mut self, pose: Option<&PoseSnapshot>) -> bool {
        if self.state != MapperState::Ready {
            return false;
        }
        let Some(pose) = pose else {
            self.skipped += 1;
            self.tracking_lost = true;
            return false;
        };

        let left = pose.get(LandmarkIndex::LeftShoulder);
        let right = pose.get(LandmarkIndex::RightShoulder);
        self.last_visibility = Some([left.visibility, right.visibility]);
        let threshold = self.config.visibility_threshold;
        if !left.is_visible(threshold) || !right.is_visible(threshold) {
            self.skipped += 1;
            return false;
        }

        let raw = self.compute(pose);
        if !raw.is_finite() {
            tracing::debug!("non-finite transform skipped: {:?}", raw);
            self.skipped += 1;
            return false;
        }
        self.last_raw = Some(raw);
        if std::mem::take(&mut self.tracking_lost) {
            // 消失前の位置から滑らせない
            self.smoother.reset();
        }
        let smoothed = self.smoother.apply(raw);

        let mut garment = self.garment.lock();
        garment.set_transform(smoothed);
        if !garment.is_visible() {
            garment.set_visible(true);
            tracing::info!("garment anchored to first tracked pose");
        }
        self.accepted += 1;
        true
    }

    fn compute(&self, pose: &PoseSnapshot) -> SkeletalTransform {
        let c = &self.config;
        let cal = &self.calibration;
        let left = pose.get(LandmarkIndex::LeftShoulder);
        let right = pose.get(LandmarkIndex::RightShoulder);
        let shoulder_center = pose.shoulder_center();
        let mirror = if c.mirror_x { -1.0 } else { 1.0 };

        // 位置: 画像の Y は下向き、シーンの Y は上向き
        let anchor = self.anchor(pose);
        let x = mirror * (anchor[0] - 0.5) * c.position_span * self.aspect + cal.horizontal_offset;
        let y = -(anchor[1] - 0.5) * c.position_span + cal.vertical_offset;
        let z = cal.depth_multiplier + anchor[2] * c.depth_scale;

        // 回転
        let width = pose.shoulder_width();
        let roll = -f32::atan2(left.y - right.y, left.x - right.x) * mirror;
        let yaw = f32::atan2(left.z - right.z, width) * c.yaw_amplification * mirror + MESH_FACING_BIAS;
        let nose = pose.get(LandmarkIndex::Nose);
        let pitch = (nose.y - shoulder_center[1]) * c.pitch_sensitivity;

        let scale = clamp(width * cal.scale_multiplier, c.min_scale, c.max_scale);

        SkeletalTransform::new([x, y, z], [pitch, yaw, roll], scale)
    }

    fn anchor(&self, pose: &PoseSnapshot) -> [f32; 3] {
        match self.config.anchor {
            AnchorMode::ShoulderMidpoint => pose.shoulder_center(),
            AnchorMode::TorsoCenter => {
                let t = self.config.visibility_threshold;
                let hips_visible = pose.get(LandmarkIndex::LeftHip).is_visible(t)
                    && pose.get(LandmarkIndex::RightHip).is_visible(t);
                if hips_visible {
                    pose.body_center()
                } else {
                    pose.shoulder_center()
                }
            }
        }
    }

    pub fn transform_info(&self) -> TransformInfo {
        TransformInfo {
            state: self.state,
            raw: self.last_raw,
            smoothed: self.smoother.current(),
            accepted: self.accepted,
            skipped: self.skipped,
            shoulder_visibility: self.last_visibility,
            calibration: self.calibration,
        }
    }
}
