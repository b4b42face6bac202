use nalgebra::{Matrix4, Rotation3, Vector3};
use serde::Serialize;

/// 衣服ノードに書き込む変換
///
/// rotation はラジアンで (x = pitch, y = yaw, z = roll)。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkeletalTransform {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: f32,
}

impl Default for SkeletalTransform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: 1.0,
        }
    }
}

impl SkeletalTransform {
    pub fn new(position: [f32; 3], rotation: [f32; 3], scale: f32) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().chain(self.rotation.iter()).all(|v| v.is_finite())
            && self.scale.is_finite()
    }

    /// モデル行列 (T * R * S)
    pub fn to_matrix(&self) -> Matrix4<f32> {
        let translation = Matrix4::new_translation(&Vector3::from(self.position));
        let rotation =
            Rotation3::from_euler_angles(self.rotation[0], self.rotation[1], self.rotation[2])
                .to_homogeneous();
        translation * rotation * Matrix4::new_scaling(self.scale)
    }
}
