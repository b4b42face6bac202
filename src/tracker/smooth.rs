use crate::config::MapperConfig;
use crate::math::{ema, ema3};

use super::transform::SkeletalTransform;

/// 変換レベルの EMA 平滑化フィルタ
///
/// 位置・回転・スケールにそれぞれ別の係数を使う。
/// ランドマーク側の平滑化とは独立（二重平滑化）。
pub struct TransformSmoother {
    alpha_position: f32,
    alpha_rotation: f32,
    alpha_scale: f32,
    prev: Option<SkeletalTransform>,
}

impl TransformSmoother {
    pub fn new(alpha_position: f32, alpha_rotation: f32, alpha_scale: f32) -> Self {
        Self {
            alpha_position,
            alpha_rotation,
            alpha_scale,
            prev: None,
        }
    }

    pub fn from_config(config: &MapperConfig) -> Self {
        Self::new(config.position_alpha, config.rotation_alpha, config.scale_alpha)
    }

    pub fn apply(&mut self, transform: SkeletalTransform) -> SkeletalTransform {
        let prev = match self.prev {
            Some(prev) => prev,
            None => {
                self.prev = Some(transform);
                return transform;
            }
        };

        let result = SkeletalTransform {
            position: ema3(&prev.position, &transform.position, self.alpha_position),
            rotation: ema3(&prev.rotation, &transform.rotation, self.alpha_rotation),
            scale: ema(prev.scale, transform.scale, self.alpha_scale),
        };
        self.prev = Some(result);
        result
    }

    pub fn current(&self) -> Option<SkeletalTransform> {
        self.prev
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq_3(a: &[f32; 3], b: &[f32; 3], eps: f32) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < eps)
    }

    #[test]
    fn test_first_frame_passthrough() {
        let mut s = TransformSmoother::new(0.5, 0.5, 0.5);
        let t = SkeletalTransform::new([1.0, 2.0, 3.0], [0.1, 0.2, 0.3], 1.5);
        assert_eq!(s.apply(t), t);
    }

    #[test]
    fn test_no_smoothing() {
        let mut s = TransformSmoother::new(1.0, 1.0, 1.0);
        s.apply(SkeletalTransform::default());
        let t = SkeletalTransform::new([1.0, 2.0, 3.0], [0.5, 0.5, 0.5], 2.0);
        assert_eq!(s.apply(t), t);
    }

    #[test]
    fn test_channels_smoothed_independently() {
        let mut s = TransformSmoother::new(0.5, 1.0, 0.0);
        s.apply(SkeletalTransform::new([0.0; 3], [0.0; 3], 1.0));
        let r = s.apply(SkeletalTransform::new([2.0, 4.0, 6.0], [0.3, 0.2, 0.1], 3.0));

        assert!(approx_eq_3(&r.position, &[1.0, 2.0, 3.0], 1e-6));
        assert!(approx_eq_3(&r.rotation, &[0.3, 0.2, 0.1], 1e-6));
        // alpha 0 で固定
        assert_eq!(r.scale, 1.0);
    }

    #[test]
    fn test_reset() {
        let mut s = TransformSmoother::new(0.0, 0.0, 0.0);
        s.apply(SkeletalTransform::default());
        s.reset();
        assert!(s.current().is_none());
        let t = SkeletalTransform::new([4.0, 5.0, 6.0], [0.0; 3], 2.0);
        assert_eq!(s.apply(t), t);
    }
}
