//! 姿勢・変換計算で共通に使う数値ヘルパー

/// 指数移動平均: alpha * current + (1 - alpha) * previous
///
/// alpha = 1.0 で平滑化なし、0.0 で前回値に固定。
pub fn ema(previous: f32, current: f32, alpha: f32) -> f32 {
    alpha * current + (1.0 - alpha) * previous
}

/// 3成分それぞれに EMA を適用
pub fn ema3(previous: &[f32; 3], current: &[f32; 3], alpha: f32) -> [f32; 3] {
    [
        ema(previous[0], current[0], alpha),
        ema(previous[1], current[1], alpha),
        ema(previous[2], current[2], alpha),
    ]
}

/// [min, max] に収める。NaN は min に倒す
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        return min;
    }
    value.max(min).min(max)
}

/// 2D ユークリッド距離
pub fn distance_2d(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    (dx * dx + dy * dy).sqrt()
}

/// cubic ease-out: 1 - (1 - t)^3
pub fn ease_out_cubic(t: f32) -> f32 {
    let t = clamp(t, 0.0, 1.0);
    let inv = 1.0 - t;
    1.0 - inv * inv * inv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_ema_no_smoothing() {
        assert_eq!(ema(1.0, 5.0, 1.0), 5.0);
    }

    #[test]
    fn test_ema_frozen() {
        assert_eq!(ema(1.0, 5.0, 0.0), 1.0);
    }

    #[test]
    fn test_ema_converges_under_constant_input() {
        let mut v = 0.0;
        for _ in 0..200 {
            v = ema(v, 0.75, 0.2);
        }
        assert!(approx_eq(v, 0.75, 1e-5));
    }

    #[test]
    fn test_ema3_per_axis() {
        let r = ema3(&[0.0, 2.0, 4.0], &[2.0, 4.0, 8.0], 0.5);
        assert_eq!(r, [1.0, 3.0, 6.0]);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(5.0, 0.0, 1.0), 1.0);
        assert_eq!(clamp(-5.0, 0.0, 1.0), 0.0);
        assert_eq!(clamp(0.3, 0.0, 1.0), 0.3);
        assert_eq!(clamp(f32::NAN, 0.2, 1.0), 0.2);
    }

    #[test]
    fn test_distance_2d() {
        assert!(approx_eq(distance_2d(0.0, 0.0, 3.0, 4.0), 5.0, 1e-6));
    }

    #[test]
    fn test_ease_out_cubic_endpoints() {
        assert_eq!(ease_out_cubic(0.0), 0.0);
        assert_eq!(ease_out_cubic(1.0), 1.0);
        assert_eq!(ease_out_cubic(2.0), 1.0);
        // ease-out は序盤が速い
        assert!(ease_out_cubic(0.5) > 0.5);
    }
}
