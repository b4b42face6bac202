use std::time::Duration;
use tokio::time::Instant;

/// vsync 周期の丸め誤差を吸収する幅
const TOLERANCE: Duration = Duration::from_micros(500);

/// vsync ごとに呼ばれ、前回採用から 1/target_fps 経っていれば採用する
///
/// 採用間隔は常に interval 以上 (TOLERANCE 分の誤差を除く)。
/// vsync が目標の整数倍でない場合は、目標より最大 1 vsync 分遅くなる。
pub struct FrameLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl FrameLimiter {
    pub fn new(target_fps: f32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / target_fps.max(0.001) as f64),
            last: None,
        }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) + TOLERANCE < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted_in_one_second(vsync_hz: f64, target_fps: f32) -> usize {
        let mut limiter = FrameLimiter::new(target_fps);
        let start = Instant::now();
        let tick = Duration::from_secs_f64(1.0 / vsync_hz);
        (0..vsync_hz as u32)
            .filter(|&i| limiter.accept(start + tick * i))
            .count()
    }

    #[test]
    fn test_first_call_accepted() {
        let mut limiter = FrameLimiter::new(30.0);
        assert!(limiter.accept(Instant::now()));
    }

    #[test]
    fn test_120hz_vsync_capped_to_30fps() {
        let n = accepted_in_one_second(120.0, 30.0);
        assert!((28..=32).contains(&n), "accepted = {}", n);
    }

    #[test]
    fn test_144hz_vsync_capped_to_30fps() {
        let n = accepted_in_one_second(144.0, 30.0);
        assert!((28..=32).contains(&n), "accepted = {}", n);
    }

    fn min_accepted_gap(vsync_hz: f64, target_fps: f32) -> Duration {
        let mut limiter = FrameLimiter::new(target_fps);
        let start = Instant::now();
        let tick = Duration::from_secs_f64(1.0 / vsync_hz);
        let accepted: Vec<Instant> = (0..vsync_hz as u32 * 2)
            .map(|i| start + tick * i)
            .filter(|&t| limiter.accept(t))
            .collect();
        accepted
            .windows(2)
            .map(|w| w[1] - w[0])
            .min()
            .unwrap_or(Duration::MAX)
    }

    #[test]
    fn test_accepted_frames_never_closer_than_interval() {
        let interval = Duration::from_secs_f64(1.0 / 30.0);
        for hz in [60.0, 120.0, 144.0] {
            let gap = min_accepted_gap(hz, 30.0);
            // vsync 周期の ns 丸め分だけ許容
            assert!(gap + Duration::from_micros(1) >= interval, "{}Hz: gap = {:?}", hz, gap);
        }
        let gap = min_accepted_gap(144.0, 30.0);
        assert!(gap >= Duration::from_millis(34), "gap = {:?}", gap);
    }

    #[test]
    fn test_60hz_vsync_capped_to_30fps() {
        assert_eq!(accepted_in_one_second(60.0, 30.0), 30);
    }

    #[test]
    fn test_slow_vsync_never_exceeds_source_rate() {
        // 目標より遅い場合はそのまま全部採用
        assert_eq!(accepted_in_one_second(20.0, 30.0), 20);
    }

    #[test]
    fn test_rejects_within_interval() {
        let mut limiter = FrameLimiter::new(30.0);
        let t0 = Instant::now();
        assert!(limiter.accept(t0));
        assert!(!limiter.accept(t0 + Duration::from_millis(20)));
        assert!(limiter.accept(t0 + Duration::from_millis(34)));
    }
}
