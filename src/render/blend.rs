use std::time::Duration;
use tokio::time::Instant;

use crate::math::ease_out_cubic;

/// 強化フレームの合成アルファ
///
/// 新しいフレームが届くたびに 0 から max_alpha へ cubic ease-out で上げ直す。
/// 遷移の途中でも必ず 0 からやり直す。
pub struct BlendState {
    duration: Duration,
    max_alpha: f32,
    started: Option<Instant>,
}

impl BlendState {
    pub fn new(duration: Duration, max_alpha: f32) -> Self {
        Self {
            duration,
            max_alpha: max_alpha.clamp(0.0, 1.0),
            started: None,
        }
    }

    /// 新しい強化フレームの到着
    pub fn restart(&mut self, now: Instant) {
        self.started = Some(now);
    }

    /// 遷移の進捗 (0.0〜1.0)。開始前は 0
    pub fn progress(&self, now: Instant) -> f32 {
        let Some(start) = self.started else {
            return 0.0;
        };
        if self.duration.is_zero() {
            return 1.0;
        }
        let t = now.saturating_duration_since(start).as_secs_f32() / self.duration.as_secs_f32();
        t.clamp(0.0, 1.0)
    }

    pub fn alpha(&self, now: Instant) -> f32 {
        if self.started.is_none() {
            return 0.0;
        }
        self.max_alpha * ease_out_cubic(self.progress(now))
    }

    /// 遷移中か（完了後は max_alpha のまま保持）
    pub fn is_active(&self, now: Instant) -> bool {
        self.started.is_some() && self.progress(now) < 1.0
    }
}
