use std::collections::VecDeque;
use tokio::time::Instant;

/// 直近 N フレームの瞬間 FPS の移動平均
pub struct FpsMeter {
    samples: VecDeque<f32>,
    capacity: usize,
    last: Option<Instant>,
}

impl FpsMeter {
    pub const WINDOW: usize = 10;

    pub fn new() -> Self {
        Self::with_capacity(Self::WINDOW)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            last: None,
        }
    }

    /// 採用フレームの時刻を記録
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f32();
            if dt > 0.0 {
                if self.samples.len() == self.capacity {
                    self.samples.pop_front();
                }
                self.samples.push_back(1.0 / dt);
            }
        }
        self.last = Some(now);
    }

    pub fn average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// サンプルだけ捨てる（直前の時刻は保持）
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}
