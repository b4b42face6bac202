use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::camera::{FrameSource, VideoFrame};
use crate::config::PoseConfig;
use crate::error::InitError;
use crate::math::ema;

use super::detector::{DetectorOptions, LandmarkDetector};
use super::landmark::{Landmark, LandmarkIndex, PoseSnapshot};

pub type PoseReceiver = watch::Receiver<Option<Arc<PoseSnapshot>>>;

/// process_frame 1回の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 前回呼び出しから 1/target_rate 経っていない
    Throttled,
    /// 前回の検出がまだ終わっていない
    Busy,
    /// 停止済み、または停止中に完了した結果を破棄した
    Stopped,
    Detected,
    /// 検出なし（ポーズ消失）
    Lost,
    /// 検出器エラー（このサイクルはスキップ）
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoseSourceStats {
    pub invocations: u64,
    pub throttled: u64,
    pub busy: u64,
    pub detected: u64,
    pub lost: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    invocations: AtomicU64,
    throttled: AtomicU64,
    busy: AtomicU64,
    detected: AtomicU64,
    lost: AtomicU64,
    errors: AtomicU64,
}

struct Gate {
    last_invocation: Option<Instant>,
    in_flight: bool,
    /// 平滑化済みの前回値。ポーズ消失で破棄する
    smoothed: Option<[Landmark; LandmarkIndex::COUNT]>,
}

struct Inner {
    detector: tokio::sync::Mutex<Box<dyn LandmarkDetector>>,
    options: DetectorOptions,
    min_interval: Duration,
    /// EMA 係数 (= 1 - smoothing)
    alpha: f32,
    gate: Mutex<Gate>,
    stopped: AtomicBool,
    cancel: CancellationToken,
    tx: watch::Sender<Option<Arc<PoseSnapshot>>>,
    counters: Counters,
}

/// 外部検出器をラップし、レート制限・単一実行・EMA 平滑化を行うポーズソース
#[derive(Clone)]
pub struct PoseSource {
    inner: Arc<Inner>,
}

/// 検出の最小間隔。不正なレートは既定の 30Hz とみなす
fn min_interval(target_rate_hz: f32) -> Duration {
    let rate = if target_rate_hz.is_finite() && target_rate_hz > 0.0 {
        target_rate_hz
    } else {
        tracing::warn!("invalid pose rate {}, using 30Hz", target_rate_hz);
        30.0
    };
    Duration::from_secs_f64(1.0 / rate as f64)
}

/// in_flight フラグを drop 時に必ず戻す
struct InFlightGuard<'a> {
    gate: &'a Mutex<Gate>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gate.lock().in_flight = false;
    }
}

impl PoseSource {
    pub fn new(detector: Box<dyn LandmarkDetector>, config: &PoseConfig) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                detector: tokio::sync::Mutex::new(detector),
                options: DetectorOptions::from_config(config),
                min_interval: min_interval(config.target_rate_hz),
                alpha: 1.0 - config.smoothing,
                gate: Mutex::new(Gate {
                    last_invocation: None,
                    in_flight: false,
                    smoothed: None,
                }),
                stopped: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tx,
                counters: Counters::default(),
            }),
        }
    }

    /// 検出器の利用可否を確認する。失敗したら起動を中断する
    pub async fn initialize(&self) -> Result<(), InitError> {
        let mut detector = self.inner.detector.lock().await;
        detector
            .initialize(self.inner.options)
            .await
            .map_err(|e| InitError::Detector(e.to_string()))?;
        tracing::info!(
            "pose detector ready (complexity={}, min_detection={}, segmentation={})",
            self.inner.options.model_complexity,
            self.inner.options.min_detection_confidence,
            self.inner.options.enable_segmentation
        );
        Ok(())
    }

    /// 最新スナップショットの購読（古い値は上書きされる）
    pub fn subscribe(&self) -> PoseReceiver {
        self.inner.tx.subscribe()
    }

    /// コールバック形式の購読。ポーズ消失時は None が渡る
    pub fn on_pose_update<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Option<&PoseSnapshot>) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = rx.borrow_and_update().clone();
                        callback(snapshot.as_deref());
                    }
                }
            }
        })
    }

    pub fn latest(&self) -> Option<Arc<PoseSnapshot>> {
        self.inner.tx.borrow().clone()
    }

    pub fn stats(&self) -> PoseSourceStats {
        let c = &self.inner.counters;
        PoseSourceStats {
            invocations: c.invocations.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
            busy: c.busy.load(Ordering::Relaxed),
            detected: c.detected.load(Ordering::Relaxed),
            lost: c.lost.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// 1フレーム分の処理
    ///
    /// 前回の検出呼び出しから 1/target_rate 秒経っていない場合、
    /// または前回の検出が未完了の場合は検出器を呼ばない。
    pub async fn process_frame(&self, frame: VideoFrame) -> ProcessOutcome {
        let inner = &*self.inner;
        if self.is_stopped() {
            return ProcessOutcome::Stopped;
        }

        let now = Instant::now();
        {
            let mut gate = inner.gate.lock();
            if gate.in_flight {
                inner.counters.busy.fetch_add(1, Ordering::Relaxed);
                return ProcessOutcome::Busy;
            }
            if let Some(last) = gate.last_invocation {
                if now.saturating_duration_since(last) < inner.min_interval {
                    inner.counters.throttled.fetch_add(1, Ordering::Relaxed);
                    return ProcessOutcome::Throttled;
                }
            }
            gate.in_flight = true;
            gate.last_invocation = Some(now);
        }
        let _guard = InFlightGuard { gate: &inner.gate };

        inner.counters.invocations.fetch_add(1, Ordering::Relaxed);
        let result = {
            let mut detector = inner.detector.lock().await;
            detector.detect(&frame).await
        };

        // 停止後に返ってきた結果は捨てる
        if self.is_stopped() {
            return ProcessOutcome::Stopped;
        }

        match result {
            Err(e) => {
                inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("pose detection failed: {}", e);
                ProcessOutcome::Failed
            }
            Ok(Some(landmarks)) if landmarks.len() == LandmarkIndex::COUNT => {
                let snapshot = self.smooth(&landmarks, frame.timestamp);
                inner.counters.detected.fetch_add(1, Ordering::Relaxed);
                inner.tx.send_replace(Some(Arc::new(snapshot)));
                ProcessOutcome::Detected
            }
            Ok(partial) => {
                if let Some(ref lm) = partial {
                    tracing::debug!("discarding partial pose ({} landmarks)", lm.len());
                }
                self.clear();
                inner.counters.lost.fetch_add(1, Ordering::Relaxed);
                ProcessOutcome::Lost
            }
        }
    }

    /// ランドマークごと・軸ごとの EMA。visibility は生値
    fn smooth(&self, landmarks: &[Landmark], timestamp: Instant) -> PoseSnapshot {
        let alpha = self.inner.alpha;
        let mut gate = self.inner.gate.lock();
        let mut out = [Landmark::default(); LandmarkIndex::COUNT];
        for (i, cur) in landmarks.iter().enumerate().take(LandmarkIndex::COUNT) {
            out[i] = match gate.smoothed {
                Some(ref prev) => Landmark::new(
                    ema(prev[i].x, cur.x, alpha),
                    ema(prev[i].y, cur.y, alpha),
                    ema(prev[i].z, cur.z, alpha),
                    cur.visibility,
                ),
                None => *cur,
            };
        }
        gate.smoothed = Some(out);
        PoseSnapshot::new(out, timestamp)
    }

    /// ポーズ消失: 平滑化状態も含めて破棄する
    fn clear(&self) {
        self.inner.gate.lock().smoothed = None;
        self.inner.tx.send_if_modified(|current| {
            if current.is_some() {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    /// フレームソースをポーリングし、新フレームごとに process_frame を起動する
    ///
    /// 各フレームの処理は独立タスクで走り、重複は process_frame 側で弾く。
    pub fn start(&self, frames: Arc<dyn FrameSource>, poll_interval: Duration) -> JoinHandle<()> {
        let source = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            let mut last_frame_id = 0u64;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let frame_id = frames.frame_id();
                if frame_id == last_frame_id {
                    continue;
                }
                last_frame_id = frame_id;
                let Some(frame) = frames.latest_frame() else {
                    continue;
                };
                let worker = source.clone();
                tokio::spawn(async move {
                    worker.process_frame(frame).await;
                });
            }
            tracing::debug!("pose polling stopped");
        })
    }

    /// 以後の検出呼び出しを止める。実行中の呼び出しは完了させ、結果を捨てる
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.cancel.cancel();
        self.clear();
    }
}
