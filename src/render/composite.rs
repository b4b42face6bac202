use futures::future::BoxFuture;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::blend::BlendState;
use super::fps::FpsMeter;
use super::limiter::FrameLimiter;
use super::skeleton;
use crate::channel::{ConnectionState, EnhancementFrame, EnhancementReceiver};
use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::scene::SharedScene;

/// ディスプレイのリフレッシュ通知
pub trait Vsync: Send {
    fn wait(&mut self) -> BoxFuture<'_, Instant>;
}

/// tokio interval による固定レートの vsync
pub struct IntervalVsync {
    interval: Interval,
}

impl IntervalVsync {
    pub fn new(hz: f32) -> Self {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / hz.max(1.0) as f64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

impl Vsync for IntervalVsync {
    fn wait(&mut self) -> BoxFuture<'_, Instant> {
        Box::pin(self.interval.tick())
    }
}

/// 合成済みフレームの出力先
pub trait DisplaySink: Send {
    fn show(&mut self, frame: &RgbaImage) -> Result<(), RenderError>;
}

/// 画面を持たない出力。最後のフレームだけ保持する
#[derive(Clone, Default)]
pub struct HeadlessSink {
    last: Arc<Mutex<Option<RgbaImage>>>,
    shown: Arc<AtomicU64>,
}

impl HeadlessSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<RgbaImage> {
        self.last.lock().clone()
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }
}

impl DisplaySink for HeadlessSink {
    fn show(&mut self, frame: &RgbaImage) -> Result<(), RenderError> {
        *self.last.lock() = Some(frame.clone());
        self.shown.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderStats {
    /// 直近 10 フレームの平均
    pub fps: f32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub render_scale: f32,
    pub blend_alpha: f32,
    pub blend_progress: f32,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub render_errors: u64,
    /// 強化チャネルを使わないセッションでは None
    pub connection: Option<ConnectionState>,
    pub keyframes_sent: u64,
    pub results_received: u64,
}

/// 映像 + 3D 衣服 + 強化画像を合成して表示するループ
///
/// vsync ごとに呼ばれ、target_fps を超える分は捨てる。
/// 描画に失敗したフレームはログだけ残して次へ進む。
pub struct CompositeRenderLoop {
    scene: SharedScene,
    config: RenderConfig,
    vsync: Box<dyn Vsync>,
    sink: Box<dyn DisplaySink>,
    enhancements: Option<EnhancementReceiver>,
    limiter: FrameLimiter,
    fps: FpsMeter,
    blend: BlendState,
    enhancement: Option<Arc<EnhancementFrame>>,
    /// キャンバスサイズに合わせた強化画像
    resized: Option<RgbaImage>,
    stats: Arc<Mutex<RenderStats>>,
}

impl CompositeRenderLoop {
    pub fn new(
        scene: SharedScene,
        config: &RenderConfig,
        vsync: Box<dyn Vsync>,
        sink: Box<dyn DisplaySink>,
    ) -> Self {
        let (canvas_width, canvas_height) = scene.lock().canvas_size();
        let stats = RenderStats {
            canvas_width,
            canvas_height,
            render_scale: 1.0,
            ..RenderStats::default()
        };
        Self {
            scene,
            config: config.clone(),
            vsync,
            sink,
            enhancements: None,
            limiter: FrameLimiter::new(config.target_fps),
            fps: FpsMeter::new(),
            blend: BlendState::new(
                Duration::from_millis(config.blend_duration_ms),
                config.max_blend_alpha,
            ),
            enhancement: None,
            resized: None,
            stats: Arc::new(Mutex::new(stats)),
        }
    }

    pub fn with_enhancements(mut self, receiver: EnhancementReceiver) -> Self {
        self.enhancements = Some(receiver);
        self
    }

    pub fn stats_handle(&self) -> Arc<Mutex<RenderStats>> {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> RenderStats {
        self.stats.lock().clone()
    }

    /// vsync 1回分。描画したら true
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.limiter.accept(now) {
            self.stats.lock().frames_skipped += 1;
            return false;
        }
        self.fps.record(now);

        let rendered = self.render_frame(now);
        if let Err(ref e) = rendered {
            warn!("frame dropped: {}", e);
        }
        self.adapt_quality();

        let (canvas_width, canvas_height, render_scale) = {
            let scene = self.scene.lock();
            let (w, h) = scene.canvas_size();
            (w, h, scene.render_scale())
        };
        let mut stats = self.stats.lock();
        stats.fps = self.fps.average();
        stats.canvas_width = canvas_width;
        stats.canvas_height = canvas_height;
        stats.render_scale = render_scale;
        stats.blend_alpha = self.blend.alpha(now);
        stats.blend_progress = self.blend.progress(now);
        match rendered {
            Ok(()) => stats.frames_rendered += 1,
            Err(_) => stats.render_errors += 1,
        }
        true
    }

    fn render_frame(&mut self, now: Instant) -> Result<(), RenderError> {
        self.poll_enhancement(now);

        let mut frame = {
            let mut scene = self.scene.lock();
            scene.mark_video_dirty();
            scene.render()?;
            scene.present()
        };

        let alpha = self.blend.alpha(now);
        if alpha > 0.0 {
            if let Some(overlay) = self.overlay_for(frame.dimensions()) {
                blend_over(&mut frame, overlay, alpha);
            }
        }
        if self.blend.is_active(now) {
            skeleton::draw_progress_bar(&mut frame, self.blend.progress(now));
        }
        self.sink.show(&frame)
    }

    fn poll_enhancement(&mut self, now: Instant) {
        let Some(ref mut receiver) = self.enhancements else {
            return;
        };
        if !receiver.has_changed().unwrap_or(false) {
            return;
        }
        let latest = receiver.borrow_and_update().clone();
        if let Some(frame) = latest {
            debug!("new enhancement frame (timestamp {:?})", frame.timestamp);
            self.enhancement = Some(frame);
            self.resized = None;
            self.blend.restart(now);
        }
    }

    fn overlay_for(&mut self, size: (u32, u32)) -> Option<&RgbaImage> {
        let source = self.enhancement.as_ref()?;
        let stale = self.resized.as_ref().map_or(true, |r| r.dimensions() != size);
        if stale {
            let image = if source.image.dimensions() == size {
                (*source.image).clone()
            } else {
                imageops::resize(&*source.image, size.0, size.1, FilterType::Triangle)
            };
            self.resized = Some(image);
        }
        self.resized.as_ref()
    }

    /// 平均 FPS が閾値を下回ったら描画解像度を1段下げる（上げ戻しはしない）
    fn adapt_quality(&mut self) {
        if !self.config.adaptive_quality || !self.fps.is_full() {
            return;
        }
        let average = self.fps.average();
        if average >= self.config.low_fps_threshold {
            return;
        }
        let floor = self.config.min_render_scale;
        let mut scene = self.scene.lock();
        let current = scene.render_scale();
        if current <= floor + 1e-3 {
            return;
        }
        let mut next = (current - self.config.scale_step).max(floor);
        if next - floor < 1e-3 {
            next = floor;
        }
        match scene.set_render_scale(next) {
            Ok(()) => {
                info!(
                    "render scale {:.2} -> {:.2} (avg {:.1} fps)",
                    current, next, average
                );
                self.resized = None;
            }
            Err(e) => warn!("render scale change failed: {}", e),
        }
        // 新しい解像度で測り直す
        self.fps.clear();
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let now = tokio::select! {
                _ = cancel.cancelled() => break,
                now = self.vsync.wait() => now,
            };
            self.tick(now);
        }
        debug!("render loop stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> RenderLoopHandle {
        let stats = self.stats_handle();
        let join = tokio::spawn(self.run(cancel.clone()));
        RenderLoopHandle { cancel, stats, join }
    }
}

/// 実行中の描画ループ
pub struct RenderLoopHandle {
    cancel: CancellationToken,
    stats: Arc<Mutex<RenderStats>>,
    join: JoinHandle<()>,
}

impl RenderLoopHandle {
    pub fn stats(&self) -> RenderStats {
        self.stats.lock().clone()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("render loop ended abnormally: {}", e);
        }
    }
}

/// src をアルファ alpha (× src 自身のアルファ) で dst に重ねる
fn blend_over(dst: &mut RgbaImage, src: &RgbaImage, alpha: f32) {
    for (d, s) in dst.pixels_mut().zip(src.pixels()) {
        let a = alpha * s[3] as f32 / 255.0;
        if a <= 0.0 {
            continue;
        }
        for c in 0..3 {
            d[c] = (d[c] as f32 * (1.0 - a) + s[c] as f32 * a).round().clamp(0.0, 255.0) as u8;
        }
    }
}
