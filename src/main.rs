use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lucy_tryon::camera::{FrameSource, StillFrameSource};
use lucy_tryon::config::Config;
use lucy_tryon::pose::{PoseRecording, ReplayDetector};
#[cfg(feature = "desktop")]
use lucy_tryon::render::DisplaySink;
use lucy_tryon::render::HeadlessSink;
use lucy_tryon::session::{SessionDeps, TryOnSession};

/// 記録済みポーズと静止画背景でバーチャル試着を再生する
#[derive(Parser, Debug)]
#[command(name = "lucy_tryon", version = env!("TRYON_BUILD"))]
struct Args {
    /// 設定ファイル
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// 記録済みランドマーク (JSON)
    #[arg(long)]
    replay: PathBuf,
    /// 背景画像。未指定なら灰色
    #[arg(long)]
    background: Option<PathBuf>,
    /// 衣服メッシュ (JSON)
    #[arg(long)]
    garment: Option<String>,
    /// 起動時に適用するファブリックID
    #[arg(long)]
    fabric: Option<String>,
    /// 再生時間 (秒)
    #[arg(long, default_value_t = 10.0)]
    duration: f64,
    /// 最終フレームの保存先 (PNG)
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Lucy Try-On ({})", env!("TRYON_BUILD"));

    let mut config = Config::load_or_default(&args.config);
    if let Some(ref garment) = args.garment {
        config.scene.garment_path = Some(garment.clone());
    }
    if let Some(ref fabric) = args.fabric {
        config.material.default_fabric = Some(fabric.clone());
    }
    config.validate().context("invalid configuration")?;

    let recording = PoseRecording::load(&args.replay)?;
    info!("replay: {} frames from {}", recording.frames.len(), args.replay.display());
    let frames: Arc<dyn FrameSource> = match args.background {
        Some(ref path) => Arc::new(StillFrameSource::open(path)?),
        None => Arc::new(StillFrameSource::solid(
            config.scene.viewport_width,
            config.scene.viewport_height,
            [96, 96, 96, 255],
        )),
    };
    let detector = Box::new(ReplayDetector::new(recording));
    let duration = Duration::from_secs_f64(args.duration.max(0.0));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    run(runtime, config, detector, frames, duration, args.output.as_deref())
}

#[cfg(not(feature = "desktop"))]
fn run(
    runtime: tokio::runtime::Runtime,
    config: Config,
    detector: Box<ReplayDetector>,
    frames: Arc<dyn FrameSource>,
    duration: Duration,
    output: Option<&Path>,
) -> Result<()> {
    let headless = HeadlessSink::new();
    let deps = SessionDeps::from_config(&config, detector, frames, Box::new(headless.clone()));
    runtime.block_on(async {
        let session = start(config, deps).await?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
        finish(session, &headless, output).await
    })
}

#[cfg(feature = "desktop")]
fn run(
    runtime: tokio::runtime::Runtime,
    config: Config,
    detector: Box<ReplayDetector>,
    frames: Arc<dyn FrameSource>,
    duration: Duration,
    output: Option<&Path>,
) -> Result<()> {
    let headless = HeadlessSink::new();
    let (mut window, window_sink) = lucy_tryon::render::MinifbWindow::new(
        "Lucy Try-On",
        config.scene.viewport_width as usize,
        config.scene.viewport_height as usize,
    )?;
    let sink = Box::new(TeeSink {
        headless: headless.clone(),
        window: window_sink,
    });
    let deps = SessionDeps::from_config(&config, detector, frames, sink);
    let session = runtime.block_on(start(config, deps))?;

    // minifb のウィンドウはメインスレッドから動かす
    let deadline = std::time::Instant::now() + duration;
    while std::time::Instant::now() < deadline {
        if !window.pump()? {
            info!("window closed");
            break;
        }
        std::thread::sleep(Duration::from_millis(16));
    }
    runtime.block_on(finish(session, &headless, output))
}

async fn start(config: Config, deps: SessionDeps) -> Result<TryOnSession> {
    match TryOnSession::start(config, deps).await {
        Ok(session) => Ok(session),
        Err(e) => {
            error!("startup failed: {}", e);
            Err(e).context("failed to start try-on session")
        }
    }
}

async fn finish(session: TryOnSession, headless: &HeadlessSink, output: Option<&Path>) -> Result<()> {
    let stats = session.stats();
    info!(
        "rendered {} frames ({} skipped, {} errors), {:.1} fps at scale {:.2}",
        stats.frames_rendered, stats.frames_skipped, stats.render_errors, stats.fps, stats.render_scale
    );
    if let Some(state) = stats.connection {
        info!(
            "enhancement {:?}: {} keyframes sent, {} results",
            state, stats.keyframes_sent, stats.results_received
        );
    }
    let transform = session.transform_info();
    info!(
        "mapper {:?}: {} accepted, {} skipped",
        transform.state, transform.accepted, transform.skipped
    );
    session.shutdown().await;

    if let Some(path) = output {
        match headless.latest() {
            Some(frame) => {
                frame
                    .save(path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!("final frame written to {}", path.display());
            }
            None => warn!("no frame was rendered; {} not written", path.display()),
        }
    }
    Ok(())
}

/// ウィンドウへ出しつつ最後のフレームを保持する
#[cfg(feature = "desktop")]
struct TeeSink {
    headless: HeadlessSink,
    window: lucy_tryon::render::WindowSink,
}

#[cfg(feature = "desktop")]
impl DisplaySink for TeeSink {
    fn show(&mut self, frame: &image::RgbaImage) -> Result<(), lucy_tryon::error::RenderError> {
        self.headless.show(frame)?;
        self.window.show(frame)
    }
}
