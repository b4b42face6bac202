//! Explicit wiring of the try-on pipeline.
//!
//! Every component is constructed once in [`TryOnSession::start`] and handed to its
//! collaborators by handle. Nothing here is global; tests build sessions with fake
//! detectors, frame sources, connectors and sinks through [`SessionDeps`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::camera::FrameSource;
use crate::channel::{
    ChannelStats, ConnectionState, Connector, EnhancementChannel, KeyframeScheduler, WebSocketConnector,
};
use crate::config::{CalibrationProfile, Config};
use crate::error::{ConfigError, FabricError, InitError, RenderError};
use crate::material::{Fabric, FabricCatalog, FileTextureLoader, MaterialBinder, TextureLoader};
use crate::pose::{LandmarkDetector, PoseReceiver, PoseSnapshot, PoseSource, PoseSourceStats};
use crate::render::{CompositeRenderLoop, DisplaySink, IntervalVsync, RenderLoopHandle, RenderStats, Vsync};
use crate::scene::{GarmentLoader, GarmentNode, JsonGarmentLoader, Scene, SharedScene, BUILTIN_JACKET};
use crate::tracker::{SkeletalMapper, TransformInfo};

/// セッションが外から受け取る依存
pub struct SessionDeps {
    pub detector: Box<dyn LandmarkDetector>,
    pub frames: Arc<dyn FrameSource>,
    pub garment_loader: Arc<dyn GarmentLoader>,
    pub texture_loader: Arc<dyn TextureLoader>,
    /// None なら強化チャネルを使わない
    pub connector: Option<Arc<dyn Connector>>,
    pub vsync: Box<dyn Vsync>,
    pub sink: Box<dyn DisplaySink>,
    pub catalog: FabricCatalog,
}

impl SessionDeps {
    /// 設定から標準の実装を組み立てる
    pub fn from_config(
        config: &Config,
        detector: Box<dyn LandmarkDetector>,
        frames: Arc<dyn FrameSource>,
        sink: Box<dyn DisplaySink>,
    ) -> Self {
        let connector: Option<Arc<dyn Connector>> = if config.channel.enabled {
            Some(Arc::new(WebSocketConnector))
        } else {
            None
        };
        Self {
            detector,
            frames,
            garment_loader: Arc::new(JsonGarmentLoader::default()),
            texture_loader: Arc::new(FileTextureLoader::new(&config.material.texture_root)),
            connector,
            vsync: Box::new(IntervalVsync::new(config.render.vsync_hz)),
            sink,
            catalog: FabricCatalog::load_or_default(config.material.catalog_path.as_deref()),
        }
    }
}

pub struct TryOnSession {
    config: Config,
    pose: PoseSource,
    mapper: Arc<Mutex<SkeletalMapper>>,
    scene: SharedScene,
    binder: Arc<MaterialBinder>,
    catalog: FabricCatalog,
    channel: Option<EnhancementChannel>,
    render: RenderLoopHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TryOnSession {
    /// 全コンポーネントを構築して動かし始める
    ///
    /// カメラ・検出器・衣服アセットのどれかが使えなければ InitError で中断する。
    /// 強化チャネルの接続失敗は起動を止めない。
    pub async fn start(config: Config, deps: SessionDeps) -> Result<Self, InitError> {
        config.validate()?;

        let (frame_w, frame_h) = deps.frames.resolution();
        if frame_w == 0 || frame_h == 0 {
            return Err(InitError::Camera("frame source reports zero resolution".into()));
        }

        let pose = PoseSource::new(deps.detector, &config.pose);
        pose.initialize().await?;

        let uri = config.scene.garment_path.as_deref().unwrap_or(BUILTIN_JACKET);
        let asset = deps.garment_loader.load(uri).await?;
        let garment = GarmentNode::shared();
        garment.lock().set_asset(Arc::new(asset));

        let mut scene = Scene::new(&config.scene, Arc::clone(&garment))
            .map_err(|e| ConfigError::invalid("scene.viewport", e.to_string()))?;
        scene.attach_video(Arc::clone(&deps.frames));
        let scene = scene.shared();

        let mut mapper = SkeletalMapper::new(&config.mapper, config.calibration, Arc::clone(&garment));
        mapper.initialize(config.scene.viewport_width, config.scene.viewport_height);
        let mapper = Arc::new(Mutex::new(mapper));

        let binder = Arc::new(MaterialBinder::new(
            garment,
            deps.texture_loader,
            config.material.texture_repeat,
        ));
        if let Some(ref id) = config.material.default_fabric {
            let applied = match deps.catalog.get(id) {
                Ok(fabric) => binder.apply_fabric(fabric).await,
                Err(e) => Err(e),
            };
            if let Err(e) = applied {
                warn!("default fabric not applied: {}", e);
            }
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(forward_poses(
            &pose,
            Arc::clone(&mapper),
            Arc::clone(&scene),
            config.debug.pose_overlay,
            config.mapper.visibility_threshold,
        ));
        tasks.push(pose.start(
            Arc::clone(&deps.frames),
            Duration::from_millis(config.pose.poll_interval_ms),
        ));

        let channel = match deps.connector {
            Some(connector) if config.channel.enabled => {
                let channel = EnhancementChannel::new(config.channel.clone(), connector);
                let connecting = channel.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = connecting.connect().await {
                        warn!("enhancement channel unavailable for now: {}", e);
                    }
                }));
                let scheduler = KeyframeScheduler::new(
                    channel.clone(),
                    Arc::clone(&scene),
                    Arc::clone(&deps.frames),
                    pose.subscribe(),
                    Arc::clone(&binder),
                    Duration::from_millis(config.channel.keyframe_interval_ms),
                    config.channel.camera_jpeg_quality,
                );
                tasks.push(scheduler.spawn(cancel.child_token()));
                Some(channel)
            }
            _ => None,
        };

        let mut render = CompositeRenderLoop::new(Arc::clone(&scene), &config.render, deps.vsync, deps.sink);
        if let Some(ref channel) = channel {
            render = render.with_enhancements(channel.subscribe());
        }
        let render = render.spawn(cancel.child_token());

        info!(
            "try-on session started ({}x{}, garment {}, enhancement {})",
            config.scene.viewport_width,
            config.scene.viewport_height,
            uri,
            if channel.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            pose,
            mapper,
            scene,
            binder,
            catalog: deps.catalog,
            channel,
            render,
            cancel,
            tasks,
        })
    }

    /// 描画統計に接続状態を重ねたもの
    pub fn stats(&self) -> RenderStats {
        let mut stats = self.render.stats();
        if let Some(ref channel) = self.channel {
            let channel_stats = channel.stats();
            stats.connection = Some(channel.state());
            stats.keyframes_sent = channel_stats.keyframes_sent;
            stats.results_received = channel_stats.results_received;
        }
        stats
    }

    pub fn pose_stats(&self) -> PoseSourceStats {
        self.pose.stats()
    }

    pub fn channel_stats(&self) -> Option<ChannelStats> {
        self.channel.as_ref().map(EnhancementChannel::stats)
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.channel.as_ref().map(EnhancementChannel::state)
    }

    pub fn transform_info(&self) -> TransformInfo {
        self.mapper.lock().transform_info()
    }

    pub fn subscribe_pose(&self) -> PoseReceiver {
        self.pose.subscribe()
    }

    pub fn on_pose_update<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(Option<&PoseSnapshot>) + Send + 'static,
    {
        self.pose.on_pose_update(callback)
    }

    pub fn catalog(&self) -> &FabricCatalog {
        &self.catalog
    }

    pub fn current_fabric(&self) -> Option<Fabric> {
        self.binder.current_fabric()
    }

    /// カタログのファブリックを適用する。失敗しても前のファブリックのまま
    pub async fn apply_fabric(&self, id: &str) -> Result<(), FabricError> {
        let fabric = self.catalog.get(id)?.clone();
        self.binder.apply_fabric(&fabric).await
    }

    /// カタログ外のファブリック（スキャン結果など）を適用する
    pub async fn apply_custom_fabric(&self, fabric: &Fabric) -> Result<(), FabricError> {
        self.binder.apply_fabric(fabric).await
    }

    pub fn calibration(&self) -> CalibrationProfile {
        self.mapper.lock().calibration()
    }

    pub fn set_calibration(&self, calibration: CalibrationProfile) {
        self.mapper.lock().set_calibration(calibration);
    }

    /// 表示サイズの変更（カメラのアスペクトと写像の横幅も追従）
    pub fn set_viewport(&self, width: u32, height: u32) -> Result<(), RenderError> {
        self.scene.lock().update_viewport(width, height)?;
        self.mapper.lock().set_viewport(width, height);
        Ok(())
    }

    /// 衣服だけの静止画 (PNG data URI)
    pub fn capture(&self) -> Result<String, RenderError> {
        self.scene.lock().capture()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 全タスクを止める。強化チャネルは再接続しない
    pub async fn shutdown(self) {
        self.pose.stop();
        self.cancel.cancel();
        self.render.stop().await;
        if let Some(ref channel) = self.channel {
            channel.close().await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("session task ended abnormally: {}", e);
                }
            }
        }
        info!("try-on session stopped");
    }
}

/// ポーズ更新を写像へ流し、必要ならデバッグ骨格も更新する
fn forward_poses(
    pose: &PoseSource,
    mapper: Arc<Mutex<SkeletalMapper>>,
    scene: SharedScene,
    overlay: bool,
    visibility_threshold: f32,
) -> JoinHandle<()> {
    pose.on_pose_update(move |snapshot| {
        mapper.lock().update(snapshot);
        if overlay {
            scene
                .lock()
                .set_debug_pose(snapshot.cloned().map(Arc::new), visibility_threshold);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::StillFrameSource;
    use crate::channel::client::tests::FakeConnector;
    use crate::config::SceneConfig;
    use crate::material::Color;
    use crate::pose::landmark::tests::standing_landmarks;
    use crate::pose::replay::RecordedFrame;
    use crate::pose::{PoseRecording, ReplayDetector};
    use crate::render::HeadlessSink;
    use crate::tracker::MapperState;

    fn test_config() -> Config {
        Config {
            scene: SceneConfig {
                viewport_width: 64,
                viewport_height: 48,
                ..SceneConfig::default()
            },
            ..Config::default()
        }
    }

    fn standing_recording() -> PoseRecording {
        PoseRecording {
            frames: vec![RecordedFrame {
                landmarks: Some(standing_landmarks().to_vec()),
            }],
        }
    }

    fn deps(recording: PoseRecording, connector: Option<Arc<dyn Connector>>, sink: HeadlessSink) -> SessionDeps {
        SessionDeps {
            detector: Box::new(ReplayDetector::new(recording)),
            frames: Arc::new(StillFrameSource::solid(32, 24, [40, 40, 40, 255])),
            garment_loader: Arc::new(JsonGarmentLoader::default()),
            texture_loader: Arc::new(FileTextureLoader::new(".")),
            connector,
            vsync: Box::new(IntervalVsync::new(60.0)),
            sink: Box::new(sink),
            catalog: FabricCatalog::new(vec![
                Fabric::solid("navy", "Navy", Color::rgb(20, 30, 80)),
                Fabric::solid("red", "Red", Color::rgb(200, 20, 20)),
            ]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_headless_session_tracks_and_renders() {
        let sink = HeadlessSink::new();
        let session = TryOnSession::start(test_config(), deps(standing_recording(), None, sink.clone()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;

        let info = session.transform_info();
        assert_eq!(info.state, MapperState::Ready);
        assert!(info.accepted > 0);
        assert!(info.smoothed.unwrap().is_finite());

        let stats = session.stats();
        assert!(stats.frames_rendered > 0);
        assert_eq!(stats.connection, None);
        assert!(sink.frames_shown() > 0);
        assert!(session.pose_stats().detected > 0);

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_failure_aborts_start() {
        let empty = PoseRecording { frames: Vec::new() };
        let result = TryOnSession::start(test_config(), deps(empty, None, HeadlessSink::new())).await;
        assert!(matches!(result, Err(InitError::Detector(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_garment_aborts_start() {
        let mut config = test_config();
        config.scene.garment_path = Some("no/such/garment.json".into());
        let result = TryOnSession::start(config, deps(standing_recording(), None, HeadlessSink::new())).await;
        assert!(matches!(result, Err(InitError::GarmentAsset { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_aborts_start() {
        let mut config = test_config();
        config.mapper.min_scale = 5.0;
        let result = TryOnSession::start(config, deps(standing_recording(), None, HeadlessSink::new())).await;
        assert!(matches!(result, Err(InitError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_fabric_by_id() {
        let mut config = test_config();
        config.material.default_fabric = Some("navy".into());
        let session = TryOnSession::start(config, deps(standing_recording(), None, HeadlessSink::new()))
            .await
            .unwrap();
        assert_eq!(session.current_fabric().unwrap().id, "navy");

        session.apply_fabric("red").await.unwrap();
        assert_eq!(session.current_fabric().unwrap().id, "red");

        let err = session.apply_fabric("silk").await.unwrap_err();
        assert!(matches!(err, FabricError::UnknownFabric(_)));
        assert_eq!(session.current_fabric().unwrap().id, "red");

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_override() {
        let session = TryOnSession::start(test_config(), deps(standing_recording(), None, HeadlessSink::new()))
            .await
            .unwrap();
        let calibration = CalibrationProfile {
            vertical_offset: -0.5,
            ..CalibrationProfile::default()
        };
        session.set_calibration(calibration);
        assert_eq!(session.calibration(), calibration);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enhancement_channel_sends_keyframes() {
        let connector = FakeConnector::new(0);
        let session = TryOnSession::start(
            test_config(),
            deps(standing_recording(), Some(connector.clone()), HeadlessSink::new()),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        let stats = session.stats();
        assert_eq!(stats.connection, Some(ConnectionState::Connected));
        assert!(stats.keyframes_sent >= 1);

        session.shutdown().await;
        assert_eq!(connector.calls(), 1);
    }
}
