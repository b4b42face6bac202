use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::{ConnectionState, EnhancementChannel};
use super::protocol::{KeyframeMessage, PosePayload};
use crate::camera::FrameSource;
use crate::codec;
use crate::error::RenderError;
use crate::material::MaterialBinder;
use crate::pose::PoseReceiver;
use crate::scene::SharedScene;

/// 一定間隔でカメラ画像・衣服レンダ・ポーズをまとめて送る
///
/// 接続中でなければキャプチャ自体を行わない。
pub struct KeyframeScheduler {
    channel: EnhancementChannel,
    scene: SharedScene,
    frames: Arc<dyn FrameSource>,
    poses: PoseReceiver,
    binder: Arc<MaterialBinder>,
    interval: Duration,
    jpeg_quality: u8,
}

impl KeyframeScheduler {
    pub fn new(
        channel: EnhancementChannel,
        scene: SharedScene,
        frames: Arc<dyn FrameSource>,
        poses: PoseReceiver,
        binder: Arc<MaterialBinder>,
        interval: Duration,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            channel,
            scene,
            frames,
            poses,
            binder,
            interval,
            jpeg_quality,
        }
    }

    /// 今この瞬間のキーフレームを組み立てる。未接続・カメラ未着なら None
    pub fn build(&self) -> Result<Option<KeyframeMessage>, RenderError> {
        if self.channel.state() != ConnectionState::Connected {
            return Ok(None);
        }
        let Some(frame) = self.frames.latest_frame() else {
            return Ok(None);
        };
        let camera_frame = codec::encode_jpeg_data_uri(&frame.image, self.jpeg_quality)
            .map_err(|e| RenderError::Encode(e.to_string()))?;
        let jacket_render = self.scene.lock().capture()?;
        let pose = self.poses.borrow().as_deref().map(PosePayload::from_snapshot);
        let fabric_id = self.binder.current_fabric().map(|f| f.id);

        Ok(Some(KeyframeMessage::new(
            chrono::Utc::now().timestamp_millis(),
            camera_frame,
            jacket_render,
            pose,
            fabric_id,
        )))
    }

    /// 1回分: 組み立てて送る。送れたら true
    pub fn tick(&self) -> bool {
        match self.build() {
            Ok(Some(message)) => {
                let sent = self.channel.send_keyframe(&message);
                if sent {
                    debug!("keyframe queued (fabric={:?})", message.fabric_id);
                }
                sent
            }
            Ok(None) => false,
            Err(e) => {
                warn!("keyframe capture failed: {}", e);
                false
            }
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 最初の tick は即時なので読み捨てる
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick();
                    }
                }
            }
            debug!("keyframe scheduler stopped");
        })
    }
}
