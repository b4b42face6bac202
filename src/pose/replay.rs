use futures::future::BoxFuture;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::camera::VideoFrame;
use crate::error::{DetectorError, InitError};

use super::detector::{DetectorOptions, LandmarkDetector};
use super::landmark::Landmark;

/// 記録済みランドマーク列 (JSON)
///
/// ```json
/// { "frames": [ { "landmarks": [ {"x":0.5,"y":0.3,"z":0.0,"visibility":0.9}, ... ] },
///               { "landmarks": null } ] }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PoseRecording {
    pub frames: Vec<RecordedFrame>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedFrame {
    /// null はその時点で人物が検出されなかったことを表す
    #[serde(default)]
    pub landmarks: Option<Vec<Landmark>>,
}

impl PoseRecording {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, InitError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| InitError::Detector(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| InitError::Detector(format!("{}: {}", path.display(), e)))
    }
}

/// 記録を順に返す検出器。オフライン再生とテストで使う
pub struct ReplayDetector {
    recording: PoseRecording,
    cursor: usize,
    looping: bool,
    latency: Duration,
    initialized: bool,
}

impl ReplayDetector {
    pub fn new(recording: PoseRecording) -> Self {
        Self {
            recording,
            cursor: 0,
            looping: true,
            latency: Duration::ZERO,
            initialized: false,
        }
    }

    /// 末尾で止める（以降は検出なし）
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    /// 1回の検出に掛かる擬似的な時間
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn next_frame(&mut self) -> Option<Vec<Landmark>> {
        let len = self.recording.frames.len();
        if self.cursor >= len {
            if !self.looping || len == 0 {
                return None;
            }
            self.cursor = 0;
        }
        let frame = self.recording.frames[self.cursor].landmarks.clone();
        self.cursor += 1;
        frame
    }
}

impl LandmarkDetector for ReplayDetector {
    fn initialize(&mut self, options: DetectorOptions) -> BoxFuture<'_, Result<(), DetectorError>> {
        Box::pin(async move {
            if self.recording.frames.is_empty() {
                return Err(DetectorError::Failed("recording has no frames".into()));
            }
            tracing::debug!(
                "replaying {} recorded frames (complexity {} ignored)",
                self.recording.frames.len(),
                options.model_complexity
            );
            self.initialized = true;
            Ok(())
        })
    }

    fn detect<'a>(
        &'a mut self,
        _frame: &'a VideoFrame,
    ) -> BoxFuture<'a, Result<Option<Vec<Landmark>>, DetectorError>> {
        Box::pin(async move {
            if !self.initialized {
                return Err(DetectorError::NotInitialized);
            }
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            Ok(self.next_frame())
        })
    }
}
