use futures::future::BoxFuture;

use crate::camera::VideoFrame;
use crate::config::PoseConfig;
use crate::error::DetectorError;

use super::landmark::Landmark;

/// 検出器へそのまま渡す調整パラメータ（コア側は解釈しない）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub model_complexity: u8,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub enable_segmentation: bool,
}

impl DetectorOptions {
    pub fn from_config(config: &PoseConfig) -> Self {
        Self {
            model_complexity: config.model_complexity,
            min_detection_confidence: config.min_detection_confidence,
            min_tracking_confidence: config.min_tracking_confidence,
            enable_segmentation: config.enable_segmentation,
        }
    }
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self::from_config(&PoseConfig::default())
    }
}

/// 外部のランドマーク検出器 (MediaPipe Pose 等)
///
/// detect は非同期で、結果は「なし」または最大33点。
pub trait LandmarkDetector: Send {
    /// 利用可能か確認して初期化する。失敗は起動エラー扱い
    fn initialize(&mut self, options: DetectorOptions) -> BoxFuture<'_, Result<(), DetectorError>>;

    fn detect<'a>(
        &'a mut self,
        frame: &'a VideoFrame,
    ) -> BoxFuture<'a, Result<Option<Vec<Landmark>>, DetectorError>>;
}
