use image::RgbaImage;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use crate::error::InitError;

/// カメラ1フレーム (RGBA)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: Arc<RgbaImage>,
    pub timestamp: Instant,
}

impl VideoFrame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            timestamp: Instant::now(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// 最新フレームを提供するソース
///
/// frame_id は新フレームが届くたびに増える。利用側は前回の id と比べて
/// 新フレームかどうかを判断する。
pub trait FrameSource: Send + Sync {
    fn frame_id(&self) -> u64;

    /// 最新フレーム。初回フレーム到着前のみ None
    fn latest_frame(&self) -> Option<VideoFrame>;

    fn resolution(&self) -> (u32, u32);
}

/// 外部のキャプチャ側が push する共有フレームスロット
pub struct SharedFrameSource {
    latest: Mutex<Option<VideoFrame>>,
    frame_id: AtomicU64,
    width: u32,
    height: u32,
}

impl SharedFrameSource {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            latest: Mutex::new(None),
            frame_id: AtomicU64::new(0),
            width,
            height,
        })
    }

    /// 新フレームを書き込む（古いフレームは捨てる）
    pub fn push(&self, frame: VideoFrame) {
        *self.latest.lock() = Some(frame);
        self.frame_id.fetch_add(1, Ordering::Release);
    }
}

impl FrameSource for SharedFrameSource {
    fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        self.latest.lock().clone()
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// 静止画を毎回新フレームとして返すソース（オフライン再生用）
pub struct StillFrameSource {
    image: Arc<RgbaImage>,
    counter: AtomicU64,
}

impl StillFrameSource {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            counter: AtomicU64::new(0),
        }
    }

    /// 画像ファイルから作成
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, InitError> {
        let image = image::open(path.as_ref())
            .map_err(|e| InitError::Camera(format!("{}: {}", path.as_ref().display(), e)))?
            .to_rgba8();
        Ok(Self::new(image))
    }

    /// 単色フレーム
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }
}

impl FrameSource for StillFrameSource {
    fn frame_id(&self) -> u64 {
        // 呼ばれるたびに新フレーム扱い
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn latest_frame(&self) -> Option<VideoFrame> {
        Some(VideoFrame {
            image: Arc::clone(&self.image),
            timestamp: Instant::now(),
        })
    }

    fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_source_empty_until_push() {
        let source = SharedFrameSource::new(4, 4);
        assert_eq!(source.frame_id(), 0);
        assert!(source.latest_frame().is_none());

        source.push(VideoFrame::new(RgbaImage::new(4, 4)));
        assert_eq!(source.frame_id(), 1);
        assert_eq!(source.latest_frame().unwrap().size(), (4, 4));
    }

    #[test]
    fn test_shared_source_keeps_latest_only() {
        let source = SharedFrameSource::new(2, 2);
        source.push(VideoFrame::new(RgbaImage::from_pixel(2, 2, image::Rgba([1, 0, 0, 255]))));
        source.push(VideoFrame::new(RgbaImage::from_pixel(2, 2, image::Rgba([9, 0, 0, 255]))));
        assert_eq!(source.frame_id(), 2);
        assert_eq!(source.latest_frame().unwrap().image.get_pixel(0, 0)[0], 9);
    }

    #[test]
    fn test_still_source_always_new() {
        let source = StillFrameSource::solid(8, 6, [10, 20, 30, 255]);
        let a = source.frame_id();
        let b = source.frame_id();
        assert!(b > a);
        assert_eq!(source.resolution(), (8, 6));
    }

    #[test]
    fn test_still_source_missing_file() {
        assert!(StillFrameSource::open("no/such/background.png").is_err());
    }
}
