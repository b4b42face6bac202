//! Error types.
//!
//! 起動時の致命的エラー (InitError) と、サイクル単位で握りつぶされる一過性エラー
//! (DetectorError / RenderError / FabricError)、接続エラー (ChannelError) を分けて扱う。

use thiserror::Error;

/// 設定値の検証エラー
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// 起動を中断する初期化エラー（自動リトライしない）
#[derive(Error, Debug)]
pub enum InitError {
    #[error("camera unavailable: {0}")]
    Camera(String),

    #[error("pose detector unavailable: {0}")]
    Detector(String),

    #[error("garment asset `{path}` could not be loaded: {reason}")]
    GarmentAsset { path: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// 検出器1回分の失敗
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector not initialized")]
    NotInitialized,

    #[error("detection failed: {0}")]
    Failed(String),
}

/// 描画1フレーム分の失敗
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("surface has zero size ({width}x{height})")]
    EmptySurface { width: u32, height: u32 },

    #[error("drawing buffer is not preserved; capture requires preserve_buffer at creation")]
    BufferNotPreserved,

    #[error("image encoding failed: {0}")]
    Encode(String),

    #[error("display sink rejected frame: {0}")]
    Display(String),
}

/// 強化チャネルの接続エラー
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("connection attempt timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("channel permanently failed after {0} reconnect attempts")]
    Exhausted(u32),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ChannelError::Closed,
            other => ChannelError::Transport(other.to_string()),
        }
    }
}

/// ファブリック適用の失敗（前のファブリックはそのまま残る）
#[derive(Error, Debug)]
pub enum FabricError {
    #[error("texture `{uri}` failed to load: {reason}")]
    TextureLoad { uri: String, reason: String },

    #[error("fabric `{0}` not found in catalog")]
    UnknownFabric(String),

    #[error("catalog error: {0}")]
    Catalog(String),
}

/// data URI のデコード／エンコード失敗
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("not a base64 data URI")]
    NotDataUri,

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("image codec failed: {0}")]
    Image(#[from] image::ImageError),
}
