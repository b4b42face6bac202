use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub calibration: CalibrationProfile,
    #[serde(default)]
    pub mapper: MapperConfig,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub material: MaterialConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

// --- pose ---

#[derive(Debug, Clone, Deserialize)]
pub struct PoseConfig {
    /// 検出器を呼ぶ最大レート (Hz)
    #[serde(default = "default_target_rate_hz")]
    pub target_rate_hz: f32,
    /// ランドマーク平滑化 (0 = なし, 1 = 固定)
    #[serde(default = "default_pose_smoothing")]
    pub smoothing: f32,
    /// フレームソースをポーリングする間隔 (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_model_complexity")]
    pub model_complexity: u8,
    #[serde(default = "default_min_confidence")]
    pub min_detection_confidence: f32,
    #[serde(default = "default_min_confidence")]
    pub min_tracking_confidence: f32,
    #[serde(default)]
    pub enable_segmentation: bool,
}

fn default_target_rate_hz() -> f32 { 30.0 }
fn default_pose_smoothing() -> f32 { 0.5 }
fn default_poll_interval_ms() -> u64 { 16 }
fn default_model_complexity() -> u8 { 1 }
fn default_min_confidence() -> f32 { 0.5 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            target_rate_hz: default_target_rate_hz(),
            smoothing: default_pose_smoothing(),
            poll_interval_ms: default_poll_interval_ms(),
            model_complexity: default_model_complexity(),
            min_detection_confidence: default_min_confidence(),
            min_tracking_confidence: default_min_confidence(),
            enable_segmentation: false,
        }
    }
}

// --- calibration ---

/// 正規化ポーズ空間からシーン空間への写像定数
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CalibrationProfile {
    #[serde(default = "default_scale_multiplier")]
    pub scale_multiplier: f32,
    #[serde(default)]
    pub depth_multiplier: f32,
    #[serde(default)]
    pub vertical_offset: f32,
    #[serde(default)]
    pub horizontal_offset: f32,
}

fn default_scale_multiplier() -> f32 { 4.0 }

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            scale_multiplier: default_scale_multiplier(),
            depth_multiplier: 0.0,
            vertical_offset: 0.0,
            horizontal_offset: 0.0,
        }
    }
}

// --- mapper ---

/// 衣服の位置アンカー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    /// 両肩の中点
    #[default]
    ShoulderMidpoint,
    /// 肩中点と腰中点の中点（腰が見えない場合は肩中点）
    TorsoCenter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapperConfig {
    #[serde(default)]
    pub anchor: AnchorMode,
    /// 肩の visibility がこれを超えないと更新しない
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
    /// 画像縦方向 1.0 に対応するシーン単位
    #[serde(default = "default_position_span")]
    pub position_span: f32,
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f32,
    /// 肩の奥行き差から得る yaw の増幅率
    #[serde(default = "default_yaw_amplification")]
    pub yaw_amplification: f32,
    #[serde(default = "default_pitch_sensitivity")]
    pub pitch_sensitivity: f32,
    #[serde(default = "default_min_scale")]
    pub min_scale: f32,
    #[serde(default = "default_max_scale")]
    pub max_scale: f32,
    /// X軸反転（自撮り表示）
    #[serde(default)]
    pub mirror_x: bool,
    #[serde(default = "default_transform_alpha")]
    pub position_alpha: f32,
    #[serde(default = "default_transform_alpha")]
    pub rotation_alpha: f32,
    #[serde(default = "default_transform_alpha")]
    pub scale_alpha: f32,
}

fn default_visibility_threshold() -> f32 { 0.3 }
fn default_position_span() -> f32 { 4.0 }
fn default_depth_scale() -> f32 { -1.0 }
fn default_yaw_amplification() -> f32 { 2.5 }
fn default_pitch_sensitivity() -> f32 { 0.5 }
fn default_min_scale() -> f32 { 0.3 }
fn default_max_scale() -> f32 { 3.0 }
fn default_transform_alpha() -> f32 { 0.5 }

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            anchor: AnchorMode::default(),
            visibility_threshold: default_visibility_threshold(),
            position_span: default_position_span(),
            depth_scale: default_depth_scale(),
            yaw_amplification: default_yaw_amplification(),
            pitch_sensitivity: default_pitch_sensitivity(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
            mirror_x: false,
            position_alpha: default_transform_alpha(),
            rotation_alpha: default_transform_alpha(),
            scale_alpha: default_transform_alpha(),
        }
    }
}

// --- scene ---

#[derive(Debug, Clone, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_fov_deg")]
    pub fov_deg: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    #[serde(default = "default_camera_z")]
    pub camera_z: f32,
    /// 映像合成で白飛びしないよう低めに抑える
    #[serde(default = "default_ambient_intensity")]
    pub ambient_intensity: f32,
    #[serde(default = "default_directional_intensity")]
    pub directional_intensity: f32,
    /// 描画バッファを present 後も保持する（capture に必須、生成時のみ指定可）
    #[serde(default = "default_true")]
    pub preserve_buffer: bool,
    /// 衣服メッシュ (JSON)。未指定なら内蔵ジャケット
    #[serde(default)]
    pub garment_path: Option<String>,
}

fn default_viewport_width() -> u32 { 1280 }
fn default_viewport_height() -> u32 { 720 }
fn default_fov_deg() -> f32 { 50.0 }
fn default_near() -> f32 { 0.1 }
fn default_far() -> f32 { 1000.0 }
fn default_camera_z() -> f32 { 5.0 }
fn default_ambient_intensity() -> f32 { 0.4 }
fn default_directional_intensity() -> f32 { 0.5 }
fn default_true() -> bool { true }

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            fov_deg: default_fov_deg(),
            near: default_near(),
            far: default_far(),
            camera_z: default_camera_z(),
            ambient_intensity: default_ambient_intensity(),
            directional_intensity: default_directional_intensity(),
            preserve_buffer: true,
            garment_path: None,
        }
    }
}

// --- render ---

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: f32,
    /// ディスプレイの垂直同期レート (Hz)
    #[serde(default = "default_vsync_hz")]
    pub vsync_hz: f32,
    #[serde(default = "default_true")]
    pub adaptive_quality: bool,
    #[serde(default = "default_low_fps_threshold")]
    pub low_fps_threshold: f32,
    #[serde(default = "default_scale_step")]
    pub scale_step: f32,
    #[serde(default = "default_min_render_scale")]
    pub min_render_scale: f32,
    #[serde(default = "default_blend_duration_ms")]
    pub blend_duration_ms: u64,
    #[serde(default = "default_max_blend_alpha")]
    pub max_blend_alpha: f32,
}

fn default_target_fps() -> f32 { 30.0 }
fn default_vsync_hz() -> f32 { 60.0 }
fn default_low_fps_threshold() -> f32 { 20.0 }
fn default_scale_step() -> f32 { 0.1 }
fn default_min_render_scale() -> f32 { 0.5 }
fn default_blend_duration_ms() -> u64 { 500 }
fn default_max_blend_alpha() -> f32 { 0.7 }

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            vsync_hz: default_vsync_hz(),
            adaptive_quality: true,
            low_fps_threshold: default_low_fps_threshold(),
            scale_step: default_scale_step(),
            min_render_scale: default_min_render_scale(),
            blend_duration_ms: default_blend_duration_ms(),
            max_blend_alpha: default_max_blend_alpha(),
        }
    }
}

// --- channel ---

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_channel_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_keyframe_interval_ms")]
    pub keyframe_interval_ms: u64,
    #[serde(default = "default_camera_jpeg_quality")]
    pub camera_jpeg_quality: u8,
}

fn default_channel_url() -> String { "ws://localhost:5000/ws".to_string() }
fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_reconnect_delay_ms() -> u64 { 3000 }
fn default_max_reconnect_attempts() -> u32 { 5 }
fn default_keyframe_interval_ms() -> u64 { 2000 }
fn default_camera_jpeg_quality() -> u8 { 75 }

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_channel_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            keyframe_interval_ms: default_keyframe_interval_ms(),
            camera_jpeg_quality: default_camera_jpeg_quality(),
        }
    }
}

// --- material ---

#[derive(Debug, Clone, Deserialize)]
pub struct MaterialConfig {
    /// テクスチャURIの解決先ディレクトリ
    #[serde(default = "default_texture_root")]
    pub texture_root: String,
    /// テクスチャのタイリング回数 (u, v)
    #[serde(default = "default_texture_repeat")]
    pub texture_repeat: [f32; 2],
    #[serde(default)]
    pub catalog_path: Option<String>,
    /// 起動時に適用するファブリックID
    #[serde(default)]
    pub default_fabric: Option<String>,
}

fn default_texture_root() -> String { "static".to_string() }
fn default_texture_repeat() -> [f32; 2] { [2.0, 2.0] }

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            texture_root: default_texture_root(),
            texture_repeat: default_texture_repeat(),
            catalog_path: None,
            default_fabric: None,
        }
    }
}

// --- debug ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// ランドマーク骨格をオーバーレイ描画
    #[serde(default)]
    pub pose_overlay: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// ファイルが無い・壊れている場合はデフォルト
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("using default config ({}): {}", path.as_ref().display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pose;
        if !(p.target_rate_hz > 0.0) {
            return Err(ConfigError::invalid("pose.target_rate_hz", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&p.smoothing) {
            return Err(ConfigError::invalid("pose.smoothing", "must be within [0, 1]"));
        }
        if p.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("pose.poll_interval_ms", "must be > 0"));
        }

        let m = &self.mapper;
        if !(m.min_scale > 0.0) || m.min_scale > m.max_scale {
            return Err(ConfigError::invalid(
                "mapper.min_scale",
                format!("need 0 < min_scale <= max_scale (got {} / {})", m.min_scale, m.max_scale),
            ));
        }
        if !(0.0..=1.0).contains(&m.visibility_threshold) {
            return Err(ConfigError::invalid("mapper.visibility_threshold", "must be within [0, 1]"));
        }
        for (field, alpha) in [
            ("mapper.position_alpha", m.position_alpha),
            ("mapper.rotation_alpha", m.rotation_alpha),
            ("mapper.scale_alpha", m.scale_alpha),
        ] {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(ConfigError::invalid(field, "must be within [0, 1]"));
            }
        }

        let s = &self.scene;
        if s.viewport_width == 0 || s.viewport_height == 0 {
            return Err(ConfigError::invalid("scene.viewport", "width and height must be > 0"));
        }
        if !(s.near > 0.0) || s.far <= s.near {
            return Err(ConfigError::invalid("scene.near", "need 0 < near < far"));
        }
        if !(s.fov_deg > 0.0 && s.fov_deg < 180.0) {
            return Err(ConfigError::invalid("scene.fov_deg", "must be within (0, 180)"));
        }
        if s.ambient_intensity < 0.0
            || s.directional_intensity < 0.0
            || s.ambient_intensity + s.directional_intensity > 1.0
        {
            return Err(ConfigError::invalid(
                "scene.ambient_intensity",
                "light intensities must be >= 0 and sum to at most 1.0",
            ));
        }

        let r = &self.render;
        if !(r.target_fps > 0.0) || !(r.vsync_hz > 0.0) {
            return Err(ConfigError::invalid("render.target_fps", "target_fps and vsync_hz must be > 0"));
        }
        if !(r.min_render_scale > 0.0 && r.min_render_scale <= 1.0) {
            return Err(ConfigError::invalid("render.min_render_scale", "must be within (0, 1]"));
        }
        if !(0.0..=1.0).contains(&r.max_blend_alpha) {
            return Err(ConfigError::invalid("render.max_blend_alpha", "must be within [0, 1]"));
        }
        if r.scale_step < 0.0 {
            return Err(ConfigError::invalid("render.scale_step", "must be >= 0"));
        }

        let c = &self.channel;
        if c.keyframe_interval_ms == 0 || c.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "channel.keyframe_interval_ms",
                "keyframe_interval_ms and connect_timeout_ms must be > 0",
            ));
        }
        if c.camera_jpeg_quality == 0 || c.camera_jpeg_quality > 100 {
            return Err(ConfigError::invalid("channel.camera_jpeg_quality", "must be within 1..=100"));
        }

        Ok(())
    }
}
