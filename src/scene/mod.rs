pub mod camera;
pub mod loader;
pub mod mesh;
pub mod node;
pub mod raster;
pub mod surface;

pub use camera::PerspectiveCamera;
pub use loader::{GarmentLoader, JsonGarmentLoader, BUILTIN_JACKET};
pub use mesh::{Bone, GarmentAsset, Mesh, Skeleton};
pub use node::{GarmentNode, SharedGarment};
pub use raster::Lighting;
pub use surface::RenderSurface;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::camera::FrameSource;
use crate::codec;
use crate::config::SceneConfig;
use crate::error::RenderError;
use crate::material::PbrMaterial;
use crate::pose::PoseSnapshot;
use crate::render::skeleton;

/// 描画ループとキーフレーム送信で共有するシーン
pub type SharedScene = Arc<Mutex<Scene>>;

/// ライブ映像テクスチャ。dirty のときだけフレームソースから取り直す
#[derive(Default)]
struct VideoLayer {
    source: Option<Arc<dyn FrameSource>>,
    dirty: bool,
    background: Option<RgbaImage>,
}

/// カメラ・ライト・衣服ノードを持ち、描画面へ描く
pub struct Scene {
    camera: PerspectiveCamera,
    lighting: Lighting,
    surface: RenderSurface,
    viewport: (u32, u32),
    render_scale: f32,
    garment: SharedGarment,
    video: VideoLayer,
    debug_pose: Option<Arc<PoseSnapshot>>,
    debug_threshold: f32,
}

impl Scene {
    pub fn new(config: &SceneConfig, garment: SharedGarment) -> Result<Self, RenderError> {
        let surface = RenderSurface::new(
            config.viewport_width,
            config.viewport_height,
            config.preserve_buffer,
        )?;
        Ok(Self {
            camera: PerspectiveCamera::from_config(config),
            lighting: Lighting::new(config.ambient_intensity, config.directional_intensity),
            surface,
            viewport: (config.viewport_width, config.viewport_height),
            render_scale: 1.0,
            garment,
            video: VideoLayer::default(),
            debug_pose: None,
            debug_threshold: 0.5,
        })
    }

    pub fn shared(self) -> SharedScene {
        Arc::new(Mutex::new(self))
    }

    pub fn garment(&self) -> SharedGarment {
        Arc::clone(&self.garment)
    }

    pub fn attach_video(&mut self, source: Arc<dyn FrameSource>) {
        self.video.source = Some(source);
        self.video.dirty = true;
    }

    /// 次の render で映像を取り直す
    pub fn mark_video_dirty(&mut self) {
        self.video.dirty = true;
    }

    pub fn set_debug_pose(&mut self, pose: Option<Arc<PoseSnapshot>>, visibility_threshold: f32) {
        self.debug_pose = pose;
        self.debug_threshold = visibility_threshold;
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// 内部描画解像度 (= viewport × render_scale)
    pub fn canvas_size(&self) -> (u32, u32) {
        self.surface.size()
    }

    pub fn render_scale(&self) -> f32 {
        self.render_scale
    }

    /// カメラのアスペクトと描画面サイズを更新する（セッション中いつでも可）
    pub fn update_viewport(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::EmptySurface { width, height });
        }
        let (sw, sh) = scaled(width, height, self.render_scale);
        self.surface.resize(sw, sh)?;
        self.viewport = (width, height);
        self.camera.set_aspect(width as f32 / height as f32);
        self.video.dirty = true;
        tracing::debug!("viewport {}x{} (canvas {}x{})", width, height, sw, sh);
        Ok(())
    }

    pub fn set_render_scale(&mut self, scale: f32) -> Result<(), RenderError> {
        self.render_scale = scale.clamp(0.05, 1.0);
        let (w, h) = self.viewport;
        self.update_viewport(w, h)
    }

    /// 映像背景 + 衣服 + (デバッグ時) 骨格を1回描く
    pub fn render(&mut self) -> Result<(), RenderError> {
        self.refresh_video();
        match self.video.background {
            Some(ref bg) => self.surface.clear_with(bg),
            None => self.surface.clear([0, 0, 0, 255]),
        }
        self.draw_garment();
        if let Some(ref pose) = self.debug_pose {
            skeleton::draw_pose(self.surface.color_mut(), pose, self.debug_threshold);
        }
        Ok(())
    }

    /// 表示用に描画結果を取り出す
    pub fn present(&mut self) -> RgbaImage {
        self.surface.present()
    }

    /// 衣服だけを透明背景に描いて PNG data URI として読み出す
    pub fn capture(&mut self) -> Result<String, RenderError> {
        if !self.surface.preserves_buffer() {
            return Err(RenderError::BufferNotPreserved);
        }
        self.surface.clear([0, 0, 0, 0]);
        self.draw_garment();
        let pixels = self.surface.read_pixels()?;
        codec::encode_png_data_uri(pixels).map_err(|e| RenderError::Encode(e.to_string()))
    }

    fn draw_garment(&mut self) -> usize {
        // ノードのロックは状態のコピーだけに使う
        let Some((asset, material, transform)) = self.garment.lock().draw_state() else {
            return 0;
        };
        let default_material;
        let material: &PbrMaterial = match material {
            Some(ref m) => m.as_ref(),
            None => {
                default_material = PbrMaterial::default();
                &default_material
            }
        };
        raster::draw_mesh(
            &mut self.surface,
            &self.camera.view_projection(),
            &self.camera.eye(),
            &transform.to_matrix(),
            &asset.mesh,
            material,
            &self.lighting,
        )
    }

    fn refresh_video(&mut self) {
        if !self.video.dirty {
            return;
        }
        let Some(ref source) = self.video.source else {
            return;
        };
        let Some(frame) = source.latest_frame() else {
            return;
        };
        self.video.dirty = false;
        let (w, h) = self.surface.size();
        let image = if frame.image.dimensions() == (w, h) {
            (*frame.image).clone()
        } else {
            imageops::resize(&*frame.image, w, h, FilterType::Triangle)
        };
        self.video.background = Some(image);
    }
}

fn scaled(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
        ((width as f32 * scale).round() as u32).max(1),
        ((height as f32 * scale).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::StillFrameSource;
    use crate::tracker::{SkeletalTransform, MESH_FACING_BIAS};

    fn config(w: u32, h: u32, preserve: bool) -> SceneConfig {
        SceneConfig {
            viewport_width: w,
            viewport_height: h,
            preserve_buffer: preserve,
            ..SceneConfig::default()
        }
    }

    fn scene_with_jacket(preserve: bool) -> Scene {
        let garment = GarmentNode::shared();
        {
            let mut node = garment.lock();
            node.set_asset(Arc::new(GarmentAsset::procedural_jacket()));
            node.set_transform(SkeletalTransform::new([0.0, 1.0, 0.0], [0.0, MESH_FACING_BIAS, 0.0], 1.0));
            node.set_visible(true);
        }
        Scene::new(&config(64, 48, preserve), garment).unwrap()
    }

    #[test]
    fn test_render_without_garment_succeeds() {
        let mut scene = Scene::new(&config(32, 24, true), GarmentNode::shared()).unwrap();
        scene.render().unwrap();
        assert_eq!(scene.present().get_pixel(5, 5).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_hidden_garment_not_drawn() {
        let mut scene = scene_with_jacket(true);
        scene.garment().lock().set_visible(false);
        scene.render().unwrap();
        let frame = scene.present();
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }

    #[test]
    fn test_video_background_then_garment() {
        let mut scene = scene_with_jacket(true);
        scene.attach_video(Arc::new(StillFrameSource::solid(128, 96, [0, 200, 0, 255])));
        scene.render().unwrap();
        let frame = scene.present();
        assert_eq!(frame.dimensions(), (64, 48));
        // 角は映像、中央上部は衣服
        assert_eq!(frame.get_pixel(0, 47).0, [0, 200, 0, 255]);
        assert_ne!(frame.get_pixel(32, 20).0, [0, 200, 0, 255]);
    }

    #[test]
    fn test_capture_is_garment_only_png() {
        let mut scene = scene_with_jacket(true);
        scene.attach_video(Arc::new(StillFrameSource::solid(64, 48, [0, 200, 0, 255])));
        let uri = scene.capture().unwrap();
        let img = codec::decode_data_uri(&uri).unwrap();
        assert_eq!(img.get_pixel(0, 47).0[3], 0);
        assert_eq!(img.get_pixel(32, 20).0[3], 255);
    }

    #[test]
    fn test_capture_requires_preserved_buffer() {
        let mut scene = scene_with_jacket(false);
        assert!(matches!(scene.capture(), Err(RenderError::BufferNotPreserved)));
    }

    #[test]
    fn test_update_viewport_and_scale() {
        let mut scene = Scene::new(&config(100, 50, true), GarmentNode::shared()).unwrap();
        scene.update_viewport(200, 100).unwrap();
        assert_eq!(scene.canvas_size(), (200, 100));
        scene.set_render_scale(0.5).unwrap();
        assert_eq!(scene.canvas_size(), (100, 50));
        assert_eq!(scene.viewport(), (200, 100));
        assert!(scene.update_viewport(0, 10).is_err());
        scene.render().unwrap();
    }
}
