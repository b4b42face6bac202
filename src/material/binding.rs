use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::FabricError;
use crate::scene::SharedGarment;

use super::fabric::{Fabric, FabricFinish};
use super::texture::{Texture, TextureLoader};

/// 衣服に貼る PBR マテリアル
#[derive(Debug, Clone)]
pub struct PbrMaterial {
    pub fabric_id: Option<String>,
    pub base_color: [f32; 3],
    pub roughness: f32,
    pub metalness: f32,
    pub diffuse_map: Option<Arc<Texture>>,
    pub normal_map: Option<Arc<Texture>>,
    pub roughness_map: Option<Arc<Texture>>,
}

impl Default for PbrMaterial {
    /// ファブリック未適用時のグレー
    fn default() -> Self {
        Self {
            fabric_id: None,
            base_color: [0.5, 0.5, 0.5],
            roughness: 0.8,
            metalness: 0.0,
            diffuse_map: None,
            normal_map: None,
            roughness_map: None,
        }
    }
}

impl PbrMaterial {
    pub fn texture_count(&self) -> usize {
        [&self.diffuse_map, &self.normal_map, &self.roughness_map]
            .iter()
            .filter(|t| t.is_some())
            .count()
    }
}

/// ファブリックを衣服マテリアルとして適用する
///
/// 新マテリアルを完全に組み立ててから差し替え、差し替え後に旧マテリアルを解放する。
/// テクスチャが1枚でも読めなければ何も変えずにエラーを返す。
pub struct MaterialBinder {
    garment: SharedGarment,
    loader: Arc<dyn TextureLoader>,
    repeat: [f32; 2],
    current: Mutex<Option<Fabric>>,
    applying: tokio::sync::Mutex<()>,
}

impl MaterialBinder {
    pub fn new(garment: SharedGarment, loader: Arc<dyn TextureLoader>, repeat: [f32; 2]) -> Self {
        Self {
            garment,
            loader,
            repeat,
            current: Mutex::new(None),
            applying: tokio::sync::Mutex::new(()),
        }
    }

    pub fn current_fabric(&self) -> Option<Fabric> {
        self.current.lock().clone()
    }

    pub async fn apply_fabric(&self, fabric: &Fabric) -> Result<(), FabricError> {
        // 同時に呼ばれても差し替えは1つずつ
        let _applying = self.applying.lock().await;

        let material = match self.build_material(fabric).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("fabric `{}` not applied: {}", fabric.id, e);
                return Err(e);
            }
        };

        let previous = self.garment.lock().swap_material(Arc::new(material));
        *self.current.lock() = Some(fabric.clone());
        tracing::info!("applied fabric `{}` ({})", fabric.id, fabric.name);

        if let Some(old) = previous {
            dispose(old);
        }
        Ok(())
    }

    async fn build_material(&self, fabric: &Fabric) -> Result<PbrMaterial, FabricError> {
        let mut material = PbrMaterial {
            fabric_id: Some(fabric.id.clone()),
            roughness: fabric.roughness,
            metalness: fabric.metalness,
            ..PbrMaterial::default()
        };

        match &fabric.finish {
            FabricFinish::Solid { color } => {
                material.base_color = color.to_linear_rgb();
            }
            FabricFinish::Textured {
                diffuse_url,
                normal_url,
                roughness_url,
            } => {
                let (diffuse, normal, roughness) = futures::try_join!(
                    self.load_texture(Some(diffuse_url)),
                    self.load_texture(normal_url.as_ref()),
                    self.load_texture(roughness_url.as_ref()),
                )?;
                material.base_color = [1.0, 1.0, 1.0];
                material.diffuse_map = diffuse;
                material.normal_map = normal;
                material.roughness_map = roughness;
            }
        }
        Ok(material)
    }

    async fn load_texture(&self, uri: Option<&String>) -> Result<Option<Arc<Texture>>, FabricError> {
        let Some(uri) = uri else {
            return Ok(None);
        };
        let image = self.loader.load(uri).await?;
        Ok(Some(Arc::new(Texture::new(image).with_repeat(self.repeat))))
    }
}

fn dispose(old: Arc<PbrMaterial>) {
    match Arc::try_unwrap(old) {
        Ok(material) => tracing::debug!(
            "disposed material {:?} ({} textures)",
            material.fabric_id,
            material.texture_count()
        ),
        // 描画中のフレームがまだ持っている。最後の参照が落ちたときに解放される
        Err(shared) => tracing::debug!(
            "material {:?} still in use ({} refs)",
            shared.fabric_id,
            Arc::strong_count(&shared)
        ),
    }
}
