use parking_lot::Mutex;
use std::sync::Arc;

use crate::material::PbrMaterial;
use crate::tracker::SkeletalTransform;

use super::mesh::GarmentAsset;

/// マッパー (書き込み) と描画パス (読み出し) で共有する衣服ノード
pub type SharedGarment = Arc<Mutex<GarmentNode>>;

/// 衣服のシーンノード: メッシュ・マテリアル・変換・表示フラグ
#[derive(Debug, Default)]
pub struct GarmentNode {
    asset: Option<Arc<GarmentAsset>>,
    material: Option<Arc<PbrMaterial>>,
    transform: SkeletalTransform,
    visible: bool,
}

impl GarmentNode {
    pub fn shared() -> SharedGarment {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn set_asset(&mut self, asset: Arc<GarmentAsset>) {
        self.asset = Some(asset);
    }

    pub fn asset(&self) -> Option<Arc<GarmentAsset>> {
        self.asset.clone()
    }

    pub fn material(&self) -> Option<Arc<PbrMaterial>> {
        self.material.clone()
    }

    /// 新しいマテリアルを付け、外した方を返す（解放は呼び出し側）
    pub fn swap_material(&mut self, material: Arc<PbrMaterial>) -> Option<Arc<PbrMaterial>> {
        self.material.replace(material)
    }

    pub fn transform(&self) -> SkeletalTransform {
        self.transform
    }

    pub fn set_transform(&mut self, transform: SkeletalTransform) {
        self.transform = transform;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// 描画用のスナップショット。ロックを描画中に持ち続けないために使う
    pub(crate) fn draw_state(&self) -> Option<(Arc<GarmentAsset>, Option<Arc<PbrMaterial>>, SkeletalTransform)> {
        if !self.visible {
            return None;
        }
        let asset = self.asset.clone()?;
        Some((asset, self.material.clone(), self.transform))
    }
}
