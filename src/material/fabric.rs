use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::FabricError;

/// sRGB 色 ("#rrggbb")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// 0.0〜1.0 の RGB
    pub fn to_linear_rgb(self) -> [f32; 3] {
        [self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0]
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("expected #rrggbb, got `{}`", value));
        }
        let rgb = u32::from_str_radix(hex, 16).map_err(|e| format!("`{}`: {}", value, e))?;
        Ok(Self::rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        format!("#{:02x}{:02x}{:02x}", c.r, c.g, c.b)
    }
}

/// 単色か PBR テクスチャのどちらか一方
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FabricFinish {
    Solid {
        color: Color,
    },
    Textured {
        #[serde(rename = "diffuseUrl")]
        diffuse_url: String,
        #[serde(rename = "normalUrl", default, skip_serializing_if = "Option::is_none")]
        normal_url: Option<String>,
        #[serde(rename = "roughnessUrl", default, skip_serializing_if = "Option::is_none")]
        roughness_url: Option<String>,
    },
}

/// カタログの1エントリ（バックエンドのカタログ JSON と互換）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fabric {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub finish: FabricFinish,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default = "default_roughness")]
    pub roughness: f32,
    #[serde(default)]
    pub metalness: f32,
}

fn default_roughness() -> f32 { 0.8 }

impl Fabric {
    pub fn solid(id: &str, name: &str, color: Color) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            finish: FabricFinish::Solid { color },
            thumbnail: None,
            roughness: default_roughness(),
            metalness: 0.0,
        }
    }

    fn textured(id: &str, name: &str, stem: &str, roughness: f32, metalness: f32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            finish: FabricFinish::Textured {
                diffuse_url: format!("/static/textures/{}_diffuse.jpg", stem),
                normal_url: Some(format!("/static/textures/{}_normal.jpg", stem)),
                roughness_url: Some(format!("/static/textures/{}_roughness.jpg", stem)),
            },
            thumbnail: Some(format!("/static/textures/{}_thumb.jpg", stem)),
            roughness,
            metalness,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<Fabric>),
    Response { fabrics: Vec<Fabric> },
}

/// 選択可能なファブリック一覧
#[derive(Debug, Clone)]
pub struct FabricCatalog {
    fabrics: Vec<Fabric>,
}

impl Default for FabricCatalog {
    fn default() -> Self {
        Self {
            fabrics: vec![
                Fabric::textured("denim-blue", "Blue Denim", "denim_blue", 0.8, 0.0),
                Fabric::textured("leather-black", "Black Leather", "leather_black", 0.4, 0.1),
                Fabric::textured("cotton-grey", "Grey Cotton", "cotton_grey", 0.9, 0.0),
            ],
        }
    }
}

impl FabricCatalog {
    pub fn new(fabrics: Vec<Fabric>) -> Self {
        Self { fabrics }
    }

    /// catalog.json（配列、または `{"fabrics": [...]}`）を読む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FabricError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FabricError::Catalog(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, FabricError> {
        let file: CatalogFile =
            serde_json::from_str(content).map_err(|e| FabricError::Catalog(e.to_string()))?;
        let fabrics = match file {
            CatalogFile::List(f) | CatalogFile::Response { fabrics: f } => f,
        };
        Ok(Self { fabrics })
    }

    /// 読めなければ組み込みの3種
    pub fn load_or_default(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                tracing::warn!("using default fabric catalog: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn get(&self, id: &str) -> Result<&Fabric, FabricError> {
        self.fabrics
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| FabricError::UnknownFabric(id.to_string()))
    }

    pub fn fabrics(&self) -> &[Fabric] {
        &self.fabrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parse() {
        let c = Color::try_from("#1e90ff".to_string()).unwrap();
        assert_eq!(c, Color::rgb(0x1e, 0x90, 0xff));
        assert_eq!(String::from(c), "#1e90ff");
        assert!(Color::try_from("blue".to_string()).is_err());
        assert!(Color::try_from("#12345g".to_string()).is_err());
    }

    #[test]
    fn test_color_rejects_non_ascii() {
        // 6 バイトだが16進ではない
        assert!(Color::try_from("#aé€".to_string()).is_err());
        assert!(Color::try_from("#+1e90f".to_string()).is_err());
        assert!(Color::try_from("ａｂｃ".to_string()).is_err());
    }

    #[test]
    fn test_catalog_with_bad_color_falls_back() {
        let json = r##"[{"id": "a", "name": "A", "color": "#aé€"}]"##;
        assert!(matches!(FabricCatalog::from_json(json), Err(FabricError::Catalog(_))));

        let path = std::env::temp_dir().join(format!("tryon-catalog-{}.json", std::process::id()));
        std::fs::write(&path, json).unwrap();
        let catalog = FabricCatalog::load_or_default(path.to_str());
        std::fs::remove_file(&path).unwrap();
        assert_eq!(catalog.fabrics().len(), 3);
        assert!(catalog.get("denim-blue").is_ok());
    }

    #[test]
    fn test_backend_catalog_entry_is_textured() {
        let json = r#"{
            "id": "denim-blue",
            "name": "Blue Denim",
            "diffuseUrl": "/static/textures/denim_blue_diffuse.jpg",
            "normalUrl": "/static/textures/denim_blue_normal.jpg",
            "roughnessUrl": "/static/textures/denim_blue_roughness.jpg",
            "thumbnail": "/static/textures/denim_blue_thumb.jpg",
            "roughness": 0.8,
            "metalness": 0.0
        }"#;
        let fabric: Fabric = serde_json::from_str(json).unwrap();
        assert_eq!(fabric, FabricCatalog::default().fabrics()[0]);
    }

    #[test]
    fn test_solid_fabric_json() {
        let fabric: Fabric =
            serde_json::from_str(r##"{"id": "red", "name": "Red", "color": "#ff0000"}"##).unwrap();
        assert_eq!(
            fabric.finish,
            FabricFinish::Solid {
                color: Color::rgb(255, 0, 0)
            }
        );
        assert_eq!(fabric.roughness, 0.8);
    }

    #[test]
    fn test_catalog_accepts_both_shapes() {
        let list = r##"[{"id": "a", "name": "A", "color": "#000000"}]"##;
        let response = r##"{"success": true, "fabrics": [{"id": "a", "name": "A", "color": "#000000"}], "count": 1}"##;
        assert_eq!(FabricCatalog::from_json(list).unwrap().fabrics().len(), 1);
        assert_eq!(FabricCatalog::from_json(response).unwrap().fabrics().len(), 1);
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = FabricCatalog::default();
        assert_eq!(catalog.get("leather-black").unwrap().metalness, 0.1);
        assert!(matches!(catalog.get("silk"), Err(FabricError::UnknownFabric(_))));
    }
}
