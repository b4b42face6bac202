use futures::future::BoxFuture;
use std::path::PathBuf;

use crate::error::InitError;

use super::mesh::GarmentAsset;

/// 内蔵ジャケットを指す URI
pub const BUILTIN_JACKET: &str = "builtin:jacket";

/// 衣服アセットのローダー。結果は主メッシュ1つと任意のスケルトン
pub trait GarmentLoader: Send + Sync {
    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<GarmentAsset, InitError>>;
}

/// JSON メッシュファイルを読むローダー。`builtin:jacket` は内蔵メッシュ
pub struct JsonGarmentLoader {
    root: PathBuf,
}

impl JsonGarmentLoader {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl Default for JsonGarmentLoader {
    fn default() -> Self {
        Self::new(".")
    }
}

impl GarmentLoader for JsonGarmentLoader {
    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<GarmentAsset, InitError>> {
        Box::pin(async move {
            if uri == BUILTIN_JACKET {
                return Ok(GarmentAsset::procedural_jacket());
            }
            let asset_err = |reason: String| InitError::GarmentAsset {
                path: uri.to_string(),
                reason,
            };
            let path = self.root.join(uri);
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| asset_err(format!("{}: {}", path.display(), e)))?;
            let asset = GarmentAsset::from_json(&content).map_err(asset_err)?;
            tracing::info!(
                "loaded garment `{}` ({} vertices, {} triangles, {} bones)",
                asset.name,
                asset.mesh.positions.len(),
                asset.mesh.triangle_count(),
                asset.skeleton.as_ref().map_or(0, |s| s.bones.len())
            );
            Ok(asset)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_jacket() {
        let asset = JsonGarmentLoader::default().load(BUILTIN_JACKET).await.unwrap();
        assert_eq!(asset.name, "jacket");
    }

    #[tokio::test]
    async fn test_missing_asset_is_init_error() {
        let err = JsonGarmentLoader::new("no/such/dir")
            .load("jacket.json")
            .await
            .unwrap_err();
        assert!(matches!(err, InitError::GarmentAsset { .. }));
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let dir = std::env::temp_dir().join(format!("tryon-garment-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("tri.json"),
            r#"{"name": "tri", "mesh": {"positions": [[0,0,0],[1,0,0],[0,1,0]], "indices": [0,1,2]}}"#,
        )
        .unwrap();

        let asset = JsonGarmentLoader::new(&dir).load("tri.json").await.unwrap();
        assert_eq!(asset.name, "tri");
        assert_eq!(asset.mesh.triangle_count(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
