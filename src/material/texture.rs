use futures::future::BoxFuture;
use image::RgbaImage;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::FabricError;

/// タイリング付きのテクスチャ
#[derive(Debug, Clone)]
pub struct Texture {
    image: RgbaImage,
    repeat: [f32; 2],
}

impl Texture {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            repeat: [1.0, 1.0],
        }
    }

    pub fn with_repeat(mut self, repeat: [f32; 2]) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn repeat(&self) -> [f32; 2] {
        self.repeat
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// 最近傍サンプリング (0.0〜1.0 の RGBA)。UV は repeat 倍してラップする
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let (w, h) = self.image.dimensions();
        if w == 0 || h == 0 {
            return [1.0; 4];
        }
        let u = (u * self.repeat[0]).rem_euclid(1.0);
        let v = (v * self.repeat[1]).rem_euclid(1.0);
        let x = ((u * w as f32) as u32).min(w - 1);
        let y = ((v * h as f32) as u32).min(h - 1);
        let p = self.image.get_pixel(x, y).0;
        [
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
            p[3] as f32 / 255.0,
        ]
    }
}

/// テクスチャ URI を画像に解決する
pub trait TextureLoader: Send + Sync {
    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<RgbaImage, FabricError>>;
}

/// ローカルディレクトリ配下の画像、または data URI を読むローダー
///
/// バックエンドのカタログは `/static/fabrics/...` 形式の URL を返すので、
/// 先頭の `/` と `static/` を取り除いて texture_root からの相対パスにする。
pub struct FileTextureLoader {
    root: PathBuf,
}

impl FileTextureLoader {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn resolve(&self, uri: &str) -> PathBuf {
        let relative = uri.trim_start_matches('/');
        let relative = relative.strip_prefix("static/").unwrap_or(relative);
        self.root.join(relative)
    }
}

impl TextureLoader for FileTextureLoader {
    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<RgbaImage, FabricError>> {
        Box::pin(async move {
            let load_err = |reason: String| FabricError::TextureLoad {
                uri: uri.to_string(),
                reason,
            };
            if uri.starts_with("data:") {
                return codec::decode_data_uri(uri).map_err(|e| load_err(e.to_string()));
            }
            let path = self.resolve(uri);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| load_err(format!("{}: {}", path.display(), e)))?;
            let image = image::load_from_memory(&bytes).map_err(|e| load_err(e.to_string()))?;
            Ok(image.to_rgba8())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> RgbaImage {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, image::Rgba([0, 255, 0, 255]));
        img.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        img.put_pixel(1, 1, image::Rgba([255, 255, 255, 255]));
        img
    }

    #[test]
    fn test_sample_corners() {
        let tex = Texture::new(checker());
        assert_eq!(tex.sample(0.1, 0.1), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(tex.sample(0.9, 0.1), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(tex.sample(0.1, 0.9), [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sample_repeat_wraps() {
        let tex = Texture::new(checker()).with_repeat([2.0, 2.0]);
        // u=0.3 → 0.6 → 右側
        assert_eq!(tex.sample(0.3, 0.1), [0.0, 1.0, 0.0, 1.0]);
        // u=0.55 → 1.1 → 0.1 → 左側
        assert_eq!(tex.sample(0.55, 0.1), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(tex.sample(-0.2, 0.1), tex.sample(0.3, 0.1));
    }

    #[test]
    fn test_resolve_strips_static_prefix() {
        let loader = FileTextureLoader::new("assets");
        assert_eq!(
            loader.resolve("/static/fabrics/denim/diffuse.jpg"),
            PathBuf::from("assets/fabrics/denim/diffuse.jpg")
        );
        assert_eq!(loader.resolve("fabrics/a.png"), PathBuf::from("assets/fabrics/a.png"));
    }

    #[tokio::test]
    async fn test_missing_file_is_texture_error() {
        let loader = FileTextureLoader::new("no/such/root");
        let err = loader.load("/static/fabrics/x.png").await.unwrap_err();
        assert!(matches!(err, FabricError::TextureLoad { .. }));
    }

    #[tokio::test]
    async fn test_data_uri_loads() {
        let uri = codec::encode_png_data_uri(&checker()).unwrap();
        let loader = FileTextureLoader::new(".");
        let img = loader.load(&uri).await.unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }
}
