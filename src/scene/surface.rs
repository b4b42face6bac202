use image::RgbaImage;

use crate::error::RenderError;

/// 描画先 (RGBA カラー + 深度)
///
/// preserve_buffer は生成時にのみ指定できる。false の場合 present 後に
/// カラーバッファは破棄され、読み出し (capture) はできない。
pub struct RenderSurface {
    color: RgbaImage,
    depth: Vec<f32>,
    preserve_buffer: bool,
}

impl RenderSurface {
    pub fn new(width: u32, height: u32, preserve_buffer: bool) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::EmptySurface { width, height });
        }
        Ok(Self {
            color: RgbaImage::new(width, height),
            depth: vec![f32::INFINITY; (width * height) as usize],
            preserve_buffer,
        })
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }

    pub fn size(&self) -> (u32, u32) {
        self.color.dimensions()
    }

    pub fn preserves_buffer(&self) -> bool {
        self.preserve_buffer
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::EmptySurface { width, height });
        }
        if self.size() != (width, height) {
            self.color = RgbaImage::new(width, height);
            self.depth = vec![f32::INFINITY; (width * height) as usize];
        }
        Ok(())
    }

    pub fn clear(&mut self, rgba: [u8; 4]) {
        for p in self.color.pixels_mut() {
            p.0 = rgba;
        }
        self.depth.fill(f32::INFINITY);
    }

    /// 背景画像で埋める（サイズは一致している前提）
    pub fn clear_with(&mut self, background: &RgbaImage) {
        if background.dimensions() == self.size() {
            self.color.copy_from_slice(background.as_raw());
        } else {
            self.clear([0, 0, 0, 255]);
        }
        self.depth.fill(f32::INFINITY);
    }

    /// 深度テスト。手前なら深度を書き込んで true
    pub fn depth_test(&mut self, x: u32, y: u32, depth: f32) -> bool {
        let i = (y * self.width() + x) as usize;
        match self.depth.get_mut(i) {
            Some(d) if depth < *d => {
                *d = depth;
                true
            }
            _ => false,
        }
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x < self.width() && y < self.height() {
            self.color.put_pixel(x, y, image::Rgba(rgba));
        }
    }

    pub fn color_mut(&mut self) -> &mut RgbaImage {
        &mut self.color
    }

    /// 表示へ渡す。preserve_buffer でなければバッファを破棄する
    pub fn present(&mut self) -> RgbaImage {
        if self.preserve_buffer {
            self.color.clone()
        } else {
            let (w, h) = self.size();
            std::mem::replace(&mut self.color, RgbaImage::new(w, h))
        }
    }

    /// 描画結果の読み出し
    pub fn read_pixels(&self) -> Result<&RgbaImage, RenderError> {
        if !self.preserve_buffer {
            return Err(RenderError::BufferNotPreserved);
        }
        Ok(&self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            RenderSurface::new(0, 10, true),
            Err(RenderError::EmptySurface { .. })
        ));
        let mut s = RenderSurface::new(4, 4, true).unwrap();
        assert!(s.resize(4, 0).is_err());
        assert_eq!(s.size(), (4, 4));
    }

    #[test]
    fn test_depth_test_keeps_nearest() {
        let mut s = RenderSurface::new(2, 2, true).unwrap();
        assert!(s.depth_test(1, 1, 0.5));
        assert!(!s.depth_test(1, 1, 0.7));
        assert!(s.depth_test(1, 1, 0.2));
        s.clear([0; 4]);
        assert!(s.depth_test(1, 1, 0.9));
    }

    #[test]
    fn test_preserved_buffer_survives_present() {
        let mut s = RenderSurface::new(2, 2, true).unwrap();
        s.clear([10, 20, 30, 255]);
        let shown = s.present();
        assert_eq!(shown.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(s.read_pixels().unwrap().get_pixel(0, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_unpreserved_buffer_discarded() {
        let mut s = RenderSurface::new(2, 2, false).unwrap();
        s.clear([10, 20, 30, 255]);
        let shown = s.present();
        assert_eq!(shown.get_pixel(1, 1).0, [10, 20, 30, 255]);
        assert!(matches!(s.read_pixels(), Err(RenderError::BufferNotPreserved)));
    }
}
