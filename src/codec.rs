//! data URI image encoding shared by the enhancement channel and texture loading.
//!
//! Camera frames go out as JPEG (no alpha, composited over white), garment
//! renders as PNG so the alpha channel survives.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbImage, RgbaImage};

use crate::error::CodecError;

pub fn encode_png_data_uri(image: &RgbaImage) -> Result<String, CodecError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(format!("data:image/png;base64,{}", BASE64_STANDARD.encode(&buf)))
}

pub fn encode_jpeg_data_uri(image: &RgbaImage, quality: u8) -> Result<String, CodecError> {
    let rgb = flatten_over_white(image);
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8,
    )?;
    Ok(format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(&buf)))
}

/// `data:<mime>;base64,<payload>` もしくは素の base64 を RGBA に復号する
pub fn decode_data_uri(uri: &str) -> Result<RgbaImage, CodecError> {
    let payload = match uri.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or(CodecError::NotDataUri)?;
            if !header.ends_with(";base64") {
                return Err(CodecError::NotDataUri);
            }
            payload
        }
        None => uri,
    };
    let bytes = BASE64_STANDARD.decode(payload.trim())?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

fn flatten_over_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        let a = a as u32;
        let mix = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        image::Rgb([mix(r), mix(g), mix(b)])
    })
}
