//! Shared decode / encode helpers.
//!
//! Every raster adapter funnels through [`encode`], so format-specific rules
//! live in one place:
//!
//! * JPEG has no alpha channel: pixels are composited over opaque white
//!   before encoding, and `quality` maps to the encoder's 1–100 scale.
//! * PNG is lossless: `quality` only selects the deflate effort.
//! * WebP goes through libwebp's lossy encoder, which keeps alpha.
//! * GIF is palette-quantised from RGBA.

use crate::error::CodecError;
use crate::params::{OutputFormat, Quality};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Decode a bitmap from memory, guessing its format from the content.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Pixel size of an encoded bitmap, read from its header only.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32), CodecError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::Decode(e.to_string()))?
        .into_dimensions()
        .map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encode `img` as `format`.
pub fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    quality: Quality,
) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Jpeg => {
            let rgb = flatten_on_white(img);
            JpegEncoder::new_with_quality(&mut buf, quality.percent()).encode_image(&rgb)
        }
        OutputFormat::Png => {
            let compression = if quality.get() < 0.5 {
                CompressionType::Best
            } else {
                CompressionType::Default
            };
            let encoder = PngEncoder::new_with_quality(&mut buf, compression, PngFilter::Adaptive);
            img.write_with_encoder(encoder)
        }
        OutputFormat::Webp => {
            // libwebp only takes 8-bit RGB(A).
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            let encoder = webp::Encoder::from_image(&rgba)
                .map_err(|e| CodecError::Encode(format!("webp: {e}")))?;
            buf.extend_from_slice(&encoder.encode(quality.get() * 100.0));
            Ok(())
        }
        OutputFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Gif),
        OutputFormat::Svg => {
            return Err(CodecError::Encode(
                "a raster image cannot be encoded as SVG".into(),
            ))
        }
    };
    result.map_err(|e| CodecError::Encode(e.to_string()))?;

    debug!(
        "Encoded {}x{} → {} ({} bytes)",
        img.width(),
        img.height(),
        format,
        buf.len()
    );
    Ok(buf)
}

/// Composite over opaque white and drop the alpha channel.
pub fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// Deterministic high-frequency pattern so lossy quality has something
    /// to throw away.
    fn noisy(width: u32, height: u32) -> DynamicImage {
        let mut seed: u32 = 0x2545_f491;
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let n = (seed & 0x3f) as u8;
            Rgb([(x * 4) as u8 ^ n, (y * 4) as u8, n.wrapping_mul(3)])
        }))
    }

    #[test]
    fn jpeg_size_grows_with_quality() {
        let img = noisy(96, 96);
        let low = encode(&img, OutputFormat::Jpeg, Quality::new(0.3).unwrap()).unwrap();
        let mid = encode(&img, OutputFormat::Jpeg, Quality::new(0.6).unwrap()).unwrap();
        let high = encode(&img, OutputFormat::Jpeg, Quality::new(0.95).unwrap()).unwrap();
        assert!(low.len() <= mid.len(), "{} > {}", low.len(), mid.len());
        assert!(mid.len() <= high.len(), "{} > {}", mid.len(), high.len());
    }

    #[test]
    fn webp_size_grows_with_quality() {
        let img = noisy(96, 96);
        let low = encode(&img, OutputFormat::Webp, Quality::new(0.2).unwrap()).unwrap();
        let high = encode(&img, OutputFormat::Webp, Quality::new(0.95).unwrap()).unwrap();
        assert!(low.len() < high.len(), "{} >= {}", low.len(), high.len());
    }

    #[test]
    fn transparent_pixels_become_white_in_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let flat = flatten_on_white(&img);
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);

        let half = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let [r, ..] = flatten_on_white(&half).get_pixel(0, 0).0;
        assert!((126..=128).contains(&r), "got {r}");
    }

    #[test]
    fn every_raster_format_decodes_back() {
        let img = noisy(20, 10);
        for format in [
            OutputFormat::Jpeg,
            OutputFormat::Png,
            OutputFormat::Webp,
            OutputFormat::Gif,
        ] {
            let bytes = encode(&img, format, Quality::REENCODE).unwrap();
            assert_eq!(dimensions(&bytes).unwrap(), (20, 10), "{format}");
            let guessed = image::guess_format(&bytes).unwrap();
            assert_eq!(Some(guessed), format.image_format());
        }
    }

    #[test]
    fn svg_is_not_a_raster_target() {
        let img = noisy(2, 2);
        assert!(matches!(
            encode(&img, OutputFormat::Svg, Quality::REENCODE),
            Err(CodecError::Encode(_))
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(decode(b"not an image"), Err(CodecError::Decode(_))));
    }
}
