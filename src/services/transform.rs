//! Image transformation: decode → orient → resize → encode.
//!
//! Pure CPU work on byte buffers. Callers run it on the blocking pool.

use crate::{errors::ImgError, models::image_request::OutputFormat};
use image::{
    DynamicImage, ImageDecoder, ImageReader, imageops::FilterType, metadata::Orientation,
};
use std::{io::Cursor, panic};

/// Sources above this many pixels are refused before a full decode.
pub const MAX_SOURCE_PIXELS: u64 = 50_000_000;

/// Result of a transform.
#[derive(Debug)]
pub struct Transformed {
    pub data: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Render `source` at `width` (never wider than the source) and encode it.
pub fn transform(
    source: &[u8],
    width: u32,
    quality: u8,
    format: OutputFormat,
) -> Result<Transformed, ImgError> {
    let (img, orientation) = decode(source)?;
    let img = fit_width(orient(img, orientation), width);
    let data = encode(&img, quality, format)?;

    Ok(Transformed {
        data,
        content_type: format.content_type(),
        width: img.width(),
        height: img.height(),
    })
}

fn decode(source: &[u8]) -> Result<(DynamicImage, Orientation), ImgError> {
    let mut decoder = ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(|e| ImgError::Decode(e.to_string()))?
        .into_decoder()
        .map_err(|e| ImgError::Decode(e.to_string()))?;

    let (width, height) = decoder.dimensions();
    if u64::from(width) * u64::from(height) > MAX_SOURCE_PIXELS {
        return Err(ImgError::TooLarge { width, height });
    }

    // Unreadable EXIF is not fatal; the image just stays as stored.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let img = DynamicImage::from_decoder(decoder).map_err(|e| ImgError::Decode(e.to_string()))?;
    Ok((img, orientation))
}

/// Must run before `fit_width`: a 90°/270° rotation swaps the axes.
fn orient(mut img: DynamicImage, orientation: Orientation) -> DynamicImage {
    img.apply_orientation(orientation);
    img
}

/// Scale to `width` keeping the aspect ratio. Never upscales.
fn fit_width(img: DynamicImage, width: u32) -> DynamicImage {
    let (src_w, src_h) = (img.width(), img.height());
    if width == 0 || width >= src_w {
        return img;
    }

    let height = ((u64::from(src_h) * u64::from(width) + u64::from(src_w) / 2) / u64::from(src_w))
        .max(1) as u32;
    img.resize_exact(width, height, FilterType::Lanczos3)
}

fn encode(img: &DynamicImage, quality: u8, format: OutputFormat) -> Result<Vec<u8>, ImgError> {
    match format {
        OutputFormat::WebP => {
            let rgba = img.to_rgba8();
            let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode_simple(false, f32::from(quality))
                .map_err(|e| ImgError::Encode(format!("webp: {e:?}")))?;
            Ok(encoded.to_vec())
        }
        OutputFormat::Jpeg => encode_jpeg(img, quality),
    }
}

/// Progressive, trellis-quantized JPEG via mozjpeg. libjpeg reports fatal
/// errors by unwinding, so they are caught here.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImgError> {
    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    let encoded = panic::catch_unwind(|| -> std::io::Result<Vec<u8>> {
        let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
        comp.set_size(width, height);
        comp.set_quality(f32::from(quality));
        let mut comp = comp.start_compress(Vec::new())?;
        comp.write_scanlines(rgb.as_raw())?;
        comp.finish()
    });

    match encoded {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(e)) => Err(ImgError::Encode(format!("jpeg: {e}"))),
        Err(_) => Err(ImgError::Encode("jpeg: encoder aborted".into())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};

    /// A `width`×`height` JPEG with a horizontal gradient.
    pub(crate) fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    /// Insert an APP1 Exif segment carrying only the orientation tag (0x0112)
    /// right after the SOI marker.
    fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"MM\x00\x2a");
        tiff.extend_from_slice(&8u32.to_be_bytes());
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x0112u16.to_be_bytes());
        tiff.extend_from_slice(&3u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_be_bytes());

        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend_from_slice(&tiff);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xff, 0xe1]);
        out.extend_from_slice(&(payload.len() as u16 + 2).to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn dimensions(bytes: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(bytes).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn resizes_to_requested_width_keeping_aspect() {
        let out = transform(&sample_jpeg(1600, 1200), 800, 80, OutputFormat::Jpeg).unwrap();
        assert_eq!((out.width, out.height), (800, 600));
        assert_eq!(out.content_type, "image/jpeg");
        assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::Jpeg);
        assert_eq!(dimensions(&out.data), (800, 600));
    }

    #[test]
    fn encodes_webp_when_negotiated() {
        let out = transform(&sample_jpeg(1600, 1200), 800, 80, OutputFormat::WebP).unwrap();
        assert_eq!(out.content_type, "image/webp");
        assert_eq!(image::guess_format(&out.data).unwrap(), ImageFormat::WebP);
        assert_eq!(dimensions(&out.data), (800, 600));
    }

    #[test]
    fn never_upscales() {
        let out = transform(&sample_jpeg(320, 240), 3000, 80, OutputFormat::Jpeg).unwrap();
        assert_eq!((out.width, out.height), (320, 240));
        assert_eq!(dimensions(&out.data), (320, 240));
    }

    #[test]
    fn tiny_targets_keep_at_least_one_pixel() {
        let out = transform(&sample_jpeg(400, 10), 1, 80, OutputFormat::Jpeg).unwrap();
        assert_eq!((out.width, out.height), (1, 1));
    }

    #[test]
    fn orientation_is_applied_before_resizing() {
        let landscape = DynamicImage::ImageRgb8(RgbImage::new(1600, 1200));
        let img = fit_width(orient(landscape, Orientation::Rotate90), 600);
        // Portrait after rotation: 1200x1600 scaled to width 600.
        assert_eq!((img.width(), img.height()), (600, 800));
    }

    #[test]
    fn exif_orientation_is_read_from_the_source() {
        // Orientation 6: stored landscape, displayed rotated 90° clockwise.
        let src = with_exif_orientation(&sample_jpeg(160, 120), 6);
        let out = transform(&src, 60, 80, OutputFormat::Jpeg).unwrap();
        assert_eq!((out.width, out.height), (60, 80));
        assert_eq!(dimensions(&out.data), (60, 80));

        let plain = transform(&sample_jpeg(160, 120), 60, 80, OutputFormat::Jpeg).unwrap();
        assert_eq!((plain.width, plain.height), (60, 45));
    }

    #[test]
    fn higher_quality_produces_larger_output() {
        let src = sample_jpeg(640, 480);
        let low = transform(&src, 640, 30, OutputFormat::Jpeg).unwrap();
        let high = transform(&src, 640, 95, OutputFormat::Jpeg).unwrap();
        assert!(high.data.len() > low.data.len());
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let err = transform(b"definitely not an image", 800, 80, OutputFormat::Jpeg).unwrap_err();
        assert!(matches!(err, ImgError::Decode(_)), "{err:?}");
    }
}
