//! Codec seam: decode, resize and encode primitives.
//!
//! [`RasterCodec`] is the production implementation on the `image` crate.
//! Tests substitute their own [`ImageCodec`] to inject failures or to cancel
//! mid-pipeline.

use image::codecs::avif::{AvifEncoder, ColorSpace};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use thiserror::Error;

use super::options::{AvifColorSpace, EncoderParams, ImageFormat};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("resize to {width}x{height} failed: {message}")]
    Resize {
        width: u32,
        height: u32,
        message: String,
    },
    #[error("{} encode failed: {message}", .format.as_str())]
    Encode { format: ImageFormat, message: String },
}

pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError>;

    fn resize(
        &self,
        source: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError>;

    fn encode(&self, raster: &DynamicImage, params: &EncoderParams) -> Result<Vec<u8>, CodecError>;
}

/// `image`-crate codec (Lanczos3 resampling, JPEG, AVIF) with libwebp for WebP.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn resize(
        &self,
        source: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::Resize {
                width,
                height,
                message: "empty target".to_string(),
            });
        }
        Ok(source.resize_exact(width, height, FilterType::Lanczos3))
    }

    fn encode(&self, raster: &DynamicImage, params: &EncoderParams) -> Result<Vec<u8>, CodecError> {
        let format = params.format();
        let encode_err = |e: image::ImageError| CodecError::Encode {
            format,
            message: e.to_string(),
        };
        let (width, height) = (raster.width(), raster.height());
        let mut buf = Vec::new();

        match *params {
            EncoderParams::Jpeg { quality } => {
                // JPEG has no alpha channel.
                let rgb = raster.to_rgb8();
                JpegEncoder::new_with_quality(&mut buf, quality)
                    .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(encode_err)?;
            }
            EncoderParams::Webp {
                quality,
                method,
                lossless,
            } => return encode_webp(raster, quality, method, lossless),
            EncoderParams::Avif {
                quality,
                speed,
                threads,
                color_space,
            } => {
                let rgba = raster.to_rgba8();
                let color_space = match color_space {
                    AvifColorSpace::Srgb => ColorSpace::Srgb,
                    AvifColorSpace::Bt709 => ColorSpace::Bt709,
                };
                AvifEncoder::new_with_speed_quality(&mut buf, speed, quality)
                    .with_colorspace(color_space)
                    .with_num_threads(threads)
                    .write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
                    .map_err(encode_err)?;
            }
        }
        Ok(buf)
    }
}

fn encode_webp(
    raster: &DynamicImage,
    quality: u8,
    method: u8,
    lossless: bool,
) -> Result<Vec<u8>, CodecError> {
    let encode_err = |message: String| CodecError::Encode {
        format: ImageFormat::Webp,
        message,
    };
    let rgba = raster.to_rgba8();
    let mut config =
        webp::WebPConfig::new().map_err(|_| encode_err("cannot initialize config".to_string()))?;
    config.quality = f32::from(quality);
    config.method = i32::from(method);
    config.lossless = i32::from(lossless);

    let encoded = webp::Encoder::from_rgba(rgba.as_raw(), raster.width(), raster.height())
        .encode_advanced(&config)
        .map_err(|e| encode_err(format!("{:?}", e)))?;
    Ok(encoded.to_vec())
}
