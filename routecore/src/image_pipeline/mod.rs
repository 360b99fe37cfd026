//! Responsive image transcoding.
//!
//! A photo is decoded once, resized to every configured width that does not
//! exceed the source width, and encoded in every configured format. One
//! JPEG fallback is produced on request.
//!
//! ## Architecture
//!
//! - [`options`]: serde option tables ([`ImageProcessingOptions`], [`FormatOptions`]).
//! - [`codec`]: the [`ImageCodec`] trait and the production [`RasterCodec`].
//! - [`ImageTranscoder`]: drives the codec, checks cancellation between
//!   steps and wraps every encoded blob in a [`BlobHandle`].
//!
//! Variant failures are logged and skipped. Cancellation aborts the photo;
//! every handle created so far is dropped (released) before the error
//! reaches the caller.

pub mod codec;
pub mod options;

use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

pub use codec::{CodecError, ImageCodec, RasterCodec};
pub use options::{
    AvifColorSpace, AvifOptions, EncoderParams, FormatOptions, ImageFormat, ImageProcessingOptions,
    JpegOptions, WebpOptions,
};

use crate::progress::{BlobHandle, CancellationToken, Cancelled, HandleLedger};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("image processing cancelled")]
    Cancelled,
    #[error("cannot decode {name}: {source}")]
    Decode { name: String, source: CodecError },
    #[error("cannot resize {name}: {source}")]
    Resize { name: String, source: CodecError },
    #[error("cannot encode {name}: {source}")]
    Encode { name: String, source: CodecError },
    #[error("no variant could be produced for {0}")]
    NoVariants(String),
}

impl TranscodeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TranscodeError::Cancelled)
    }
}

impl From<Cancelled> for TranscodeError {
    fn from(_: Cancelled) -> Self {
        TranscodeError::Cancelled
    }
}

/// One encoded variant.
#[derive(Debug)]
pub struct ImageVariant {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub quality: u8,
    pub data: BlobHandle,
}

/// All outputs for one source photo.
#[derive(Debug)]
pub struct ProcessedImage {
    pub variants: Vec<ImageVariant>,
    pub fallback: Option<ImageVariant>,
    pub aspect_ratio: f64,
    pub original_width: u32,
    pub original_height: u32,
}

/// Height for `width` keeping `aspect_ratio` (width / height), at least 1.
pub fn scaled_height(width: u32, aspect_ratio: f64) -> u32 {
    ((width as f64 / aspect_ratio).round() as u32).max(1)
}

#[derive(Clone)]
pub struct ImageTranscoder {
    codec: Arc<dyn ImageCodec>,
    ledger: HandleLedger,
}

impl ImageTranscoder {
    pub fn new(codec: Arc<dyn ImageCodec>, ledger: HandleLedger) -> Self {
        Self { codec, ledger }
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    pub fn process_image(
        &self,
        bytes: &[u8],
        name: &str,
        options: &ImageProcessingOptions,
        token: &CancellationToken,
    ) -> Result<ProcessedImage, TranscodeError> {
        let result = self.transcode(bytes, name, options, token);
        if let Err(TranscodeError::Cancelled) = &result {
            debug!(
                "[image] {} cancelled, live handles: {}",
                name,
                self.ledger.live()
            );
        }
        result
    }

    fn transcode(
        &self,
        bytes: &[u8],
        name: &str,
        options: &ImageProcessingOptions,
        token: &CancellationToken,
    ) -> Result<ProcessedImage, TranscodeError> {
        token.check()?;
        let source = self
            .codec
            .decode(bytes)
            .map_err(|source| TranscodeError::Decode {
                name: name.to_string(),
                source,
            })?;
        token.check()?;

        let (original_width, original_height) = (source.width(), source.height());
        if original_width == 0 || original_height == 0 {
            return Err(TranscodeError::Decode {
                name: name.to_string(),
                source: CodecError::Decode("image has no pixels".to_string()),
            });
        }
        let aspect_ratio = original_width as f64 / original_height as f64;

        let mut variants = Vec::new();
        let mut last_failure = None;
        for &width in &options.widths {
            token.check()?;
            if width == 0 || width > original_width {
                debug!(
                    "[image] {}: skipping {}px (source is {}px)",
                    name, width, original_width
                );
                continue;
            }
            let height = scaled_height(width, aspect_ratio);
            let resized = match self.codec.resize(&source, width, height) {
                Ok(r) => r,
                Err(source) => {
                    warn!("[image] {}: {}", name, source);
                    last_failure = Some(TranscodeError::Resize {
                        name: name.to_string(),
                        source,
                    });
                    continue;
                }
            };

            for &format in &options.formats {
                token.check()?;
                let params = options.format_options.params_for(format, options.quality);
                match self.codec.encode(&resized, &params) {
                    Ok(encoded) => {
                        variants.push(ImageVariant {
                            width,
                            height,
                            format,
                            quality: params.quality(),
                            data: self.ledger.create(encoded),
                        });
                        token.check()?;
                    }
                    Err(source) => {
                        warn!(
                            "[image] {}: {} at {}px skipped: {}",
                            name,
                            format.as_str(),
                            width,
                            source
                        );
                        last_failure = Some(TranscodeError::Encode {
                            name: name.to_string(),
                            source,
                        });
                    }
                }
            }
        }

        let fallback = if options.generate_fallback {
            token.check()?;
            self.fallback(&source, name, options, aspect_ratio, token, &mut last_failure)?
        } else {
            None
        };

        if variants.is_empty() && fallback.is_none() {
            return Err(last_failure.unwrap_or_else(|| TranscodeError::NoVariants(name.to_string())));
        }

        debug!(
            "[image] {}: {} variants, fallback: {}",
            name,
            variants.len(),
            fallback.is_some()
        );

        Ok(ProcessedImage {
            variants,
            fallback,
            aspect_ratio,
            original_width,
            original_height,
        })
    }

    fn fallback(
        &self,
        decoded: &image::DynamicImage,
        name: &str,
        options: &ImageProcessingOptions,
        aspect_ratio: f64,
        token: &CancellationToken,
        last_failure: &mut Option<TranscodeError>,
    ) -> Result<Option<ImageVariant>, Cancelled> {
        let width = options.fallback_width.min(decoded.width()).max(1);
        let height = scaled_height(width, aspect_ratio);
        let params = options
            .format_options
            .params_for(ImageFormat::Jpeg, options.quality);

        let resized = match self.codec.resize(decoded, width, height) {
            Ok(r) => r,
            Err(source) => {
                warn!("[image] {}: fallback {}", name, source);
                *last_failure = Some(TranscodeError::Resize {
                    name: name.to_string(),
                    source,
                });
                return Ok(None);
            }
        };
        token.check()?;
        match self.codec.encode(&resized, &params) {
            Ok(encoded) => {
                let variant = ImageVariant {
                    width,
                    height,
                    format: ImageFormat::Jpeg,
                    quality: params.quality(),
                    data: self.ledger.create(encoded),
                };
                token.check()?;
                Ok(Some(variant))
            }
            Err(source) => {
                warn!("[image] {}: fallback {}", name, source);
                *last_failure = Some(TranscodeError::Encode {
                    name: name.to_string(),
                    source,
                });
                Ok(None)
            }
        }
    }
}
