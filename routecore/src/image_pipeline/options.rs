//! Image processing options and per-codec encoder tables.

use serde::{Deserialize, Serialize};

/// Output format of a responsive variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Webp,
    Avif,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Avif => "image/avif",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
        }
    }
}

/// JPEG encoder table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JpegOptions {
    /// Overrides the global quality when set.
    pub quality: Option<u8>,
}

/// WebP encoder table (libwebp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebpOptions {
    pub quality: Option<u8>,
    /// Compression effort, 0 (fast) to 6 (slowest, smallest). Default 4.
    pub method: u8,
    /// Encode losslessly; the variant then reports quality 100.
    pub lossless: bool,
}

impl Default for WebpOptions {
    fn default() -> Self {
        Self {
            quality: None,
            method: 4,
            lossless: false,
        }
    }
}

/// Color model of AVIF output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvifColorSpace {
    /// Stored as RGB planes.
    Srgb,
    /// Stored as BT.709 YCbCr, smaller at equal quality.
    #[default]
    Bt709,
}

/// AVIF encoder table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AvifOptions {
    pub quality: Option<u8>,
    /// 1 (slowest, best) to 10 (fastest). Default 6.
    pub speed: u8,
    /// Encoder threads; `None` lets the encoder decide.
    pub threads: Option<usize>,
    pub color_space: AvifColorSpace,
}

impl Default for AvifOptions {
    fn default() -> Self {
        Self {
            quality: None,
            speed: 6,
            threads: None,
            color_space: AvifColorSpace::default(),
        }
    }
}

/// One table per codec. Missing tables or fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatOptions {
    pub jpeg: JpegOptions,
    pub webp: WebpOptions,
    pub avif: AvifOptions,
}

/// Resolved encoder parameters handed to a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderParams {
    Jpeg {
        quality: u8,
    },
    Webp {
        quality: u8,
        method: u8,
        lossless: bool,
    },
    Avif {
        quality: u8,
        speed: u8,
        threads: Option<usize>,
        color_space: AvifColorSpace,
    },
}

impl EncoderParams {
    pub fn format(&self) -> ImageFormat {
        match self {
            EncoderParams::Jpeg { .. } => ImageFormat::Jpeg,
            EncoderParams::Webp { .. } => ImageFormat::Webp,
            EncoderParams::Avif { .. } => ImageFormat::Avif,
        }
    }

    /// Quality the encoder actually applies. Lossless WebP is reported as 100.
    pub fn quality(&self) -> u8 {
        match self {
            EncoderParams::Webp { lossless: true, .. } => 100,
            EncoderParams::Jpeg { quality }
            | EncoderParams::Webp { quality, .. }
            | EncoderParams::Avif { quality, .. } => *quality,
        }
    }
}

impl FormatOptions {
    /// Encoder parameters for `format`; a table quality wins over `global_quality`.
    pub fn params_for(&self, format: ImageFormat, global_quality: u8) -> EncoderParams {
        let clamp = |q: u8| q.clamp(1, 100);
        match format {
            ImageFormat::Jpeg => EncoderParams::Jpeg {
                quality: clamp(self.jpeg.quality.unwrap_or(global_quality)),
            },
            ImageFormat::Webp => EncoderParams::Webp {
                quality: clamp(self.webp.quality.unwrap_or(global_quality)),
                method: self.webp.method.min(6),
                lossless: self.webp.lossless,
            },
            ImageFormat::Avif => EncoderParams::Avif {
                quality: clamp(self.avif.quality.unwrap_or(global_quality)),
                speed: self.avif.speed.clamp(1, 10),
                threads: self.avif.threads,
                color_space: self.avif.color_space,
            },
        }
    }
}

/// How photos are turned into responsive variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageProcessingOptions {
    /// Target widths in pixels. Default `[400, 800, 1200, 1600]`.
    pub widths: Vec<u32>,
    /// Formats encoded at every width. Default `[avif, webp, jpeg]`.
    pub formats: Vec<ImageFormat>,
    /// Global quality (1-100). Default 80.
    pub quality: u8,
    /// Also emit a single JPEG fallback. Default true.
    pub generate_fallback: bool,
    /// Maximum fallback width. Default 800.
    pub fallback_width: u32,
    pub format_options: FormatOptions,
}

impl Default for ImageProcessingOptions {
    fn default() -> Self {
        Self {
            widths: vec![400, 800, 1200, 1600],
            formats: vec![ImageFormat::Avif, ImageFormat::Webp, ImageFormat::Jpeg],
            quality: 80,
            generate_fallback: true,
            fallback_width: 800,
            format_options: FormatOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_merges_over_defaults() {
        let json = r#"{ "widths": [320], "formatOptions": { "avif": { "quality": 40 } } }"#;
        let opts: ImageProcessingOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.widths, vec![320]);
        assert_eq!(opts.quality, 80);
        assert_eq!(opts.format_options.avif.speed, 6);
        assert_eq!(
            opts.format_options.params_for(ImageFormat::Avif, opts.quality),
            EncoderParams::Avif {
                quality: 40,
                speed: 6,
                threads: None,
                color_space: AvifColorSpace::Bt709,
            }
        );
        assert_eq!(
            opts.format_options.params_for(ImageFormat::Jpeg, opts.quality),
            EncoderParams::Jpeg { quality: 80 }
        );
    }

    #[test]
    fn test_unknown_format_rejected() {
        let json = r#"{ "formats": ["gif"] }"#;
        assert!(serde_json::from_str::<ImageProcessingOptions>(json).is_err());
    }

    #[test]
    fn test_webp_table_resolves_method_and_quality() {
        let json = r#"{ "quality": 70, "formatOptions": { "webp": { "method": 9 } } }"#;
        let opts: ImageProcessingOptions = serde_json::from_str(json).unwrap();
        let params = opts.format_options.params_for(ImageFormat::Webp, opts.quality);
        assert_eq!(
            params,
            EncoderParams::Webp {
                quality: 70,
                method: 6,
                lossless: false,
            }
        );
        assert_eq!(params.quality(), 70);

        let mut lossless = opts.format_options.clone();
        lossless.webp.lossless = true;
        assert_eq!(lossless.params_for(ImageFormat::Webp, 70).quality(), 100);
    }
}
