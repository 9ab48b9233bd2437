//! Codec routing inside a worker process.
//!
//! A job payload names a codec by tag. The tag set is closed ([`Codec`]); each
//! tag maps to one [`CodecHandler`] registered in a [`CodecRouter`]. Handlers
//! only turn input bytes into encoded bytes. Everything around that (input
//! checks, output path rules, temp backups, the compression-rate threshold,
//! hashing) is shared and lives in [`output`].
//!
//! # Handlers
//!
//! - **Raster** (`png`, `jpeg`, `webp`, `gif`, `tiff`, `avif`): decode and
//!   re-encode through the `image` crate
//! - **SVG**: markup minification
//! - **Tinify**: the remote Tinify shrink API

mod output;
mod raster;
mod router;
mod svg;
mod tinify;

pub use output::{asset_url, compress_rate};
pub use router::CodecRouter;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of codec tags a worker can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Avif,
    Jpeg,
    Png,
    Webp,
    Gif,
    Svg,
    Tiff,
    /// Remote compression through the Tinify API.
    Tinify,
}

impl Codec {
    /// Every codec tag, in registration order.
    pub const ALL: [Codec; 8] = [
        Codec::Avif,
        Codec::Jpeg,
        Codec::Png,
        Codec::Webp,
        Codec::Gif,
        Codec::Svg,
        Codec::Tiff,
        Codec::Tinify,
    ];

    /// Wire name of the codec.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avif => "avif",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Svg => "svg",
            Self::Tiff => "tiff",
            Self::Tinify => "tinify",
        }
    }

    /// Codec for a file extension, if it is a supported image type.
    ///
    /// Never returns [`Codec::Tinify`]; remote mode is a settings decision.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            "gif" => Some(Self::Gif),
            "svg" => Some(Self::Svg),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }
}

impl FromStr for Codec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avif" => Ok(Self::Avif),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            "gif" => Ok(Self::Gif),
            "svg" => Ok(Self::Svg),
            "tiff" | "tif" => Ok(Self::Tiff),
            "tinify" => Ok(Self::Tinify),
            other => Err(CodecError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the compressed file is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Replace the input file.
    #[default]
    Overwrite,
    /// Write next to the input with a suffix before the extension.
    SaveAsNewFile,
    /// Write into another (existing) directory under the same file name.
    SaveToNewFolder,
}

impl FromStr for SaveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(Self::Overwrite),
            "save_as_new_file" => Ok(Self::SaveAsNewFile),
            "save_to_new_folder" => Ok(Self::SaveToNewFolder),
            _ => Err(format!(
                "Unknown output mode: '{}'. Valid options: overwrite, save_as_new_file, save_to_new_folder",
                s
            )),
        }
    }
}

/// Output location options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    pub mode: SaveMode,
    pub new_file_suffix: String,
    pub new_folder_path: Option<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            mode: SaveMode::Overwrite,
            new_file_suffix: "_compressed".to_string(),
            new_folder_path: None,
        }
    }
}

/// Per-job codec options. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecOptions {
    /// Encoder quality, 1-100. Used by lossy encoders.
    pub quality: u8,
    /// Minimum compression rate (percent) for the encoded bytes to be kept.
    pub limit_compress_rate: f64,
    pub save: SaveOptions,
    /// Directory receiving a backup copy of the original file.
    pub temp_dir: Option<String>,
    pub tinify_api_key: Option<String>,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            quality: 80,
            limit_compress_rate: 0.0,
            save: SaveOptions::default(),
            temp_dir: None,
            tinify_api_key: None,
        }
    }
}

/// Job payload consumed by the router.
///
/// `codec` stays a plain string on the wire so that unknown tags reach the
/// worker and are reported there as job-local errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecPayload {
    pub codec: String,
    pub input_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<CodecOptions>,
}

impl CodecPayload {
    pub fn new(codec: impl Into<String>, input_path: impl Into<String>) -> Self {
        Self {
            codec: codec.into(),
            input_path: input_path.into(),
            output_path: None,
            options: None,
        }
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Progress stage reported while a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Starting,
    Reading,
    Processing,
    Writing,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Reading => "reading",
            Self::Processing => "processing",
            Self::Writing => "writing",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Result of a successfully compressed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecOutput {
    pub input_path: String,
    pub input_size: u64,
    pub output_path: String,
    pub output_size: u64,
    /// Allocated size on disk (block-rounded).
    pub output_disk_size: u64,
    /// Size reduction in percent, two decimals.
    pub compress_rate: f64,
    /// Whether the encoded bytes met the configured rate threshold.
    pub available_compress_rate: bool,
    /// Backup copy of the original, empty when no temp dir was configured.
    pub original_temp_path: String,
    /// SHA-256 of the output file.
    pub hash: String,
    /// Milliseconds spent inside the worker.
    pub cost_time: u64,
}

/// Errors raised while executing a codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported codec: {0}")]
    Unsupported(String),

    #[error("No handler registered for codec: {0}")]
    MissingHandler(Codec),

    #[error("Path '{0}' does not exist")]
    InputNotFound(String),

    #[error("File '{0}' is not a file")]
    NotAFile(String),

    #[error("Directory '{0}' does not exist")]
    OutputFolderMissing(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid SVG: {0}")]
    Svg(#[from] resvg::usvg::Error),

    #[error("Animated {0} images are not supported")]
    Animated(Codec),

    #[error("Tinify error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A codec implementation: turns the original bytes into encoded bytes.
pub trait CodecHandler: Send + Sync {
    /// Tag this handler serves.
    fn codec(&self) -> Codec;

    /// Encode `input` according to `options`.
    fn encode(&self, input: &[u8], options: &CodecOptions) -> Result<Vec<u8>, CodecError>;
}
