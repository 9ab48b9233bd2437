//! User-facing compression settings.
//!
//! Settings are read from a JSON file (every field optional) and turned into
//! one [`CodecPayload`] per input file. The CLI layers its flags on top.

use crate::codec::{Codec, CodecOptions, CodecPayload, SaveMode, SaveOptions};
use crate::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable holding the Tinify API key.
pub const TINIFY_API_KEY_ENV: &str = "PICPOOL_TINIFY_API_KEY";

/// Extensions the Tinify API accepts. Other files stay local in remote mode.
const REMOTE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "avif"];

/// Where compression runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Built-in encoders inside the worker processes.
    #[default]
    Local,
    /// The Tinify API, for the formats it supports.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub output_mode: SaveMode,
    pub save_as_file_suffix: String,
    pub save_to_folder: Option<String>,
    /// Keep the original bytes unless the threshold below is reached.
    pub compress_rate_limit: bool,
    /// Minimum size reduction in percent.
    pub compress_rate_limit_threshold: f64,
    pub quality: u8,
    pub mode: CompressionMode,
    pub tinify_api_key: Option<String>,
    /// Directory receiving a backup of every original.
    pub temp_dir: Option<String>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        let save = SaveOptions::default();
        let codec = CodecOptions::default();
        Self {
            output_mode: save.mode,
            save_as_file_suffix: save.new_file_suffix,
            save_to_folder: None,
            compress_rate_limit: false,
            compress_rate_limit_threshold: 0.0,
            quality: codec.quality,
            mode: CompressionMode::Local,
            tinify_api_key: None,
            temp_dir: None,
        }
    }
}

impl CompressionSettings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PoolError::Settings(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| {
            PoolError::Settings(format!("invalid settings in {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), "Loaded compression settings");
        Ok(settings)
    }

    /// Fill the Tinify key from the environment when the file has none.
    pub fn with_env_overrides(mut self) -> Self {
        if self.tinify_api_key.is_none()
            && let Ok(key) = std::env::var(TINIFY_API_KEY_ENV)
            && !key.is_empty()
        {
            self.tinify_api_key = Some(key);
        }
        self
    }

    /// Reject values no codec can work with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(PoolError::Settings(format!(
                "quality must be between 1 and 100, got {}",
                self.quality
            )));
        }
        if !self.compress_rate_limit_threshold.is_finite()
            || !(0.0..=100.0).contains(&self.compress_rate_limit_threshold)
        {
            return Err(PoolError::Settings(format!(
                "compress_rate_limit_threshold must be between 0 and 100, got {}",
                self.compress_rate_limit_threshold
            )));
        }
        if self.output_mode == SaveMode::SaveToNewFolder && self.save_to_folder.is_none() {
            return Err(PoolError::Settings(
                "output mode save_to_new_folder needs save_to_folder".to_string(),
            ));
        }
        if self.output_mode == SaveMode::SaveAsNewFile && self.save_as_file_suffix.is_empty() {
            return Err(PoolError::Settings(
                "output mode save_as_new_file needs a non-empty suffix".to_string(),
            ));
        }
        Ok(())
    }

    /// Codec options shared by every job of a batch.
    pub fn codec_options(&self) -> CodecOptions {
        CodecOptions {
            quality: self.quality,
            limit_compress_rate: if self.compress_rate_limit {
                self.compress_rate_limit_threshold
            } else {
                0.0
            },
            save: SaveOptions {
                mode: self.output_mode,
                new_file_suffix: self.save_as_file_suffix.clone(),
                new_folder_path: self.save_to_folder.clone(),
            },
            temp_dir: self.temp_dir.clone(),
            tinify_api_key: self.tinify_api_key.clone(),
        }
    }

    /// Codec tag for `path`.
    ///
    /// Unknown extensions pass through as-is so the worker reports them as
    /// unsupported for that one file.
    pub fn codec_for(&self, path: &Path) -> String {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if self.mode == CompressionMode::Remote && REMOTE_EXTENSIONS.contains(&ext.as_str()) {
            return Codec::Tinify.as_str().to_string();
        }
        match Codec::from_extension(&ext) {
            Some(codec) => codec.as_str().to_string(),
            None if ext.is_empty() => "unknown".to_string(),
            None => ext,
        }
    }

    pub fn payload_for(&self, path: &Path) -> CodecPayload {
        CodecPayload::new(self.codec_for(path), path.to_string_lossy())
            .with_options(self.codec_options())
    }
}
