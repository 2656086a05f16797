//! Engine configuration.
//!
//! The storage locations used for redundancy are explicit configuration handed
//! to the engine at construction. Values can be loaded from environment
//! variables with sensible defaults.

use std::path::{Path, PathBuf};

use crate::error::{Result, WatermarkError, MAX_MATRIX_SIZE};

/// Wavelet family used for every decomposition.
pub const WAVELET_NAME: &str = "haar";

/// Number of decomposition levels.
pub const DECOMPOSITION_LEVEL: u32 = 1;

/// Suffix appended to an image path to locate its metadata side-file.
pub const SIDECAR_SUFFIX: &str = ".metadata";

/// Marker written before the JSON metadata appended to an image file.
pub const TRAILER_MARKER: &[u8] = b"WATERMARK_METADATA:";

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory for watermarked outputs, backup copies and backup records (default: processed)
    pub processed_dir: PathBuf,
    /// Directory for servable display copies (default: static)
    pub static_dir: PathBuf,
    /// URL prefix used when building locators (default: /static)
    pub static_url_prefix: String,
    /// Additive embedding strength (default: 25.0)
    pub strength: f32,
    /// Weight of the reconstructed channel when blending back (default: 0.85)
    pub blend_factor: f32,
    /// Side length cap of the payload matrix (default: 32)
    pub max_matrix_size: u32,
    /// Mean squared recovered value required for blind detection (default: 40.0)
    pub signal_floor: f64,
    /// Fraction of nonzero recovered cells required for blind detection (default: 0.25)
    pub min_occupancy: f64,
    /// Output quality for JPEG carriers (default: 95)
    pub jpeg_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            processed_dir: PathBuf::from("processed"),
            static_dir: PathBuf::from("static"),
            static_url_prefix: "/static".to_string(),
            strength: 25.0,
            blend_factor: 0.85,
            max_matrix_size: MAX_MATRIX_SIZE,
            signal_floor: 40.0,
            min_occupancy: 0.25,
            jpeg_quality: 95,
        }
    }
}

impl EngineConfig {
    /// Build a configuration rooted at `base`, with `processed/` and `static/` beneath it.
    pub fn with_base_dir(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            processed_dir: base.join("processed"),
            static_dir: base.join("static"),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let processed_dir = std::env::var("AIGCMARK_PROCESSED_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.processed_dir);

        let static_dir = std::env::var("AIGCMARK_STATIC_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);

        let static_url_prefix = std::env::var("AIGCMARK_STATIC_URL")
            .ok()
            .map(|v| v.trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.static_url_prefix);

        let strength = std::env::var("AIGCMARK_STRENGTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.strength);

        let blend_factor = std::env::var("AIGCMARK_BLEND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.blend_factor);

        let max_matrix_size = std::env::var("AIGCMARK_MATRIX_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_matrix_size);

        let signal_floor = std::env::var("AIGCMARK_SIGNAL_FLOOR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.signal_floor);

        let min_occupancy = std::env::var("AIGCMARK_MIN_OCCUPANCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_occupancy);

        let jpeg_quality = std::env::var("AIGCMARK_JPEG_QUALITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.jpeg_quality);

        Self {
            processed_dir,
            static_dir,
            static_url_prefix,
            strength,
            blend_factor,
            max_matrix_size,
            signal_floor,
            min_occupancy,
            jpeg_quality,
        }
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.strength.is_finite() || self.strength <= 0.0 {
            return Err(WatermarkError::ConfigError(format!(
                "strength must be a positive number, got {}",
                self.strength
            )));
        }
        if !(self.blend_factor > 0.0 && self.blend_factor <= 1.0) {
            return Err(WatermarkError::ConfigError(format!(
                "blend factor must be in (0, 1], got {}",
                self.blend_factor
            )));
        }
        if self.max_matrix_size == 0 || self.max_matrix_size > MAX_MATRIX_SIZE {
            return Err(WatermarkError::ConfigError(format!(
                "matrix size must be in 1..={}, got {}",
                MAX_MATRIX_SIZE, self.max_matrix_size
            )));
        }
        if !(0.0..=1.0).contains(&self.min_occupancy) {
            return Err(WatermarkError::ConfigError(format!(
                "occupancy ratio must be in [0, 1], got {}",
                self.min_occupancy
            )));
        }
        if !self.signal_floor.is_finite() || self.signal_floor < 0.0 {
            return Err(WatermarkError::ConfigError(format!(
                "signal floor must be non-negative, got {}",
                self.signal_floor
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(WatermarkError::ConfigError(format!(
                "JPEG quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    /// Create the processed and static directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.processed_dir)?;
        std::fs::create_dir_all(&self.static_dir)?;
        Ok(())
    }

    /// Directory holding pixel-fingerprint backup records.
    pub fn records_dir(&self) -> PathBuf {
        self.processed_dir.join("records")
    }

    /// Build the locator under which a static file is served.
    pub fn locator_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.static_url_prefix, file_name)
    }

    /// Recover the file name from a locator produced by [`Self::locator_for`].
    ///
    /// Returns `None` for locators that would escape the storage directories.
    pub fn file_name_of<'a>(&self, locator: &'a str) -> Option<&'a str> {
        let name = locator
            .strip_prefix(self.static_url_prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(locator);

        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return None;
        }
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.strength, 25.0);
        assert_eq!(config.max_matrix_size, 32);
        assert_eq!(config.static_url_prefix, "/static");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_base_dir() {
        let config = EngineConfig::with_base_dir("/tmp/mark");
        assert_eq!(config.processed_dir, PathBuf::from("/tmp/mark/processed"));
        assert_eq!(config.static_dir, PathBuf::from("/tmp/mark/static"));
        assert_eq!(
            config.records_dir(),
            PathBuf::from("/tmp/mark/processed/records")
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig {
            strength: 0.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        config.strength = 25.0;
        config.blend_factor = 1.5;
        assert!(config.validate().is_err());

        config.blend_factor = 0.85;
        config.max_matrix_size = 64;
        assert!(config.validate().is_err());

        config.max_matrix_size = 32;
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_locator_roundtrip() {
        let config = EngineConfig::default();
        let locator = config.locator_for("original_watermark_abc.png");
        assert_eq!(locator, "/static/original_watermark_abc.png");
        assert_eq!(
            config.file_name_of(&locator),
            Some("original_watermark_abc.png")
        );
    }

    #[test]
    fn test_locator_rejects_traversal() {
        let config = EngineConfig::default();
        assert_eq!(config.file_name_of("/static/../secret.png"), None);
        assert_eq!(config.file_name_of("/static/"), None);
        assert_eq!(config.file_name_of("/static/a/b.png"), None);
    }
}
