//! Watermark metadata record.
//!
//! One record is produced per successful embed and written to every
//! redundancy location the engine can reach. The JSON field names are a
//! stable contract shared with the recovery path and external record keeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DECOMPOSITION_LEVEL, WAVELET_NAME};
use crate::error::Result;

/// Algorithm tag recorded in every metadata record.
pub const ALGORITHM: &str = "dwt";

/// Kind of payload carried by a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Text,
    Image,
    /// No payload was supplied.
    #[serde(rename = "none")]
    Empty,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Empty => write!(f, "none"),
        }
    }
}

/// Metadata describing an embedded payload and how it was embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkMetadata {
    pub payload_kind: PayloadKind,
    /// Full text payload (not truncated to the matrix size). Always written,
    /// as `null` for image and empty payloads.
    #[serde(default)]
    pub text: Option<String>,
    /// Byte length of the UTF-8 text payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_length: Option<usize>,
    /// Locator of the primary display copy of a reference image
    #[serde(default)]
    pub image_locator: Option<String>,
    /// Locator of the backup display copy
    #[serde(default)]
    pub backup_image_locator: Option<String>,
    #[serde(default)]
    pub matrix_size: Option<u32>,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    pub wavelet_name: String,
    pub decomposition_level: u32,
    pub embedding_strength: f32,
    /// (rows, cols) of the payload matrix
    pub matrix_shape: [u32; 2],
    pub created_at: DateTime<Utc>,
}

fn default_algorithm() -> String {
    ALGORITHM.to_string()
}

impl WatermarkMetadata {
    /// Create a record for the given payload kind with engine defaults filled in.
    pub fn new(payload_kind: PayloadKind, matrix_shape: [u32; 2]) -> Self {
        Self {
            payload_kind,
            text: None,
            text_length: None,
            image_locator: None,
            backup_image_locator: None,
            matrix_size: None,
            algorithm: default_algorithm(),
            wavelet_name: WAVELET_NAME.to_string(),
            decomposition_level: DECOMPOSITION_LEVEL,
            embedding_strength: 0.0,
            matrix_shape,
            created_at: Utc::now(),
        }
    }

    /// Text payload, if any, treating an absent field as empty.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Whether the record claims a text payload whose text is empty.
    pub fn is_empty_text(&self) -> bool {
        self.payload_kind == PayloadKind::Text && self.text_or_empty().is_empty()
    }

    /// Whether the record references any display copy.
    pub fn has_image_locator(&self) -> bool {
        self.image_locator.is_some() || self.backup_image_locator.is_some()
    }

    /// Pretty JSON used for side-files and backup records.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Compact JSON used for file trailers.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a record from JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
