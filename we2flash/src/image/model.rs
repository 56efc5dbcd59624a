//! AI-model descriptors and the model selection policy.

use crate::error::{Error, Result};
use log::warn;
use std::path::PathBuf;

/// One AI-model payload to flash after the base firmware.
///
/// The path is expected to be resolved to a local file by the caller
/// (catalog lookup and download are outside this crate).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelDescriptor {
    /// Unique identifier, e.g. `face_detection`.
    pub id: String,
    /// Display name.
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: Option<String>,
    /// Local file path.
    pub path: PathBuf,
    /// Flash address as a hex string, e.g. `0xB7B000`.
    pub flash_address: String,
    /// Offset as a hex string, usually `0x0`.
    #[cfg_attr(feature = "serde", serde(default = "default_offset"))]
    pub offset: String,
    /// Always flashed when no explicit selection is given.
    #[cfg_attr(feature = "serde", serde(default))]
    pub required: bool,
    /// Flashed by default when no explicit selection is given.
    #[cfg_attr(feature = "serde", serde(default = "default_selected"))]
    pub default: bool,
}

#[cfg(feature = "serde")]
fn default_offset() -> String {
    "0x0".to_string()
}

#[cfg(feature = "serde")]
fn default_selected() -> bool {
    true
}

impl ModelDescriptor {
    /// Create a descriptor that is neither required nor selected by default.
    pub fn new(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        flash_address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            path: path.into(),
            flash_address: flash_address.into(),
            offset: "0x0".to_string(),
            required: false,
            default: false,
        }
    }

    /// Set the offset.
    #[must_use]
    pub fn with_offset(mut self, offset: impl Into<String>) -> Self {
        self.offset = offset.into();
        self
    }

    /// Mark as required.
    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Mark as selected by default.
    #[must_use]
    pub fn default_selected(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    /// Display label: the name if present, else the id.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or(&self.id)
    }

    /// Parsed flash address.
    pub fn address(&self) -> Result<u32> {
        parse_hex_u32(&self.flash_address)
    }

    /// Parsed offset.
    pub fn offset_value(&self) -> Result<u32> {
        parse_hex_u32(&self.offset)
    }
}

/// Parse a hexadecimal `u32` (optional `0x` prefix, `_` separators allowed).
pub fn parse_hex_u32(s: &str) -> Result<u32> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = digits
        .chars()
        .filter(|c| *c != '_')
        .collect();

    // from_str_radix alone would take a leading '+'
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidHex(s.to_string()));
    }
    u32::from_str_radix(&digits, 16).map_err(|_| Error::InvalidHex(s.to_string()))
}

/// Pick the models to flash, in catalog order.
///
/// With an explicit selection, exactly the listed ids are returned. Without
/// one, every model flagged `required` or `default` is returned. An empty
/// result means base firmware only.
pub fn select_models<'a, S: AsRef<str>>(
    all: &'a [ModelDescriptor],
    selected_ids: &[S],
) -> Vec<&'a ModelDescriptor> {
    if selected_ids.is_empty() {
        return all
            .iter()
            .filter(|m| m.required || m.default)
            .collect();
    }

    for id in selected_ids {
        if !all
            .iter()
            .any(|m| m.id == id.as_ref())
        {
            warn!("Unknown model id '{}' ignored", id.as_ref());
        }
    }

    all.iter()
        .filter(|m| {
            selected_ids
                .iter()
                .any(|id| id.as_ref() == m.id)
        })
        .collect()
}
