//! Payloads loaded into memory ahead of a flashing session.
//!
//! Everything is read and validated before any port is opened, so a missing
//! file or a malformed address never leaves the bootloader half-driven.

use crate::error::{Error, Result};
use crate::image::model::ModelDescriptor;
use log::debug;
use std::fs;
use std::path::Path;

/// A named byte payload (the base firmware image).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Name used in logs and errors.
    pub name: String,
    /// Raw bytes.
    pub data: Vec<u8>,
}

impl Payload {
    /// Wrap in-memory bytes.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Load the base firmware image.
    pub fn firmware(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::FirmwareFileMissing(path.to_path_buf()));
        }
        let data = fs::read(path)?;
        debug!("Loaded firmware {} ({} bytes)", path.display(), data.len());
        Ok(Self::new("firmware", data))
    }
}

/// A model ready to be flashed: parsed address plus file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPayload {
    /// Model identifier.
    pub id: String,
    /// Target flash address.
    pub address: u32,
    /// Offset carried in the preamble.
    pub offset: u32,
    /// Raw bytes.
    pub data: Vec<u8>,
}

impl ModelPayload {
    /// Validate a descriptor and read its file.
    pub fn load(model: &ModelDescriptor) -> Result<Self> {
        let address = model.address()?;
        let offset = model.offset_value()?;
        if !model.path.is_file() {
            return Err(Error::ModelFileMissing {
                id: model.id.clone(),
                path: model.path.clone(),
            });
        }
        let data = fs::read(&model.path)?;
        debug!(
            "Loaded model {} ({} bytes) -> 0x{address:08X}+0x{offset:X}",
            model.id,
            data.len()
        );
        Ok(Self {
            id: model.id.clone(),
            address,
            offset,
            data,
        })
    }

    /// Load every descriptor, failing on the first problem.
    pub fn load_all<'a, I>(models: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = &'a ModelDescriptor>,
    {
        models
            .into_iter()
            .map(Self::load)
            .collect()
    }
}
