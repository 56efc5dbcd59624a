//! Flashable images: base firmware and AI-model payloads.

pub mod model;
pub mod payload;

pub use model::{ModelDescriptor, parse_hex_u32, select_models};
pub use payload::{ModelPayload, Payload};
