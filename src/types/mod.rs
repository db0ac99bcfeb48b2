//! Core type definitions shared across the crate.
//!
//! - `encoding`: little-endian `Encode`/`Decode` traits used by every wire record
//! - `wrapper_types`: common type aliases

pub mod encoding;
pub mod wrapper_types;
