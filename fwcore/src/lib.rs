//! Core types shared by the firmware collectors and the archive writer.
//!
//! A [`hash::ContentFile`] is the unit every collector produces: a logical
//! name, the raw bytes and the SHA-256 [`hash::Digest`] of those bytes.

pub mod buf;
pub mod hash;

pub use hash::{ContentFile, Digest};
