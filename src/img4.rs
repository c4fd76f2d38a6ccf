//! Firmware payload container (IM4P)
//!
//! ```text
//! SEQUENCE {
//!     IA5String   "IM4P"
//!     IA5String   name          -- e.g. "mtfw", "krnl"
//!     IA5String   description
//!     OCTET STRING payload
//!     SEQUENCE {                -- optional compression envelope
//!         INTEGER type          -- only 1 is known
//!         INTEGER decompressed size
//!     }
//!     ...                       -- anything else is ignored
//! }
//! ```
//!
//! Decompression itself is left to the host through [`Decompress`].

use std::io;

use log::debug;
use thiserror::Error;

use crate::der::{self, DerError, DerReader};

pub const IM4P_MAGIC: &str = "IM4P";
pub const COMPRESSION_LZFSE: u64 = 1;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("malformed container: {0}")]
    MalformedContainer(String),
    #[error("unsupported compression type {0}")]
    UnsupportedCompression(u64),
    #[error("decompressed to {actual} bytes, container declares {declared}")]
    DecompressionSizeMismatch { declared: usize, actual: usize },
    #[error("decompression failed: {0}")]
    Codec(#[source] io::Error),
}

impl From<DerError> for ContainerError {
    fn from(e: DerError) -> Self {
        ContainerError::MalformedContainer(e.to_string())
    }
}

/// Host supplied decompressor for compressed payloads.
pub trait Decompress {
    fn decompress(&self, compressed: &[u8], declared_size: usize) -> io::Result<Vec<u8>>;
}

impl<F> Decompress for F
where
    F: Fn(&[u8], usize) -> io::Result<Vec<u8>>,
{
    fn decompress(&self, compressed: &[u8], declared_size: usize) -> io::Result<Vec<u8>> {
        self(compressed, declared_size)
    }
}

/// Used when the host did not provide a codec; compressed payloads fail.
pub struct NoCodec;

impl Decompress for NoCodec {
    fn decompress(&self, _compressed: &[u8], _declared_size: usize) -> io::Result<Vec<u8>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no decompression codec configured",
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub kind: u64,
    pub size: u64,
}

impl Compression {
    /// `SEQUENCE { INTEGER type, INTEGER size }` and nothing else.
    fn from_tlv(tlv: der::Tlv<'_>) -> Option<Self> {
        if tlv.tag != der::SEQUENCE {
            return None;
        }
        let mut envelope = DerReader::new(tlv.value);
        let kind = der::parse_uint(envelope.expect(der::INTEGER).ok()?).ok()?;
        let size = der::parse_uint(envelope.expect(der::INTEGER).ok()?).ok()?;
        envelope.is_empty().then_some(Compression { kind, size })
    }
}

#[derive(Debug)]
pub struct Im4p<'a> {
    pub name: String,
    pub description: String,
    pub payload: &'a [u8],
    pub compression: Option<Compression>,
}

fn ia5(value: &[u8], what: &str) -> Result<String, ContainerError> {
    if !value.is_ascii() {
        return Err(ContainerError::MalformedContainer(format!(
            "{} is not an IA5String",
            what
        )));
    }
    Ok(String::from_utf8_lossy(value).into_owned())
}

impl<'a> Im4p<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ContainerError> {
        let mut outer = DerReader::new(data);
        let body = outer.expect(der::SEQUENCE)?;
        let mut body = DerReader::new(body);

        let magic = ia5(body.expect(der::IA5_STRING)?, "marker")?;
        if magic != IM4P_MAGIC {
            return Err(ContainerError::MalformedContainer(format!(
                "marker is {:?}, expected {:?}",
                magic, IM4P_MAGIC
            )));
        }

        let name = ia5(body.expect(der::IA5_STRING)?, "name")?;
        let description = ia5(body.expect(der::IA5_STRING)?, "description")?;
        let payload = body.expect(der::OCTET_STRING)?;

        // Only a leading SEQUENCE of two INTEGERs is a compression envelope,
        // anything else after the payload is ignored
        let compression = if body.is_empty() {
            None
        } else {
            match body.read() {
                Ok(tlv) => {
                    let envelope = Compression::from_tlv(tlv);
                    if envelope.is_none() {
                        debug!("im4p {}: ignoring trailing element {:#04x}", name, tlv.tag);
                    }
                    envelope
                }
                Err(e) => {
                    debug!("im4p {}: ignoring trailing data: {}", name, e);
                    None
                }
            }
        };

        Ok(Im4p {
            name,
            description,
            payload,
            compression,
        })
    }

    /// The payload, decompressed through `codec` when the container says so.
    pub fn decode(&self, codec: &dyn Decompress) -> Result<Vec<u8>, ContainerError> {
        let Some(Compression { kind, size }) = self.compression else {
            return Ok(self.payload.to_vec());
        };

        if kind != COMPRESSION_LZFSE {
            return Err(ContainerError::UnsupportedCompression(kind));
        }
        let declared = usize::try_from(size).map_err(|_| {
            ContainerError::MalformedContainer(format!("declared size {} too large", size))
        })?;

        debug!(
            "im4p {}: decompressing {} -> {} bytes",
            self.name,
            self.payload.len(),
            declared
        );
        let out = codec
            .decompress(self.payload, declared)
            .map_err(ContainerError::Codec)?;

        if out.len() != declared {
            return Err(ContainerError::DecompressionSizeMismatch {
                declared,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

/// Decode a container into its internal name and (decompressed) payload.
pub fn extract(data: &[u8], codec: &dyn Decompress) -> Result<(String, Vec<u8>), ContainerError> {
    let im4p = Im4p::parse(data)?;
    let payload = im4p.decode(codec)?;
    Ok((im4p.name, payload))
}
