//! GGUF header validation.
//!
//! Cheap pre-flight check run before handing a path to the engine, so an
//! obviously bad file fails with a precise error instead of an opaque
//! loader message.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

/// GGUF magic bytes (little-endian "GGUF").
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Fixed header: magic + version + tensor count + metadata kv count.
const HEADER_LEN: u64 = 24;

#[derive(Debug, Error)]
pub enum GgufError {
    #[error("failed to read model file: {0}")]
    Io(#[from] io::Error),

    #[error("not a GGUF file: magic 0x{0:08X}")]
    BadMagic(u32),

    #[error("unsupported GGUF version {0}")]
    UnsupportedVersion(u32),

    #[error("file too small to hold a GGUF header")]
    Truncated,
}

/// Fields of a GGUF file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub kv_count: u64,
}

/// Reads and validates the fixed-size GGUF header at `path`.
///
/// Versions 2 and 3 are accepted.
pub fn read_header(path: &Path) -> Result<GgufHeader, GgufError> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() < HEADER_LEN {
        return Err(GgufError::Truncated);
    }

    let magic = read_u32(&mut file)?;
    if magic != GGUF_MAGIC {
        return Err(GgufError::BadMagic(magic));
    }

    let version = read_u32(&mut file)?;
    if !(2..=3).contains(&version) {
        return Err(GgufError::UnsupportedVersion(version));
    }

    Ok(GgufHeader {
        version,
        tensor_count: read_u64(&mut file)?,
        kv_count: read_u64(&mut file)?,
    })
}

fn read_u32(r: &mut impl Read) -> Result<u32, io::Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, io::Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
