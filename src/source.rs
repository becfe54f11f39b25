//! Loading source databases
//!
//! Plain files are memory-mapped. Gzip-compressed files (detected by their
//! magic bytes, not the extension) are inflated into memory.

use crate::error::{CompactError, Result};
use flate2::read::GzDecoder;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Gzip member header magic
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Bytes of a loaded source database
pub enum SourceBytes {
    /// Memory-mapped file
    Mapped(Mmap),
    /// Owned buffer (inflated, downloaded, or built in memory)
    Owned(Vec<u8>),
}

impl SourceBytes {
    /// Wrap an in-memory buffer, inflating it if it is gzip data
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self> {
        if is_gzip(&bytes) {
            return inflate(&bytes).map(SourceBytes::Owned);
        }
        Ok(SourceBytes::Owned(bytes))
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    /// True for a zero-length source
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsRef<[u8]> for SourceBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            SourceBytes::Mapped(map) => &map[..],
            SourceBytes::Owned(bytes) => bytes,
        }
    }
}

/// Open a source database from disk
///
/// Fails with [`CompactError::SourceUnavailable`] if the file cannot be
/// opened or mapped.
pub fn load_source(path: impl AsRef<Path>) -> Result<SourceBytes> {
    let path = path.as_ref();
    let unavailable = |e: std::io::Error| {
        CompactError::SourceUnavailable(format!("{}: {}", path.display(), e))
    };

    let file = File::open(path).map_err(unavailable)?;
    let len = file.metadata().map_err(unavailable)?.len();
    if len == 0 {
        return Ok(SourceBytes::Owned(Vec::new()));
    }

    // SAFETY: the map is read-only; the pipeline treats a source modified
    // while mapped the same as any other malformed input
    let map = unsafe { Mmap::map(&file) }.map_err(unavailable)?;
    if is_gzip(&map) {
        log::info!("Inflating gzip source {}", path.display());
        return inflate(&map).map(SourceBytes::Owned);
    }

    log::debug!("Mapped {} ({} bytes)", path.display(), len);
    Ok(SourceBytes::Mapped(map))
}

/// True if `bytes` starts with the gzip magic
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Decompress a gzip buffer
pub fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len().saturating_mul(3));
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| CompactError::malformed(0, format!("gzip: {}", e)))?;
    Ok(out)
}
