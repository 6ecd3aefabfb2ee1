//! Read-only access to a dyld shared cache file.
//!
//! Only the magic is interpreted. The cache is used as a flat byte source
//! that selector references point into.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::util::memchr_null;

/// Magic prefix shared by every cache file (`dyld_v1   arm64e`, ...).
pub const DYLD_CACHE_MAGIC_PREFIX: &[u8; 4] = b"dyld";

/// Length of the magic field at the start of the cache header.
pub const DYLD_CACHE_MAGIC_SIZE: usize = 16;

// =============================================================================
// String Source
// =============================================================================

/// A byte source that NUL-terminated strings can be read out of.
pub trait StringSource {
    /// Returns the bytes at `offset` up to, but excluding, the next NUL.
    fn c_string_at(&self, offset: u64) -> Result<&[u8]>;
}

impl<T: AsRef<[u8]> + ?Sized> StringSource for T {
    fn c_string_at(&self, offset: u64) -> Result<&[u8]> {
        let data = self.as_ref();
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start < data.len())
            .ok_or(Error::StringOutOfBounds { offset })?;
        let len = memchr_null(&data[start..]).ok_or(Error::StringOutOfBounds { offset })?;
        Ok(&data[start..start + len])
    }
}

// =============================================================================
// Shared Cache
// =============================================================================

/// A memory-mapped dyld shared cache.
#[derive(Debug)]
pub struct SharedCache {
    /// Memory-mapped file data
    mmap: Mmap,
    /// Path to the cache file
    pub path: PathBuf,
}

impl SharedCache {
    /// Maps the cache at `path` and checks its magic.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?;

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
            path: path.clone(),
            source: e,
        })?;

        Self::check_magic(&mmap)?;

        let cache = Self { mmap, path };
        debug!(
            "Opened cache {} ({}, {} bytes)",
            cache.path.display(),
            cache.architecture(),
            cache.mmap.len()
        );
        Ok(cache)
    }

    fn check_magic(data: &[u8]) -> Result<()> {
        if data.len() < DYLD_CACHE_MAGIC_PREFIX.len() {
            return Err(Error::buffer_too_small(
                DYLD_CACHE_MAGIC_PREFIX.len(),
                data.len(),
            ));
        }

        if &data[..4] != DYLD_CACHE_MAGIC_PREFIX {
            return Err(Error::InvalidMagic([data[0], data[1], data[2], data[3]]));
        }

        Ok(())
    }

    /// Returns the raw cache bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Returns the architecture named in the magic, e.g. `arm64e`.
    pub fn architecture(&self) -> &str {
        let magic = &self.mmap[..DYLD_CACHE_MAGIC_SIZE.min(self.mmap.len())];
        let end = memchr_null(magic).unwrap_or(magic.len());
        std::str::from_utf8(&magic[..end])
            .ok()
            .and_then(|s| s.split_whitespace().nth(1))
            .unwrap_or("unknown")
    }
}

impl AsRef<[u8]> for SharedCache {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_c_string_at() {
        let data = b"dyld_v1  x86_64\0init\0\0tail";
        assert_eq!(data.c_string_at(16).unwrap(), b"init");
        assert_eq!(data.c_string_at(21).unwrap(), b"");
        assert_eq!(data.c_string_at(0).unwrap(), b"dyld_v1  x86_64");
    }

    #[test]
    fn test_c_string_errors() {
        let data = b"init\0tail";
        assert!(matches!(
            data.c_string_at(5),
            Err(Error::StringOutOfBounds { offset: 5 })
        ));
        assert!(matches!(
            data.c_string_at(9),
            Err(Error::StringOutOfBounds { offset: 9 })
        ));
        assert!(matches!(
            data.c_string_at(u64::MAX),
            Err(Error::StringOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_open_checks_magic() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        good.write_all(b"dyld_v1   arm64e\0init\0").unwrap();
        let cache = SharedCache::open(good.path()).unwrap();
        assert_eq!(cache.architecture(), "arm64e");
        assert_eq!(cache.c_string_at(17).unwrap(), b"init");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"\xcf\xfa\xed\xfe0000").unwrap();
        assert!(matches!(
            SharedCache::open(bad.path()),
            Err(Error::InvalidMagic([0xcf, 0xfa, 0xed, 0xfe]))
        ));

        assert!(matches!(
            SharedCache::open("/nonexistent/dyld_shared_cache_arm64e"),
            Err(Error::FileOpen { .. })
        ));
    }
}
