//! machedit - Parse, edit and re-serialize 64-bit Mach-O images.
//!
//! This library models the load commands of a Mach-O image, lets sections be
//! replaced with contents of a different size, and writes back a consistent
//! file with every dependent file offset and address relocated. Its main
//! consumer restores selector names in libraries extracted from Apple's dyld
//! shared cache.
//!
//! # Features
//!
//! - Zero-copy parsing: payloads borrow from the source buffer until edited
//! - Section growth with sibling, segment and LINKEDIT relocation
//! - Strict serialization that refuses to write an inconsistent layout
//! - Selector name restoration from a memory-mapped shared cache
//!
//! # Example
//!
//! ```no_run
//! use machedit::{add_method_names, MachImage, SharedCache};
//!
//! fn main() -> machedit::Result<()> {
//!     let cache = SharedCache::open("/path/to/dyld_shared_cache_arm64e")?;
//!     let data = std::fs::read("libobjc.A.dylib")?;
//!
//!     let mut image = MachImage::parse(&data)?;
//!     add_method_names(&mut image, &cache)?;
//!     image.write_to("libobjc.A.dylib.fixed")?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod converter;
pub mod dyld;
pub mod error;
pub mod macho;
mod util;

// Re-export main types
pub use converter::{add_method_names, MethodNameStats};
pub use dyld::{extract_cache, ExtractOptions, SharedCache, StringSource};
pub use error::{Error, Result};
pub use macho::{LoadCommand, MachImage, Section, Segment};

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

/// Suffix appended to a library's file name for its backup copy.
pub const BACKUP_SUFFIX: &str = ".original";

/// Options for rewriting a library on disk.
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Where to write the result (default: overwrite the library)
    pub output: Option<PathBuf>,
    /// Copy the library to `<library>.original` before overwriting it
    pub backup: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            output: None,
            backup: true,
        }
    }
}

/// Returns the backup path for a library (`<library>.original`).
pub fn backup_path(library: &Path) -> PathBuf {
    let mut name = OsString::from(library.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Restores selector names in a library file using strings from a cache.
///
/// The library is read whole, rewritten in memory, and only then backed up
/// and written out, so a failed rewrite never touches the disk.
pub fn add_method_names_to_file<P, Q>(
    cache_path: P,
    library: Q,
    options: &RewriteOptions,
) -> Result<MethodNameStats>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let library = library.as_ref();
    let cache = SharedCache::open(cache_path)?;

    let data = fs::read(library).map_err(|e| Error::FileOpen {
        path: library.to_path_buf(),
        source: e,
    })?;

    let mut image = MachImage::parse(&data)?;
    let stats = add_method_names(&mut image, &cache)?;
    let output = image.write()?;

    if options.backup {
        let backup = backup_path(library);
        fs::copy(library, &backup).map_err(|e| Error::FileWrite {
            path: backup.clone(),
            source: e,
        })?;
        info!("Backed up {} to {}", library.display(), backup.display());
    }

    let target = options.output.as_deref().unwrap_or(library);
    fs::write(target, &output).map_err(|e| Error::FileWrite {
        path: target.to_path_buf(),
        source: e,
    })?;
    info!("Wrote {} ({} bytes)", target.display(), output.len());

    Ok(stats)
}
