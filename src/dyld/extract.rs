//! Delegating library extraction to the platform's cache utility.
//!
//! Rebuilding a standalone dylib out of the cache is left to Apple's own
//! tooling. This module only runs it and reports failures.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default extractor program, looked up on `PATH`.
pub const DEFAULT_EXTRACTOR: &str = "dyld_shared_cache_util";

/// Options for running the external extractor.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Extractor program to run
    pub utility: PathBuf,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            utility: PathBuf::from(DEFAULT_EXTRACTOR),
        }
    }
}

/// Extracts every library in `cache` into `target_dir`.
///
/// Runs `<utility> -extract <target_dir> <cache>` and waits for it to finish.
pub fn extract_cache(cache: &Path, target_dir: &Path, options: &ExtractOptions) -> Result<()> {
    let program = &options.utility;

    debug!(
        "Running {} -extract {} {}",
        program.display(),
        target_dir.display(),
        cache.display()
    );

    let status = Command::new(program)
        .arg("-extract")
        .arg(target_dir)
        .arg(cache)
        .status()
        .map_err(|e| Error::ExtractorSpawn {
            program: program.clone(),
            source: e,
        })?;

    if !status.success() {
        return Err(Error::ExtractorFailed {
            program: program.clone(),
            status: status.to_string(),
        });
    }

    info!(
        "Extracted {} into {}",
        cache.display(),
        target_dir.display()
    );
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn options(utility: &str) -> ExtractOptions {
        ExtractOptions {
            utility: PathBuf::from(utility),
        }
    }

    #[test]
    fn test_default_utility() {
        assert_eq!(
            ExtractOptions::default().utility,
            PathBuf::from("dyld_shared_cache_util")
        );
    }

    #[test]
    fn test_extractor_success() {
        let dir = tempfile::tempdir().unwrap();
        extract_cache(Path::new("cache"), dir.path(), &options("true")).unwrap();
    }

    #[test]
    fn test_extractor_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_cache(Path::new("cache"), dir.path(), &options("false")).unwrap_err();
        assert!(matches!(err, Error::ExtractorFailed { .. }));
    }

    #[test]
    fn test_extractor_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_cache(
            Path::new("cache"),
            dir.path(),
            &options("/nonexistent/dyld_shared_cache_util"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ExtractorSpawn { .. }));
    }
}
