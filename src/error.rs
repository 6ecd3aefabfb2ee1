//! Error types for Mach-O editing.
//!
//! This module covers every failure the editor can report: I/O, malformed
//! images, bad edit requests against the load-command model, serialization
//! layout faults, and delegation to the external extractor.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for Mach-O editing operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Format Errors ====================
    #[error("invalid dyld cache magic: expected 'dyld', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("invalid Mach-O magic: {0:#x}")]
    InvalidMachoMagic(u32),

    #[error("load command at offset {offset:#x} extends beyond the image")]
    LoadCommandOverflow { offset: usize },

    #[error("segment {name} body [{fileoff:#x}, +{filesize:#x}) extends beyond the {len:#x} byte image")]
    SegmentBeyondImage {
        name: String,
        fileoff: u64,
        filesize: u64,
        len: usize,
    },

    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    // ==================== Edit Errors ====================
    #[error("section index {index} out of range (segment has {count} sections)")]
    SectionIndexOutOfRange { index: usize, count: usize },

    #[error("load command index {index} out of range (image has {count} commands)")]
    SegmentIndexOutOfRange { index: usize, count: usize },

    #[error("load command {index} is not a segment")]
    NotASegment { index: usize },

    #[error("Mach-O section '{segment},{section}' not found")]
    SectionNotFound { segment: String, section: String },

    #[error("no NUL-terminated string at source offset {offset:#x}")]
    StringOutOfBounds { offset: u64 },

    // ==================== Serialization Errors ====================
    #[error(
        "layout fault in load command {command}: payload of {len} bytes at {offset:#x} \
         neither appends nor fits inside the {end:#x} bytes written so far"
    )]
    LayoutFault {
        command: usize,
        offset: usize,
        len: usize,
        end: usize,
    },

    // ==================== Extraction Errors ====================
    #[error("failed to run extractor '{program}': {source}")]
    ExtractorSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extractor '{program}' exited with {status}")]
    ExtractorFailed { program: PathBuf, status: String },
}

/// A specialized Result type for Mach-O editing operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error means the model itself is inconsistent.
    ///
    /// A layout fault is produced by the resize engine, not by bad input, so
    /// retrying the same write can never succeed.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::LayoutFault { .. })
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }

    /// Creates a section not found error.
    #[inline]
    pub fn section_not_found(segment: &str, section: &str) -> Self {
        Error::SectionNotFound {
            segment: segment.to_string(),
            section: section.to_string(),
        }
    }
}
