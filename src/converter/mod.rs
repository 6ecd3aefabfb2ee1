//! Transforms applied to images extracted from the dyld shared cache.
//!
//! Extraction leaves some metadata pointing back into the cache. The
//! converters here copy that data into the image itself through the
//! section replacement API, so every offset and address stays consistent.

mod objc;

pub use objc::*;
