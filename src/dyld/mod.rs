//! Dyld shared cache handling.
//!
//! Images extracted from the cache still refer to data stored in it, most
//! notably the shared selector strings. This module maps a cache file so
//! those references can be resolved, and runs the platform utility that
//! performs the extraction itself.

mod cache;
mod extract;

pub use cache::*;
pub use extract::*;
