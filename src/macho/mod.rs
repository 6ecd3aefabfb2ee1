//! Mach-O file format handling.
//!
//! This module parses 64-bit Mach-O images into a model of their load
//! commands, grows sections while keeping every file offset and address
//! consistent, and serializes the model back into a file.
//!
//! # Editing Pipeline
//!
//! 1. [`MachImage::parse`] borrows payloads from the source buffer
//! 2. [`MachImage::replace_section`] swaps in new contents and relocates
//! 3. [`MachImage::write`] rebuilds the file from the model

mod command;
mod constants;
mod image;
mod resize;
mod structs;
mod writer;

#[cfg(test)]
pub(crate) mod fixtures;

pub use command::*;
pub use constants::*;
pub use image::*;
pub use structs::*;
