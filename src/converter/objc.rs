//! ObjC selector name restoration.
//!
//! Images pulled out of the shared cache keep their selector references
//! pointing at strings inside the cache's shared selector table, while their
//! own `__objc_methname` section is left stale. This module copies every
//! referenced name back into the image and repoints the references at the
//! copies.

use tracing::{debug, info};

use crate::dyld::StringSource;
use crate::error::{Error, Result};
use crate::macho::{MachImage, Section};
use crate::util::{push_u64_le, read_u64_le};

/// Bits of a selector reference that hold the string's offset in the cache.
pub const SELECTOR_OFFSET_MASK: u64 = 0xFF_FFFF_FFFF;

/// Size of a selector reference entry.
const SELREF_SIZE: usize = 8;

/// Summary of a selector name rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodNameStats {
    /// Number of selector references rewritten
    pub selectors: usize,
    /// Size of the rebuilt `__objc_methname` section
    pub names_size: usize,
    /// Bytes the image's `__TEXT` segment grew by
    pub growth: u64,
}

/// Finds the selector reference section, which lives in `__DATA` on older
/// images and `__DATA_CONST` on newer ones.
fn selector_refs<'i, 'a>(image: &'i MachImage<'a>) -> Result<&'i Section<'a>> {
    image
        .section("__DATA", "__objc_selrefs")
        .or_else(|| image.section("__DATA_CONST", "__objc_selrefs"))
        .ok_or_else(|| Error::section_not_found("__DATA", "__objc_selrefs"))
}

/// Copies selector names from `source` into the image's `__objc_methname`
/// section and repoints `__objc_selrefs` at them.
///
/// Each reference's low 40 bits are read as an offset into `source`. The
/// names are appended in reference order, and each reference is rewritten as
/// the address in `__objc_methname` at which the following name starts.
pub fn add_method_names<S>(image: &mut MachImage<'_>, source: &S) -> Result<MethodNameStats>
where
    S: StringSource + ?Sized,
{
    let selrefs = selector_refs(image)?;
    let methname = image
        .section("__TEXT", "__objc_methname")
        .ok_or_else(|| Error::section_not_found("__TEXT", "__objc_methname"))?;

    let base = methname.header.addr;
    let old_names_size = methname.header.size;
    let entries = selrefs.bytes().chunks_exact(SELREF_SIZE);
    let trailing = entries.remainder().to_vec();

    let mut names = Vec::with_capacity(old_names_size as usize);
    let mut refs = Vec::with_capacity(selrefs.bytes().len());
    let mut selectors = 0;

    for entry in entries {
        let offset = read_u64_le(entry) & SELECTOR_OFFSET_MASK;
        let name = source.c_string_at(offset)?;
        debug!("  {:#x}: {}", offset, String::from_utf8_lossy(name));

        names.extend_from_slice(name);
        names.push(0);
        push_u64_le(&mut refs, base + names.len() as u64);
        selectors += 1;
    }
    refs.extend_from_slice(&trailing);

    let selrefs = Section::with_data(selrefs.header, refs);
    let methname = Section::with_data(methname.header, names);
    let names_size = methname.bytes().len();

    let text_before = image.segment("__TEXT").map_or(0, |s| s.command.filesize);
    let mut staged = image.clone();
    staged.replace_section(selrefs)?;
    staged.replace_section(methname)?;
    *image = staged;
    let text_after = image.segment("__TEXT").map_or(0, |s| s.command.filesize);

    let stats = MethodNameStats {
        selectors,
        names_size,
        growth: text_after.saturating_sub(text_before),
    };

    info!(
        "Restored {} selector names ({} bytes, __objc_methname was {} bytes)",
        stats.selectors, stats.names_size, old_names_size
    );

    Ok(stats)
}
