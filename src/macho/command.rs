//! The load-command model.
//!
//! Every recognized load command becomes a typed record that owns (or borrows)
//! the file regions it points at. Payloads are borrowed from the source buffer
//! at parse time and become owned once an edit replaces them, so the source is
//! never mutated.

use std::borrow::Cow;
use std::fmt;

use tracing::{debug, warn};
use zerocopy::FromBytes;

use super::constants::*;
use super::structs::*;
use crate::error::{Error, Result};

/// Bytes of a file region referenced by a load command.
pub type Payload<'a> = Cow<'a, [u8]>;

/// Slices `len` bytes at `offset` out of the whole image.
///
/// Empty or inverted ranges give `None`. Ranges past the end of the image are
/// also `None` and are reported, since they usually mean the command was
/// produced by a tool that never wrote the table.
pub(crate) fn slice_payload<'a>(
    data: &'a [u8],
    offset: u64,
    len: u64,
    what: &str,
) -> Option<Payload<'a>> {
    if len == 0 {
        return None;
    }
    let Some(end) = offset.checked_add(len) else {
        warn!("{what}: range {offset:#x}+{len:#x} overflows");
        return None;
    };
    if end > data.len() as u64 {
        warn!(
            "{what}: range {offset:#x}..{end:#x} is past the end of the image ({:#x})",
            data.len()
        );
        return None;
    }
    Some(Cow::Borrowed(&data[offset as usize..end as usize]))
}

/// Reads a fixed command structure from the start of its command bytes.
fn read_command<T: FromBytes>(cmd_data: &[u8], offset: usize, what: &str) -> Result<T> {
    Ok(T::read_from_prefix(cmd_data)
        .map_err(|_| Error::parse(offset, format!("failed to parse {what} command")))?
        .0)
}

/// Moves a non-empty 32-bit file offset forward.
#[inline]
fn shift(field: &mut u32, count: u32, delta: u64) {
    if count > 0 && *field != 0 {
        *field = (*field as u64 + delta) as u32;
    }
}

// =============================================================================
// Section
// =============================================================================

/// A section inside a segment, with its file contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Section<'a> {
    /// The on-disk section header
    pub header: Section64,
    /// Section contents, or `None` for zero-fill sections
    pub data: Option<Payload<'a>>,
}

impl<'a> Section<'a> {
    /// Creates a section from a header and owned contents.
    ///
    /// The header's size is set to the length of `data`.
    pub fn with_data(header: Section64, data: Vec<u8>) -> Section<'a> {
        let mut section = Section { header, data: None };
        section.set_data(data);
        section
    }

    fn from_image(header: Section64, image: &'a [u8]) -> Section<'a> {
        let data = if header.is_zerofill() || header.offset == 0 {
            None
        } else {
            slice_payload(
                image,
                header.offset as u64,
                header.size,
                &format!("section {},{}", header.segment_name(), header.name()),
            )
        };
        if data.is_none() && header.size > 0 {
            debug!(
                "Section {},{} has no file contents",
                header.segment_name(),
                header.name()
            );
        }
        Section { header, data }
    }

    /// Returns the section name.
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Returns the name of the segment this section claims to belong to.
    pub fn segment_name(&self) -> &str {
        self.header.segment_name()
    }

    /// Returns the section contents, empty for zero-fill sections.
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Replaces the contents with owned bytes and updates the recorded size.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.header.size = data.len() as u64;
        self.data = Some(Cow::Owned(data));
    }
}

// =============================================================================
// Segment
// =============================================================================

/// A 64-bit segment and its ordered sections.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment<'a> {
    /// The on-disk segment command
    pub command: SegmentCommand64,
    /// Sections in load-command order
    pub sections: Vec<Section<'a>>,
}

impl<'a> Segment<'a> {
    fn from_image(cmd_data: &'a [u8], image: &'a [u8], offset: usize) -> Result<Segment<'a>> {
        let command: SegmentCommand64 = read_command(cmd_data, offset, "segment")?;

        let mut sections = Vec::with_capacity(command.nsects as usize);
        let mut sect_offset = SegmentCommand64::SIZE;

        for _ in 0..command.nsects {
            let header = cmd_data
                .get(sect_offset..)
                .and_then(|rest| Section64::read_from_prefix(rest).ok())
                .ok_or_else(|| {
                    Error::parse(offset + sect_offset, "section header past end of command")
                })?
                .0;
            sections.push(Section::from_image(header, image));
            sect_offset += Section64::SIZE;
        }

        Ok(Segment { command, sections })
    }

    /// Returns the segment name.
    pub fn name(&self) -> &str {
        self.command.name()
    }

    /// Returns a section by name.
    pub fn section(&self, name: &str) -> Option<&Section<'a>> {
        self.sections.iter().find(|s| s.name() == name)
    }

    /// Returns the index of a section by name.
    pub fn section_index(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name() == name)
    }

    /// Moves the segment and its sections forward in the file by `delta`.
    ///
    /// An empty segment keeps its offset, and so do sections at offset zero.
    pub fn shift_file_offsets(&mut self, delta: u64) {
        if self.command.filesize > 0 {
            self.command.fileoff += delta;
        }
        for sect in &mut self.sections {
            shift(&mut sect.header.offset, 1, delta);
        }
    }

    /// Returns the command size implied by the current section count.
    pub fn cmdsize(&self) -> u32 {
        (SegmentCommand64::SIZE + self.sections.len() * Section64::SIZE) as u32
    }
}

// =============================================================================
// Symbol Tables
// =============================================================================

/// `LC_SYMTAB` with its symbol and string tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Symtab<'a> {
    /// The on-disk command
    pub command: SymtabCommand,
    /// Raw `nlist_64` entries
    pub symbols: Option<Payload<'a>>,
    /// Raw string table
    pub strings: Option<Payload<'a>>,
}

impl<'a> Symtab<'a> {
    fn from_image(cmd_data: &[u8], image: &'a [u8], offset: usize) -> Result<Symtab<'a>> {
        let command: SymtabCommand = read_command(cmd_data, offset, "symtab")?;
        Ok(Symtab {
            symbols: slice_payload(
                image,
                command.symoff as u64,
                command.nsyms as u64 * NLIST_64_SIZE,
                "symbol table",
            ),
            strings: slice_payload(
                image,
                command.stroff as u64,
                command.strsize as u64,
                "string table",
            ),
            command,
        })
    }
}

/// `LC_DYSYMTAB` with its six optional tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Dysymtab<'a> {
    /// The on-disk command
    pub command: DysymtabCommand,
    /// Table of contents
    pub toc: Option<Payload<'a>>,
    /// Module table
    pub modules: Option<Payload<'a>>,
    /// Referenced symbol table
    pub external_refs: Option<Payload<'a>>,
    /// Indirect symbol table
    pub indirect_symbols: Option<Payload<'a>>,
    /// External relocation entries
    pub external_relocs: Option<Payload<'a>>,
    /// Local relocation entries
    pub local_relocs: Option<Payload<'a>>,
}

impl<'a> Dysymtab<'a> {
    fn from_image(cmd_data: &[u8], image: &'a [u8], offset: usize) -> Result<Dysymtab<'a>> {
        let c: DysymtabCommand = read_command(cmd_data, offset, "dysymtab")?;
        let table = |off: u32, count: u32, entry: u64, what: &str| {
            slice_payload(image, off as u64, count as u64 * entry, what)
        };
        Ok(Dysymtab {
            toc: table(c.tocoff, c.ntoc, TOC_ENTRY_SIZE, "table of contents"),
            modules: table(c.modtaboff, c.nmodtab, MODULE_ENTRY_SIZE, "module table"),
            external_refs: table(
                c.extrefsymoff,
                c.nextrefsyms,
                REFERENCE_ENTRY_SIZE,
                "external references",
            ),
            indirect_symbols: table(
                c.indirectsymoff,
                c.nindirectsyms,
                INDIRECT_ENTRY_SIZE,
                "indirect symbols",
            ),
            external_relocs: table(
                c.extreloff,
                c.nextrel,
                RELOCATION_ENTRY_SIZE,
                "external relocations",
            ),
            local_relocs: table(
                c.locreloff,
                c.nlocrel,
                RELOCATION_ENTRY_SIZE,
                "local relocations",
            ),
            command: c,
        })
    }

    /// Returns `(offset, table)` pairs in the order they appear in the command.
    pub fn tables(&self) -> [(u32, Option<&[u8]>); 6] {
        let c = &self.command;
        [
            (c.tocoff, self.toc.as_deref()),
            (c.modtaboff, self.modules.as_deref()),
            (c.extrefsymoff, self.external_refs.as_deref()),
            (c.indirectsymoff, self.indirect_symbols.as_deref()),
            (c.extreloff, self.external_relocs.as_deref()),
            (c.locreloff, self.local_relocs.as_deref()),
        ]
    }
}

// =============================================================================
// Dyld Info
// =============================================================================

/// `LC_DYLD_INFO` / `LC_DYLD_INFO_ONLY` with its five opcode blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct DyldInfo<'a> {
    /// The on-disk command
    pub command: DyldInfoCommand,
    /// Rebase opcodes
    pub rebase: Option<Payload<'a>>,
    /// Bind opcodes
    pub bind: Option<Payload<'a>>,
    /// Weak bind opcodes
    pub weak_bind: Option<Payload<'a>>,
    /// Lazy bind opcodes
    pub lazy_bind: Option<Payload<'a>>,
    /// Export trie
    pub export: Option<Payload<'a>>,
}

impl<'a> DyldInfo<'a> {
    fn from_image(cmd_data: &[u8], image: &'a [u8], offset: usize) -> Result<DyldInfo<'a>> {
        let c: DyldInfoCommand = read_command(cmd_data, offset, "dyld info")?;
        let block =
            |off: u32, size: u32, what: &str| slice_payload(image, off as u64, size as u64, what);
        Ok(DyldInfo {
            rebase: block(c.rebase_off, c.rebase_size, "rebase info"),
            bind: block(c.bind_off, c.bind_size, "bind info"),
            weak_bind: block(c.weak_bind_off, c.weak_bind_size, "weak bind info"),
            lazy_bind: block(c.lazy_bind_off, c.lazy_bind_size, "lazy bind info"),
            export: block(c.export_off, c.export_size, "export info"),
            command: c,
        })
    }

    /// Returns `(offset, block)` pairs in the order they appear in the command.
    pub fn blocks(&self) -> [(u32, Option<&[u8]>); 5] {
        let c = &self.command;
        [
            (c.rebase_off, self.rebase.as_deref()),
            (c.bind_off, self.bind.as_deref()),
            (c.weak_bind_off, self.weak_bind.as_deref()),
            (c.lazy_bind_off, self.lazy_bind.as_deref()),
            (c.export_off, self.export.as_deref()),
        ]
    }
}

// =============================================================================
// Linkedit Data
// =============================================================================

/// A generic `linkedit_data_command` and its block.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkeditData<'a> {
    /// The on-disk command
    pub command: LinkeditDataCommand,
    /// The referenced block
    pub data: Option<Payload<'a>>,
}

impl<'a> LinkeditData<'a> {
    fn from_image(cmd_data: &[u8], image: &'a [u8], offset: usize) -> Result<LinkeditData<'a>> {
        let command: LinkeditDataCommand = read_command(cmd_data, offset, "linkedit data")?;
        let what = load_command_name(command.cmd).unwrap_or("linkedit data");
        Ok(LinkeditData {
            data: slice_payload(image, command.dataoff as u64, command.datasize as u64, what),
            command,
        })
    }
}

// =============================================================================
// Load Command
// =============================================================================

/// A parsed load command.
///
/// Only the commands that carry file offsets are interpreted. Everything else
/// is kept as raw bytes and written back unchanged.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)] // Variants are self-documenting via names
pub enum LoadCommand<'a> {
    Segment(Segment<'a>),
    Symtab(Symtab<'a>),
    Dysymtab(Dysymtab<'a>),
    DyldInfo(DyldInfo<'a>),
    LinkeditData(LinkeditData<'a>),
    Unknown { cmd: u32, raw: Payload<'a> },
}

impl<'a> LoadCommand<'a> {
    /// Parses one command.
    ///
    /// `cmd_data` holds exactly `cmdsize` bytes starting at `offset`, and
    /// `image` is the whole file the payloads are sliced from.
    pub(crate) fn parse(
        cmd: u32,
        cmd_data: &'a [u8],
        image: &'a [u8],
        offset: usize,
    ) -> Result<LoadCommand<'a>> {
        let command = match cmd {
            LC_SEGMENT_64 => LoadCommand::Segment(Segment::from_image(cmd_data, image, offset)?),
            LC_SYMTAB => LoadCommand::Symtab(Symtab::from_image(cmd_data, image, offset)?),
            LC_DYSYMTAB => LoadCommand::Dysymtab(Dysymtab::from_image(cmd_data, image, offset)?),
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                LoadCommand::DyldInfo(DyldInfo::from_image(cmd_data, image, offset)?)
            }
            LC_CODE_SIGNATURE
            | LC_SEGMENT_SPLIT_INFO
            | LC_FUNCTION_STARTS
            | LC_DATA_IN_CODE
            | LC_DYLIB_CODE_SIGN_DRS
            | LC_LINKER_OPTIMIZATION_HINT
            | LC_DYLD_EXPORTS_TRIE
            | LC_DYLD_CHAINED_FIXUPS
            | LC_ATOM_INFO => {
                LoadCommand::LinkeditData(LinkeditData::from_image(cmd_data, image, offset)?)
            }
            _ => LoadCommand::Unknown {
                cmd,
                raw: Cow::Borrowed(cmd_data),
            },
        };
        Ok(command)
    }

    /// Returns the load command type.
    pub fn cmd(&self) -> u32 {
        match self {
            LoadCommand::Segment(s) => s.command.cmd,
            LoadCommand::Symtab(s) => s.command.cmd,
            LoadCommand::Dysymtab(d) => d.command.cmd,
            LoadCommand::DyldInfo(d) => d.command.cmd,
            LoadCommand::LinkeditData(l) => l.command.cmd,
            LoadCommand::Unknown { cmd, .. } => *cmd,
        }
    }

    /// Returns the size this command occupies in the command area.
    pub fn cmdsize(&self) -> u32 {
        match self {
            LoadCommand::Segment(s) => s.cmdsize(),
            LoadCommand::Symtab(s) => s.command.cmdsize.max(SymtabCommand::SIZE as u32),
            LoadCommand::Dysymtab(d) => d.command.cmdsize.max(DysymtabCommand::SIZE as u32),
            LoadCommand::DyldInfo(d) => d.command.cmdsize.max(DyldInfoCommand::SIZE as u32),
            LoadCommand::LinkeditData(l) => {
                l.command.cmdsize.max(LinkeditDataCommand::SIZE as u32)
            }
            LoadCommand::Unknown { raw, .. } => raw.len() as u32,
        }
    }

    /// Returns the symbolic name of the command type, e.g. `LC_SYMTAB`.
    pub fn name(&self) -> &'static str {
        load_command_name(self.cmd()).unwrap_or("LC_UNKNOWN")
    }

    /// Returns the segment if this command is one.
    pub fn as_segment(&self) -> Option<&Segment<'a>> {
        match self {
            LoadCommand::Segment(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the segment mutably if this command is one.
    pub fn as_segment_mut(&mut self) -> Option<&mut Segment<'a>> {
        match self {
            LoadCommand::Segment(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if the command points at regions of the file.
    pub fn has_file_offsets(&self) -> bool {
        !matches!(self, LoadCommand::Unknown { .. })
    }

    /// Moves every non-empty file region referenced by this command forward
    /// by `delta` bytes.
    ///
    /// Offsets whose count or size is zero are left alone, as are section
    /// offsets of zero.
    pub fn shift_file_offsets(&mut self, delta: u64) {
        match self {
            LoadCommand::Segment(seg) => seg.shift_file_offsets(delta),
            LoadCommand::Symtab(s) => {
                let c = &mut s.command;
                shift(&mut c.symoff, c.nsyms, delta);
                shift(&mut c.stroff, c.strsize, delta);
            }
            LoadCommand::Dysymtab(d) => {
                let c = &mut d.command;
                shift(&mut c.tocoff, c.ntoc, delta);
                shift(&mut c.modtaboff, c.nmodtab, delta);
                shift(&mut c.extrefsymoff, c.nextrefsyms, delta);
                shift(&mut c.indirectsymoff, c.nindirectsyms, delta);
                shift(&mut c.extreloff, c.nextrel, delta);
                shift(&mut c.locreloff, c.nlocrel, delta);
            }
            LoadCommand::DyldInfo(d) => {
                let c = &mut d.command;
                shift(&mut c.rebase_off, c.rebase_size, delta);
                shift(&mut c.bind_off, c.bind_size, delta);
                shift(&mut c.weak_bind_off, c.weak_bind_size, delta);
                shift(&mut c.lazy_bind_off, c.lazy_bind_size, delta);
                shift(&mut c.export_off, c.export_size, delta);
            }
            LoadCommand::LinkeditData(l) => {
                let c = &mut l.command;
                shift(&mut c.dataoff, c.datasize, delta);
            }
            LoadCommand::Unknown { .. } => {}
        }
    }
}

impl fmt::Display for LoadCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadCommand::Segment(seg) => {
                write!(f, "{}", seg.command)?;
                for sect in &seg.sections {
                    write!(f, "\n    {}", sect.header)?;
                }
                Ok(())
            }
            LoadCommand::Symtab(s) => write!(
                f,
                "{} {{ symbols: {} @ {:#x}, strings: {:#x} @ {:#x} }}",
                self.name(),
                s.command.nsyms,
                s.command.symoff,
                s.command.strsize,
                s.command.stroff
            ),
            LoadCommand::Dysymtab(d) => write!(
                f,
                "{} {{ indirect: {} @ {:#x}, extrel: {}, locrel: {} }}",
                self.name(),
                d.command.nindirectsyms,
                d.command.indirectsymoff,
                d.command.nextrel,
                d.command.nlocrel
            ),
            LoadCommand::DyldInfo(d) => write!(
                f,
                "{} {{ rebase: {:#x}, bind: {:#x}, weak: {:#x}, lazy: {:#x}, export: {:#x} }}",
                self.name(),
                d.command.rebase_size,
                d.command.bind_size,
                d.command.weak_bind_size,
                d.command.lazy_bind_size,
                d.command.export_size
            ),
            LoadCommand::LinkeditData(l) => write!(
                f,
                "{} {{ data: {:#x}+{:#x} }}",
                self.name(),
                l.command.dataoff,
                l.command.datasize
            ),
            LoadCommand::Unknown { cmd, raw } => {
                write!(f, "{} ({cmd:#x}) {{ {} bytes }}", self.name(), raw.len())
            }
        }
    }
}
