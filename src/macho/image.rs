//! Parsing a whole Mach-O image into the load-command model.

use tracing::debug;
use zerocopy::FromBytes;

use super::command::{LoadCommand, Section, Segment};
use super::constants::*;
use super::structs::*;
use crate::error::{Error, Result};

/// A parsed 64-bit Mach-O image.
///
/// The image borrows its payloads from the buffer it was parsed from. Edits
/// replace whole commands with owned copies, so the buffer stays untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct MachImage<'a> {
    /// The Mach-O header as read from the file
    pub header: MachHeader64,
    /// Load commands in file order
    pub load_commands: Vec<LoadCommand<'a>>,
}

impl<'a> MachImage<'a> {
    /// Parses a Mach-O image from raw data.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < MachHeader64::SIZE {
            return Err(Error::buffer_too_small(MachHeader64::SIZE, data.len()));
        }

        let header = MachHeader64::read_from_prefix(data)
            .map_err(|_| Error::InvalidMachoMagic(0))?
            .0;

        if !header.is_valid() {
            return Err(Error::InvalidMachoMagic(header.magic));
        }

        debug!("Parsing {}", header);

        let mut load_commands = Vec::with_capacity(header.ncmds as usize);
        let mut offset = MachHeader64::SIZE;

        for _ in 0..header.ncmds {
            let lc = data
                .get(offset..)
                .and_then(|rest| LoadCommandHeader::read_from_prefix(rest).ok())
                .ok_or(Error::LoadCommandOverflow { offset })?
                .0;

            let cmdsize = lc.cmdsize as usize;
            if cmdsize < LoadCommandHeader::SIZE || offset + cmdsize > data.len() {
                return Err(Error::LoadCommandOverflow { offset });
            }

            let cmd_data = &data[offset..offset + cmdsize];
            let command = LoadCommand::parse(lc.cmd, cmd_data, data, offset)?;
            if let Some(seg) = command.as_segment() {
                check_segment_body(seg, data.len())?;
            }
            debug!("  {:#06x}: {}", offset, command.name());

            load_commands.push(command);
            offset += cmdsize;
        }

        Ok(Self {
            header,
            load_commands,
        })
    }

    /// Returns an iterator over all segments.
    pub fn segments(&self) -> impl Iterator<Item = &Segment<'a>> {
        self.load_commands.iter().filter_map(LoadCommand::as_segment)
    }

    /// Returns the command index of a segment by name.
    pub fn segment_index(&self, name: &str) -> Option<usize> {
        self.load_commands
            .iter()
            .position(|lc| lc.as_segment().is_some_and(|s| s.name() == name))
    }

    /// Returns a segment by name.
    pub fn segment(&self, name: &str) -> Option<&Segment<'a>> {
        self.segments().find(|s| s.name() == name)
    }

    /// Finds a section, returning `(command index, section index)`.
    pub fn find_section(&self, segment: &str, section: &str) -> Option<(usize, usize)> {
        self.load_commands.iter().enumerate().find_map(|(i, lc)| {
            let seg = lc.as_segment().filter(|s| s.name() == segment)?;
            Some((i, seg.section_index(section)?))
        })
    }

    /// Returns a section by segment and section name.
    pub fn section(&self, segment: &str, section: &str) -> Option<&Section<'a>> {
        self.segment(segment)?.section(section)
    }

    /// Replaces the command at `index`, returning the old one.
    ///
    /// No relocation happens; use [`MachImage::replace_section`] for edits that
    /// change the size of file contents.
    pub fn replace_command(
        &mut self,
        index: usize,
        command: LoadCommand<'a>,
    ) -> Result<LoadCommand<'a>> {
        let count = self.load_commands.len();
        let slot = self
            .load_commands
            .get_mut(index)
            .ok_or(Error::SegmentIndexOutOfRange { index, count })?;
        Ok(std::mem::replace(slot, command))
    }

    /// Returns true if the image is built for an arm64 CPU.
    pub fn is_arm64(&self) -> bool {
        self.header.cputype == CPU_TYPE_ARM64
    }
}

/// Rejects a segment whose file body runs past the end of the image.
fn check_segment_body(seg: &Segment<'_>, len: usize) -> Result<()> {
    let c = &seg.command;
    let end = c.fileoff.checked_add(c.filesize);
    if end.is_some_and(|end| end <= len as u64) {
        return Ok(());
    }
    Err(Error::SegmentBeyondImage {
        name: seg.name().to_string(),
        fileoff: c.fileoff,
        filesize: c.filesize,
        len,
    })
}
