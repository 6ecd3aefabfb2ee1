//! Serializing the load-command model back into a Mach-O file.
//!
//! Each command contributes its header to the command area and places its
//! payloads at their own file offsets. Payloads must either extend the output
//! exactly at its current end or land entirely inside what is already
//! written. Anything else means the model is inconsistent, and is reported as
//! a layout fault instead of silently producing a corrupt file.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};
use zerocopy::IntoBytes;

use super::command::LoadCommand;
use super::image::MachImage;
use super::structs::MachHeader64;
use crate::error::{Error, Result};

/// Bytes to place at a file offset.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Placement<'m> {
    Bytes(&'m [u8]),
    Zeros(usize),
}

impl Placement<'_> {
    fn len(&self) -> usize {
        match self {
            Placement::Bytes(b) => b.len(),
            Placement::Zeros(n) => *n,
        }
    }
}

/// A fragment of a load command plus an optional payload placement.
#[derive(Debug, Clone)]
pub(crate) struct Chunk<'m> {
    /// Bytes appended to the load command area
    pub header: Cow<'m, [u8]>,
    /// File offset and contents of the region this fragment describes
    pub payload: Option<(u64, Placement<'m>)>,
}

impl<'m> Chunk<'m> {
    fn header(header: Cow<'m, [u8]>) -> Self {
        Self {
            header,
            payload: None,
        }
    }

    fn table(offset: u32, data: Option<&'m [u8]>) -> Option<Self> {
        data.map(|bytes| Self {
            header: Cow::Borrowed(&[]),
            payload: Some((offset as u64, Placement::Bytes(bytes))),
        })
    }
}

/// Pads a fixed command structure with zeros up to its declared size.
fn padded(bytes: &[u8], cmdsize: u32) -> Cow<'_, [u8]> {
    let cmdsize = cmdsize as usize;
    if cmdsize > bytes.len() {
        let mut out = bytes.to_vec();
        out.resize(cmdsize, 0);
        Cow::Owned(out)
    } else {
        Cow::Borrowed(bytes)
    }
}

impl LoadCommand<'_> {
    /// Splits the command into header fragments and payload placements.
    pub(crate) fn chunks(&self) -> Vec<Chunk<'_>> {
        let cmdsize = self.cmdsize();
        match self {
            LoadCommand::Segment(seg) => {
                let mut command = seg.command;
                command.cmdsize = cmdsize;
                command.nsects = seg.sections.len() as u32;

                let mut chunks = Vec::with_capacity(1 + seg.sections.len());
                chunks.push(Chunk {
                    header: Cow::Owned(command.as_bytes().to_vec()),
                    payload: Some((
                        command.fileoff,
                        Placement::Zeros(usize::try_from(command.filesize).unwrap_or(usize::MAX)),
                    )),
                });
                for sect in &seg.sections {
                    chunks.push(Chunk {
                        header: Cow::Borrowed(sect.header.as_bytes()),
                        payload: sect
                            .data
                            .as_deref()
                            .map(|bytes| (sect.header.offset as u64, Placement::Bytes(bytes))),
                    });
                }
                chunks
            }
            LoadCommand::Symtab(s) => {
                let c = &s.command;
                std::iter::once(Chunk::header(padded(c.as_bytes(), cmdsize)))
                    .chain(Chunk::table(c.symoff, s.symbols.as_deref()))
                    .chain(Chunk::table(c.stroff, s.strings.as_deref()))
                    .collect()
            }
            LoadCommand::Dysymtab(d) => std::iter::once(Chunk::header(padded(
                d.command.as_bytes(),
                cmdsize,
            )))
            .chain(
                d.tables()
                    .into_iter()
                    .filter_map(|(offset, data)| Chunk::table(offset, data)),
            )
            .collect(),
            LoadCommand::DyldInfo(d) => std::iter::once(Chunk::header(padded(
                d.command.as_bytes(),
                cmdsize,
            )))
            .chain(
                d.blocks()
                    .into_iter()
                    .filter_map(|(offset, data)| Chunk::table(offset, data)),
            )
            .collect(),
            LoadCommand::LinkeditData(l) => {
                std::iter::once(Chunk::header(padded(l.command.as_bytes(), cmdsize)))
                    .chain(Chunk::table(l.command.dataoff, l.data.as_deref()))
                    .collect()
            }
            LoadCommand::Unknown { raw, .. } => vec![Chunk::header(Cow::Borrowed(raw))],
        }
    }
}

/// Places a payload into the output, appending or overwriting in place.
fn place(out: &mut Vec<u8>, command: usize, offset: u64, placement: Placement<'_>) -> Result<()> {
    let len = placement.len();
    if len == 0 {
        return Ok(());
    }

    let end = out.len();
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);

    if offset == end {
        out.try_reserve(len).map_err(|_| Error::LayoutFault {
            command,
            offset,
            len,
            end,
        })?;
        match placement {
            Placement::Bytes(bytes) => out.extend_from_slice(bytes),
            Placement::Zeros(n) => out.resize(end + n, 0),
        }
    } else if offset.checked_add(len).is_some_and(|stop| stop <= end) {
        let target = &mut out[offset..offset + len];
        match placement {
            Placement::Bytes(bytes) => target.copy_from_slice(bytes),
            Placement::Zeros(_) => target.fill(0),
        }
    } else {
        return Err(Error::LayoutFault {
            command,
            offset,
            len,
            end,
        });
    }

    Ok(())
}

impl MachImage<'_> {
    /// Serializes the image into a new buffer.
    ///
    /// The header's command count and size are recomputed from the model.
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut commands = Vec::with_capacity(self.header.sizeofcmds as usize);

        for (index, lc) in self.load_commands.iter().enumerate() {
            for chunk in lc.chunks() {
                commands.extend_from_slice(&chunk.header);
                if let Some((offset, placement)) = chunk.payload {
                    place(&mut out, index, offset, placement)?;
                }
            }
        }

        let mut header = self.header;
        header.ncmds = self.load_commands.len() as u32;
        header.sizeofcmds = commands.len() as u32;

        let front = MachHeader64::SIZE + commands.len();
        if out.len() < front {
            out.resize(front, 0);
        }
        out[..MachHeader64::SIZE].copy_from_slice(header.as_bytes());
        out[MachHeader64::SIZE..front].copy_from_slice(&commands);

        debug!(
            "Serialized {} load commands ({:#x} bytes) into {:#x} bytes",
            header.ncmds,
            header.sizeofcmds,
            out.len()
        );

        Ok(out)
    }

    /// Serializes the image and writes it to a file.
    ///
    /// Nothing is written if serialization fails.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let output = self.write()?;

        // Create parent directories if needed
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::FileWrite {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let file = File::create(path).map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut writer = BufWriter::new(file);

        writer.write_all(&output).map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;

        writer.flush().map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!("Wrote {} ({} bytes)", path.display(), output.len());
        Ok(())
    }
}
