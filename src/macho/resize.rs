//! Growing sections and relocating everything laid out after them.
//!
//! Growth is handled in two steps. A section grows inside a copy of its
//! segment, pushing later sibling sections forward. The segment then grows
//! inside a staged copy of the image, which shifts the file offsets of later
//! commands and the addresses of segments that now overlap it. The staged
//! image replaces the real one only when every step succeeded.

use tracing::{debug, info};

use super::command::{LoadCommand, Section, Segment};
use super::image::MachImage;
use super::structs::SegmentCommand64;
use crate::error::{Error, Result};
use crate::util::{align_up, is_aligned, SEGMENT_ALIGNMENT};

impl Segment<'_> {
    /// Grows the section at `index` to `new_size` bytes.
    ///
    /// Sections at or past the old end of the resized one move forward, in
    /// address order, keeping their alignment. The segment body grows to
    /// cover every moved section, so the returned growth can exceed
    /// `new_size - size` when realignment pushes a sibling further. A
    /// `new_size` that does not exceed the current size changes nothing and
    /// returns zero.
    pub fn resize_section(&mut self, index: usize, new_size: u64) -> Result<u64> {
        let count = self.sections.len();
        let target = self
            .sections
            .get(index)
            .ok_or(Error::SectionIndexOutOfRange { index, count })?
            .header;

        if new_size <= target.size {
            return Ok(0);
        }

        let delta = new_size - target.size;
        let old_end = target.addr + target.size;
        let old_filesize = self.command.filesize;

        let mut body_end = self.command.fileoff + old_filesize + delta;
        let mut followers: Vec<usize> = (0..count)
            .filter(|&i| i != index && self.sections[i].header.addr >= old_end)
            .collect();
        followers.sort_by_key(|&i| self.sections[i].header.addr);

        let mut floor = old_end + delta;
        for i in followers {
            let header = &mut self.sections[i].header;
            let new_addr = align_up((header.addr + delta).max(floor), header.alignment());
            let moved = new_addr - header.addr;
            debug_assert!(is_aligned(new_addr, header.alignment()));

            debug!(
                "  {}: {:#x} -> {:#x}",
                header.name(),
                header.addr,
                new_addr
            );

            header.addr = new_addr;
            if header.offset != 0 {
                header.offset = (header.offset as u64 + moved) as u32;
                if !header.is_zerofill() {
                    body_end = body_end.max(header.offset as u64 + header.size);
                }
            }
            floor = new_addr + header.size;
        }

        self.command.filesize = body_end - self.command.fileoff;
        let growth = self.command.filesize - old_filesize;

        let needed = (self.command.vmsize + growth).max(floor - self.command.vmaddr);
        self.command.vmsize = align_up(needed, SEGMENT_ALIGNMENT);

        self.sections[index].header.size = new_size;
        Ok(growth)
    }
}

impl<'a> MachImage<'a> {
    /// Grows the segment at command `index` to `new_file_size` bytes on disk.
    ///
    /// Every command after the segment that points into the file has its
    /// non-empty regions shifted by the growth. Every other segment whose
    /// address falls inside the grown segment is moved up past it, page
    /// aligned, and segments it then overlaps follow in turn.
    ///
    /// Returns the growth; a smaller or equal size changes nothing.
    pub fn resize_segment(&mut self, index: usize, new_file_size: u64) -> Result<u64> {
        let resized = self.segment_command(index)?;
        let vmsize = resized.vmsize + new_file_size.saturating_sub(resized.filesize);
        self.grow_segment(index, new_file_size, align_up(vmsize, SEGMENT_ALIGNMENT))
    }

    fn segment_command(&self, index: usize) -> Result<SegmentCommand64> {
        let count = self.load_commands.len();
        match self.load_commands.get(index) {
            None => Err(Error::SegmentIndexOutOfRange { index, count }),
            Some(LoadCommand::Segment(seg)) => Ok(seg.command),
            Some(_) => Err(Error::NotASegment { index }),
        }
    }

    /// Grows a segment's body and virtual size, then relocates the rest.
    fn grow_segment(&mut self, index: usize, new_file_size: u64, vmsize: u64) -> Result<u64> {
        let resized = self.segment_command(index)?;
        if new_file_size <= resized.filesize {
            return Ok(0);
        }

        let delta = new_file_size - resized.filesize;

        debug!(
            "Growing segment {} by {:#x} (vmsize {:#x} -> {:#x})",
            resized.name(),
            delta,
            resized.vmsize,
            vmsize
        );

        if let Some(seg) = self.load_commands[index].as_segment_mut() {
            seg.command.vmsize = vmsize;
            seg.command.filesize = new_file_size;
        }

        // Position: file regions of later commands move down by the growth.
        for lc in self.load_commands.iter_mut().skip(index + 1) {
            if lc.has_file_offsets() {
                lc.shift_file_offsets(delta);
            }
        }

        // Containment: segments inside the grown range move up past it.
        let mut inside: Vec<(usize, u64)> = self
            .load_commands
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != index)
            .filter_map(|(i, lc)| Some((i, lc.as_segment()?.command.vmaddr)))
            .collect();
        inside.sort_by_key(|&(_, vmaddr)| vmaddr);

        let mut window = resized;
        window.vmsize = vmsize;
        for (i, vmaddr) in inside {
            if !window.contains_addr(vmaddr) {
                continue;
            }
            let Some(seg) = self.load_commands[i].as_segment_mut() else {
                continue;
            };

            let window_end = window.vmaddr + window.vmsize;
            let new_vmaddr = align_up((vmaddr + delta).max(window_end), SEGMENT_ALIGNMENT);
            let moved = new_vmaddr - vmaddr;

            debug!(
                "  {}: {:#x} -> {:#x}",
                seg.name(),
                vmaddr,
                new_vmaddr
            );

            seg.command.vmaddr = new_vmaddr;
            seg.command.vmsize = align_up(seg.command.vmsize, SEGMENT_ALIGNMENT);
            for sect in &mut seg.sections {
                sect.header.addr += moved;
            }

            // Segments before the resized one were not moved on disk yet.
            if i < index {
                seg.shift_file_offsets(delta);
            }

            let end = new_vmaddr + seg.command.vmsize;
            window.vmsize = window.vmsize.max(end - window.vmaddr);
        }

        Ok(delta)
    }

    /// Replaces a section's contents, growing and relocating as needed.
    ///
    /// The section is located by its segment and section names. Its address
    /// and file offset are taken from the model, not from `section`, so an
    /// earlier relocation stays in force. On error the image is unchanged.
    pub fn replace_section(&mut self, section: Section<'a>) -> Result<()> {
        let (seg_index, sect_index) = self
            .find_section(section.segment_name(), section.name())
            .ok_or_else(|| Error::section_not_found(section.segment_name(), section.name()))?;

        let mut segment = match &self.load_commands[seg_index] {
            LoadCommand::Segment(seg) => seg.clone(),
            _ => return Err(Error::NotASegment { index: seg_index }),
        };

        let name = section.name().to_string();
        let old_size = segment.sections[sect_index].header.size;
        let new_size = section.header.size;
        let growth = segment.resize_section(sect_index, new_size)?;

        let mut section = section;
        let placed = segment.sections[sect_index].header;
        section.header.addr = placed.addr;
        section.header.offset = placed.offset;
        segment.sections[sect_index] = section;

        let mut staged = self.clone();
        staged.grow_segment(seg_index, segment.command.filesize, segment.command.vmsize)?;
        staged.load_commands[seg_index] = LoadCommand::Segment(segment);
        *self = staged;

        if growth > 0 {
            info!(
                "Grew section {} from {:#x} to {:#x} bytes (segment body +{:#x})",
                name, old_size, new_size, growth
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::fixtures::*;
    use crate::macho::constants::S_ZEROFILL;
    use crate::macho::structs::Section64;

    fn grown(image: &MachImage<'_>, segment: &str, section: &str, extra: usize) -> Section<'static> {
        let sect = image.section(segment, section).unwrap();
        let mut data = sect.bytes().to_vec();
        data.resize(data.len() + extra, 0xEE);
        Section::with_data(sect.header, data)
    }

    #[test]
    fn test_grow_text_moves_cstring() {
        let data = build_image();
        let mut image = MachImage::parse(&data).unwrap();

        let text = grown(&image, "__TEXT", "__text", 50);
        image.replace_section(text).unwrap();

        let seg = segment_at(&image, 1);
        assert_eq!(seg.sections[0].header.size, 150);
        assert_eq!(seg.sections[1].header.addr, TEXT_VMADDR + 0x1132);
        assert_eq!(seg.sections[1].header.offset, 0x1132);
        assert_eq!(seg.sections[2].header.addr, TEXT_VMADDR + 0x1232);
        assert_eq!(seg.command.filesize, 0x2000 + 50);
        assert_eq!(seg.command.vmsize, 0x3000);
    }

    #[test]
    fn test_growth_invariant() {
        let data = build_image();
        for extra in [1u64, 7, 50, 0x1000, 0x2345] {
            let mut image = MachImage::parse(&data).unwrap();
            let before = segment_at(&image, 1).command;

            let mut segment = segment_at(&image, 1).clone();
            let delta = segment.resize_section(1, 50 + extra).unwrap();
            assert_eq!(delta, extra);
            assert_eq!(segment.command.filesize, before.filesize + extra);
            assert_eq!(
                segment.command.vmsize,
                align_up(before.vmsize + extra, SEGMENT_ALIGNMENT)
            );
            assert_eq!(segment.sections[0], segment_at(&image, 1).sections[0]);

            image
                .resize_segment(1, segment.command.filesize)
                .unwrap();
            let after = segment_at(&image, 1).command;
            assert_eq!(after.filesize, before.filesize + extra);
            assert!(after.vmsize >= before.vmsize + extra);
            assert_eq!(after.vmsize % SEGMENT_ALIGNMENT, 0);
        }
    }

    #[test]
    fn test_sibling_alignment_is_kept() {
        let data = build_image();
        let image = MachImage::parse(&data).unwrap();
        let mut segment = segment_at(&image, 1).clone();
        segment.sections[2].header.align = 4;

        segment.resize_section(1, 0x101).unwrap();
        let methname = &segment.sections[2].header;
        assert_eq!(methname.addr % 16, 0);
        assert!(methname.addr >= segment.sections[1].header.addr + 0x101);
        assert_eq!(
            methname.offset as u64,
            methname.addr - TEXT_VMADDR,
            "file offset moves with the address"
        );
    }

    fn assert_segments_disjoint(image: &MachImage<'_>) {
        let segments: Vec<_> = image
            .segments()
            .map(|s| s.command)
            .filter(|c| c.vmsize > 0)
            .collect();
        for a in &segments {
            for b in &segments {
                if a != b {
                    assert!(
                        !a.contains_addr(b.vmaddr),
                        "{} [{:#x}, +{:#x}) overlaps {} at {:#x}",
                        a.name(),
                        a.vmaddr,
                        a.vmsize,
                        b.name(),
                        b.vmaddr
                    );
                }
            }
        }
    }

    /// Moves `__objc_methname` to the last 16 bytes of `__TEXT`, 8-byte aligned.
    fn pack_methname_at_text_end(image: &mut MachImage<'_>) {
        let text = image.load_commands[1].as_segment_mut().unwrap();
        let methname = &mut text.sections[2].header;
        methname.addr = TEXT_VMADDR + 0x1ff0;
        methname.offset = 0x1ff0;
        methname.align = 3;
    }

    #[test]
    fn test_realigned_sibling_grows_body() {
        let data = build_image();
        let mut image = MachImage::parse(&data).unwrap();
        pack_methname_at_text_end(&mut image);
        image.write().unwrap();

        let mut segment = segment_at(&image, 1).clone();
        assert_eq!(segment.resize_section(1, 51).unwrap(), 8);
        assert_eq!(segment.sections[2].header.offset, 0x1ff8);
        assert_eq!(segment.command.filesize, 0x2008);

        let cstring = grown(&image, "__TEXT", "__cstring", 1);
        image.replace_section(cstring).unwrap();
        assert_eq!(segment_at(&image, 2).command.fileoff, 0x2008);
        assert_eq!(segment_at(&image, 3).command.fileoff, 0x3008);

        let out = image.write().unwrap();
        assert_eq!(out.len(), FIXTURE_LEN + 8);
        let reparsed = MachImage::parse(&out).unwrap();
        let methname = reparsed.section("__TEXT", "__objc_methname").unwrap();
        assert_eq!(methname.bytes(), &data[0x1200..0x1210]);
        assert_segments_disjoint(&reparsed);
    }

    #[test]
    fn test_large_alignment_keeps_segments_disjoint() {
        let data = build_image();
        let mut image = MachImage::parse(&data).unwrap();
        let text = image.load_commands[1].as_segment_mut().unwrap();
        text.sections[1].header.align = 14;

        let code = grown(&image, "__TEXT", "__text", 1);
        image.replace_section(code).unwrap();

        let text = segment_at(&image, 1).command;
        assert_eq!(text.vmsize, 0x5000);
        assert_eq!(segment_at(&image, 1).sections[1].header.addr, TEXT_VMADDR + 0x4000);
        assert_eq!(segment_at(&image, 2).command.vmaddr, TEXT_VMADDR + 0x5000);
        assert_eq!(segment_at(&image, 3).command.vmaddr, TEXT_VMADDR + 0x6000);
        assert_segments_disjoint(&image);
        image.write().unwrap();
    }

    #[test]
    fn test_moved_zerofill_section_extends_window() {
        let data = build_image();
        let mut image = MachImage::parse(&data).unwrap();
        let text = image.load_commands[1].as_segment_mut().unwrap();
        let bss = &mut text.sections[2];
        bss.header.flags = S_ZEROFILL;
        bss.header.offset = 0;
        bss.header.align = 14;
        bss.data = None;

        let cstring = grown(&image, "__TEXT", "__cstring", 1);
        image.replace_section(cstring).unwrap();

        let text = segment_at(&image, 1);
        assert_eq!(text.sections[2].header.addr, TEXT_VMADDR + 0x4000);
        assert_eq!(text.command.filesize, 0x2001);
        assert_eq!(text.command.vmsize, 0x5000);
        assert_eq!(segment_at(&image, 2).command.vmaddr, TEXT_VMADDR + 0x5000);
        assert_segments_disjoint(&image);
    }

    #[test]
    fn test_offset_propagation() {
        let data = build_image();
        let mut image = MachImage::parse(&data).unwrap();
        let before = image.clone();

        let methname = grown(&image, "__TEXT", "__objc_methname", 0x30);
        image.replace_section(methname).unwrap();

        let data_seg = segment_at(&image, 2);
        assert_eq!(data_seg.command.fileoff, 0x2030);
        assert_eq!(data_seg.sections[0].header.offset, 0x2030);
        assert_eq!(data_seg.command.vmaddr, DATA_VMADDR + 0x1000);
        assert_eq!(data_seg.sections[0].header.addr, DATA_VMADDR + 0x1000);

        let linkedit = segment_at(&image, 3);
        assert_eq!(linkedit.command.fileoff, 0x3030);
        assert_eq!(linkedit.command.vmaddr, LINKEDIT_VMADDR + 0x1000);
        assert_eq!(linkedit.command.filesize, 0x200);

        let LoadCommand::DyldInfo(info) = &image.load_commands[4] else {
            panic!("expected dyld info");
        };
        assert_eq!(info.command.rebase_off, 0x3030);
        assert_eq!(info.command.export_off, 0x3048);
        assert_eq!(info.command.weak_bind_off, 0);

        let LoadCommand::Symtab(symtab) = &image.load_commands[5] else {
            panic!("expected symtab");
        };
        assert_eq!(symtab.command.symoff, 0x3070);
        assert_eq!(symtab.command.stroff, 0x3090);

        let LoadCommand::Dysymtab(dysymtab) = &image.load_commands[6] else {
            panic!("expected dysymtab");
        };
        assert_eq!(dysymtab.command.indirectsymoff, 0x30a0);
        assert_eq!(dysymtab.command.tocoff, 0);

        let LoadCommand::LinkeditData(starts) = &image.load_commands[7] else {
            panic!("expected linkedit data");
        };
        assert_eq!(starts.command.dataoff, 0x30b0);

        // Commands before the grown segment are untouched.
        assert_eq!(image.load_commands[0], before.load_commands[0]);
        assert_eq!(image.load_commands[8], before.load_commands[8]);
    }

    #[test]
    fn test_same_size_replace_is_identity() {
        let data = build_image();
        let mut image = MachImage::parse(&data).unwrap();
        let before = image.clone();

        let cstring = image.section("__TEXT", "__cstring").unwrap().clone();
        image.replace_section(cstring).unwrap();
        assert_eq!(image, before);
    }

    #[test]
    fn test_shrink_is_noop() {
        let data = build_image();
        let image = MachImage::parse(&data).unwrap();
        let mut segment = segment_at(&image, 1).clone();
        assert_eq!(segment.resize_section(0, 10).unwrap(), 0);
        assert_eq!(&segment, segment_at(&image, 1));
    }

    #[test]
    fn test_boundary_errors_leave_image_unchanged() {
        let data = build_image();
        let mut image = MachImage::parse(&data).unwrap();
        let before = image.clone();

        let mut segment = segment_at(&image, 1).clone();
        assert!(matches!(
            segment.resize_section(3, 10),
            Err(Error::SectionIndexOutOfRange { index: 3, count: 3 })
        ));
        assert!(matches!(
            image.resize_segment(9, 0x5000),
            Err(Error::SegmentIndexOutOfRange { index: 9, count: 9 })
        ));
        assert!(matches!(
            image.resize_segment(5, 0x5000),
            Err(Error::NotASegment { index: 5 })
        ));

        let mut missing = Section64::default();
        missing.set_names("__TEXT", "__const");
        assert!(matches!(
            image.replace_section(Section::with_data(missing, vec![0; 8])),
            Err(Error::SectionNotFound { .. })
        ));

        assert_eq!(image, before);
    }

    #[test]
    fn test_replacement_adopts_current_placement() {
        let data = build_image();
        let mut image = MachImage::parse(&data).unwrap();

        // Built before __text grows, so its address is stale.
        let stale = grown(&image, "__TEXT", "__cstring", 0);
        image
            .replace_section(grown(&image, "__TEXT", "__text", 50))
            .unwrap();
        image.replace_section(stale).unwrap();

        let cstring = image.section("__TEXT", "__cstring").unwrap();
        assert_eq!(cstring.header.addr, TEXT_VMADDR + 0x1132);
        assert_eq!(cstring.header.offset, 0x1132);
    }
}
