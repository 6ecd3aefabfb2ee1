//! Synthetic images shared by the unit tests.
//!
//! The layout mimics a small arm64 dylib pulled out of a shared cache:
//!
//! ```text
//! 0x0000  header + load commands
//! 0x1000  __TEXT,__text            (100 bytes, align 4)
//! 0x1100  __TEXT,__cstring         (50 bytes)
//! 0x1200  __TEXT,__objc_methname   (16 bytes)
//! 0x2000  __DATA,__objc_selrefs    (3 entries)
//! 0x3000  __LINKEDIT               (dyld info, symtab, dysymtab, function starts)
//! 0x3200  end of file
//! ```

use zerocopy::IntoBytes;

use super::command::LoadCommand;
use super::constants::*;
use super::image::MachImage;
use super::structs::*;
use crate::util::push_u64_le;

pub const FIXTURE_LEN: usize = 0x3200;
pub const FIXTURE_NCMDS: u32 = 9;
pub const FIXTURE_SIZEOFCMDS: u32 = 800;
pub const TEXT_VMADDR: u64 = 0x1_0000_0000;
pub const DATA_VMADDR: u64 = 0x1_0000_2000;
pub const LINKEDIT_VMADDR: u64 = 0x1_0000_3000;

/// Cache offsets of the three selector strings in [`build_cache`].
pub const SELECTOR_OFFSETS: [u64; 3] = [16, 21, 27];

/// Raw selector reference values. The high bits carry cache metadata that
/// must be masked off.
pub const SELREF_VALUES: [u64; 3] = [
    (0x7f << 40) | SELECTOR_OFFSETS[0],
    (0x03 << 40) | SELECTOR_OFFSETS[1],
    SELECTOR_OFFSETS[2],
];

fn segment(name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64, prot: u32) -> SegmentCommand64 {
    let mut seg = SegmentCommand64 {
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        maxprot: prot,
        initprot: prot,
        ..Default::default()
    };
    seg.set_name(name);
    seg
}

fn section(segname: &str, name: &str, addr: u64, size: u64, align: u32, flags: u32) -> Section64 {
    let mut sect = Section64 {
        addr,
        size,
        offset: (addr - TEXT_VMADDR) as u32,
        align,
        flags,
        ..Default::default()
    };
    sect.set_names(segname, name);
    sect
}

fn push_segment(cmds: &mut Vec<u8>, mut seg: SegmentCommand64, sections: &[Section64]) {
    seg.nsects = sections.len() as u32;
    seg.cmdsize = (SegmentCommand64::SIZE + sections.len() * Section64::SIZE) as u32;
    cmds.extend_from_slice(seg.as_bytes());
    for sect in sections {
        cmds.extend_from_slice(sect.as_bytes());
    }
}

fn fill(data: &mut [u8], offset: usize, len: usize, seed: u8) {
    for (i, b) in data[offset..offset + len].iter_mut().enumerate() {
        *b = seed.wrapping_add(i as u8) | 1;
    }
}

/// Builds the synthetic dylib described in the module docs.
pub fn build_image() -> Vec<u8> {
    let mut cmds = Vec::new();

    push_segment(&mut cmds, segment("__PAGEZERO", 0, TEXT_VMADDR, 0, 0, 0), &[]);
    push_segment(
        &mut cmds,
        segment("__TEXT", TEXT_VMADDR, 0x2000, 0, 0x2000, 5),
        &[
            section("__TEXT", "__text", TEXT_VMADDR + 0x1000, 100, 2, S_ATTR_PURE_INSTRUCTIONS),
            section("__TEXT", "__cstring", TEXT_VMADDR + 0x1100, 50, 0, S_CSTRING_LITERALS),
            section("__TEXT", "__objc_methname", TEXT_VMADDR + 0x1200, 16, 0, S_CSTRING_LITERALS),
        ],
    );
    push_segment(
        &mut cmds,
        segment("__DATA", DATA_VMADDR, 0x1000, 0x2000, 0x1000, 3),
        &[section(
            "__DATA",
            "__objc_selrefs",
            DATA_VMADDR,
            24,
            3,
            S_LITERAL_POINTERS | S_ATTR_NO_DEAD_STRIP,
        )],
    );
    push_segment(
        &mut cmds,
        segment("__LINKEDIT", LINKEDIT_VMADDR, 0x1000, 0x3000, 0x200, 1),
        &[],
    );

    let dyld_info = DyldInfoCommand {
        cmd: LC_DYLD_INFO_ONLY,
        cmdsize: DyldInfoCommand::SIZE as u32,
        rebase_off: 0x3000,
        rebase_size: 8,
        bind_off: 0x3008,
        bind_size: 8,
        lazy_bind_off: 0x3010,
        lazy_bind_size: 8,
        export_off: 0x3018,
        export_size: 8,
        ..Default::default()
    };
    cmds.extend_from_slice(dyld_info.as_bytes());

    let symtab = SymtabCommand {
        symoff: 0x3040,
        nsyms: 2,
        stroff: 0x3060,
        strsize: 16,
        ..Default::default()
    };
    cmds.extend_from_slice(symtab.as_bytes());

    let dysymtab = DysymtabCommand {
        cmd: LC_DYSYMTAB,
        cmdsize: DysymtabCommand::SIZE as u32,
        nlocalsym: 1,
        iextdefsym: 1,
        nextdefsym: 1,
        iundefsym: 2,
        indirectsymoff: 0x3070,
        nindirectsyms: 2,
        ..Default::default()
    };
    cmds.extend_from_slice(dysymtab.as_bytes());

    let starts = LinkeditDataCommand {
        cmd: LC_FUNCTION_STARTS,
        cmdsize: LinkeditDataCommand::SIZE as u32,
        dataoff: 0x3080,
        datasize: 8,
    };
    cmds.extend_from_slice(starts.as_bytes());

    cmds.extend_from_slice(&LC_UUID.to_le_bytes());
    cmds.extend_from_slice(&24u32.to_le_bytes());
    cmds.extend_from_slice(&[0x5A; 16]);

    let header = MachHeader64 {
        magic: MH_MAGIC_64,
        cputype: CPU_TYPE_ARM64,
        cpusubtype: CPU_SUBTYPE_ARM64_ALL,
        filetype: MH_DYLIB,
        ncmds: FIXTURE_NCMDS,
        sizeofcmds: cmds.len() as u32,
        flags: (MachOFlags::DYLDLINK | MachOFlags::TWOLEVEL | MachOFlags::DYLIB_IN_CACHE).bits(),
        reserved: 0,
    };
    assert_eq!(header.sizeofcmds, FIXTURE_SIZEOFCMDS);

    let mut data = vec![0u8; FIXTURE_LEN];
    data[..MachHeader64::SIZE].copy_from_slice(header.as_bytes());
    data[MachHeader64::SIZE..MachHeader64::SIZE + cmds.len()].copy_from_slice(&cmds);

    fill(&mut data, 0x1000, 100, 0x20);
    let cstrings = b"hello\0world\0";
    data[0x1100..0x1100 + cstrings.len()].copy_from_slice(cstrings);
    data[0x1200..0x1210].copy_from_slice(b"stale\0names\0\0\0\0\0");

    let mut selrefs = Vec::new();
    for value in SELREF_VALUES {
        push_u64_le(&mut selrefs, value);
    }
    data[0x2000..0x2000 + selrefs.len()].copy_from_slice(&selrefs);

    fill(&mut data, 0x3000, 0x20, 0x40);
    fill(&mut data, 0x3040, 0x20, 0x60);
    data[0x3060..0x3070].copy_from_slice(b"\0_foo\0_bar\0\0\0\0\0\0");
    fill(&mut data, 0x3070, 8, 0x80);
    fill(&mut data, 0x3080, 8, 0x90);

    data
}

/// Builds a shared-cache-like string source holding the three selectors.
pub fn build_cache() -> Vec<u8> {
    let mut cache = b"dyld_v1  x86_64\0".to_vec();
    cache.extend_from_slice(b"init\0alloc\0dealloc\0");
    cache
}

/// Returns the file offset of the load command at `index`.
pub fn command_offset(image: &MachImage<'_>, index: usize) -> usize {
    MachHeader64::SIZE
        + image.load_commands[..index]
            .iter()
            .map(|lc| lc.cmdsize() as usize)
            .sum::<usize>()
}

/// Returns the segment at `index`, panicking if it is another command.
pub fn segment_at<'i, 'a>(image: &'i MachImage<'a>, index: usize) -> &'i super::command::Segment<'a> {
    match &image.load_commands[index] {
        LoadCommand::Segment(seg) => seg,
        other => panic!("command {index} is {}", other.name()),
    }
}
