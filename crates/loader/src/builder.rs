//! Writer for small, well-formed images: test fixtures and demo guests.

use std::path::Path;

use crate::elf::{
    ByteOrder, Class, EI_CLASS, EI_DATA, EI_VERSION, EM_RISCV, Elf32Header, Elf32ProgramHeader,
    Elf64Header, Elf64ProgramHeader, MAGIC, PT_LOAD,
};
use crate::image::SegmentFlags;

const ET_EXEC: u16 = 2;
const PT_NOTE: u32 = 4;

#[derive(Debug, Clone)]
struct PendingSegment {
    p_type: u32,
    vaddr: u64,
    data: Vec<u8>,
    mem_size: u64,
    flags: SegmentFlags,
}

/// Builds an executable image with program headers directly after the file
/// header and segment data packed after the table, 4-byte aligned.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    class: Class,
    order: ByteOrder,
    machine: u16,
    entry: u64,
    segments: Vec<PendingSegment>,
}

impl ImageBuilder {
    /// A little-endian ELF32 RISC-V image with the given entry point.
    pub fn new(entry: u64) -> Self {
        Self {
            class: Class::Elf32,
            order: ByteOrder::Little,
            machine: EM_RISCV,
            entry,
            segments: Vec::new(),
        }
    }

    pub fn class(mut self, class: Class) -> Self {
        self.class = class;
        self
    }

    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Add a loadable segment. `mem_size` may exceed `data.len()`; the rest is zero fill.
    pub fn segment(mut self, vaddr: u64, data: Vec<u8>, mem_size: u64, flags: SegmentFlags) -> Self {
        self.segments.push(PendingSegment {
            p_type: PT_LOAD,
            vaddr,
            data,
            mem_size,
            flags,
        });
        self
    }

    /// Add a code segment from instruction words, sized to fit them exactly.
    pub fn code(self, vaddr: u64, words: &[u32]) -> Self {
        let data: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let len = data.len() as u64;
        self.segment(
            vaddr,
            data,
            len,
            SegmentFlags(SegmentFlags::R | SegmentFlags::X),
        )
    }

    /// Add an empty PT_NOTE entry that loaders must skip.
    pub fn note_header(mut self) -> Self {
        self.segments.push(PendingSegment {
            p_type: PT_NOTE,
            vaddr: 0,
            data: Vec::new(),
            mem_size: 0,
            flags: SegmentFlags::default(),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let o = self.order;
        let phoff = self.class.header_size();
        let phentsize = self.class.program_header_size();
        let mut data_offset = phoff + phentsize * self.segments.len();

        let mut offsets = Vec::with_capacity(self.segments.len());
        for s in &self.segments {
            data_offset = data_offset.next_multiple_of(4);
            offsets.push(data_offset);
            data_offset += s.data.len();
        }

        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&MAGIC);
        ident[EI_CLASS] = self.class.ident();
        ident[EI_DATA] = o.ident();
        ident[EI_VERSION] = 1;

        let mut out = Vec::with_capacity(data_offset);
        match self.class {
            Class::Elf32 => {
                let header = Elf32Header {
                    ident,
                    e_type: o.u16(ET_EXEC),
                    e_machine: o.u16(self.machine),
                    e_version: o.u32(1),
                    e_entry: o.u32(self.entry as u32),
                    e_phoff: o.u32(phoff as u32),
                    e_shoff: 0,
                    e_flags: 0,
                    e_ehsize: o.u16(phoff as u16),
                    e_phentsize: o.u16(phentsize as u16),
                    e_phnum: o.u16(self.segments.len() as u16),
                    e_shentsize: 0,
                    e_shnum: 0,
                    e_shstrndx: 0,
                };
                out.extend_from_slice(bytemuck::bytes_of(&header));
                for (s, &offset) in self.segments.iter().zip(&offsets) {
                    let ph = Elf32ProgramHeader {
                        p_type: o.u32(s.p_type),
                        p_offset: o.u32(offset as u32),
                        p_vaddr: o.u32(s.vaddr as u32),
                        p_paddr: o.u32(s.vaddr as u32),
                        p_filesz: o.u32(s.data.len() as u32),
                        p_memsz: o.u32(s.mem_size as u32),
                        p_flags: o.u32(s.flags.0),
                        p_align: o.u32(4),
                    };
                    out.extend_from_slice(bytemuck::bytes_of(&ph));
                }
            }
            Class::Elf64 => {
                let header = Elf64Header {
                    ident,
                    e_type: o.u16(ET_EXEC),
                    e_machine: o.u16(self.machine),
                    e_version: o.u32(1),
                    e_entry: o.u64(self.entry),
                    e_phoff: o.u64(phoff as u64),
                    e_shoff: 0,
                    e_flags: 0,
                    e_ehsize: o.u16(phoff as u16),
                    e_phentsize: o.u16(phentsize as u16),
                    e_phnum: o.u16(self.segments.len() as u16),
                    e_shentsize: 0,
                    e_shnum: 0,
                    e_shstrndx: 0,
                };
                out.extend_from_slice(bytemuck::bytes_of(&header));
                for (s, &offset) in self.segments.iter().zip(&offsets) {
                    let ph = Elf64ProgramHeader {
                        p_type: o.u32(s.p_type),
                        p_flags: o.u32(s.flags.0),
                        p_offset: o.u64(offset as u64),
                        p_vaddr: o.u64(s.vaddr),
                        p_paddr: o.u64(s.vaddr),
                        p_filesz: o.u64(s.data.len() as u64),
                        p_memsz: o.u64(s.mem_size),
                        p_align: o.u64(4),
                    };
                    out.extend_from_slice(bytemuck::bytes_of(&ph));
                }
            }
        }

        for (s, &offset) in self.segments.iter().zip(&offsets) {
            out.resize(offset, 0);
            out.extend_from_slice(&s.data);
        }
        out
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{parse_header, parse_program_headers};

    #[test]
    fn layout_is_header_table_then_data() {
        let bytes = ImageBuilder::new(0x0400_0000)
            .code(0x0400_0000, &[0x0000_0073])
            .build();
        assert_eq!(bytes.len(), 52 + 32 + 4);
        assert_eq!(&bytes[..4], &MAGIC);
        assert_eq!(&bytes[84..88], &[0x73, 0, 0, 0]);

        let header = parse_header(&bytes).unwrap();
        let phdrs = parse_program_headers(&bytes, &header).unwrap();
        assert_eq!(phdrs.len(), 1);
        assert_eq!(phdrs[0].offset, 84);
        assert_eq!(phdrs[0].flags, SegmentFlags::R | SegmentFlags::X);
    }

    #[test]
    fn data_offsets_are_aligned() {
        let bytes = ImageBuilder::new(0)
            .segment(0x1000, vec![1, 2, 3], 3, SegmentFlags(4))
            .segment(0x2000, vec![9], 1, SegmentFlags(4))
            .build();
        let header = parse_header(&bytes).unwrap();
        let phdrs = parse_program_headers(&bytes, &header).unwrap();
        assert_eq!(phdrs[0].offset % 4, 0);
        assert_eq!(phdrs[1].offset % 4, 0);
        assert_eq!(bytes[phdrs[1].offset as usize], 9);
    }
}
