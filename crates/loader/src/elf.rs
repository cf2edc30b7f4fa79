//! On-disk ELF structures and header decoding.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::image::LoadError;

pub const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const EI_VERSION: usize = 6;
pub const EM_RISCV: u16 = 243;
pub const PT_LOAD: u32 = 1;

/// Word size of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    Elf32,
    Elf64,
}

impl Class {
    fn from_ident(byte: u8) -> Result<Self, LoadError> {
        match byte {
            1 => Ok(Class::Elf32),
            2 => Ok(Class::Elf64),
            other => Err(LoadError::UnsupportedClass(other)),
        }
    }

    pub fn ident(self) -> u8 {
        match self {
            Class::Elf32 => 1,
            Class::Elf64 => 2,
        }
    }

    pub fn header_size(self) -> usize {
        match self {
            Class::Elf32 => size_of::<Elf32Header>(),
            Class::Elf64 => size_of::<Elf64Header>(),
        }
    }

    pub fn program_header_size(self) -> usize {
        match self {
            Class::Elf32 => size_of::<Elf32ProgramHeader>(),
            Class::Elf64 => size_of::<Elf64ProgramHeader>(),
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Class::Elf32 => f.write_str("ELF32"),
            Class::Elf64 => f.write_str("ELF64"),
        }
    }
}

/// Byte order of every multi-byte field in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn from_ident(byte: u8) -> Result<Self, LoadError> {
        match byte {
            1 => Ok(ByteOrder::Little),
            2 => Ok(ByteOrder::Big),
            other => Err(LoadError::UnsupportedEncoding(other)),
        }
    }

    pub fn ident(self) -> u8 {
        match self {
            ByteOrder::Little => 1,
            ByteOrder::Big => 2,
        }
    }

    /// Convert a field read in native order from file order. Also the inverse.
    pub(crate) fn u16(self, v: u16) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le(v),
            ByteOrder::Big => u16::from_be(v),
        }
    }

    pub(crate) fn u32(self, v: u32) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le(v),
            ByteOrder::Big => u32::from_be(v),
        }
    }

    pub(crate) fn u64(self, v: u64) -> u64 {
        match self {
            ByteOrder::Little => u64::from_le(v),
            ByteOrder::Big => u64::from_be(v),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::Little => f.write_str("little-endian"),
            ByteOrder::Big => f.write_str("big-endian"),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Elf32Header {
    pub ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Elf64Header {
    pub ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Elf32ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Elf64ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// The header fields the loader consumes, widened to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub class: Class,
    pub byte_order: ByteOrder,
    pub machine: u16,
    pub entry: u64,
    pub phoff: u64,
    pub phentsize: u16,
    pub phnum: u16,
}

/// A program header, widened to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

fn read_pod<T: Pod>(bytes: &[u8], at: usize) -> Result<T, LoadError> {
    let needed = at + size_of::<T>();
    match bytes.get(at..needed) {
        Some(window) => Ok(bytemuck::pod_read_unaligned(window)),
        None => Err(LoadError::Truncated {
            len: bytes.len(),
            needed,
        }),
    }
}

/// Validate the identification bytes and decode the file header.
pub fn parse_header(bytes: &[u8]) -> Result<FileHeader, LoadError> {
    if bytes.len() < 16 {
        return Err(LoadError::Truncated {
            len: bytes.len(),
            needed: 16,
        });
    }
    if bytes[..4] != MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(&bytes[..4]);
        return Err(LoadError::BadMagic { found });
    }
    let class = Class::from_ident(bytes[EI_CLASS])?;
    let order = ByteOrder::from_ident(bytes[EI_DATA])?;

    let header = match class {
        Class::Elf32 => {
            let h: Elf32Header = read_pod(bytes, 0)?;
            FileHeader {
                class,
                byte_order: order,
                machine: order.u16(h.e_machine),
                entry: order.u32(h.e_entry).into(),
                phoff: order.u32(h.e_phoff).into(),
                phentsize: order.u16(h.e_phentsize),
                phnum: order.u16(h.e_phnum),
            }
        }
        Class::Elf64 => {
            let h: Elf64Header = read_pod(bytes, 0)?;
            FileHeader {
                class,
                byte_order: order,
                machine: order.u16(h.e_machine),
                entry: order.u64(h.e_entry),
                phoff: order.u64(h.e_phoff),
                phentsize: order.u16(h.e_phentsize),
                phnum: order.u16(h.e_phnum),
            }
        }
    };

    if header.machine != EM_RISCV {
        return Err(LoadError::WrongMachine {
            found: header.machine,
            expected: EM_RISCV,
        });
    }
    Ok(header)
}

/// Decode every program-header entry after checking the table lies inside the file.
pub fn parse_program_headers(
    bytes: &[u8],
    header: &FileHeader,
) -> Result<Vec<ProgramHeader>, LoadError> {
    if header.phnum == 0 {
        return Ok(Vec::new());
    }
    let entry_size = usize::from(header.phentsize);
    if entry_size < header.class.program_header_size() {
        return Err(LoadError::BadProgramHeaderSize {
            size: header.phentsize,
            expected: header.class.program_header_size(),
        });
    }

    let table_len = u64::from(header.phnum) * entry_size as u64;
    let table_end = header.phoff.checked_add(table_len);
    if table_end.is_none_or(|end| end > bytes.len() as u64) {
        return Err(LoadError::HeaderTableOutOfBounds {
            offset: header.phoff,
            count: header.phnum,
            entry_size: header.phentsize,
            file_len: bytes.len(),
        });
    }

    let order = header.byte_order;
    (0..usize::from(header.phnum))
        .map(|i| {
            let at = header.phoff as usize + i * entry_size;
            Ok(match header.class {
                Class::Elf32 => {
                    let p: Elf32ProgramHeader = read_pod(bytes, at)?;
                    ProgramHeader {
                        p_type: order.u32(p.p_type),
                        flags: order.u32(p.p_flags),
                        offset: order.u32(p.p_offset).into(),
                        vaddr: order.u32(p.p_vaddr).into(),
                        filesz: order.u32(p.p_filesz).into(),
                        memsz: order.u32(p.p_memsz).into(),
                        align: order.u32(p.p_align).into(),
                    }
                }
                Class::Elf64 => {
                    let p: Elf64ProgramHeader = read_pod(bytes, at)?;
                    ProgramHeader {
                        p_type: order.u32(p.p_type),
                        flags: order.u32(p.p_flags),
                        offset: order.u64(p.p_offset),
                        vaddr: order.u64(p.p_vaddr),
                        filesz: order.u64(p.p_filesz),
                        memsz: order.u64(p.p_memsz),
                        align: order.u64(p.p_align),
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes_match_the_file_format() {
        assert_eq!(size_of::<Elf32Header>(), 52);
        assert_eq!(size_of::<Elf64Header>(), 64);
        assert_eq!(size_of::<Elf32ProgramHeader>(), 32);
        assert_eq!(size_of::<Elf64ProgramHeader>(), 56);
    }

    #[test]
    fn byte_order_conversion_is_an_involution() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            assert_eq!(order.u32(order.u32(0x1234_5678)), 0x1234_5678);
            assert_eq!(order.u16(order.u16(0xBEEF)), 0xBEEF);
        }
        let raw = u32::from_ne_bytes([0x12, 0x34, 0x56, 0x78]);
        assert_eq!(ByteOrder::Big.u32(raw), 0x1234_5678);
        assert_eq!(ByteOrder::Little.u32(raw), 0x7856_3412);
    }

    #[test]
    fn short_input_is_truncated() {
        assert!(matches!(
            parse_header(b"\x7FELF"),
            Err(LoadError::Truncated { len: 4, needed: 16 })
        ));
        let mut ident = [0u8; 20];
        ident[..4].copy_from_slice(&MAGIC);
        ident[EI_CLASS] = 1;
        ident[EI_DATA] = 1;
        assert!(matches!(
            parse_header(&ident),
            Err(LoadError::Truncated { needed: 52, .. })
        ));
    }
}
