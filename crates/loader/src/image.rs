use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::elf::{self, ByteOrder, Class, PT_LOAD};

/// Errors from reading or validating a program image.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read image {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("image is {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("bad magic {found:02x?}, not an ELF image")]
    BadMagic { found: [u8; 4] },
    #[error("unsupported ELF class {0}")]
    UnsupportedClass(u8),
    #[error("unsupported ELF data encoding {0}")]
    UnsupportedEncoding(u8),
    #[error("machine type {found} is not RISC-V ({expected})")]
    WrongMachine { found: u16, expected: u16 },
    #[error("program header entry size {size} is smaller than {expected}")]
    BadProgramHeaderSize { size: u16, expected: usize },
    #[error(
        "program header table ({count} x {entry_size} bytes at {offset:#x}) runs past end of {file_len}-byte file"
    )]
    HeaderTableOutOfBounds {
        offset: u64,
        count: u16,
        entry_size: u16,
        file_len: usize,
    },
    #[error("segment {index}: {size} bytes at file offset {offset:#x} run past end of {file_len}-byte file")]
    SegmentOutOfBounds {
        index: usize,
        offset: u64,
        size: u64,
        file_len: usize,
    },
    #[error("segment {index}: file size {file_size:#x} exceeds memory size {mem_size:#x}")]
    FileSizeExceedsMemSize {
        index: usize,
        file_size: u64,
        mem_size: u64,
    },
    #[error("segment {index}: {size:#x} bytes at {vaddr:#x} wrap past the end of the address space")]
    SegmentAddressOverflow { index: usize, vaddr: u64, size: u64 },
    #[error("segment {index}: memory size {size:#x} exceeds limit {max:#x}")]
    SegmentTooLarge { index: usize, size: u64, max: u64 },
    #[error("image has {count} loadable segments, limit is {max}")]
    TooManySegments { count: usize, max: usize },
    #[error("segments at {first:#x} and {second:#x} overlap")]
    OverlappingSegments { first: u64, second: u64 },
    #[error("cannot allocate {size} bytes for segment {index}")]
    Allocation { index: usize, size: u64 },
}

/// Limits applied while loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub max_segments: usize,
    pub max_segment_bytes: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_segments: 16,
            max_segment_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Permission bits of a loadable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SegmentFlags(pub u32);

impl SegmentFlags {
    pub const X: u32 = 1;
    pub const W: u32 = 2;
    pub const R: u32 = 4;

    pub fn readable(self) -> bool {
        self.0 & Self::R != 0
    }

    pub fn writable(self) -> bool {
        self.0 & Self::W != 0
    }

    pub fn executable(self) -> bool {
        self.0 & Self::X != 0
    }
}

impl fmt::Display for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.readable() { 'R' } else { '-' };
        let w = if self.writable() { 'W' } else { '-' };
        let x = if self.executable() { 'X' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

/// A loadable segment with its bytes in an owned, zero-filled buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub vaddr: u64,
    pub file_size: u64,
    pub flags: SegmentFlags,
    pub data: Vec<u8>,
}

impl Segment {
    /// In-memory size, including zero fill.
    pub fn mem_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// One past the last byte. Parsed segments never wrap; a hand-built one saturates.
    pub fn end(&self) -> u64 {
        self.vaddr.saturating_add(self.mem_size())
    }

    pub fn contains_range(&self, address: u64, len: u64) -> bool {
        address >= self.vaddr && address.saturating_add(len) <= self.end()
    }
}

/// A parsed program image: header facts plus its loadable segments.
#[derive(Debug, Clone)]
pub struct Image {
    bytes: Vec<u8>,
    class: Class,
    byte_order: ByteOrder,
    entry: u64,
    segments: Vec<Segment>,
}

impl Image {
    /// Read and parse an image file with default limits.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::load_with(path, &LoadOptions::default())
    }

    pub fn load_with(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let _span = tracing::info_span!("load_image", path = %path.display()).entered();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let image = Self::parse(bytes, options)?;
        image.log_summary();
        Ok(image)
    }

    /// Parse an in-memory image. Takes ownership of the bytes.
    pub fn parse(bytes: Vec<u8>, options: &LoadOptions) -> Result<Self, LoadError> {
        let header = elf::parse_header(&bytes)?;
        let program_headers = elf::parse_program_headers(&bytes, &header)?;

        let loadable: Vec<_> = program_headers
            .iter()
            .filter(|p| p.p_type == PT_LOAD)
            .collect();
        if loadable.len() > options.max_segments {
            return Err(LoadError::TooManySegments {
                count: loadable.len(),
                max: options.max_segments,
            });
        }

        let mut segments = Vec::with_capacity(loadable.len());
        for (index, p) in loadable.into_iter().enumerate() {
            if p.filesz > p.memsz {
                return Err(LoadError::FileSizeExceedsMemSize {
                    index,
                    file_size: p.filesz,
                    mem_size: p.memsz,
                });
            }
            if p.vaddr.checked_add(p.memsz).is_none() {
                return Err(LoadError::SegmentAddressOverflow {
                    index,
                    vaddr: p.vaddr,
                    size: p.memsz,
                });
            }
            if p.memsz > options.max_segment_bytes {
                return Err(LoadError::SegmentTooLarge {
                    index,
                    size: p.memsz,
                    max: options.max_segment_bytes,
                });
            }
            let file_range = p
                .offset
                .checked_add(p.filesz)
                .filter(|&end| end <= bytes.len() as u64)
                .map(|end| p.offset as usize..end as usize);
            let Some(file_range) = file_range else {
                return Err(LoadError::SegmentOutOfBounds {
                    index,
                    offset: p.offset,
                    size: p.filesz,
                    file_len: bytes.len(),
                });
            };

            let mut data = Vec::new();
            data.try_reserve_exact(p.memsz as usize)
                .map_err(|_| LoadError::Allocation {
                    index,
                    size: p.memsz,
                })?;
            data.resize(p.memsz as usize, 0);
            data[..file_range.len()].copy_from_slice(&bytes[file_range]);

            segments.push(Segment {
                vaddr: p.vaddr,
                file_size: p.filesz,
                flags: SegmentFlags(p.flags),
                data,
            });
        }

        for (i, a) in segments.iter().enumerate() {
            for b in &segments[i + 1..] {
                if a.mem_size() > 0 && b.mem_size() > 0 && a.vaddr < b.end() && b.vaddr < a.end()
                {
                    return Err(LoadError::OverlappingSegments {
                        first: a.vaddr,
                        second: b.vaddr,
                    });
                }
            }
        }

        Ok(Self {
            bytes,
            class: header.class,
            byte_order: header.byte_order,
            entry: header.entry,
            segments,
        })
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn file_len(&self) -> usize {
        self.bytes.len()
    }

    /// Release the file bytes and hand over the segments.
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// Bytes `[address, address + len)` from the first segment containing the whole range.
    pub fn read_memory(&self, address: u64, len: u64) -> Option<&[u8]> {
        self.segments
            .iter()
            .find(|s| s.contains_range(address, len))
            .map(|s| {
                let start = (address - s.vaddr) as usize;
                &s.data[start..start + len as usize]
            })
    }

    /// Human-readable summary: class, encoding, entry, and the segment table.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "class:    {}", self.class);
        let _ = writeln!(out, "encoding: {}", self.byte_order);
        let _ = writeln!(out, "entry:    {:#010x}", self.entry);
        let _ = writeln!(out, "segments: {}", self.segments.len());
        for (i, s) in self.segments.iter().enumerate() {
            let _ = writeln!(
                out,
                "  [{i}] vaddr={:#010x} filesz={:#x} memsz={:#x} flags={}",
                s.vaddr,
                s.file_size,
                s.mem_size(),
                s.flags
            );
        }
        if let Some(head) = self.read_memory(self.entry, 16) {
            let _ = writeln!(out, "entry bytes: {head:02x?}");
        }
        out
    }

    fn log_summary(&self) {
        tracing::info!(
            class = %self.class,
            encoding = %self.byte_order,
            entry = format_args!("{:#010x}", self.entry),
            segments = self.segments.len(),
            "image loaded"
        );
        for (i, s) in self.segments.iter().enumerate() {
            tracing::debug!(
                index = i,
                vaddr = format_args!("{:#010x}", s.vaddr),
                file_size = s.file_size,
                mem_size = s.mem_size(),
                flags = %s.flags,
                "segment"
            );
        }
    }
}
