//! Program image loader: parses ELF32/ELF64 RISC-V executables into owned segments.
//!
//! # Invariants
//! - Structural validation failures return a typed [`LoadError`]; no partial image
//!   is ever produced.
//! - Every segment buffer is exactly its in-memory size: file bytes first, zero
//!   fill after.
//! - Only `PT_LOAD` entries become segments. Section headers, symbols and
//!   relocations are ignored.

mod builder;
pub mod elf;
mod image;

pub use builder::ImageBuilder;
pub use elf::{ByteOrder, Class};
pub use image::{Image, LoadError, LoadOptions, Segment, SegmentFlags};

pub fn crate_info() -> &'static str {
    "rvfleet-loader v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("loader"));
    }
}
