//! RV32IM instruction encoding model and decoder.
//!
//! # Invariants
//! - `classify` and `decode` are total: every 32-bit word maps to exactly one
//!   tag, and unrecognized words map to `Undefined` carrying the raw word.
//! - `decode(w).tag() == classify(w)` for every word.
//! - Decoded immediates are sign-extended to the full `i32` range of their
//!   format; B and J immediates are always even.

pub mod asm;
mod decode;
mod encoding;
mod instruction;
pub mod reg;

pub use decode::{classify, decode};
pub use encoding::{
    BType, ENCODINGS, Encoding, Format, FormatKind, IType, JType, RType, SType, UType, opcode,
};
pub use instruction::{Instruction, InstructionTag};

pub fn crate_info() -> &'static str {
    "rvfleet-isa v0.1.0"
}
