//! Virtual CPU kernel: one RV32IM instance and its fetch-decode-execute loop.
//!
//! # Invariants
//! - `x0` reads as zero at every instruction boundary.
//! - Instances share nothing; a `Processor` owns all of its memory.
//! - Every fault ends the run with a typed [`Trap`] carrying the pc; the
//!   processor never panics on guest input.

mod bus;
mod execute;
mod processor;
mod registers;
pub mod syscall;
mod trap;

pub use bus::{Bus, BusFault};
pub use processor::{Processor, RunOutcome, StepOutcome};
pub use registers::RegisterFile;
pub use trap::Trap;

pub fn crate_info() -> &'static str {
    "rvfleet-kernel v0.1.0"
}
