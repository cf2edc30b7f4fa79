//! Memory subsystem: flash, RAM and heap regions plus the host-mapped block.
//!
//! # Invariants
//! - An address belongs to at most one region; bounds are half-open.
//! - Multi-byte values are little-endian regardless of host byte order.
//! - An access whose window leaves its region faults; nothing is read or
//!   written partially.
//! - The host-mapped block is reached by field name from the host. Guests
//!   only see its scratch bytes, through the bus.

mod host_mapped;
mod memory;
mod region;

pub use host_mapped::{HostFields, HostMappedFault, HostMappedMemory};
pub use memory::Memory;
pub use region::{MemoryFault, Region, Width};

pub fn crate_info() -> &'static str {
    "rvfleet-memory v0.1.0"
}
