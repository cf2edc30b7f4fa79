//! Machine layout and configuration shared by the host and every executor.
//!
//! # Invariants
//! - Flash, RAM, heap and the host-mapped window are pairwise disjoint.
//! - Host and executor read the same `MachineConfig`; nothing else carries
//!   region bases or sizes.

mod config;

pub use config::{
    ConfigError, FramebufferConfig, HarnessConfig, HostMappedLayout, MachineConfig, MemoryLayout,
    PixelFormat, RegionSpec,
};

pub fn crate_info() -> &'static str {
    "rvfleet-common v0.1.0"
}
