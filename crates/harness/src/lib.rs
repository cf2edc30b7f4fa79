//! Multi-instance execution harness.
//!
//! Loads a program image once, builds the canonical VM from it, replicates
//! that VM into N instances, runs them on an [`Executor`], and reads every
//! instance back, decoding its published framebuffer.
//!
//! # Invariants
//! - Replicas are byte-identical to the canonical VM except for their index.
//! - Instances share no mutable state; group size is a scheduling hint and
//!   never changes results.
//! - The host sees the instances again only after the single wait returns.
//! - One instance trapping does not fail the batch; backend failures do.

mod canonical;
pub mod demo;
mod executor;
mod framebuffer;
mod harness;

pub use canonical::{PlacementError, build_canonical, plan_placement, replicate};
pub use executor::{
    Executor, ExecutorError, InstanceRun, ParallelExecutor, PendingBatch, SerialExecutor,
};
pub use framebuffer::{ExtractError, RgbImage, decode_pixels, extract};
pub use harness::{Harness, HarnessError, InstanceReport, RunReport};

pub fn crate_info() -> &'static str {
    "rvfleet-harness v0.1.0"
}
