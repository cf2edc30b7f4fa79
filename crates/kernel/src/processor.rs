use std::sync::atomic::{AtomicBool, Ordering};

use rvfleet_common::MachineConfig;
use rvfleet_isa::decode;
use rvfleet_memory::Width;
use sha2::{Digest, Sha256};

use crate::bus::Bus;
use crate::registers::RegisterFile;
use crate::trap::Trap;

/// Steps between checks of the cancellation flag.
const CANCEL_POLL_INTERVAL: u64 = 1024;

/// Result of retiring one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// The guest called `exit` with this code.
    Exited(i32),
    /// The guest executed EBREAK.
    Breakpoint,
}

/// How a run of one instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exited(i32),
    Breakpoint,
    Trapped(Trap),
    /// The step budget ran out first.
    StepLimit,
    /// The cancellation flag was raised.
    Cancelled,
}

impl RunOutcome {
    /// Whether the guest stopped on its own terms.
    pub fn is_clean(&self) -> bool {
        matches!(self, RunOutcome::Exited(0) | RunOutcome::Breakpoint)
    }
}

/// One virtual CPU: registers, program counter, bus, and instance index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processor {
    pub(crate) regs: RegisterFile,
    pub(crate) pc: u32,
    pub(crate) bus: Bus,
    pub(crate) index: u32,
    /// Current program break for `brk`.
    pub(crate) brk: u32,
    /// Bytes the guest wrote to stdout or stderr.
    pub(crate) console: Vec<u8>,
    retired: u64,
}

impl Processor {
    /// A zeroed instance: all regions cleared, registers and pc zero.
    pub fn new(config: &MachineConfig) -> Self {
        Self {
            regs: RegisterFile::default(),
            pc: 0,
            bus: Bus::new(config),
            index: 0,
            brk: config.memory.heap.base,
            console: Vec::new(),
            retired: 0,
        }
    }

    /// General-purpose registers.
    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Mutable access to the general-purpose registers.
    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    /// Address of the next instruction to fetch.
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Redirect the next fetch to `pc`.
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// Memory and host-mapped block.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Mutable access to memory and the host-mapped block.
    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Position of this instance in the fleet.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Stamp the fleet position; replication sets one per copy.
    pub fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    /// Bytes the guest wrote to stdout or stderr, capped at `CONSOLE_CAPACITY`.
    pub fn console(&self) -> &[u8] {
        &self.console
    }

    /// Instructions retired so far.
    pub fn retired(&self) -> u64 {
        self.retired
    }

    /// Fetch, decode and execute one instruction.
    pub fn step(&mut self) -> Result<StepOutcome, Trap> {
        let pc = self.pc;
        if pc % 4 != 0 {
            return Err(Trap::MisalignedFetch { pc });
        }
        let word = self
            .bus
            .load(pc, Width::Word)
            .map_err(|fault| Trap::Bus { pc, fault })?;
        let instruction = decode(word);
        tracing::trace!(
            index = self.index,
            pc = format_args!("{pc:#010x}"),
            %instruction,
            "step"
        );
        let outcome = self.execute(instruction, pc)?;
        self.retired += 1;
        Ok(outcome)
    }

    /// Run until the guest stops, traps, exhausts `max_steps`, or `cancel` is raised.
    pub fn run(&mut self, max_steps: u64, cancel: &AtomicBool) -> RunOutcome {
        let _span = tracing::debug_span!("run_instance", index = self.index).entered();
        for n in 0..max_steps {
            if n % CANCEL_POLL_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return RunOutcome::Cancelled;
            }
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Exited(code)) => return RunOutcome::Exited(code),
                Ok(StepOutcome::Breakpoint) => return RunOutcome::Breakpoint,
                Err(trap) => {
                    tracing::debug!(%trap, "instance trapped");
                    return RunOutcome::Trapped(trap);
                }
            }
        }
        RunOutcome::StepLimit
    }

    /// SHA-256 over registers, pc, every region, and the host-mapped block.
    ///
    /// The instance index is left out so replicas of one canonical instance
    /// share a digest.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(bytemuck::cast_slice::<u32, u8>(self.regs.as_array()));
        hasher.update(self.pc.to_le_bytes());
        for region in self.bus.memory().regions() {
            hasher.update(region.base().to_le_bytes());
            hasher.update(region.as_bytes());
        }
        hasher.update(self.bus.host_mapped().scratch());
        hasher.update(bytemuck::bytes_of(self.bus.host_mapped().fields()));
        hasher.update(self.brk.to_le_bytes());
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }
}
