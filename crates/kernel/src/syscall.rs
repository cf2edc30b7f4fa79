//! Guest system calls issued through ECALL.
//!
//! The call number is taken from `a7` and arguments from `a0..a2`; the result
//! is written back to `a0`. Numbers follow the RISC-V Linux ABI.

use crate::bus::BusFault;
use crate::processor::{Processor, StepOutcome};
use crate::trap::Trap;
use rvfleet_isa::reg;

pub const CLOSE: u32 = 57;
pub const WRITE: u32 = 64;
pub const FSTAT: u32 = 80;
pub const EXIT: u32 = 93;
pub const EXIT_GROUP: u32 = 94;
pub const BRK: u32 = 214;

const STDOUT: u32 = 1;
const STDERR: u32 = 2;
const EBADF: i32 = 9;

/// Upper bound on captured console output per instance.
pub const CONSOLE_CAPACITY: usize = 64 * 1024;

impl Processor {
    pub(crate) fn ecall(&mut self, pc: u32) -> Result<StepOutcome, Trap> {
        let number = self.regs.get(reg::A7);
        let a0 = self.regs.get(reg::A0);
        let a1 = self.regs.get(reg::A1);
        let a2 = self.regs.get(reg::A2);
        tracing::trace!(index = self.index, number, a0, a1, a2, "ecall");

        let result = match number {
            EXIT | EXIT_GROUP => return Ok(StepOutcome::Exited(a0 as i32)),
            WRITE => self.write(pc, a0, a1, a2)?,
            BRK => self.set_break(a0),
            CLOSE | FSTAT => 0,
            _ => return Err(Trap::UnhandledSyscall { pc, number }),
        };
        self.regs.set(reg::A0, result);
        Ok(StepOutcome::Continue)
    }

    fn write(&mut self, pc: u32, fd: u32, address: u32, len: u32) -> Result<u32, Trap> {
        if fd != STDOUT && fd != STDERR {
            return Ok((-EBADF) as u32);
        }
        if len == 0 {
            return Ok(0);
        }
        let bytes = self
            .bus
            .memory()
            .read_bytes(address, len)
            .map_err(|fault| Trap::Bus {
                pc,
                fault: BusFault::from(fault),
            })?;
        let room = CONSOLE_CAPACITY.saturating_sub(self.console.len());
        let kept = bytes.len().min(room);
        self.console.extend_from_slice(&bytes[..kept]);
        Ok(len)
    }

    /// `brk(0)` queries; any address inside the heap region moves the break.
    /// Requests outside the heap leave it unchanged.
    fn set_break(&mut self, requested: u32) -> u32 {
        let heap = self.bus.memory().heap().spec();
        if u64::from(requested) >= u64::from(heap.base) && u64::from(requested) <= heap.end() {
            self.brk = requested;
        }
        self.brk
    }
}
