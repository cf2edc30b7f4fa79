use crate::bus::BusFault;

/// Why an instance stopped abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("bus fault at pc {pc:#010x}: {fault}")]
    Bus { pc: u32, fault: BusFault },
    #[error("undefined instruction {word:#010x} at pc {pc:#010x}")]
    UndefinedInstruction { pc: u32, word: u32 },
    #[error("misaligned instruction fetch at {pc:#010x}")]
    MisalignedFetch { pc: u32 },
    #[error("unhandled syscall {number} at pc {pc:#010x}")]
    UnhandledSyscall { pc: u32, number: u32 },
}

impl Trap {
    pub fn pc(&self) -> u32 {
        match *self {
            Trap::Bus { pc, .. }
            | Trap::UndefinedInstruction { pc, .. }
            | Trap::MisalignedFetch { pc }
            | Trap::UnhandledSyscall { pc, .. } => pc,
        }
    }
}
