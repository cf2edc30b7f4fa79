use rvfleet_isa::reg;

/// General-purpose registers. Writes to `x0` are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFile {
    x: [u32; reg::COUNT],
}

impl RegisterFile {
    pub fn get(&self, index: u8) -> u32 {
        self.x[usize::from(index & 0x1F)]
    }

    pub fn set(&mut self, index: u8, value: u32) {
        let index = usize::from(index & 0x1F);
        if index != 0 {
            self.x[index] = value;
        }
    }

    pub fn as_array(&self) -> &[u32; reg::COUNT] {
        &self.x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_register_ignores_writes() {
        let mut regs = RegisterFile::default();
        regs.set(reg::ZERO, 42);
        assert_eq!(regs.get(reg::ZERO), 0);
        regs.set(reg::A0, 42);
        assert_eq!(regs.get(reg::A0), 42);
        assert_eq!(regs.as_array()[10], 42);
    }
}
