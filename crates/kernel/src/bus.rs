use rvfleet_common::MachineConfig;
use rvfleet_memory::{HostMappedFault, HostMappedMemory, Memory, MemoryFault, Width};

/// A guest access the bus could not route or complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusFault {
    #[error(transparent)]
    Memory(#[from] MemoryFault),
    #[error(transparent)]
    HostMapped(#[from] HostMappedFault),
}

/// Routes guest addresses to the three regions or the host-mapped window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    memory: Memory,
    host_mapped: HostMappedMemory,
}

impl Bus {
    /// Zeroed regions and host-mapped block sized from `config`.
    pub fn new(config: &MachineConfig) -> Self {
        Self {
            memory: Memory::new(&config.memory),
            host_mapped: HostMappedMemory::new(config.host_mapped),
        }
    }

    /// The address-dispatched regions.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Mutable access to the address-dispatched regions.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// The host exchange block.
    pub fn host_mapped(&self) -> &HostMappedMemory {
        &self.host_mapped
    }

    /// Mutable access to the host exchange block.
    pub fn host_mapped_mut(&mut self) -> &mut HostMappedMemory {
        &mut self.host_mapped
    }

    /// Zero all regions and the host-mapped block.
    pub fn clear(&mut self) {
        self.memory.clear();
        self.host_mapped.clear();
    }

    fn host_offset(&self, address: u32) -> Option<u32> {
        let window = self.host_mapped.layout().window();
        window.contains(address).then(|| address - window.base)
    }

    /// Load `width` bytes at `address` from the host-mapped window or the region covering it.
    pub fn load(&self, address: u32, width: Width) -> Result<u32, BusFault> {
        match self.host_offset(address) {
            Some(offset) => Ok(self.host_mapped.load(offset, width)?),
            None => Ok(self.memory.load(address, width)?),
        }
    }

    /// Store the low `width` bits of `value` at `address`.
    pub fn store(&mut self, address: u32, width: Width, value: u32) -> Result<(), BusFault> {
        match self.host_offset(address) {
            Some(offset) => Ok(self.host_mapped.store(offset, width, value)?),
            None => Ok(self.memory.store(address, width, value)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_host_window_and_regions() {
        let config = MachineConfig::default();
        let mut bus = Bus::new(&config);
        let hm = config.host_mapped;

        bus.store(hm.base + hm.start_heap_offset, Width::Word, 0x8040_0040)
            .unwrap();
        bus.store(hm.base + hm.control_offset, Width::Word, 1).unwrap();
        assert_eq!(bus.host_mapped().start_heap(), 0x8040_0040);

        bus.store(config.memory.ram.base, Width::Half, 0xBEEF).unwrap();
        assert_eq!(bus.load(config.memory.ram.base, Width::Half), Ok(0xBEEF));
        assert_eq!(bus.memory().ram().as_bytes()[..2], [0xEF, 0xBE]);
    }

    #[test]
    fn unmapped_address_is_memory_fault() {
        let bus = Bus::new(&MachineConfig::default());
        assert_eq!(
            bus.load(0x1000_0000, Width::Word),
            Err(BusFault::Memory(MemoryFault::OutOfRange {
                address: 0x1000_0000,
                width: Width::Word
            }))
        );
    }

    #[test]
    fn access_past_host_window_end_faults() {
        let config = MachineConfig::default();
        let bus = Bus::new(&config);
        let last = config.host_mapped.base + config.host_mapped.scratch_size - 2;
        assert!(matches!(
            bus.load(last, Width::Word),
            Err(BusFault::HostMapped(_))
        ));
    }
}
