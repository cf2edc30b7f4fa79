use rvfleet_common::MemoryLayout;

use crate::region::{MemoryFault, Region, Width};

/// The three address-dispatched regions of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    flash: Region,
    ram: Region,
    heap: Region,
}

impl Memory {
    /// Allocate zeroed regions. The layout is expected to be validated.
    pub fn new(layout: &MemoryLayout) -> Self {
        Self {
            flash: Region::new("flash", layout.flash),
            ram: Region::new("ram", layout.ram),
            heap: Region::new("heap", layout.heap),
        }
    }

    /// Region the code segment is placed in.
    pub fn flash(&self) -> &Region {
        &self.flash
    }

    /// Region the data segment is placed in.
    pub fn ram(&self) -> &Region {
        &self.ram
    }

    /// Region the program break moves within.
    pub fn heap(&self) -> &Region {
        &self.heap
    }

    /// Regions in placement order: flash, ram, heap.
    pub fn regions(&self) -> [&Region; 3] {
        [&self.flash, &self.ram, &self.heap]
    }

    /// Mutable regions in placement order.
    pub fn regions_mut(&mut self) -> [&mut Region; 3] {
        [&mut self.flash, &mut self.ram, &mut self.heap]
    }

    /// Zero every region.
    pub fn clear(&mut self) {
        for region in self.regions_mut() {
            region.clear();
        }
    }

    fn region_for(&self, address: u32, len: u32) -> Option<&Region> {
        self.regions()
            .into_iter()
            .find(|r| r.contains_range(address, len))
    }

    fn region_for_mut(&mut self, address: u32, len: u32) -> Option<&mut Region> {
        self.regions_mut()
            .into_iter()
            .find(|r| r.contains_range(address, len))
    }

    /// Load from the region covering the whole access window.
    pub fn load(&self, address: u32, width: Width) -> Result<u32, MemoryFault> {
        self.region_for(address, width.bytes())
            .and_then(|r| r.read(address, width))
            .ok_or(MemoryFault::OutOfRange { address, width })
    }

    /// Store into the region covering the whole access window.
    pub fn store(&mut self, address: u32, width: Width, value: u32) -> Result<(), MemoryFault> {
        self.region_for_mut(address, width.bytes())
            .and_then(|r| r.write(address, width, value))
            .ok_or(MemoryFault::OutOfRange { address, width })
    }

    /// Borrow `len` bytes starting at `address`. The range must sit inside one region.
    pub fn read_bytes(&self, address: u32, len: u32) -> Result<&[u8], MemoryFault> {
        self.region_for(address, len)
            .and_then(|r| r.slice(address, len))
            .ok_or(MemoryFault::RangeOutOfBounds { address, len })
    }

    /// Copy `data` in at `address`. The range must sit inside one region.
    pub fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryFault> {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        self.region_for_mut(address, len)
            .and_then(|r| r.write_bytes(address, data))
            .ok_or(MemoryFault::RangeOutOfBounds { address, len })
    }
}
