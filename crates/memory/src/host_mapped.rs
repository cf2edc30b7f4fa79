use bytemuck::{Pod, Zeroable};
use rvfleet_common::HostMappedLayout;

use crate::region::Width;

/// Errors from guest access to the host-mapped scratch bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HostMappedFault {
    #[error("{width} access at host-mapped offset {offset:#x} exceeds {size} scratch bytes")]
    OutOfRange { offset: u32, width: Width, size: u32 },
}

/// Fields the host reads by name after a run.
///
/// Latched from the scratch bytes when the guest writes 1 to the control word.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HostFields {
    pub bottom_stack: u32,
    pub top_stack: u32,
    pub start_heap: u32,
    pub end_heap: u32,
    pub framebuffer: u32,
    pub frame_pool: u32,
}

/// The host-mapped control block of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMappedMemory {
    layout: HostMappedLayout,
    scratch: Vec<u8>,
    fields: HostFields,
}

impl HostMappedMemory {
    pub fn new(layout: HostMappedLayout) -> Self {
        Self {
            layout,
            scratch: vec![0; layout.scratch_size as usize],
            fields: HostFields::default(),
        }
    }

    pub fn layout(&self) -> &HostMappedLayout {
        &self.layout
    }

    pub fn fields(&self) -> &HostFields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut HostFields {
        &mut self.fields
    }

    pub fn start_heap(&self) -> u32 {
        self.fields.start_heap
    }

    pub fn scratch(&self) -> &[u8] {
        &self.scratch
    }

    /// Zero the scratch bytes and every latched field.
    pub fn clear(&mut self) {
        self.scratch.fill(0);
        self.fields = HostFields::default();
    }

    fn window(&self, offset: u32, width: Width) -> Result<std::ops::Range<usize>, HostMappedFault> {
        let end = u64::from(offset) + u64::from(width.bytes());
        if end > self.scratch.len() as u64 {
            return Err(HostMappedFault::OutOfRange {
                offset,
                width,
                size: self.layout.scratch_size,
            });
        }
        Ok(offset as usize..end as usize)
    }

    /// Little-endian load from the scratch bytes.
    pub fn load(&self, offset: u32, width: Width) -> Result<u32, HostMappedFault> {
        let range = self.window(offset, width)?;
        Ok(self.scratch[range]
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }

    /// Little-endian store into the scratch bytes.
    ///
    /// A store to the control word that leaves it equal to 1 latches the
    /// bounds and pointer fields from their scratch offsets.
    pub fn store(&mut self, offset: u32, width: Width, value: u32) -> Result<(), HostMappedFault> {
        let range = self.window(offset, width)?;
        for (i, b) in self.scratch[range].iter_mut().enumerate() {
            *b = (value >> (8 * i)) as u8;
        }
        if offset == self.layout.control_offset
            && self.load(self.layout.control_offset, Width::Word)? == 1
        {
            self.latch()?;
        }
        Ok(())
    }

    fn latch(&mut self) -> Result<(), HostMappedFault> {
        let l = self.layout;
        self.fields = HostFields {
            bottom_stack: self.load(l.bottom_stack_offset, Width::Word)?,
            top_stack: self.load(l.top_stack_offset, Width::Word)?,
            start_heap: self.load(l.start_heap_offset, Width::Word)?,
            end_heap: self.load(l.end_heap_offset, Width::Word)?,
            framebuffer: self.load(l.framebuffer_offset, Width::Word)?,
            frame_pool: self.load(l.frame_pool_offset, Width::Word)?,
        };
        tracing::trace!(fields = ?self.fields, "host-mapped fields latched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_on_control_write() {
        let mut hmm = HostMappedMemory::new(HostMappedLayout::default());
        hmm.store(15, Width::Word, 0x8040_0040).unwrap();
        hmm.store(20, Width::Word, 0x8060_0040).unwrap();
        assert_eq!(hmm.start_heap(), 0, "fields only change on latch");

        hmm.store(0, Width::Word, 1).unwrap();
        assert_eq!(hmm.fields().start_heap, 0x8040_0040);
        assert_eq!(hmm.fields().end_heap, 0x8060_0040);
        assert_eq!(hmm.fields().bottom_stack, 0);
    }

    #[test]
    fn control_value_other_than_one_does_not_latch() {
        let mut hmm = HostMappedMemory::new(HostMappedLayout::default());
        hmm.store(15, Width::Word, 0x1234).unwrap();
        hmm.store(0, Width::Word, 2).unwrap();
        assert_eq!(hmm.start_heap(), 0);
        // A byte store counts when it leaves the full word equal to 1.
        hmm.store(0, Width::Byte, 1).unwrap();
        assert_eq!(hmm.start_heap(), 0x1234);
    }

    #[test]
    fn unaligned_fields_round_trip() {
        let mut hmm = HostMappedMemory::new(HostMappedLayout::default());
        hmm.store(5, Width::Word, 0xCAFE_F00D).unwrap();
        assert_eq!(hmm.load(5, Width::Word), Ok(0xCAFE_F00D));
        assert_eq!(hmm.load(6, Width::Half), Ok(0xFEF0));
    }

    #[test]
    fn access_past_scratch_faults() {
        let layout = HostMappedLayout::default();
        let mut hmm = HostMappedMemory::new(layout);
        let last = layout.scratch_size - 4;
        assert!(hmm.store(last, Width::Word, 1).is_ok());
        assert_eq!(
            hmm.load(last + 1, Width::Word),
            Err(HostMappedFault::OutOfRange {
                offset: last + 1,
                width: Width::Word,
                size: layout.scratch_size
            })
        );
    }

    #[test]
    fn clear_resets_fields() {
        let mut hmm = HostMappedMemory::new(HostMappedLayout::default());
        hmm.fields_mut().start_heap = 9;
        hmm.store(100, Width::Byte, 3).unwrap();
        hmm.clear();
        assert_eq!(*hmm.fields(), HostFields::default());
        assert!(hmm.scratch().iter().all(|&b| b == 0));
    }
}
