use rvfleet_common::MachineConfig;
use rvfleet_isa::reg;
use rvfleet_kernel::Processor;
use rvfleet_loader::{Image, Segment};
use rvfleet_memory::MemoryFault;

/// A segment the canonical VM cannot hold.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("segment {index} at {vaddr:#x} does not start at a region base")]
    NotAtRegionBase { index: usize, vaddr: u64 },
    #[error("segment {index} targets {region} after a later region was already filled")]
    OutOfOrder { index: usize, region: &'static str },
    #[error("segment {index} needs {size} bytes but {region} holds {capacity}")]
    TooLarge {
        index: usize,
        region: &'static str,
        size: u64,
        capacity: u32,
    },
    #[error("entry point {entry:#x} is not a 32-bit address")]
    EntryOutOfRange { entry: u64 },
    #[error(transparent)]
    Memory(#[from] MemoryFault),
}

/// Which region each segment lands in, in order.
///
/// A segment must start exactly at a region base, regions are filled in
/// flash, ram, heap order, and each region takes at most one segment.
pub fn plan_placement(
    config: &MachineConfig,
    segments: &[Segment],
) -> Result<Vec<&'static str>, PlacementError> {
    let regions = config.memory.regions();
    let mut next_region = 0;
    let mut plan = Vec::with_capacity(segments.len());

    for (index, segment) in segments.iter().enumerate() {
        let Some(slot) = regions
            .iter()
            .position(|(_, spec)| u64::from(spec.base) == segment.vaddr)
        else {
            return Err(PlacementError::NotAtRegionBase {
                index,
                vaddr: segment.vaddr,
            });
        };
        let (region, spec) = regions[slot];
        if slot < next_region {
            return Err(PlacementError::OutOfOrder { index, region });
        }
        if segment.mem_size() > u64::from(spec.size) {
            return Err(PlacementError::TooLarge {
                index,
                region,
                size: segment.mem_size(),
                capacity: spec.size,
            });
        }
        next_region = slot + 1;
        plan.push(region);
    }
    Ok(plan)
}

/// Build instance 0 from a loaded image.
///
/// The image is consumed: segment buffers are dropped as soon as their bytes
/// are in VM memory.
pub fn build_canonical(config: &MachineConfig, image: Image) -> Result<Processor, PlacementError> {
    let _span = tracing::info_span!("build_canonical").entered();

    let entry = image.entry();
    let entry = u32::try_from(entry).map_err(|_| PlacementError::EntryOutOfRange { entry })?;
    let plan = plan_placement(config, image.segments())?;

    let mut cpu = Processor::new(config);
    cpu.bus_mut().clear();
    for (segment, region) in image.into_segments().into_iter().zip(plan) {
        let base = segment.vaddr as u32;
        cpu.bus_mut().memory_mut().write_bytes(base, &segment.data)?;
        tracing::debug!(
            region,
            base = format_args!("{base:#010x}"),
            bytes = segment.data.len(),
            "segment placed"
        );
    }
    cpu.set_pc(entry);
    cpu.registers_mut().set(reg::SP, config.stack_pointer_seed);
    cpu.set_index(0);
    Ok(cpu)
}

/// Copy the canonical VM into `count` instances, numbered from 0.
pub fn replicate(canonical: &Processor, count: usize) -> Vec<Processor> {
    let _span = tracing::info_span!("replicate", count).entered();
    (0..count)
        .map(|index| {
            let mut instance = canonical.clone();
            instance.set_index(index as u32);
            instance
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvfleet_isa::asm;
    use rvfleet_loader::{ImageBuilder, LoadOptions, SegmentFlags};

    fn small_config() -> MachineConfig {
        crate::demo::test_config(2, 4, 4)
    }

    fn image(builder: ImageBuilder) -> Image {
        Image::parse(builder.build(), &LoadOptions::default()).unwrap()
    }

    #[test]
    fn canonical_state_matches_image() {
        let config = small_config();
        let flash = config.memory.flash.base;
        let ram = config.memory.ram.base;
        let heap = config.memory.heap.base;
        let image = image(
            ImageBuilder::new(u64::from(flash) + 4)
                .code(u64::from(flash), &[asm::fence(), asm::ebreak()])
                .segment(u64::from(ram), vec![1, 2, 3], 8, SegmentFlags(SegmentFlags::R | SegmentFlags::W))
                .segment(u64::from(heap), vec![], 16, SegmentFlags(SegmentFlags::R | SegmentFlags::W)),
        );

        let cpu = build_canonical(&config, image).unwrap();
        assert_eq!(cpu.pc(), flash + 4);
        assert_eq!(cpu.registers().get(reg::SP), config.stack_pointer_seed);
        assert_eq!(cpu.index(), 0);
        assert_eq!(cpu.bus().memory().read_bytes(ram, 4).unwrap(), &[1, 2, 3, 0]);
        assert!(cpu.bus().memory().heap().as_bytes().iter().all(|&b| b == 0));
        assert!(cpu.bus().host_mapped().scratch().iter().all(|&b| b == 0));
    }

    #[test]
    fn replicas_differ_only_in_index() {
        let config = small_config();
        let flash = config.memory.flash.base;
        let canonical = build_canonical(
            &config,
            image(ImageBuilder::new(u64::from(flash)).code(u64::from(flash), &[asm::ebreak()])),
        )
        .unwrap();

        let replicas = replicate(&canonical, 4);
        assert_eq!(replicas.len(), 4);
        for (i, replica) in replicas.iter().enumerate() {
            assert_eq!(replica.index(), i as u32);
            assert_eq!(replica.digest(), canonical.digest());
            assert_eq!(replica.registers(), canonical.registers());
            assert_eq!(replica.pc(), canonical.pc());
        }
    }

    #[test]
    fn segment_off_region_base_is_rejected() {
        let config = small_config();
        let vaddr = u64::from(config.memory.flash.base) + 4;
        let err = build_canonical(&config, image(ImageBuilder::new(vaddr).code(vaddr, &[0]))).unwrap_err();
        assert_eq!(err, PlacementError::NotAtRegionBase { index: 0, vaddr });
    }

    #[test]
    fn segments_must_follow_region_order() {
        let config = small_config();
        let flash = u64::from(config.memory.flash.base);
        let ram = u64::from(config.memory.ram.base);
        let err = build_canonical(
            &config,
            image(ImageBuilder::new(flash).code(ram, &[0]).code(flash, &[0])),
        )
        .unwrap_err();
        assert_eq!(err, PlacementError::OutOfOrder { index: 1, region: "flash" });
    }

    #[test]
    fn oversized_segment_is_rejected() {
        let config = small_config();
        let ram = config.memory.ram.base;
        let size = u64::from(config.memory.ram.size) + 1;
        let builder = ImageBuilder::new(0).segment(u64::from(ram), vec![], size, SegmentFlags(SegmentFlags::R));
        let err = build_canonical(&config, image(builder)).unwrap_err();
        assert!(matches!(err, PlacementError::TooLarge { region: "ram", .. }));
    }

    #[test]
    fn wide_entry_point_is_rejected() {
        let config = small_config();
        let flash = u64::from(config.memory.flash.base);
        let builder = ImageBuilder::new(1 << 40)
            .class(rvfleet_loader::Class::Elf64)
            .code(flash, &[0]);
        let err = build_canonical(&config, image(builder)).unwrap_err();
        assert_eq!(err, PlacementError::EntryOutOfRange { entry: 1 << 40 });
    }
}
