use std::path::{Path, PathBuf};

use rvfleet_common::{ConfigError, MachineConfig};
use rvfleet_kernel::RunOutcome;
use rvfleet_loader::{Image, LoadError, LoadOptions};
use rvfleet_memory::HostFields;

use crate::canonical::{PlacementError, build_canonical, replicate};
use crate::executor::{Executor, ExecutorError, ParallelExecutor};
use crate::framebuffer::{ExtractError, RgbImage, extract};

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("invalid machine config: {0}")]
    Config(#[from] ConfigError),
    #[error("image load failed: {0}")]
    Load(#[from] LoadError),
    #[error("image placement failed: {0}")]
    Placement(#[from] PlacementError),
    #[error("executor `{executor}` failed: {source}")]
    Executor {
        executor: &'static str,
        #[source]
        source: ExecutorError,
    },
    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the host read back from one instance.
#[derive(Debug, Clone)]
pub struct InstanceReport {
    pub index: u32,
    pub outcome: RunOutcome,
    pub pc: u32,
    pub retired: u64,
    pub fields: HostFields,
    pub console: Vec<u8>,
    /// `None` when the instance never published a framebuffer.
    pub image: Option<Result<RgbImage, ExtractError>>,
}

/// Results of one harness run, in instance order.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Digest of the canonical VM before launch.
    pub canonical_digest: [u8; 32],
    pub instances: Vec<InstanceReport>,
}

impl RunReport {
    /// Instances that exited 0 or stopped on a breakpoint.
    pub fn clean_count(&self) -> usize {
        self.instances.iter().filter(|i| i.outcome.is_clean()).count()
    }

    /// Write every extracted framebuffer as `{prefix}_{index}.ppm` under `dir`.
    ///
    /// Instances without an image, or whose extraction failed, are skipped.
    pub fn write_images(&self, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, HarnessError> {
        let mut written = Vec::new();
        for instance in &self.instances {
            let Some(Ok(image)) = &instance.image else {
                continue;
            };
            let path = dir.join(format!("{prefix}_{}.ppm", instance.index));
            image
                .write_ppm(&path)
                .map_err(|source| HarnessError::Output {
                    path: path.clone(),
                    source,
                })?;
            written.push(path);
        }
        tracing::info!(count = written.len(), dir = %dir.display(), "framebuffers written");
        Ok(written)
    }
}

/// Loads an image once, replicates it, runs every replica, and reads back results.
pub struct Harness {
    config: MachineConfig,
    executor: Box<dyn Executor>,
    load_options: LoadOptions,
}

impl Harness {
    /// A harness on the parallel executor. Rejects an invalid config.
    pub fn new(config: MachineConfig) -> Result<Self, HarnessError> {
        Self::with_executor(config, Box::new(ParallelExecutor::default()))
    }

    pub fn with_executor(
        config: MachineConfig,
        executor: Box<dyn Executor>,
    ) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self {
            config,
            executor,
            load_options: LoadOptions::default(),
        })
    }

    pub fn with_load_options(mut self, options: LoadOptions) -> Self {
        self.load_options = options;
        self
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Load the image at `path` and run it on every instance.
    pub fn run(&self, path: impl AsRef<Path>) -> Result<RunReport, HarnessError> {
        let path = path.as_ref();
        let image = {
            let _span = tracing::info_span!("load", path = %path.display()).entered();
            Image::load_with(path, &self.load_options)?
        };
        self.run_image(image)
    }

    /// Run an already loaded image. The image is dropped once it is in VM memory.
    pub fn run_image(&self, image: Image) -> Result<RunReport, HarnessError> {
        let harness = &self.config.harness;
        let canonical = build_canonical(&self.config, image)?;
        let canonical_digest = canonical.digest();
        let instances = replicate(&canonical, harness.instance_count);
        drop(canonical);

        let executor = self.executor.name();
        let batch_error = |source| HarnessError::Executor { executor, source };
        let pending = {
            let _span = tracing::info_span!("launch", executor).entered();
            self.executor
                .launch(instances, harness)
                .map_err(batch_error)?
        };
        let runs = pending.wait(harness.wait_timeout()).map_err(batch_error)?;

        let _span = tracing::info_span!("readback", instances = runs.len()).entered();
        let instances = runs
            .into_iter()
            .map(|run| {
                let cpu = run.processor;
                let image = extract(&cpu, &self.config.framebuffer);
                tracing::debug!(
                    index = cpu.index(),
                    outcome = ?run.outcome,
                    retired = cpu.retired(),
                    framebuffer = image.is_some(),
                    "instance finished"
                );
                if let Some(Err(err)) = &image {
                    tracing::warn!(index = cpu.index(), %err, "framebuffer extraction failed");
                }
                InstanceReport {
                    index: cpu.index(),
                    outcome: run.outcome,
                    pc: cpu.pc(),
                    retired: cpu.retired(),
                    fields: *cpu.bus().host_mapped().fields(),
                    console: cpu.console().to_vec(),
                    image,
                }
            })
            .collect();

        Ok(RunReport {
            canonical_digest,
            instances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{gradient_image, gradient_pixels, test_config};
    use crate::executor::SerialExecutor;
    use rvfleet_isa::{InstructionTag as T, asm, reg};
    use rvfleet_kernel::Trap;
    use rvfleet_loader::{ImageBuilder, SegmentFlags};

    #[test]
    fn three_segment_image_end_to_end() {
        let config = test_config(4, 4, 2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest.elf");
        gradient_image(&config)
            .segment(
                u64::from(config.memory.ram.base),
                vec![0xAA; 8],
                64,
                SegmentFlags(SegmentFlags::R | SegmentFlags::W),
            )
            .segment(
                u64::from(config.memory.heap.base),
                vec![],
                16,
                SegmentFlags(SegmentFlags::R | SegmentFlags::W),
            )
            .write_to(&path)
            .unwrap();

        let harness = Harness::new(config.clone()).unwrap();
        let report = harness.run(&path).unwrap();
        assert_eq!(report.instances.len(), 4);
        assert_eq!(report.clean_count(), 4);
        for (i, instance) in report.instances.iter().enumerate() {
            assert_eq!(instance.index, i as u32);
            assert_eq!(instance.outcome, RunOutcome::Exited(0));
            assert_eq!(instance.console, b"ok\n");
            assert_eq!(instance.fields.start_heap, config.memory.heap.base);
            let image = instance.image.clone().unwrap().unwrap();
            assert_eq!(image.pixels, gradient_pixels(4, 2));
        }

        let out = tempfile::tempdir().unwrap();
        let written = report.write_images(out.path(), "rt0").unwrap();
        assert_eq!(written.len(), 4);
        let ppm = std::fs::read(out.path().join("rt0_3.ppm")).unwrap();
        assert!(ppm.starts_with(b"P6\n4 2\n255\n"));
    }

    #[test]
    fn unset_heap_field_writes_no_artifact() {
        let config = test_config(4, 4, 2);
        let flash = u64::from(config.memory.flash.base);
        let image = ImageBuilder::new(flash).code(flash, &[asm::ebreak()]).build();
        let image = Image::parse(image, &LoadOptions::default()).unwrap();

        let harness = Harness::with_executor(config, Box::new(SerialExecutor)).unwrap();
        let report = harness.run_image(image).unwrap();
        assert!(report.instances.iter().all(|i| i.image.is_none()));
        assert!(report.instances.iter().all(|i| i.outcome == RunOutcome::Breakpoint));

        let out = tempfile::tempdir().unwrap();
        assert!(report.write_images(out.path(), "rt0").unwrap().is_empty());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn trapped_instance_does_not_fail_the_batch() {
        let config = test_config(2, 2, 2);
        let flash = u64::from(config.memory.flash.base);
        let program = [asm::store(T::Sw, reg::ZERO, reg::ZERO, 0)];
        let image = ImageBuilder::new(flash).code(flash, &program).build();
        let image = Image::parse(image, &LoadOptions::default()).unwrap();

        let report = Harness::new(config).unwrap().run_image(image).unwrap();
        assert_eq!(report.clean_count(), 0);
        for instance in &report.instances {
            match instance.outcome {
                RunOutcome::Trapped(trap @ Trap::Bus { .. }) => assert_eq!(trap.pc(), flash as u32),
                other => panic!("expected bus trap, got {other:?}"),
            }
        }
    }

    #[test]
    fn misplaced_segment_fails_before_launch() {
        let config = test_config(2, 2, 2);
        let vaddr = u64::from(config.memory.ram.base) + 0x100;
        let image = ImageBuilder::new(vaddr).code(vaddr, &[asm::ebreak()]).build();
        let image = Image::parse(image, &LoadOptions::default()).unwrap();
        let err = Harness::new(config).unwrap().run_image(image).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Placement(PlacementError::NotAtRegionBase { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let harness = Harness::new(test_config(1, 1, 1)).unwrap();
        let err = harness.run("/nonexistent/guest.elf").unwrap_err();
        assert!(matches!(err, HarnessError::Load(LoadError::Io { .. })));
        assert!(err.to_string().contains("/nonexistent/guest.elf"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = test_config(1, 1, 1);
        config.harness.instance_count = 0;
        assert!(matches!(
            Harness::new(config),
            Err(HarnessError::Config(ConfigError::ZeroInstances))
        ));
    }

    #[test]
    fn timed_out_batch_is_an_executor_error() {
        let mut config = test_config(2, 1, 1);
        config.harness.max_steps = u64::MAX;
        config.harness.wait_timeout_ms = Some(20);
        let flash = u64::from(config.memory.flash.base);
        let image = ImageBuilder::new(flash).code(flash, &[asm::jal(reg::ZERO, 0)]).build();
        let image = Image::parse(image, &LoadOptions::default()).unwrap();
        let err = Harness::new(config).unwrap().run_image(image).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Executor {
                executor: "parallel",
                source: ExecutorError::TimedOut { .. }
            }
        ));
    }
}
