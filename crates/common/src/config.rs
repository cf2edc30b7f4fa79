use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors from loading or validating a machine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("region {name} is empty")]
    EmptyRegion { name: &'static str },
    #[error("region {name} at {base:#010x} with size {size:#x} wraps the 32-bit address space")]
    RegionWraps {
        name: &'static str,
        base: u32,
        size: u32,
    },
    #[error("regions {a} and {b} overlap")]
    Overlap { a: &'static str, b: &'static str },
    #[error("host-mapped field at offset {offset} does not fit in {scratch_size} scratch bytes")]
    FieldOutsideScratch { offset: u32, scratch_size: u32 },
    #[error("instance count must be non-zero")]
    ZeroInstances,
    #[error("group size must be non-zero")]
    ZeroGroupSize,
    #[error("framebuffer dimensions {width}x{height}x{channels} are empty")]
    EmptyFramebuffer {
        width: u32,
        height: u32,
        channels: u32,
    },
}

/// A fixed-base, fixed-size address window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub base: u32,
    pub size: u32,
}

impl RegionSpec {
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// One past the last address, widened so a region ending at 4 GiB is representable.
    pub fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.size)
    }

    /// Whether `[address, address + len)` lies entirely inside `[base, base + size)`.
    pub fn contains_range(&self, address: u32, len: u32) -> bool {
        let start = u64::from(address);
        start >= u64::from(self.base) && start + u64::from(len) <= self.end()
    }

    pub fn contains(&self, address: u32) -> bool {
        self.contains_range(address, 1)
    }

    pub fn overlaps(&self, other: &RegionSpec) -> bool {
        u64::from(self.base) < other.end() && u64::from(other.base) < self.end()
    }
}

/// Bases and sizes of the three byte-addressed regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryLayout {
    pub flash: RegionSpec,
    pub ram: RegionSpec,
    pub heap: RegionSpec,
}

impl MemoryLayout {
    /// Regions in placement order: flash, ram, heap.
    pub fn regions(&self) -> [(&'static str, RegionSpec); 3] {
        [("flash", self.flash), ("ram", self.ram), ("heap", self.heap)]
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            flash: RegionSpec::new(0x0400_0000, 1024 * 1024),
            ram: RegionSpec::new(0x8000_0000, 4 * 1024 * 1024),
            heap: RegionSpec::new(0x8040_0040, 2 * 1024 * 1024),
        }
    }
}

/// Layout of the host-mapped control block.
///
/// The block is a scratch byte buffer mapped at `base`. Writing the value 1
/// to the control word latches the bounds and pointer fields from their
/// offsets. Offsets are byte offsets and need not be aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostMappedLayout {
    pub base: u32,
    pub scratch_size: u32,
    pub control_offset: u32,
    pub bottom_stack_offset: u32,
    pub top_stack_offset: u32,
    pub start_heap_offset: u32,
    pub end_heap_offset: u32,
    pub framebuffer_offset: u32,
    pub frame_pool_offset: u32,
}

impl HostMappedLayout {
    pub fn window(&self) -> RegionSpec {
        RegionSpec::new(self.base, self.scratch_size)
    }

    /// Address of the top-of-stack field, used as the initial stack pointer.
    pub fn top_stack_address(&self) -> u32 {
        self.base.wrapping_add(self.top_stack_offset)
    }

    fn field_offsets(&self) -> [u32; 7] {
        [
            self.control_offset,
            self.bottom_stack_offset,
            self.top_stack_offset,
            self.start_heap_offset,
            self.end_heap_offset,
            self.framebuffer_offset,
            self.frame_pool_offset,
        ]
    }
}

impl Default for HostMappedLayout {
    fn default() -> Self {
        Self {
            base: 0x0800_0000,
            scratch_size: 128 * 1024,
            control_offset: 0,
            bottom_stack_offset: 5,
            top_stack_offset: 10,
            start_heap_offset: 15,
            end_heap_offset: 20,
            framebuffer_offset: 25,
            frame_pool_offset: 30,
        }
    }
}

/// How a heap window is interpreted as RGB pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// One byte per channel, copied as-is.
    Rgb8,
    /// One little-endian IEEE-754 `f32` per channel in `[0, 1]`, scaled by 255 and clamped.
    #[default]
    F32Le,
    /// Four bytes per channel read as a big-endian integer, converted to float and
    /// multiplied by 255, saturating to a byte. Byte-compatible with older tooling;
    /// a non-zero channel almost always saturates.
    LegacyBeU32,
}

impl PixelFormat {
    pub fn bytes_per_channel(self) -> u32 {
        match self {
            PixelFormat::Rgb8 => 1,
            PixelFormat::F32Le | PixelFormat::LegacyBeU32 => 4,
        }
    }
}

/// Raster window extracted from each instance's heap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramebufferConfig {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub format: PixelFormat,
    /// Output files are named `{file_prefix}_{index}.ppm`.
    pub file_prefix: String,
}

impl FramebufferConfig {
    /// Number of heap bytes the window spans.
    pub fn window_bytes(&self) -> u64 {
        u64::from(self.width)
            * u64::from(self.height)
            * u64::from(self.channels)
            * u64::from(self.format.bytes_per_channel())
    }
}

impl Default for FramebufferConfig {
    fn default() -> Self {
        Self {
            width: 120,
            height: 120,
            channels: 3,
            format: PixelFormat::default(),
            file_prefix: "rt0".to_string(),
        }
    }
}

/// Instance replication and scheduling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of replicated instances per run.
    pub instance_count: usize,
    /// Instances per scheduling group. A backend hint only.
    pub group_size: usize,
    /// Instructions an instance may retire before it is stopped.
    pub max_steps: u64,
    /// Upper bound on the completion wait, in milliseconds. `None` waits forever.
    pub wait_timeout_ms: Option<u64>,
}

impl HarnessConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            instance_count: 144,
            group_size: 256,
            max_steps: 50_000_000,
            wait_timeout_ms: None,
        }
    }
}

/// Everything the host and the executor must agree on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub memory: MemoryLayout,
    pub host_mapped: HostMappedLayout,
    /// Value placed in the stack pointer of the canonical instance.
    pub stack_pointer_seed: u32,
    pub harness: HarnessConfig,
    pub framebuffer: FramebufferConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        let host_mapped = HostMappedLayout::default();
        Self {
            memory: MemoryLayout::default(),
            host_mapped,
            stack_pointer_seed: host_mapped.top_stack_address(),
            harness: HarnessConfig::default(),
            framebuffer: FramebufferConfig::default(),
        }
    }
}

impl MachineConfig {
    /// Read a JSON config file. Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MachineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded machine config");
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check region geometry, host-mapped field placement and harness sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut windows: Vec<(&'static str, RegionSpec)> = self.memory.regions().to_vec();
        windows.push(("host_mapped", self.host_mapped.window()));

        for &(name, region) in &windows {
            if region.size == 0 {
                return Err(ConfigError::EmptyRegion { name });
            }
            if region.end() > 1 << 32 {
                return Err(ConfigError::RegionWraps {
                    name,
                    base: region.base,
                    size: region.size,
                });
            }
        }
        for (i, &(a, ra)) in windows.iter().enumerate() {
            for &(b, rb) in &windows[i + 1..] {
                if ra.overlaps(&rb) {
                    return Err(ConfigError::Overlap { a, b });
                }
            }
        }

        let scratch_size = self.host_mapped.scratch_size;
        for offset in self.host_mapped.field_offsets() {
            if u64::from(offset) + 4 > u64::from(scratch_size) {
                return Err(ConfigError::FieldOutsideScratch {
                    offset,
                    scratch_size,
                });
            }
        }

        if self.harness.instance_count == 0 {
            return Err(ConfigError::ZeroInstances);
        }
        if self.harness.group_size == 0 {
            return Err(ConfigError::ZeroGroupSize);
        }
        let fb = &self.framebuffer;
        if fb.window_bytes() == 0 {
            return Err(ConfigError::EmptyFramebuffer {
                width: fb.width,
                height: fb.height,
                channels: fb.channels,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_machine() {
        let config = MachineConfig::default();
        assert_eq!(config.memory.flash, RegionSpec::new(0x0400_0000, 0x10_0000));
        assert_eq!(config.memory.ram, RegionSpec::new(0x8000_0000, 0x40_0000));
        assert_eq!(config.memory.heap, RegionSpec::new(0x8040_0040, 0x20_0000));
        assert_eq!(config.stack_pointer_seed, 0x0800_000A);
        assert_eq!(config.harness.instance_count, 144);
        assert_eq!(config.harness.group_size, 256);
        assert_eq!(config.framebuffer.window_bytes(), 120 * 120 * 3 * 4);
        config.validate().unwrap();
    }

    #[test]
    fn region_bounds_are_half_open() {
        let r = RegionSpec::new(0x1000, 0x100);
        assert!(r.contains(0x1000));
        assert!(r.contains(0x10FF));
        assert!(!r.contains(0x1100));
        assert!(r.contains_range(0x10FC, 4));
        assert!(!r.contains_range(0x10FD, 4));
        assert!(!r.contains(0x0FFF));
    }

    #[test]
    fn overlapping_regions_rejected() {
        let mut config = MachineConfig::default();
        config.memory.heap = RegionSpec::new(0x803F_0000, 0x2_0000);
        match config.validate() {
            Err(ConfigError::Overlap { a, b }) => {
                assert_eq!(a, "ram");
                assert_eq!(b, "heap");
            }
            other => panic!("expected overlap, got {other:?}"),
        }
    }

    #[test]
    fn wrapping_region_rejected() {
        let mut config = MachineConfig::default();
        config.memory.heap = RegionSpec::new(0xFFFF_FF00, 0x200);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RegionWraps { name: "heap", .. })
        ));
    }

    #[test]
    fn zero_instances_rejected() {
        let mut config = MachineConfig::default();
        config.harness.instance_count = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroInstances)));
    }

    #[test]
    fn field_offsets_must_fit_scratch() {
        let mut config = MachineConfig::default();
        config.host_mapped.scratch_size = 16;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FieldOutsideScratch { offset: 15, .. })
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.json");
        std::fs::write(
            &path,
            r#"{ "harness": { "instance_count": 4 }, "framebuffer": { "format": "rgb8" } }"#,
        )
        .unwrap();

        let config = MachineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.harness.instance_count, 4);
        assert_eq!(config.harness.group_size, 256);
        assert_eq!(config.framebuffer.format, PixelFormat::Rgb8);
        assert_eq!(config.memory, MemoryLayout::default());
    }

    #[test]
    fn json_round_trip_preserves_config() {
        let mut config = MachineConfig::default();
        config.harness.wait_timeout_ms = Some(1500);
        let text = config.to_json_pretty().unwrap();
        let back: MachineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.harness.wait_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = MachineConfig::from_json_file("/nonexistent/machine.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/machine.json"));
    }
}
