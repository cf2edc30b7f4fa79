use std::fmt;

use rvfleet_common::RegionSpec;

/// Access width of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    /// Access width in bits.
    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }

    /// Access width in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }

    fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Half => 0xFFFF,
            Width::Word => 0xFFFF_FFFF,
        }
    }
}

impl TryFrom<u32> for Width {
    type Error = MemoryFault;

    /// Width from a bit count: 8, 16 or 32.
    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(Width::Byte),
            16 => Ok(Width::Half),
            32 => Ok(Width::Word),
            _ => Err(MemoryFault::InvalidWidth { bits }),
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// A load or store that could not be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryFault {
    #[error("{width} access at {address:#010x} is outside every mapped region")]
    OutOfRange { address: u32, width: Width },
    #[error("{len}-byte range at {address:#010x} is outside every mapped region")]
    RangeOutOfBounds { address: u32, len: u32 },
    #[error("unsupported access width of {bits} bits")]
    InvalidWidth { bits: u32 },
}

/// One fixed-base byte region, zero-initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    name: &'static str,
    spec: RegionSpec,
    bytes: Vec<u8>,
}

impl Region {
    /// A zero-filled region covering `spec`.
    pub fn new(name: &'static str, spec: RegionSpec) -> Self {
        Self {
            name,
            spec,
            bytes: vec![0; spec.size as usize],
        }
    }

    /// Short name used in logs and faults.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// First guest address of the region.
    pub fn base(&self) -> u32 {
        self.spec.base
    }

    /// Length in bytes.
    pub fn size(&self) -> u32 {
        self.spec.size
    }

    /// Base and size as configured.
    pub fn spec(&self) -> RegionSpec {
        self.spec
    }

    /// Whether `[address, address + len)` lies wholly inside the region.
    pub fn contains_range(&self, address: u32, len: u32) -> bool {
        self.spec.contains_range(address, len)
    }

    /// The backing bytes, offset 0 at `base`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Zero every byte.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Byte offset of `address` if `[address, address + len)` lies inside.
    fn offset(&self, address: u32, len: u32) -> Option<usize> {
        self.contains_range(address, len)
            .then(|| (address - self.spec.base) as usize)
    }

    /// Little-endian load. `None` if the window leaves the region.
    pub fn read(&self, address: u32, width: Width) -> Option<u32> {
        let start = self.offset(address, width.bytes())?;
        let window = &self.bytes[start..start + width.bytes() as usize];
        Some(
            window
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)),
        )
    }

    /// Little-endian store of the low `width` bits of `value`.
    pub fn write(&mut self, address: u32, width: Width, value: u32) -> Option<()> {
        let start = self.offset(address, width.bytes())?;
        let value = value & width.mask();
        let window = &mut self.bytes[start..start + width.bytes() as usize];
        for (i, b) in window.iter_mut().enumerate() {
            *b = (value >> (8 * i)) as u8;
        }
        Some(())
    }

    /// Borrow `len` bytes at `address`. `None` if the range leaves the region.
    pub fn slice(&self, address: u32, len: u32) -> Option<&[u8]> {
        let start = self.offset(address, len)?;
        Some(&self.bytes[start..start + len as usize])
    }

    /// Copy `data` in at `address`. `None` if it would leave the region.
    pub fn write_bytes(&mut self, address: u32, data: &[u8]) -> Option<()> {
        let len = u32::try_from(data.len()).ok()?;
        let start = self.offset(address, len)?;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::new("ram", RegionSpec::new(0x8000_0000, 64))
    }

    #[test]
    fn width_from_bits() {
        assert_eq!(Width::try_from(8), Ok(Width::Byte));
        assert_eq!(Width::try_from(16), Ok(Width::Half));
        assert_eq!(Width::try_from(32), Ok(Width::Word));
        assert_eq!(
            Width::try_from(64),
            Err(MemoryFault::InvalidWidth { bits: 64 })
        );
    }

    #[test]
    fn little_endian_layout() {
        let mut r = region();
        r.write(0x8000_0000, Width::Word, 0x1234_5678).unwrap();
        assert_eq!(&r.as_bytes()[..4], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(r.read(0x8000_0000, Width::Half), Some(0x5678));
        assert_eq!(r.read(0x8000_0002, Width::Byte), Some(0x34));
    }

    #[test]
    fn store_truncates_to_width() {
        let mut r = region();
        r.write(0x8000_0010, Width::Word, 0xFFFF_FFFF).unwrap();
        r.write(0x8000_0010, Width::Byte, 0xABCD).unwrap();
        assert_eq!(r.read(0x8000_0010, Width::Word), Some(0xFFFF_FFCD));
    }

    #[test]
    fn window_must_fit() {
        let mut r = region();
        assert_eq!(r.read(0x8000_003C, Width::Word), Some(0));
        assert_eq!(r.read(0x8000_003D, Width::Word), None);
        assert_eq!(r.read(0x8000_0040, Width::Byte), None);
        assert_eq!(r.write(0x8000_003F, Width::Half, 1), None);
        assert_eq!(r.read(0x7FFF_FFFF, Width::Byte), None);
    }

    #[test]
    fn bulk_copy_bounds() {
        let mut r = region();
        r.write_bytes(0x8000_0030, &[1; 16]).unwrap();
        assert_eq!(r.slice(0x8000_0038, 8), Some(&[1u8; 8][..]));
        assert_eq!(r.write_bytes(0x8000_0031, &[1; 16]), None);
        r.clear();
        assert!(r.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn describes_its_placement() {
        let r = region();
        assert_eq!(r.name(), "ram");
        assert_eq!(r.base(), 0x8000_0000);
        assert_eq!(r.size(), 64);
        assert_eq!(r.spec(), RegionSpec::new(0x8000_0000, 64));
        assert_eq!(r.as_bytes().len(), 64);
        assert!(r.contains_range(0x8000_0000, 64));
        assert!(!r.contains_range(0x8000_0001, 64));
    }
}
