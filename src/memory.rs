use std::{error::Error, fmt};

use goblin::elf::program_header::{PF_R, PF_W, PF_X};

/// Access width of a guest load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl Width {
    pub fn bytes(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone)]
pub struct MemorySegment {
    pub vaddr: u32,
    pub data: Vec<u8>,
    pub flags: u32,
}

impl MemorySegment {
    /// Readable, writable and executable zero-filled segment.
    pub fn ram(vaddr: u32, size: usize) -> Self {
        Self {
            vaddr,
            data: vec![0u8; size],
            flags: PF_R | PF_W | PF_X,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    fn end(&self) -> u64 {
        self.vaddr as u64 + self.data.len() as u64
    }
}

/// Guest physical memory: a sorted list of non-overlapping segments.
/// All multi-byte accesses are little-endian.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    segments: Vec<MemorySegment>,
}

impl MemoryImage {
    pub fn new(segments: Vec<MemorySegment>) -> Self {
        let mut segments = segments;
        segments.sort_by_key(|s| s.vaddr);
        Self { segments }
    }

    pub fn segments(&self) -> &[MemorySegment] {
        &self.segments
    }

    pub fn read(&self, addr: u32, width: Width) -> Result<u32, MemoryError> {
        let bytes = self.read_range(addr, width.bytes(), PF_R, "read")?;
        let mut buf = [0u8; 4];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write(&mut self, addr: u32, width: Width, value: u32) -> Result<(), MemoryError> {
        let bytes = value.to_le_bytes();
        self.write_data(addr, &bytes[..width.bytes()])
    }

    /// Fetch one 32-bit instruction word; the segment must be executable.
    pub fn fetch(&self, addr: u32) -> Result<u32, MemoryError> {
        let bytes: [u8; 4] = self
            .read_range(addr, 4, PF_X, "execute")?
            .try_into()
            .map_err(|_| MemoryError::Unmapped { addr, size: 4 })?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_data(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let size = data.len();
        if size == 0 {
            return Ok(());
        }
        let end = (addr as u64) + size as u64;
        if end > u32::MAX as u64 + 1 {
            return Err(MemoryError::AddressOverflow { addr, size });
        }

        let segment = self
            .segment_containing_mut(addr, end)
            .ok_or(MemoryError::Unmapped { addr, size })?;

        if (segment.flags & PF_W) == 0 {
            return Err(MemoryError::AccessViolation {
                addr,
                access: "write",
            });
        }

        let offset = (addr - segment.vaddr) as usize;
        segment.data[offset..offset + size].copy_from_slice(data);
        Ok(())
    }

    fn read_range(
        &self,
        addr: u32,
        size: usize,
        required_flag: u32,
        access: &'static str,
    ) -> Result<&[u8], MemoryError> {
        let end = (addr as u64) + size as u64;
        if end > u32::MAX as u64 + 1 {
            return Err(MemoryError::AddressOverflow { addr, size });
        }

        let segment = self
            .segment_containing(addr, end)
            .ok_or(MemoryError::Unmapped { addr, size })?;

        if (segment.flags & required_flag) == 0 {
            return Err(MemoryError::AccessViolation { addr, access });
        }

        let offset = (addr - segment.vaddr) as usize;
        Ok(&segment.data[offset..offset + size])
    }

    fn segment_containing(&self, start: u32, end: u64) -> Option<&MemorySegment> {
        self.segments
            .iter()
            .find(|seg| start >= seg.vaddr && end <= seg.end())
    }

    fn segment_containing_mut(&mut self, start: u32, end: u64) -> Option<&mut MemorySegment> {
        self.segments
            .iter_mut()
            .find(|seg| start >= seg.vaddr && end <= seg.end())
    }

    /// Return true if any segment fully covers the given address range.
    pub fn covers_range(&self, addr: u32, size: usize) -> bool {
        self.segment_containing(addr, addr as u64 + size as u64)
            .is_some()
    }

    /// Add a new segment, keeping the list sorted. Overlapping an existing
    /// segment is rejected.
    pub fn add_segment(&mut self, segment: MemorySegment) -> Result<(), MemoryError> {
        let start = segment.vaddr as u64;
        let end = segment.end();
        if end > u32::MAX as u64 + 1 {
            return Err(MemoryError::AddressOverflow {
                addr: segment.vaddr,
                size: segment.len(),
            });
        }
        if self
            .segments
            .iter()
            .any(|s| start < s.end() && (s.vaddr as u64) < end)
        {
            return Err(MemoryError::AccessViolation {
                addr: segment.vaddr,
                access: "map overlapping segment",
            });
        }
        self.segments.push(segment);
        self.segments.sort_by_key(|s| s.vaddr);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    AddressOverflow { addr: u32, size: usize },
    Unmapped { addr: u32, size: usize },
    AccessViolation { addr: u32, access: &'static str },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AddressOverflow { addr, size } => {
                write!(f, "address overflow at {addr:#010x} (size {size})")
            }
            MemoryError::Unmapped { addr, size } => {
                let range_end = (*addr as u64).saturating_add(*size as u64);
                write!(f, "no segment covers range {addr:#010x}..{range_end:#010x}")
            }
            MemoryError::AccessViolation { addr, access } => {
                write!(f, "segment at {addr:#010x} missing permission to {access}")
            }
        }
    }
}

impl Error for MemoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> MemoryImage {
        MemoryImage::new(vec![MemorySegment::ram(0x8000_0000, 0x100)])
    }

    #[test]
    fn little_endian_round_trip_by_width() {
        let mut mem = image();
        mem.write(0x8000_0000, Width::Word, 0x1122_3344).unwrap();
        assert_eq!(mem.read(0x8000_0000, Width::Byte).unwrap(), 0x44);
        assert_eq!(mem.read(0x8000_0000, Width::Half).unwrap(), 0x3344);
        assert_eq!(mem.read(0x8000_0002, Width::Half).unwrap(), 0x1122);

        mem.write(0x8000_0001, Width::Byte, 0xffff_ffaa).unwrap();
        assert_eq!(mem.read(0x8000_0000, Width::Word).unwrap(), 0x1122_aa44);
    }

    #[test]
    fn out_of_range_accesses_are_errors() {
        let mut mem = image();
        assert_eq!(
            mem.read(0x8000_00fe, Width::Word),
            Err(MemoryError::Unmapped {
                addr: 0x8000_00fe,
                size: 4
            })
        );
        assert!(mem.write(0x7fff_ffff, Width::Byte, 1).is_err());
        assert!(mem.read(0xffff_fffe, Width::Word).is_err());
    }

    #[test]
    fn permissions_are_checked() {
        let mut mem = image();
        mem.add_segment(MemorySegment {
            vaddr: 0x1000,
            data: vec![0x13, 0, 0, 0],
            flags: PF_R,
        })
        .unwrap();
        assert_eq!(mem.read(0x1000, Width::Word).unwrap(), 0x13);
        assert!(matches!(
            mem.fetch(0x1000),
            Err(MemoryError::AccessViolation { .. })
        ));
        assert!(matches!(
            mem.write(0x1000, Width::Word, 0),
            Err(MemoryError::AccessViolation { .. })
        ));
    }

    #[test]
    fn overlapping_segments_are_rejected() {
        let mut mem = image();
        assert!(mem.add_segment(MemorySegment::ram(0x8000_0080, 0x100)).is_err());
        assert!(mem.add_segment(MemorySegment::ram(0x8000_0100, 0x100)).is_ok());
        assert!(mem.covers_range(0x8000_0100, 8));
        assert!(!mem.covers_range(0x8000_00fc, 8));
    }
}
