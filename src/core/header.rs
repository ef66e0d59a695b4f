use crate::error::{MarfsError, Result};

pub const MAGIC: [u8; 6] = *b"MarFS\0";
pub const VERSION: u32 = 1;
pub const DEFAULT_SECTOR_SIZE: u32 = 1024;
pub const MIN_SECTOR_SIZE: u32 = 128;
pub const MAX_SECTOR_SIZE: u32 = 65536;

/// Chain terminator for `prev`/`next` links
pub const END: u32 = 0xffff_ffff;

/// Encoded size of the header fields (the rest of sector 0 is zero padding)
pub const HEADER_SIZE: usize = 6 + 4 + 4 + 4 + Pointer::SIZE;

/// Head/tail pair of sector indices identifying an entry
///
/// `tail` is reserved for a future chain-append shortcut and is always
/// written equal to `head`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub head: u32,
    pub tail: u32,
}

impl Pointer {
    pub const SIZE: usize = 8;

    pub fn to(sector: u32) -> Self {
        Pointer {
            head: sector,
            tail: sector,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.head.to_le_bytes());
        out.extend_from_slice(&self.tail.to_le_bytes());
    }

    pub fn read_from(bytes: &[u8]) -> Self {
        Pointer {
            head: read_u32(bytes, 0),
            tail: read_u32(bytes, 4),
        }
    }
}

/// Little-endian u32 at `offset`; callers check the slice length first.
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Check that a sector size is one this implementation can lay out
pub fn validate_sector_size(sector_size: u32) -> Result<()> {
    if !sector_size.is_power_of_two()
        || !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&sector_size)
    {
        return Err(MarfsError::InvalidSectorSize(sector_size));
    }
    Ok(())
}

/// MarFS image header (sector 0)
///
/// Written once by the formatter. After that only the root pointer may
/// change, and the header is rewritten on sync/teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic: "MarFS\0"
    pub magic: [u8; 6],

    /// Format version
    pub version: u32,

    /// Sector size in bytes (S)
    pub sector_size: u32,

    /// Total number of sectors in the image, header included (N)
    pub entry_count: u32,

    /// First sector of the root directory
    pub root: Pointer,
}

impl Header {
    pub fn new(sector_size: u32, entry_count: u32) -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            sector_size,
            entry_count,
            root: Pointer::to(1),
        }
    }

    /// Validate magic, version, sector size and the root pointer
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(MarfsError::InvalidMagic(self.magic));
        }

        if self.version != VERSION {
            return Err(MarfsError::UnsupportedVersion(self.version));
        }

        validate_sector_size(self.sector_size)?;

        if self.entry_count < 2 {
            return Err(MarfsError::MalformedHeader(format!(
                "entry count {} leaves no room for a root directory",
                self.entry_count
            )));
        }

        if self.root.head == 0 || self.root.head >= self.entry_count {
            return Err(MarfsError::MalformedHeader(format!(
                "root sector {} outside 1..{}",
                self.root.head, self.entry_count
            )));
        }

        Ok(())
    }

    /// Serialize the header, zero padded to one sector
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.sector_size as usize);

        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.sector_size.to_le_bytes());
        bytes.extend_from_slice(&self.entry_count.to_le_bytes());
        self.root.write_to(&mut bytes);

        bytes.resize(self.sector_size as usize, 0);
        bytes
    }

    /// Deserialize and validate a header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(MarfsError::MalformedHeader(format!(
                "need {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut magic = [0u8; 6];
        magic.copy_from_slice(&bytes[0..6]);

        let header = Header {
            magic,
            version: read_u32(bytes, 6),
            sector_size: read_u32(bytes, 10),
            entry_count: read_u32(bytes, 14),
            root: Pointer::read_from(&bytes[18..26]),
        };

        header.validate()?;

        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new(DEFAULT_SECTOR_SIZE, 2)
    }
}
