//! Entry sector codecs
//!
//! Every sector past the header starts with an [`EntryHeader`]:
//!
//! ```text
//! [kind u32][id u32][prev u32][next u32]            16 bytes
//! directory: [count u32][record; capacity][padding]
//! file:      [size u32][payload]
//! record:    [name 33 bytes][length u32][head u32][tail u32]   45 bytes
//! ```
//!
//! All integers are little-endian. Encoders always produce exactly one
//! sector; [`Layout::new`] checks that at startup.

use crate::error::{MarfsError, Result};
use crate::header::{read_u32, validate_sector_size, Header, Pointer, END, HEADER_SIZE};

/// Longest name a directory record can hold
pub const NAME_LENGTH: usize = 32;

/// Name buffer in a directory record (one spare byte for a terminator)
pub const NAME_BUFFER: usize = NAME_LENGTH + 1;

pub const ENTRY_HEADER_SIZE: usize = 16;
pub const DIR_RECORD_SIZE: usize = NAME_BUFFER + 4 + Pointer::SIZE;

/// Entry header plus the `count`/`size` field shared by both entry layouts
pub const ENTRY_OVERHEAD: usize = ENTRY_HEADER_SIZE + 4;

/// Kind of an entry sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EntryKind {
    Empty = 0,
    Directory = 1,
    File = 2,
}

impl EntryKind {
    pub fn from_u32(sector: u32, value: u32) -> Result<Self> {
        match value {
            0 => Ok(EntryKind::Empty),
            1 => Ok(EntryKind::Directory),
            2 => Ok(EntryKind::File),
            kind => Err(MarfsError::InvalidEntryKind { sector, kind }),
        }
    }
}

/// Header embedded at the start of every entry sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: EntryKind,

    /// Index of the sector this header lives in
    pub id: u32,

    /// Previous sector of the same entry, or [`END`]
    pub prev: u32,

    /// Next sector of the same entry, or [`END`]
    pub next: u32,
}

impl EntryHeader {
    /// Header of a fresh single-sector entry
    pub fn new(kind: EntryKind, id: u32) -> Self {
        EntryHeader {
            kind,
            id,
            prev: END,
            next: END,
        }
    }

    pub fn empty() -> Self {
        EntryHeader {
            kind: EntryKind::Empty,
            id: 0,
            prev: 0,
            next: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.kind as u32).to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.prev.to_le_bytes());
        out.extend_from_slice(&self.next.to_le_bytes());
    }

    /// Decode the header of the sector at index `sector`
    pub fn from_bytes(sector: u32, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENTRY_HEADER_SIZE {
            return Err(MarfsError::Corrupted(format!(
                "sector {} shorter than an entry header",
                sector
            )));
        }

        Ok(EntryHeader {
            kind: EntryKind::from_u32(sector, read_u32(bytes, 0))?,
            id: read_u32(bytes, 4),
            prev: read_u32(bytes, 8),
            next: read_u32(bytes, 12),
        })
    }
}

/// Sizes derived from the sector size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub sector_size: u32,

    /// Directory records per directory sector
    pub dir_capacity: usize,

    /// File payload bytes per file sector
    pub file_payload: usize,
}

impl Layout {
    /// Derive the layout for `sector_size` and run the encoding self-test
    pub fn new(sector_size: u32) -> Result<Self> {
        validate_sector_size(sector_size)?;

        let s = sector_size as usize;
        let layout = Layout {
            sector_size,
            dir_capacity: (s - ENTRY_OVERHEAD) / DIR_RECORD_SIZE,
            file_payload: s - ENTRY_OVERHEAD,
        };

        layout.self_test()?;
        Ok(layout)
    }

    pub fn sector_bytes(&self) -> usize {
        self.sector_size as usize
    }

    /// Every on-disk structure must fit one sector before padding and
    /// encode to exactly one sector after it
    fn self_test(&self) -> Result<()> {
        let expected = self.sector_bytes();
        let unpadded = [
            ("header", HEADER_SIZE),
            (
                "directory entry",
                ENTRY_OVERHEAD + self.dir_capacity.max(1) * DIR_RECORD_SIZE,
            ),
            ("file entry", ENTRY_OVERHEAD + self.file_payload),
        ];

        for (structure, len) in unpadded {
            if len > expected {
                return Err(MarfsError::LayoutMismatch {
                    structure,
                    encoded: len,
                    expected,
                });
            }
        }

        let encoded = [
            ("header", Header::new(self.sector_size, 2).to_bytes().len()),
            ("directory entry", DirEntry::new(1).to_bytes(self).len()),
            ("file entry", FileEntry::new(1, self).to_bytes(self).len()),
        ];

        for (structure, len) in encoded {
            if len != expected {
                return Err(MarfsError::LayoutMismatch {
                    structure,
                    encoded: len,
                    expected,
                });
            }
        }
        Ok(())
    }

    fn dir_padding(&self) -> usize {
        self.sector_bytes() - ENTRY_OVERHEAD - self.dir_capacity * DIR_RECORD_SIZE
    }
}

/// One name → child pointer record inside a directory sector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    /// Stored name bytes; compared by length, never by terminator
    pub name: Vec<u8>,
    pub pointer: Pointer,
}

impl DirRecord {
    pub fn new(name: &[u8], child: u32) -> Self {
        DirRecord {
            name: name.to_vec(),
            pointer: Pointer::to(child),
        }
    }

    /// Exact-length comparison, so `foo` never matches `foobar`
    pub fn matches(&self, segment: &[u8]) -> bool {
        self.name.as_slice() == segment
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        let mut buffer = [0u8; NAME_BUFFER];
        buffer[..self.name.len()].copy_from_slice(&self.name);
        out.extend_from_slice(&buffer);
        out.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
        self.pointer.write_to(out);
    }

    fn from_bytes(sector: u32, bytes: &[u8]) -> Result<Self> {
        let length = read_u32(bytes, NAME_BUFFER) as usize;
        if length == 0 || length > NAME_LENGTH {
            return Err(MarfsError::Corrupted(format!(
                "directory record in sector {} has name length {}",
                sector, length
            )));
        }

        Ok(DirRecord {
            name: bytes[..length].to_vec(),
            pointer: Pointer::read_from(&bytes[NAME_BUFFER + 4..DIR_RECORD_SIZE]),
        })
    }
}

/// A directory sector (head or overflow)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub header: EntryHeader,
    pub records: Vec<DirRecord>,
}

impl DirEntry {
    pub fn new(id: u32) -> Self {
        DirEntry {
            header: EntryHeader::new(EntryKind::Directory, id),
            records: Vec::new(),
        }
    }

    pub fn is_full(&self, layout: &Layout) -> bool {
        self.records.len() >= layout.dir_capacity
    }

    pub fn to_bytes(&self, layout: &Layout) -> Vec<u8> {
        debug_assert!(self.records.len() <= layout.dir_capacity);

        let mut bytes = Vec::with_capacity(layout.sector_bytes());
        self.header.write_to(&mut bytes);
        bytes.extend_from_slice(&(self.records.len() as u32).to_le_bytes());

        for record in &self.records {
            record.write_to(&mut bytes);
        }
        let unused = layout.dir_capacity - self.records.len();
        bytes.resize(bytes.len() + unused * DIR_RECORD_SIZE, 0);
        bytes.resize(bytes.len() + layout.dir_padding(), 0);

        bytes
    }

    pub fn from_bytes(sector: u32, bytes: &[u8], layout: &Layout) -> Result<Self> {
        check_sector_len(sector, bytes, layout)?;

        let header = EntryHeader::from_bytes(sector, bytes)?;
        if header.kind != EntryKind::Directory {
            return Err(MarfsError::Corrupted(format!(
                "sector {} is {:?}, expected a directory",
                sector, header.kind
            )));
        }

        let count = read_u32(bytes, ENTRY_HEADER_SIZE) as usize;
        if count > layout.dir_capacity {
            return Err(MarfsError::Corrupted(format!(
                "directory sector {} holds {} records, capacity is {}",
                sector, count, layout.dir_capacity
            )));
        }

        let records = (0..count)
            .map(|i| {
                let start = ENTRY_OVERHEAD + i * DIR_RECORD_SIZE;
                DirRecord::from_bytes(sector, &bytes[start..start + DIR_RECORD_SIZE])
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DirEntry { header, records })
    }
}

/// A file sector (head or continuation)
///
/// `size` is the logical file size and is only meaningful in the head
/// sector; continuation sectors store 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub header: EntryHeader,
    pub size: u32,
    pub data: Vec<u8>,
}

impl FileEntry {
    pub fn new(id: u32, layout: &Layout) -> Self {
        FileEntry {
            header: EntryHeader::new(EntryKind::File, id),
            size: 0,
            data: vec![0; layout.file_payload],
        }
    }

    pub fn to_bytes(&self, layout: &Layout) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(layout.sector_bytes());
        self.header.write_to(&mut bytes);
        bytes.extend_from_slice(&self.size.to_le_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    pub fn from_bytes(sector: u32, bytes: &[u8], layout: &Layout) -> Result<Self> {
        check_sector_len(sector, bytes, layout)?;

        let header = EntryHeader::from_bytes(sector, bytes)?;
        if header.kind != EntryKind::File {
            return Err(MarfsError::Corrupted(format!(
                "sector {} is {:?}, expected a file",
                sector, header.kind
            )));
        }

        Ok(FileEntry {
            header,
            size: read_u32(bytes, ENTRY_HEADER_SIZE),
            data: bytes[ENTRY_OVERHEAD..layout.sector_bytes()].to_vec(),
        })
    }
}

fn check_sector_len(sector: u32, bytes: &[u8], layout: &Layout) -> Result<()> {
    if bytes.len() < layout.sector_bytes() {
        return Err(MarfsError::Corrupted(format!(
            "sector {}: got {} bytes, expected {}",
            sector,
            bytes.len(),
            layout.sector_size
        )));
    }
    Ok(())
}
