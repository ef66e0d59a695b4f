//! Free sector allocation
//!
//! Free space is not tracked separately: a sector is free when its entry
//! header says [`EntryKind::Empty`]. Allocation claims the sector at once by
//! writing a fresh header, so consecutive calls never hand out the same
//! sector.

use crate::entry::{EntryHeader, EntryKind, ENTRY_HEADER_SIZE};
use crate::error::{MarfsError, Result};
use crate::io::{BlockDevice, SectorStore};

/// Sector allocation policy
pub trait SectorAllocator {
    /// Find an empty sector without claiming it
    fn find_free_sector<D: BlockDevice>(&mut self, store: &SectorStore<D>) -> Result<u32>;

    /// Called after `sector` went back to empty
    fn released(&mut self, sector: u32);

    /// Find an empty sector and claim it for a new single-sector entry
    fn allocate<D: BlockDevice>(&mut self, store: &SectorStore<D>, kind: EntryKind) -> Result<u32> {
        let sector = self.find_free_sector(store)?;

        let mut bytes = Vec::with_capacity(store.sector_size() as usize);
        EntryHeader::new(kind, sector).write_to(&mut bytes);
        bytes.resize(store.sector_size() as usize, 0);
        store.write(sector, &bytes)?;

        tracing::trace!("allocated sector {} as {:?}", sector, kind);
        Ok(sector)
    }

    /// Return a sector to the empty state, wiping its contents
    fn release<D: BlockDevice>(&mut self, store: &SectorStore<D>, sector: u32) -> Result<()> {
        if sector == 0 {
            return Err(MarfsError::InvalidArgument(
                "sector 0 holds the header and cannot be released".to_string(),
            ));
        }

        store.write(sector, &vec![0u8; store.sector_size() as usize])?;
        self.released(sector);

        tracing::trace!("released sector {}", sector);
        Ok(())
    }
}

/// Scans upward from a remembered cursor
///
/// The cursor starts just past the header and moves to each sector handed
/// out. When the scan reaches the end of the image it makes one pass from
/// sector 1 up to the cursor, so sectors released below the cursor are
/// reused before the image is declared full.
#[derive(Debug, Clone)]
pub struct CursorAllocator {
    cursor: u32,
}

impl CursorAllocator {
    pub fn new() -> Self {
        CursorAllocator { cursor: 1 }
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    fn scan<D: BlockDevice>(
        store: &SectorStore<D>,
        range: std::ops::Range<u32>,
    ) -> Result<Option<u32>> {
        for sector in range {
            let bytes = store.read(sector, ENTRY_HEADER_SIZE)?;
            if EntryHeader::from_bytes(sector, &bytes)?.kind == EntryKind::Empty {
                return Ok(Some(sector));
            }
        }
        Ok(None)
    }
}

impl Default for CursorAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorAllocator for CursorAllocator {
    fn find_free_sector<D: BlockDevice>(&mut self, store: &SectorStore<D>) -> Result<u32> {
        let count = store.sector_count();
        if count < 2 {
            return Err(MarfsError::OutOfSpace);
        }
        let start = self.cursor.clamp(1, count);

        let found = match Self::scan(store, start..count)? {
            Some(sector) => Some(sector),
            None => Self::scan(store, 1..start)?,
        };

        match found {
            Some(sector) => {
                self.cursor = sector;
                Ok(sector)
            }
            None => {
                tracing::warn!("no free sector left in {} sector image", count);
                Err(MarfsError::OutOfSpace)
            }
        }
    }

    fn released(&mut self, _sector: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Cursor;

    fn blank_store(sectors: u32) -> SectorStore<Cursor<Vec<u8>>> {
        SectorStore::new(Cursor::new(vec![0u8; sectors as usize * 128]), 128, sectors, 0)
    }

    #[test]
    fn test_first_allocation_skips_header() {
        let store = blank_store(4);
        let mut alloc = CursorAllocator::new();
        assert_eq!(alloc.allocate(&store, EntryKind::File).unwrap(), 1);
        assert_eq!(alloc.cursor(), 1);
    }

    #[test]
    fn test_no_double_allocation() {
        let store = blank_store(16);
        let mut alloc = CursorAllocator::new();
        let mut seen = HashSet::new();

        for _ in 0..15 {
            let sector = alloc.allocate(&store, EntryKind::File).unwrap();
            assert!(seen.insert(sector), "sector {} handed out twice", sector);
        }
    }

    #[test]
    fn test_exhaustion_is_out_of_space() {
        let store = blank_store(4);
        let mut alloc = CursorAllocator::new();
        for _ in 0..3 {
            alloc.allocate(&store, EntryKind::Directory).unwrap();
        }

        assert!(matches!(
            alloc.allocate(&store, EntryKind::File),
            Err(MarfsError::OutOfSpace)
        ));
        // deterministic: asking again gives the same answer
        assert!(matches!(
            alloc.find_free_sector(&store),
            Err(MarfsError::OutOfSpace)
        ));
    }

    #[test]
    fn test_released_sector_below_cursor_is_reused() {
        let store = blank_store(4);
        let mut alloc = CursorAllocator::new();
        let first = alloc.allocate(&store, EntryKind::File).unwrap();
        alloc.allocate(&store, EntryKind::File).unwrap();
        alloc.allocate(&store, EntryKind::File).unwrap();

        alloc.release(&store, first).unwrap();
        assert_eq!(alloc.allocate(&store, EntryKind::File).unwrap(), first);
    }

    #[test]
    fn test_release_wipes_sector() {
        let store = blank_store(4);
        let mut alloc = CursorAllocator::new();
        let sector = alloc.allocate(&store, EntryKind::File).unwrap();
        store.write(sector, &[9u8; 128]).unwrap();

        alloc.release(&store, sector).unwrap();
        assert_eq!(store.read_sector(sector).unwrap(), vec![0u8; 128]);
    }

    #[test]
    fn test_release_header_rejected() {
        let store = blank_store(4);
        let mut alloc = CursorAllocator::new();
        assert!(alloc.release(&store, 0).is_err());
    }

    #[test]
    fn test_allocated_header_is_fresh() {
        let store = blank_store(4);
        let mut alloc = CursorAllocator::new();
        let sector = alloc.allocate(&store, EntryKind::Directory).unwrap();

        let header = EntryHeader::from_bytes(sector, &store.read_sector(sector).unwrap()).unwrap();
        assert_eq!(header, EntryHeader::new(EntryKind::Directory, sector));
    }
}
