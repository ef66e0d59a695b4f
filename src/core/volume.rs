//! Filesystem session
//!
//! A [`Volume`] owns the backing store, the decoded header and the allocator
//! cursor for one mounted image. Decoded entries never outlive a single
//! call: every operation reads the sectors it needs and writes back what it
//! changed.
//!
//! Read-only operations take `&self` and may run side by side; anything
//! that mutates the image takes `&mut self`. [`crate::ops::MarFs`] puts a
//! volume behind a reader/writer lock for multi-threaded drivers.

use crate::allocator::{CursorAllocator, SectorAllocator};
use crate::entry::{DirEntry, EntryHeader, EntryKind, FileEntry, Layout, ENTRY_HEADER_SIZE};
use crate::error::{MarfsError, Result};
use crate::header::{Header, END, HEADER_SIZE};
use crate::io::{device_len, open_image, BlockDevice, SectorStore};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info, warn};

/// Sectors kept in the write-through cache unless configured otherwise
pub const DEFAULT_CACHE_SECTORS: usize = 64;

/// Tunables for opening a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeOptions {
    /// Sector cache capacity; 0 disables caching
    pub cache_sectors: usize,
    /// Open the image without write access; every mutation fails and
    /// [`Volume::sync`] leaves the header alone
    pub read_only: bool,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        VolumeOptions {
            cache_sectors: DEFAULT_CACHE_SECTORS,
            read_only: false,
        }
    }
}

/// Kind and size of an entry, as reported to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: EntryKind,
    /// Logical size for files, 0 for directories
    pub size: u64,
    /// First sector of the entry
    pub sector: u32,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Space accounting for a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    pub sector_size: u32,
    pub total_sectors: u32,
    pub free_sectors: u32,
    pub used_sectors: u32,
    pub dir_capacity: usize,
    pub file_payload: usize,
}

/// An open MarFS image
pub struct Volume<D: BlockDevice> {
    pub(crate) header: Header,
    pub(crate) layout: Layout,
    pub(crate) store: SectorStore<D>,
    pub(crate) allocator: CursorAllocator,
}

impl Volume<File> {
    /// Open an image file read/write
    pub fn open_path<P: AsRef<Path>>(path: P, options: &VolumeOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = open_image(path, options.read_only)?;
        info!("opening image {}", path.display());
        Self::open_with(file, options)
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Open an image with default options
    pub fn open(device: D) -> Result<Self> {
        Self::open_with(device, &VolumeOptions::default())
    }

    /// Read and validate the header, run the layout self-test and check
    /// that the root pointer names a directory.
    pub fn open_with(mut device: D, options: &VolumeOptions) -> Result<Self> {
        let len = device_len(&mut device)?;

        let mut raw = [0u8; HEADER_SIZE];
        device.seek(SeekFrom::Start(0))?;
        device.read_exact(&mut raw).map_err(|e| {
            MarfsError::MalformedHeader(format!("could not read full header: {}", e))
        })?;

        let header = Header::from_bytes(&raw)?;
        let layout = Layout::new(header.sector_size)?;

        let declared = header.entry_count as u64 * header.sector_size as u64;
        if len < declared {
            return Err(MarfsError::MalformedHeader(format!(
                "image holds {} bytes but header declares {} sectors of {} bytes",
                len, header.entry_count, header.sector_size
            )));
        }

        let store = SectorStore::new(
            device,
            header.sector_size,
            header.entry_count,
            options.cache_sectors,
        )
        .with_read_only(options.read_only);
        let volume = Self::from_parts(header, layout, store);

        let root = volume.entry_header(header.root.head)?;
        if !root.is_dir() {
            return Err(MarfsError::Corrupted(format!(
                "root sector {} is {:?}, expected a directory",
                header.root.head, root.kind
            )));
        }

        info!(
            "opened MarFS v{}: {} sectors of {} bytes, root at {}",
            header.version, header.entry_count, header.sector_size, header.root.head
        );
        Ok(volume)
    }

    pub(crate) fn from_parts(header: Header, layout: Layout, store: SectorStore<D>) -> Self {
        Volume {
            header,
            layout,
            store,
            allocator: CursorAllocator::new(),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// First sector of the root directory
    pub fn root(&self) -> u32 {
        self.header.root.head
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    /// Raw contents of one sector
    pub fn read_raw_sector(&self, index: u32) -> Result<Vec<u8>> {
        self.store.read_sector(index)
    }

    /// Entry header of sector `sector`, checked against its own index
    pub fn entry_header(&self, sector: u32) -> Result<EntryHeader> {
        if sector == 0 {
            return Err(MarfsError::Corrupted(
                "entry link points at the header sector".to_string(),
            ));
        }

        let bytes = self.store.read(sector, ENTRY_HEADER_SIZE)?;
        let header = EntryHeader::from_bytes(sector, &bytes)?;

        if header.kind != EntryKind::Empty && header.id != sector {
            warn!("sector {} claims id {}", sector, header.id);
            return Err(MarfsError::Corrupted(format!(
                "sector {} carries id {}",
                sector, header.id
            )));
        }

        Ok(header)
    }

    pub(crate) fn read_dir_sector(&self, sector: u32) -> Result<DirEntry> {
        let dir = DirEntry::from_bytes(sector, &self.store.read_sector(sector)?, &self.layout)?;
        Self::check_id(sector, &dir.header)?;
        Ok(dir)
    }

    pub(crate) fn write_dir_sector(&self, dir: &DirEntry) -> Result<()> {
        self.store.write(dir.header.id, &dir.to_bytes(&self.layout))
    }

    pub(crate) fn read_file_sector(&self, sector: u32) -> Result<FileEntry> {
        let file = FileEntry::from_bytes(sector, &self.store.read_sector(sector)?, &self.layout)?;
        Self::check_id(sector, &file.header)?;
        Ok(file)
    }

    pub(crate) fn write_file_sector(&self, file: &FileEntry) -> Result<()> {
        self.store.write(file.header.id, &file.to_bytes(&self.layout))
    }

    fn check_id(sector: u32, header: &EntryHeader) -> Result<()> {
        if header.id != sector {
            return Err(MarfsError::Corrupted(format!(
                "sector {} carries id {}",
                sector, header.id
            )));
        }
        Ok(())
    }

    /// Validate one step of a chain walk: the link must stay inside the
    /// image and the walk must not take more steps than there are sectors.
    pub(crate) fn check_link(&self, sector: u32, steps: u32) -> Result<()> {
        if steps >= self.header.entry_count {
            warn!("chain walk exceeded {} steps", self.header.entry_count);
            return Err(MarfsError::Corrupted(format!(
                "chain through sector {} loops",
                sector
            )));
        }

        if sector == 0 || sector >= self.header.entry_count {
            return Err(MarfsError::Corrupted(format!(
                "chain link to sector {} outside 1..{}",
                sector, self.header.entry_count
            )));
        }

        Ok(())
    }

    /// Sector indices of the chain starting at `head`, in order
    pub(crate) fn chain(&self, head: u32, kind: EntryKind) -> Result<Vec<u32>> {
        let mut sectors = Vec::new();
        let mut prev = END;
        let mut current = head;

        while current != END {
            self.check_link(current, sectors.len() as u32)?;

            let header = self.entry_header(current)?;
            if header.kind != kind || header.prev != prev {
                return Err(MarfsError::Corrupted(format!(
                    "sector {} ({:?}, prev {}) does not continue the {:?} chain at {}",
                    current, header.kind, header.prev, kind, head
                )));
            }

            sectors.push(current);
            prev = current;
            current = header.next;
        }

        Ok(sectors)
    }

    /// Walk a directory chain, stopping at the first sector `visit` returns
    /// `Some` for.
    pub(crate) fn walk_dir<T>(
        &self,
        head: u32,
        mut visit: impl FnMut(&DirEntry) -> Option<T>,
    ) -> Result<Option<T>> {
        let mut prev = END;
        let mut current = head;
        let mut steps = 0;

        while current != END {
            self.check_link(current, steps)?;
            steps += 1;

            let dir = self.read_dir_sector(current)?;
            if dir.header.prev != prev {
                return Err(MarfsError::Corrupted(format!(
                    "directory sector {} links back to {}, expected {}",
                    current, dir.header.prev, prev
                )));
            }

            if let Some(found) = visit(&dir) {
                return Ok(Some(found));
            }

            prev = current;
            current = dir.header.next;
        }

        Ok(None)
    }

    /// Every sector of a directory chain, decoded
    pub(crate) fn dir_sectors(&self, head: u32) -> Result<Vec<DirEntry>> {
        let mut sectors = Vec::new();
        self.walk_dir(head, |dir| {
            sectors.push(dir.clone());
            None::<()>
        })?;
        Ok(sectors)
    }

    /// Kind and size of the entry starting at `sector`
    pub fn metadata_at(&self, sector: u32) -> Result<Metadata> {
        let header = self.entry_header(sector)?;
        let size = match header.kind {
            EntryKind::File => self.read_file_sector(sector)?.size as u64,
            EntryKind::Directory => 0,
            EntryKind::Empty => {
                return Err(MarfsError::Corrupted(format!(
                    "sector {} is referenced but empty",
                    sector
                )))
            }
        };

        Ok(Metadata {
            kind: header.kind,
            size,
            sector,
        })
    }

    /// Kind and size of the entry at `path`
    pub fn metadata(&self, path: &str) -> Result<Metadata> {
        debug!("getattr() on {}", path);
        let header = self
            .resolve(path)?
            .ok_or_else(|| MarfsError::NotFound(path.to_string()))?;
        self.metadata_at(header.id)
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_some())
    }

    /// Entry kind of every sector, header sector excluded
    pub fn sector_kinds(&self) -> Result<Vec<EntryKind>> {
        (1..self.header.entry_count)
            .map(|sector| {
                let bytes = self.store.read(sector, ENTRY_HEADER_SIZE)?;
                Ok(EntryHeader::from_bytes(sector, &bytes)?.kind)
            })
            .collect()
    }

    /// Count free and used sectors
    pub fn stats(&self) -> Result<VolumeStats> {
        let kinds = self.sector_kinds()?;
        let free = kinds.iter().filter(|&&k| k == EntryKind::Empty).count() as u32;

        Ok(VolumeStats {
            sector_size: self.header.sector_size,
            total_sectors: self.header.entry_count,
            free_sectors: free,
            used_sectors: self.header.entry_count - free,
            dir_capacity: self.layout.dir_capacity,
            file_payload: self.layout.file_payload,
        })
    }

    /// Record a timestamp update. MarFS stores no timestamps, so this only
    /// checks that the entry exists.
    pub fn touch(&self, path: &str) -> Result<()> {
        debug!("utimens() on {}", path);
        self.metadata(path).map(|_| ())
    }

    /// Write the header back and flush the device
    pub fn sync(&mut self) -> Result<()> {
        if self.store.is_read_only() {
            debug!("read-only volume, header left as is");
            return Ok(());
        }
        self.store.write(0, &self.header.to_bytes())?;
        self.store.flush()?;
        info!("synced header ({} sectors)", self.header.entry_count);
        Ok(())
    }

    pub fn into_inner(self) -> D {
        self.store.into_inner()
    }

    pub(crate) fn allocate(&mut self, kind: EntryKind) -> Result<u32> {
        self.allocator.allocate(&self.store, kind)
    }

    pub(crate) fn release(&mut self, sector: u32) -> Result<()> {
        self.allocator.release(&self.store, sector)
    }

    /// Release every sector of a chain
    pub(crate) fn release_chain(&mut self, head: u32, kind: EntryKind) -> Result<()> {
        for sector in self.chain(head, kind)? {
            self.release(sector)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format;
    use std::io::Cursor;

    fn volume(sectors: usize) -> Volume<Cursor<Vec<u8>>> {
        format(Cursor::new(vec![0u8; sectors * 1024]), 1024).unwrap()
    }

    #[test]
    fn test_reopen_formatted_image() {
        let image = volume(8).into_inner();
        let reopened = Volume::open(image).unwrap();

        assert_eq!(reopened.header().entry_count, 8);
        assert_eq!(reopened.root(), 1);
        assert_eq!(reopened.layout().dir_capacity, 22);
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let mut image = volume(4).into_inner().into_inner();
        image[0..6].copy_from_slice(b"FAT32\0");
        assert!(matches!(
            Volume::open(Cursor::new(image)),
            Err(MarfsError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_open_rejects_wrong_version() {
        let mut image = volume(4).into_inner().into_inner();
        image[6..10].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            Volume::open(Cursor::new(image)),
            Err(MarfsError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_open_rejects_short_header() {
        assert!(matches!(
            Volume::open(Cursor::new(vec![0u8; 12])),
            Err(MarfsError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_open_rejects_truncated_image() {
        let mut image = volume(8).into_inner().into_inner();
        image.truncate(5 * 1024);
        assert!(matches!(
            Volume::open(Cursor::new(image)),
            Err(MarfsError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_root_must_be_directory() {
        let mut image = volume(4).into_inner().into_inner();
        image[1024..1028].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            Volume::open(Cursor::new(image)),
            Err(MarfsError::Corrupted(_))
        ));
    }

    #[test]
    fn test_stats_after_format() {
        let stats = volume(10).stats().unwrap();
        assert_eq!(stats.total_sectors, 10);
        assert_eq!(stats.free_sectors, 8);
        assert_eq!(stats.used_sectors, 2);
        assert_eq!(stats.file_payload, 1004);
    }

    #[test]
    fn test_sync_rewrites_header() {
        let mut vol = volume(4);
        vol.sync().unwrap();
        let image = vol.into_inner().into_inner();
        assert_eq!(&image[0..6], b"MarFS\0");
    }

    #[test]
    fn test_root_metadata() {
        let vol = volume(4);
        let meta = vol.metadata("/").unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.sector, 1);
        assert!(matches!(
            vol.metadata("/missing"),
            Err(MarfsError::NotFound(_))
        ));
    }
}
