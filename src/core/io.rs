//! Sector I/O over a seekable backing store

use crate::error::{MarfsError, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;

/// Anything a MarFS image can live in: a file, a block device, or an
/// in-memory `Cursor<Vec<u8>>`.
pub trait BlockDevice: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> BlockDevice for T {}

/// Open an existing image, read/write unless `read_only`. Never creates
/// the file.
pub fn open_image<P: AsRef<Path>>(path: P, read_only: bool) -> Result<File> {
    let file = OpenOptions::new().read(true).write(!read_only).open(path)?;
    Ok(file)
}

/// Length of the device in bytes
pub fn device_len<D: BlockDevice>(device: &mut D) -> Result<u64> {
    let len = device.seek(SeekFrom::End(0))?;
    device.seek(SeekFrom::Start(0))?;
    Ok(len)
}

/// Fixed-size sector reads and writes addressed by index
///
/// Every call performs real I/O unless the optional sector cache holds the
/// sector. The cache is write-through, so a completed write is always
/// visible to the next read.
pub struct SectorStore<D: BlockDevice> {
    device: Mutex<D>,
    sector_size: u32,
    sector_count: u32,
    cache: Option<Mutex<LruCache<u32, Vec<u8>>>>,
    read_only: bool,
}

impl<D: BlockDevice> SectorStore<D> {
    /// `cache_sectors == 0` disables the cache
    pub fn new(device: D, sector_size: u32, sector_count: u32, cache_sectors: usize) -> Self {
        SectorStore {
            device: Mutex::new(device),
            sector_size,
            sector_count,
            cache: NonZeroUsize::new(cache_sectors).map(|cap| Mutex::new(LruCache::new(cap))),
            read_only: false,
        }
    }

    /// Reject every write with [`MarfsError::ReadOnly`]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }

    fn check(&self, index: u32, size: usize) -> Result<()> {
        if index >= self.sector_count {
            tracing::error!(
                "sector {} out of range ({} sectors in image)",
                index,
                self.sector_count
            );
            return Err(MarfsError::SectorOutOfRange {
                index,
                count: self.sector_count,
            });
        }

        if size > self.sector_size as usize {
            return Err(MarfsError::InvalidArgument(format!(
                "{} bytes exceed sector size {}",
                size, self.sector_size
            )));
        }

        Ok(())
    }

    fn offset(&self, index: u32) -> u64 {
        index as u64 * self.sector_size as u64
    }

    /// Read the first `size` bytes of sector `index`
    pub fn read(&self, index: u32, size: usize) -> Result<Vec<u8>> {
        self.check(index, size)?;

        if let Some(cache) = &self.cache {
            if let Some(sector) = cache.lock().get(&index) {
                return Ok(sector[..size].to_vec());
            }
        }

        let mut buffer = vec![0u8; self.sector_size as usize];
        {
            let mut device = self.device.lock();
            device.seek(SeekFrom::Start(self.offset(index)))?;
            device.read_exact(&mut buffer)?;
        }

        if let Some(cache) = &self.cache {
            cache.lock().put(index, buffer.clone());
        }

        buffer.truncate(size);
        Ok(buffer)
    }

    /// Read a whole sector
    pub fn read_sector(&self, index: u32) -> Result<Vec<u8>> {
        self.read(index, self.sector_size as usize)
    }

    /// Write `bytes` at the start of sector `index`
    pub fn write(&self, index: u32, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(MarfsError::ReadOnly);
        }
        self.check(index, bytes.len())?;

        {
            let mut device = self.device.lock();
            device.seek(SeekFrom::Start(self.offset(index)))?;
            device.write_all(bytes)?;
        }

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            if let Some(sector) = cache.get_mut(&index) {
                sector[..bytes.len()].copy_from_slice(bytes);
            }
        }

        Ok(())
    }

    /// Flush buffered writes to the device
    pub fn flush(&self) -> Result<()> {
        self.device.lock().flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> D {
        self.device.into_inner()
    }
}
