//! Driver operation surface
//!
//! [`Operations`] is what a host filesystem front-end calls. Each operation
//! maps onto one [`Volume`] call. [`MarFs`] shares a volume between driver
//! threads: read-side operations take the read lock and may run together,
//! anything that mutates the image takes the write lock.

use crate::dir::DirListing;
use crate::error::{MarfsError, Result};
use crate::io::BlockDevice;
use crate::volume::{Metadata, Volume, VolumeStats};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use tracing::{debug, info};

/// Filesystem calls a host driver dispatches, by path
pub trait Operations: Send + Sync {
    /// Mount-time setup
    fn init(&self) -> Result<()>;

    /// Unmount: persist the header and flush the device
    fn destroy(&self) -> Result<()>;

    /// Check that `path` is a file that can be opened
    fn open(&self, path: &str) -> Result<Metadata>;

    /// Check that `path` is a directory that can be listed
    fn opendir(&self, path: &str) -> Result<Metadata>;

    fn getattr(&self, path: &str) -> Result<Metadata>;

    /// Names in a directory, `.` and `..` first
    fn readdir(&self, path: &str) -> Result<Vec<String>>;

    fn read(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize>;

    fn create(&self, path: &str) -> Result<Metadata>;

    fn mkdir(&self, path: &str) -> Result<Metadata>;

    fn unlink(&self, path: &str) -> Result<()>;

    fn rmdir(&self, path: &str) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Timestamps are not stored; succeeds for any existing entry
    fn utimens(&self, path: &str) -> Result<()>;

    fn truncate(&self, path: &str, size: u64) -> Result<()>;
}

/// A volume shared between driver threads
pub struct MarFs<D: BlockDevice> {
    volume: Arc<RwLock<Volume<D>>>,
}

impl<D: BlockDevice> Clone for MarFs<D> {
    fn clone(&self) -> Self {
        MarFs {
            volume: Arc::clone(&self.volume),
        }
    }
}

impl<D: BlockDevice> MarFs<D> {
    pub fn new(volume: Volume<D>) -> Self {
        MarFs {
            volume: Arc::new(RwLock::new(volume)),
        }
    }

    /// Shared handle to the underlying volume
    pub fn volume(&self) -> Arc<RwLock<Volume<D>>> {
        Arc::clone(&self.volume)
    }

    /// Lock the volume for sector-level reads
    pub fn read_volume(&self) -> RwLockReadGuard<'_, Volume<D>> {
        self.volume.read()
    }

    /// Lock the volume for sector-level mutation
    pub fn write_volume(&self) -> RwLockWriteGuard<'_, Volume<D>> {
        self.volume.write()
    }

    pub fn stats(&self) -> Result<VolumeStats> {
        self.volume.read().stats()
    }

    /// Children of a directory with their kinds and head sectors
    pub fn entries(&self, path: &str) -> Result<Vec<DirListing>> {
        self.volume.read().read_dir(path)
    }
}

impl<D: BlockDevice> Operations for MarFs<D> {
    fn init(&self) -> Result<()> {
        let vol = self.volume.read();
        let header = vol.header();
        info!(
            "MarFS mounted: {} sectors of {} bytes",
            header.entry_count, header.sector_size
        );
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        info!("MarFS unmounting");
        self.volume.write().sync()
    }

    fn open(&self, path: &str) -> Result<Metadata> {
        debug!("open() on {}", path);
        let meta = self.volume.read().metadata(path)?;
        if meta.is_dir() {
            return Err(MarfsError::IsADirectory(path.to_string()));
        }
        Ok(meta)
    }

    fn opendir(&self, path: &str) -> Result<Metadata> {
        debug!("opendir() on {}", path);
        let meta = self.volume.read().metadata(path)?;
        if !meta.is_dir() {
            return Err(MarfsError::NotADirectory(path.to_string()));
        }
        Ok(meta)
    }

    fn getattr(&self, path: &str) -> Result<Metadata> {
        self.volume.read().metadata(path)
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        self.volume.read().list(path)
    }

    fn read(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.volume.read().read(path, offset, len)
    }

    fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        self.volume.write().write(path, offset, data)
    }

    fn create(&self, path: &str) -> Result<Metadata> {
        let mut vol = self.volume.write();
        let header = vol.create_file(path)?;
        vol.metadata_at(header.id)
    }

    fn mkdir(&self, path: &str) -> Result<Metadata> {
        let mut vol = self.volume.write();
        let header = vol.create_dir(path)?;
        vol.metadata_at(header.id)
    }

    fn unlink(&self, path: &str) -> Result<()> {
        self.volume.write().remove_file(path)
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        self.volume.write().remove_dir(path)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.volume.write().rename(from, to)
    }

    fn utimens(&self, path: &str) -> Result<()> {
        self.volume.read().touch(path)
    }

    fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.volume.write().truncate(path, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format;
    use std::io::Cursor;
    use std::thread;

    fn fs(sectors: usize) -> MarFs<Cursor<Vec<u8>>> {
        MarFs::new(format(Cursor::new(vec![0u8; sectors * 1024]), 1024).unwrap())
    }

    #[test]
    fn test_operation_surface() {
        let fs = fs(16);
        fs.init().unwrap();

        let created = fs.create("/a.txt").unwrap();
        assert!(created.is_file());
        assert_eq!(created.size, 0);

        fs.mkdir("/docs").unwrap();
        assert_eq!(fs.readdir("/").unwrap(), vec![".", "..", "a.txt", "docs"]);

        assert_eq!(fs.write("/a.txt", 0, b"hi").unwrap(), 2);
        assert_eq!(fs.open("/a.txt").unwrap().size, 2);
        assert_eq!(fs.read("/a.txt", 0, 10).unwrap(), b"hi");

        fs.rename("/a.txt", "/docs/b.txt").unwrap();
        fs.truncate("/docs/b.txt", 1).unwrap();
        assert_eq!(fs.getattr("/docs/b.txt").unwrap().size, 1);
        fs.utimens("/docs/b.txt").unwrap();

        fs.unlink("/docs/b.txt").unwrap();
        fs.rmdir("/docs").unwrap();
        assert_eq!(fs.readdir("/").unwrap(), vec![".", ".."]);

        fs.destroy().unwrap();
    }

    #[test]
    fn test_open_kind_checks() {
        let fs = fs(8);
        fs.mkdir("/d").unwrap();
        fs.create("/f").unwrap();

        assert!(matches!(fs.open("/d"), Err(MarfsError::IsADirectory(_))));
        assert!(matches!(fs.opendir("/f"), Err(MarfsError::NotADirectory(_))));
        assert!(matches!(fs.open("/none"), Err(MarfsError::NotFound(_))));
        assert!(matches!(fs.utimens("/none"), Err(MarfsError::NotFound(_))));
        assert!(fs.opendir("/").unwrap().is_dir());
    }

    #[test]
    fn test_clones_share_volume() {
        let fs = fs(64);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let fs = fs.clone();
                thread::spawn(move || {
                    let path = format!("/t{}", t);
                    fs.create(&path).unwrap();
                    fs.write(&path, 0, &[t as u8; 1500]).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..4u8 {
            let data = fs.read(&format!("/t{}", t), 0, 2000).unwrap();
            assert_eq!(data, vec![t; 1500]);
        }
        assert_eq!(fs.entries("/").unwrap().len(), 4);
    }
}
