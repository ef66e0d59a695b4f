//! File contents
//!
//! A file is a chain of file sectors, each carrying `file_payload` bytes.
//! Byte `n` of a file lives in chain position `n / file_payload`. The
//! logical size is kept in the head sector only, and payload bytes past the
//! size are always zero, so growing a file never exposes stale data.

use crate::entry::{EntryKind, FileEntry};
use crate::error::{MarfsError, Result};
use crate::header::END;
use crate::io::BlockDevice;
use crate::volume::Volume;
use tracing::{debug, warn};

impl<D: BlockDevice> Volume<D> {
    fn require_file(&self, path: &str) -> Result<u32> {
        let header = self
            .resolve(path)?
            .ok_or_else(|| MarfsError::NotFound(path.to_string()))?;
        if header.is_dir() {
            return Err(MarfsError::IsADirectory(path.to_string()));
        }
        Ok(header.id)
    }

    /// Kind check for calls that address a file by its head sector
    fn require_file_sector(&self, sector: u32) -> Result<()> {
        let header = self.entry_header(sector)?;
        match header.kind {
            EntryKind::File => Ok(()),
            EntryKind::Directory => Err(MarfsError::IsADirectory(format!("sector {}", sector))),
            EntryKind::Empty => Err(MarfsError::NotFound(format!("sector {}", sector))),
        }
    }

    /// Number of chain sectors needed to hold `size` bytes
    fn sectors_for(&self, size: u64) -> usize {
        let payload = self.layout.file_payload as u64;
        (size.div_ceil(payload) as usize).max(1)
    }

    /// Chain of the file at `head`, checked to be long enough for its size
    fn file_chain(&self, head: u32) -> Result<(FileEntry, Vec<u32>)> {
        let entry = self.read_file_sector(head)?;
        let chain = self.chain(head, EntryKind::File)?;

        if chain.len() < self.sectors_for(entry.size as u64) {
            return Err(MarfsError::Corrupted(format!(
                "file at sector {} holds {} bytes in {} sectors",
                head,
                entry.size,
                chain.len()
            )));
        }

        Ok((entry, chain))
    }

    /// Read up to `len` bytes from `offset` in the file at `path`
    pub fn read(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        debug!("read() on {} ({} bytes at {})", path, len, offset);
        let sector = self.require_file(path)?;
        self.read_at(sector, offset, len)
    }

    /// Read up to `len` bytes from `offset` in the file starting at `sector`.
    /// Reads at or past the end return no bytes.
    pub fn read_at(&self, sector: u32, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.require_file_sector(sector)?;
        let (head, chain) = self.file_chain(sector)?;
        let size = head.size as u64;

        if offset >= size || len == 0 {
            return Ok(Vec::new());
        }

        let end = size.min(offset.saturating_add(len as u64));
        let payload = self.layout.file_payload as u64;
        let mut out = Vec::with_capacity((end - offset) as usize);

        let mut pos = offset;
        while pos < end {
            let index = (pos / payload) as usize;
            let start = (pos % payload) as usize;
            let stop = (end - index as u64 * payload).min(payload) as usize;

            let entry = if index == 0 {
                head.clone()
            } else {
                self.read_file_sector(chain[index])?
            };
            out.extend_from_slice(&entry.data[start..stop]);

            pos += (stop - start) as u64;
        }

        Ok(out)
    }

    /// Write `data` at `offset` in the file at `path`
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        debug!("write() on {} ({} bytes at {})", path, data.len(), offset);
        let sector = self.require_file(path)?;
        self.write_at(sector, offset, data)
    }

    /// Write `data` at `offset` in the file starting at `sector`, growing the
    /// chain as needed. Returns the number of bytes written.
    ///
    /// Writing past the end leaves a zero-filled gap. When the chain cannot
    /// grow, sectors claimed by this call are released and the file is left
    /// as it was.
    pub fn write_at(&mut self, sector: u32, offset: u64, data: &[u8]) -> Result<usize> {
        self.require_file_sector(sector)?;
        if data.is_empty() {
            return Ok(0);
        }

        let end = offset.saturating_add(data.len() as u64);
        if end > u32::MAX as u64 {
            return Err(MarfsError::FileTooLarge(end));
        }

        let (head, mut chain) = self.file_chain(sector)?;
        let needed = self.sectors_for(end);
        if needed > chain.len() {
            self.extend_file_chain(&mut chain, needed)?;
        }

        let payload = self.layout.file_payload as u64;
        let mut written = 0usize;
        while written < data.len() {
            let pos = offset + written as u64;
            let index = (pos / payload) as usize;
            let start = (pos % payload) as usize;
            let count = (data.len() - written).min(payload as usize - start);

            let mut entry = self.read_file_sector(chain[index])?;
            entry.data[start..start + count].copy_from_slice(&data[written..written + count]);
            if index == 0 {
                entry.size = entry.size.max(end as u32);
            }
            self.write_file_sector(&entry)?;

            written += count;
        }

        if end > head.size as u64 && offset / payload > 0 {
            let mut entry = self.read_file_sector(sector)?;
            entry.size = end as u32;
            self.write_file_sector(&entry)?;
        }

        Ok(written)
    }

    /// Set the size of the file at `path`
    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        debug!("truncate() on {} to {}", path, size);
        let sector = self.require_file(path)?;
        self.truncate_at(sector, size)
    }

    /// Set the size of the file starting at `sector`. Shrinking zeroes the
    /// cut-off bytes and releases sectors no longer needed; growing
    /// zero-fills.
    pub fn truncate_at(&mut self, sector: u32, size: u64) -> Result<()> {
        if size > u32::MAX as u64 {
            return Err(MarfsError::FileTooLarge(size));
        }
        self.require_file_sector(sector)?;

        let (head, mut chain) = self.file_chain(sector)?;
        let current = head.size as u64;
        let needed = self.sectors_for(size);

        if size > current {
            if needed > chain.len() {
                self.extend_file_chain(&mut chain, needed)?;
            }
        } else if size < current {
            let payload = self.layout.file_payload as u64;
            let cut = (size % payload) as usize;
            let tail_index = (size / payload) as usize;

            // zero the rest of the sector holding the new end
            if tail_index < chain.len() && (cut > 0 || tail_index == 0) {
                let mut entry = self.read_file_sector(chain[tail_index])?;
                entry.data[cut..].fill(0);
                self.write_file_sector(&entry)?;
            }

            if needed < chain.len() {
                self.shrink_file_chain(&chain, needed)?;
            }
        }

        let mut entry = self.read_file_sector(sector)?;
        entry.size = size as u32;
        self.write_file_sector(&entry)
    }

    /// Grow `chain` to `needed` sectors. New sectors are linked before the
    /// old tail points at them, and all of them are released again if any
    /// step fails.
    fn extend_file_chain(&mut self, chain: &mut Vec<u32>, needed: usize) -> Result<()> {
        let tail = *chain
            .last()
            .ok_or_else(|| MarfsError::Corrupted("file chain is empty".to_string()))?;

        let mut added = Vec::with_capacity(needed - chain.len());
        let result = self.link_new_sectors(tail, needed - chain.len(), &mut added);

        if let Err(e) = result {
            warn!(
                "could not grow file at sector {}, releasing {} sectors",
                chain[0],
                added.len()
            );
            for sector in &added {
                if let Err(release_err) = self.release(*sector) {
                    warn!("could not release sector {}: {}", sector, release_err);
                }
            }
            return Err(e);
        }

        debug!("file at sector {} grew by {} sectors", chain[0], added.len());
        chain.extend(added);
        Ok(())
    }

    fn link_new_sectors(&mut self, tail: u32, count: usize, added: &mut Vec<u32>) -> Result<()> {
        for _ in 0..count {
            added.push(self.allocate(EntryKind::File)?);
        }

        let mut prev = tail;
        for (i, &sector) in added.iter().enumerate() {
            let mut entry = FileEntry::new(sector, &self.layout);
            entry.header.prev = prev;
            entry.header.next = added.get(i + 1).copied().unwrap_or(END);
            self.write_file_sector(&entry)?;
            prev = sector;
        }

        let mut last = self.read_file_sector(tail)?;
        last.header.next = added[0];
        self.write_file_sector(&last)
    }

    /// Cut `chain` down to its first `keep` sectors and release the rest
    fn shrink_file_chain(&mut self, chain: &[u32], keep: usize) -> Result<()> {
        let mut tail = self.read_file_sector(chain[keep - 1])?;
        tail.header.next = END;
        self.write_file_sector(&tail)?;

        for &sector in &chain[keep..] {
            self.release(sector)?;
        }

        debug!(
            "file at sector {} shrank by {} sectors",
            chain[0],
            chain.len() - keep
        );
        Ok(())
    }
}
