//! Path resolution over directory chains
//!
//! Paths are slash separated; repeated and leading slashes are ignored.
//! Resolution keeps two cursors: a position in the path and the directory
//! sector currently being scanned. A segment is looked up across the whole
//! directory chain before the walk descends into the matching child.

use crate::entry::{DirRecord, EntryHeader, EntryKind, NAME_LENGTH};
use crate::error::{MarfsError, Result};
use crate::io::BlockDevice;
use crate::volume::Volume;

/// Location of a directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSlot {
    /// Directory sector holding the record
    pub sector: u32,
    /// Index within that sector
    pub index: usize,
    pub record: DirRecord,
}

/// Reject names a directory record cannot hold
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(MarfsError::InvalidName(name.to_string()));
    }

    if name.len() > NAME_LENGTH {
        return Err(MarfsError::NameTooLong(name.to_string()));
    }

    Ok(())
}

/// Split a path into its parent path and final name
///
/// Trailing slashes are ignored. The root itself has no parent and is
/// rejected.
pub fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(MarfsError::InvalidArgument(format!(
            "{:?} names the root directory",
            path
        )));
    }

    let (parent, name) = match trimmed.rfind('/') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    };
    let parent = if parent.is_empty() { "/" } else { parent };

    validate_name(name)?;
    Ok((parent, name))
}

impl<D: BlockDevice> Volume<D> {
    /// Resolve `path` starting from the root directory
    ///
    /// Returns `Ok(None)` when the path does not name an entry, including
    /// when it tries to descend through a file.
    pub fn resolve(&self, path: &str) -> Result<Option<EntryHeader>> {
        self.resolve_from(path, self.header.root.head)
    }

    /// Resolve `path` relative to the entry starting at `start`
    pub fn resolve_from(&self, path: &str, start: u32) -> Result<Option<EntryHeader>> {
        let bytes = path.as_bytes();
        let mut pos = 0;
        let mut sector = start;

        loop {
            while pos < bytes.len() && bytes[pos] == b'/' {
                pos += 1;
            }

            let header = self.entry_header(sector)?;
            if pos == bytes.len() {
                return Ok(Some(header));
            }

            match header.kind {
                EntryKind::Directory => {}
                EntryKind::File => return Ok(None),
                EntryKind::Empty => {
                    return Err(MarfsError::Corrupted(format!(
                        "path {:?} leads to empty sector {}",
                        path, sector
                    )))
                }
            }

            let end = bytes[pos..]
                .iter()
                .position(|&b| b == b'/')
                .map_or(bytes.len(), |i| pos + i);

            match self.find_record_bytes(sector, &bytes[pos..end])? {
                Some(slot) => {
                    sector = slot.record.pointer.head;
                    pos = end;
                }
                None => return Ok(None),
            }
        }
    }

    /// Look up a single name in the directory starting at `dir`
    pub fn lookup(&self, dir: u32, name: &str) -> Result<Option<EntryHeader>> {
        match self.find_record(dir, name)? {
            Some(slot) => Ok(Some(self.entry_header(slot.record.pointer.head)?)),
            None => Ok(None),
        }
    }

    /// Find the record for `name` anywhere in the chain of directory `dir`
    pub fn find_record(&self, dir: u32, name: &str) -> Result<Option<RecordSlot>> {
        self.find_record_bytes(dir, name.as_bytes())
    }

    fn find_record_bytes(&self, dir: u32, name: &[u8]) -> Result<Option<RecordSlot>> {
        self.walk_dir(dir, |entry| {
            entry
                .records
                .iter()
                .position(|record| record.matches(name))
                .map(|index| RecordSlot {
                    sector: entry.header.id,
                    index,
                    record: entry.records[index].clone(),
                })
        })
    }

    /// Resolve the parent of `path` to a directory and return its first
    /// sector together with the final name.
    pub(crate) fn parent_dir<'p>(&self, path: &'p str) -> Result<(u32, &'p str)> {
        let (parent, name) = split_parent(path)?;

        let header = self
            .resolve(parent)?
            .ok_or_else(|| MarfsError::NotFound(parent.to_string()))?;

        if !header.is_dir() {
            return Err(MarfsError::NotADirectory(parent.to_string()));
        }

        Ok((header.id, name))
    }
}
