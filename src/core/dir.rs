//! Directory operations
//!
//! Records are appended to the last sector of a directory chain; a full
//! last sector gets a new overflow sector linked after it. Removing a
//! record moves the chain's last record into the hole, so only the last
//! sector can be partially filled and an emptied overflow sector is
//! unlinked and released straight away.

use crate::entry::{DirEntry, DirRecord, EntryHeader, EntryKind};
use crate::error::{MarfsError, Result};
use crate::header::{Pointer, END};
use crate::io::BlockDevice;
use crate::path::{validate_name, RecordSlot};
use crate::volume::Volume;
use tracing::{debug, warn};

/// One child of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub name: String,
    pub kind: EntryKind,
    pub sector: u32,
}

impl<D: BlockDevice> Volume<D> {
    /// Children of the directory starting at `dir`, in stored order
    pub fn read_dir_at(&self, dir: u32) -> Result<Vec<DirListing>> {
        let mut listing = Vec::new();
        for sector in self.dir_sectors(dir)? {
            for record in sector.records {
                let child = self.entry_header(record.pointer.head)?;
                listing.push(DirListing {
                    name: record.name_lossy(),
                    kind: child.kind,
                    sector: child.id,
                });
            }
        }
        Ok(listing)
    }

    /// Children of the directory at `path`
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirListing>> {
        let dir = self.require_dir(path)?;
        self.read_dir_at(dir)
    }

    /// Names in the directory at `path`, led by `.` and `..`
    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        debug!("readdir() on {}", path);
        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(self.read_dir(path)?.into_iter().map(|entry| entry.name));
        Ok(names)
    }

    fn require_dir(&self, path: &str) -> Result<u32> {
        let header = self
            .resolve(path)?
            .ok_or_else(|| MarfsError::NotFound(path.to_string()))?;
        if !header.is_dir() {
            return Err(MarfsError::NotADirectory(path.to_string()));
        }
        Ok(header.id)
    }

    /// True when the directory chain at `dir` holds no records
    pub fn is_dir_empty(&self, dir: u32) -> Result<bool> {
        let found = self.walk_dir(dir, |sector| (!sector.records.is_empty()).then_some(()))?;
        Ok(found.is_none())
    }

    /// Create an empty file at `path`
    pub fn create_file(&mut self, path: &str) -> Result<EntryHeader> {
        debug!("create() on {}", path);
        let (parent, name) = self.parent_dir(path)?;
        self.create_at(parent, name, EntryKind::File)
    }

    /// Create an empty directory at `path`
    pub fn create_dir(&mut self, path: &str) -> Result<EntryHeader> {
        debug!("mkdir() on {}", path);
        let (parent, name) = self.parent_dir(path)?;
        self.create_at(parent, name, EntryKind::Directory)
    }

    /// Create an entry named `name` in the directory starting at `parent`
    pub fn create_at(&mut self, parent: u32, name: &str, kind: EntryKind) -> Result<EntryHeader> {
        validate_name(name)?;
        if kind == EntryKind::Empty {
            return Err(MarfsError::InvalidArgument(
                "cannot create an empty entry".to_string(),
            ));
        }

        if !self.entry_header(parent)?.is_dir() {
            return Err(MarfsError::NotADirectory(name.to_string()));
        }
        if self.find_record(parent, name)?.is_some() {
            return Err(MarfsError::AlreadyExists(name.to_string()));
        }

        let child = self.allocate(kind)?;
        if let Err(e) = self.append_record(parent, DirRecord::new(name.as_bytes(), child)) {
            if let Err(release_err) = self.release(child) {
                warn!("could not release sector {}: {}", child, release_err);
            }
            return Err(e);
        }

        debug!("created {:?} {} at sector {}", kind, name, child);
        Ok(EntryHeader::new(kind, child))
    }

    /// Append a record to the last sector of the chain at `dir`, growing
    /// the chain when that sector is full.
    fn append_record(&mut self, dir: u32, record: DirRecord) -> Result<()> {
        let mut last = self
            .dir_sectors(dir)?
            .pop()
            .ok_or_else(|| MarfsError::Corrupted(format!("directory {} has no sectors", dir)))?;

        if !last.is_full(&self.layout) {
            last.records.push(record);
            return self.write_dir_sector(&last);
        }

        let overflow = self.allocate(EntryKind::Directory)?;
        let mut next = DirEntry::new(overflow);
        next.header.prev = last.header.id;
        next.records.push(record);
        self.write_dir_sector(&next)?;

        last.header.next = overflow;
        self.write_dir_sector(&last)?;

        debug!("directory {} grew overflow sector {}", dir, overflow);
        Ok(())
    }

    /// Remove the record at `slot` from the chain at `dir`
    fn remove_record(&mut self, dir: u32, slot: &RecordSlot) -> Result<()> {
        let mut sectors = self.dir_sectors(dir)?;
        let target = sectors
            .iter()
            .position(|s| s.header.id == slot.sector)
            .ok_or_else(|| {
                MarfsError::Corrupted(format!(
                    "sector {} is not part of directory {}",
                    slot.sector, dir
                ))
            })?;
        let last = sectors.len() - 1;

        let moved = sectors[last].records.pop().ok_or_else(|| {
            MarfsError::Corrupted(format!(
                "directory {} ends in an empty sector",
                dir
            ))
        })?;

        let removed_last = target == last && slot.index == sectors[last].records.len();
        if !removed_last {
            let hole = sectors[target].records.get_mut(slot.index).ok_or_else(|| {
                MarfsError::Corrupted(format!(
                    "record {} missing from sector {}",
                    slot.index, slot.sector
                ))
            })?;
            *hole = moved;
            if target != last {
                self.write_dir_sector(&sectors[target])?;
            }
        }

        if sectors[last].records.is_empty() && last > 0 {
            let emptied = sectors[last].header.id;
            sectors[last - 1].header.next = END;
            self.write_dir_sector(&sectors[last - 1])?;
            self.release(emptied)?;
            debug!("directory {} dropped overflow sector {}", dir, emptied);
        } else {
            self.write_dir_sector(&sectors[last])?;
        }

        Ok(())
    }

    /// Remove the file at `path` and release its sectors
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        debug!("unlink() on {}", path);
        let (parent, name) = self.parent_dir(path)?;
        self.remove_at(parent, name, EntryKind::File)
    }

    /// Remove the empty directory at `path`
    pub fn remove_dir(&mut self, path: &str) -> Result<()> {
        debug!("rmdir() on {}", path);
        let (parent, name) = self.parent_dir(path)?;
        self.remove_at(parent, name, EntryKind::Directory)
    }

    /// Remove `name` from the directory at `parent`, requiring it to be of
    /// kind `expected`.
    pub fn remove_at(&mut self, parent: u32, name: &str, expected: EntryKind) -> Result<()> {
        let slot = self
            .find_record(parent, name)?
            .ok_or_else(|| MarfsError::NotFound(name.to_string()))?;
        let child = self.entry_header(slot.record.pointer.head)?;

        match (expected, child.kind) {
            (EntryKind::File, EntryKind::Directory) => {
                return Err(MarfsError::IsADirectory(name.to_string()))
            }
            (EntryKind::Directory, EntryKind::File) => {
                return Err(MarfsError::NotADirectory(name.to_string()))
            }
            _ => {}
        }

        if child.is_dir() && !self.is_dir_empty(child.id)? {
            return Err(MarfsError::DirectoryNotEmpty(name.to_string()));
        }

        self.remove_record(parent, &slot)?;
        self.release_chain(child.id, child.kind)?;

        debug!("removed {} (sector {})", name, child.id);
        Ok(())
    }

    /// Move or rename the entry at `from` to `to`
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        debug!("rename() on {} -> {}", from, to);
        let (parent, name) = self.parent_dir(from)?;
        let (new_parent, new_name) = self.parent_dir(to)?;
        self.rename_at(parent, name, new_parent, new_name)
    }

    /// Move `name` in directory `parent` to `new_name` in `new_parent`
    ///
    /// An existing destination is replaced when the kinds allow it (file
    /// over file, directory over empty directory).
    pub fn rename_at(
        &mut self,
        parent: u32,
        name: &str,
        new_parent: u32,
        new_name: &str,
    ) -> Result<()> {
        validate_name(new_name)?;

        let source = self
            .find_record(parent, name)?
            .ok_or_else(|| MarfsError::NotFound(name.to_string()))?;
        let moving = self.entry_header(source.record.pointer.head)?;

        if !self.entry_header(new_parent)?.is_dir() {
            return Err(MarfsError::NotADirectory(new_name.to_string()));
        }
        if moving.is_dir() && self.is_within(moving.id, new_parent)? {
            return Err(MarfsError::InvalidArgument(format!(
                "cannot move {} inside itself",
                name
            )));
        }

        match self.find_record(new_parent, new_name)? {
            Some(target) => {
                let replaced = self.entry_header(target.record.pointer.head)?;
                if replaced.id == moving.id {
                    return Ok(());
                }

                match (moving.kind, replaced.kind) {
                    (EntryKind::File, EntryKind::Directory) => {
                        return Err(MarfsError::IsADirectory(new_name.to_string()))
                    }
                    (EntryKind::Directory, EntryKind::File) => {
                        return Err(MarfsError::NotADirectory(new_name.to_string()))
                    }
                    (EntryKind::Directory, EntryKind::Directory)
                        if !self.is_dir_empty(replaced.id)? =>
                    {
                        return Err(MarfsError::DirectoryNotEmpty(new_name.to_string()))
                    }
                    _ => {}
                }

                let mut sector = self.read_dir_sector(target.sector)?;
                sector.records[target.index].pointer = Pointer::to(moving.id);
                self.write_dir_sector(&sector)?;

                self.remove_record(parent, &source)?;
                self.release_chain(replaced.id, replaced.kind)?;
            }
            None if parent == new_parent => {
                let mut sector = self.read_dir_sector(source.sector)?;
                sector.records[source.index].name = new_name.as_bytes().to_vec();
                self.write_dir_sector(&sector)?;
            }
            None => {
                let record = DirRecord {
                    name: new_name.as_bytes().to_vec(),
                    pointer: source.record.pointer,
                };
                self.append_record(new_parent, record)?;
                self.remove_record(parent, &source)?;
            }
        }

        debug!("renamed {} -> {} (sector {})", name, new_name, moving.id);
        Ok(())
    }

    /// True when `sector` is the directory `dir` or lies somewhere below it
    pub fn is_within(&self, dir: u32, sector: u32) -> Result<bool> {
        if dir == sector {
            return Ok(true);
        }

        let mut pending = vec![dir];
        let mut visited = 0u32;

        while let Some(current) = pending.pop() {
            visited += 1;
            if visited > self.header.entry_count {
                return Err(MarfsError::Corrupted(format!(
                    "directory tree below {} loops",
                    dir
                )));
            }

            for entry in self.dir_sectors(current)? {
                for record in entry.records {
                    let child = record.pointer.head;
                    if child == sector {
                        return Ok(true);
                    }
                    if self.entry_header(child)?.is_dir() {
                        pending.push(child);
                    }
                }
            }
        }

        Ok(false)
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
    fn test_create_and_list() {
        let mut vol = volume(8);
        vol.create_file("/a.txt").unwrap();
        vol.create_dir("/docs").unwrap();

        assert_eq!(vol.list("/").unwrap(), vec![".", "..", "a.txt", "docs"]);
        assert!(vol.list("/docs").unwrap().len() == 2);
    }

    #[test]
    fn test_create_existing_fails() {
        let mut vol = volume(8);
        vol.create_file("/a.txt").unwrap();
        assert!(matches!(
            vol.create_file("/a.txt"),
            Err(MarfsError::AlreadyExists(_))
        ));
        assert!(matches!(
            vol.create_dir("/a.txt"),
            Err(MarfsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_overflow_sector_is_linked() {
        let mut vol = volume(40);
        let capacity = vol.layout().dir_capacity;
        for i in 0..=capacity {
            vol.create_file(&format!("/f{}", i)).unwrap();
        }

        let chain = vol.chain(vol.root(), EntryKind::Directory).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(vol.read_dir("/").unwrap().len(), capacity + 1);
        assert!(vol.exists(&format!("/f{}", capacity)).unwrap());
    }

    #[test]
    fn test_remove_compacts_chain() {
        let mut vol = volume(40);
        let capacity = vol.layout().dir_capacity;
        for i in 0..=capacity {
            vol.create_file(&format!("/f{}", i)).unwrap();
        }

        // removing from the head sector pulls the overflow record into the hole
        vol.remove_file("/f0").unwrap();
        let chain = vol.chain(vol.root(), EntryKind::Directory).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(vol.exists(&format!("/f{}", capacity)).unwrap());
        assert!(!vol.exists("/f0").unwrap());
        assert_eq!(vol.read_dir("/").unwrap().len(), capacity);
    }

    #[test]
    fn test_remove_kind_checks() {
        let mut vol = volume(8);
        vol.create_dir("/d").unwrap();
        vol.create_file("/d/f").unwrap();
        vol.create_file("/f").unwrap();

        assert!(matches!(vol.remove_file("/d"), Err(MarfsError::IsADirectory(_))));
        assert!(matches!(vol.remove_dir("/f"), Err(MarfsError::NotADirectory(_))));
        assert!(matches!(
            vol.remove_dir("/d"),
            Err(MarfsError::DirectoryNotEmpty(_))
        ));
        assert!(matches!(vol.remove_file("/nope"), Err(MarfsError::NotFound(_))));
        assert!(matches!(vol.remove_dir("/"), Err(MarfsError::InvalidArgument(_))));

        vol.remove_file("/d/f").unwrap();
        vol.remove_dir("/d").unwrap();
        assert_eq!(vol.list("/").unwrap(), vec![".", "..", "f"]);
    }

    #[test]
    fn test_removed_sectors_are_released() {
        let mut vol = volume(8);
        let before = vol.stats().unwrap().free_sectors;
        vol.create_dir("/d").unwrap();
        assert_eq!(vol.stats().unwrap().free_sectors, before - 1);

        vol.remove_dir("/d").unwrap();
        assert_eq!(vol.stats().unwrap().free_sectors, before);
    }

    #[test]
    fn test_rename_in_place() {
        let mut vol = volume(8);
        let file = vol.create_file("/old").unwrap();
        vol.rename("/old", "/new").unwrap();

        assert!(!vol.exists("/old").unwrap());
        assert_eq!(vol.resolve("/new").unwrap().unwrap().id, file.id);
    }

    #[test]
    fn test_rename_across_directories() {
        let mut vol = volume(8);
        vol.create_dir("/a").unwrap();
        vol.create_dir("/b").unwrap();
        let file = vol.create_file("/a/x").unwrap();

        vol.rename("/a/x", "/b/y").unwrap();
        assert!(vol.read_dir("/a").unwrap().is_empty());
        assert_eq!(vol.resolve("/b/y").unwrap().unwrap().id, file.id);
    }

    #[test]
    fn test_rename_replaces_file() {
        let mut vol = volume(8);
        let src = vol.create_file("/src").unwrap();
        let dst = vol.create_file("/dst").unwrap();

        vol.rename("/src", "/dst").unwrap();
        assert_eq!(vol.resolve("/dst").unwrap().unwrap().id, src.id);
        assert_eq!(vol.entry_header(dst.id).unwrap().kind, EntryKind::Empty);
        assert_eq!(vol.list("/").unwrap(), vec![".", "..", "dst"]);
    }

    #[test]
    fn test_rename_into_own_subtree_rejected() {
        let mut vol = volume(8);
        vol.create_dir("/a").unwrap();
        vol.create_dir("/a/b").unwrap();

        assert!(matches!(
            vol.rename("/a", "/a/b/c"),
            Err(MarfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            vol.rename("/a", "/a/c"),
            Err(MarfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rename_kind_conflicts() {
        let mut vol = volume(10);
        vol.create_dir("/d").unwrap();
        vol.create_dir("/full").unwrap();
        vol.create_file("/full/x").unwrap();
        vol.create_file("/f").unwrap();

        assert!(matches!(vol.rename("/f", "/d"), Err(MarfsError::IsADirectory(_))));
        assert!(matches!(vol.rename("/d", "/f"), Err(MarfsError::NotADirectory(_))));
        assert!(matches!(
            vol.rename("/d", "/full"),
            Err(MarfsError::DirectoryNotEmpty(_))
        ));
        assert!(matches!(
            vol.rename("/missing", "/z"),
            Err(MarfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_rename_onto_itself_is_noop() {
        let mut vol = volume(8);
        vol.create_file("/same").unwrap();
        vol.rename("/same", "/same").unwrap();
        assert!(vol.exists("/same").unwrap());
    }
}
