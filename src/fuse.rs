//! FUSE adapter
//!
//! Inode numbers are head sector indices, except that the root directory
//! must appear as FUSE inode 1. The root's head sector and sector 1 swap
//! places in the mapping, which is the identity on freshly formatted
//! images.

use crate::config::MountConfig;
use crate::entry::EntryKind;
use crate::error::{MarfsError, Result};
use crate::io::BlockDevice;
use crate::ops::{MarFs, Operations};
use crate::volume::Metadata;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::{c_int, EINVAL};
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

const FUSE_ROOT_ID: u64 = 1;

/// `fuser::Filesystem` over a shared MarFS volume
pub struct MarfsFuse<D: BlockDevice> {
    fs: MarFs<D>,
    ttl: Duration,
    uid: u32,
    gid: u32,
    mounted_at: SystemTime,
}

/// FUSE inode number for the entry whose head sector is `sector`
pub fn sector_to_ino(sector: u32, root: u32) -> u64 {
    if sector == root {
        FUSE_ROOT_ID
    } else if sector as u64 == FUSE_ROOT_ID {
        root as u64
    } else {
        sector as u64
    }
}

/// Head sector of the entry behind FUSE inode `ino`
pub fn ino_to_sector(ino: u64, root: u32) -> Result<u32> {
    if ino == FUSE_ROOT_ID {
        return Ok(root);
    }
    if ino == root as u64 {
        return Ok(FUSE_ROOT_ID as u32);
    }
    u32::try_from(ino).map_err(|_| MarfsError::NotFound(format!("inode {}", ino)))
}

impl<D: BlockDevice> MarfsFuse<D> {
    pub fn new(fs: MarFs<D>, config: &MountConfig) -> Self {
        MarfsFuse {
            fs,
            ttl: Duration::from_secs(config.attr_ttl_secs),
            uid: 0,
            gid: 0,
            mounted_at: SystemTime::now(),
        }
    }

    fn root(&self) -> u32 {
        self.fs.read_volume().root()
    }

    fn sector(&self, ino: u64) -> Result<u32> {
        ino_to_sector(ino, self.root())
    }

    fn attr(&self, meta: &Metadata, root: u32, blksize: u32) -> FileAttr {
        let (kind, perm, nlink) = match meta.kind {
            EntryKind::Directory => (FileType::Directory, 0o755, 2),
            _ => (FileType::RegularFile, 0o644, 1),
        };

        FileAttr {
            ino: sector_to_ino(meta.sector, root),
            size: meta.size,
            blocks: meta.size.div_ceil(512),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            flags: 0,
            blksize,
        }
    }

    fn attr_of(&self, sector: u32) -> Result<FileAttr> {
        let vol = self.fs.read_volume();
        let meta = vol.metadata_at(sector)?;
        Ok(self.attr(&meta, vol.root(), vol.header().sector_size))
    }

    fn lookup_attr(&self, parent: u64, name: &OsStr) -> Result<FileAttr> {
        let name = utf8(name)?;
        let dir = self.sector(parent)?;
        let child = self
            .fs
            .read_volume()
            .lookup(dir, name)?
            .ok_or_else(|| MarfsError::NotFound(name.to_string()))?;
        self.attr_of(child.id)
    }

    fn create_entry(&self, parent: u64, name: &OsStr, kind: EntryKind) -> Result<FileAttr> {
        let name = utf8(name)?;
        let dir = self.sector(parent)?;
        let header = self.fs.write_volume().create_at(dir, name, kind)?;
        self.attr_of(header.id)
    }

    fn remove_entry(&self, parent: u64, name: &OsStr, kind: EntryKind) -> Result<()> {
        let name = utf8(name)?;
        let dir = self.sector(parent)?;
        self.fs.write_volume().remove_at(dir, name, kind)
    }

    fn listing(&self, ino: u64) -> Result<Vec<(u64, FileType, String)>> {
        let vol = self.fs.read_volume();
        let root = vol.root();
        let dir = ino_to_sector(ino, root)?;
        if !vol.entry_header(dir)?.is_dir() {
            return Err(MarfsError::NotADirectory(format!("inode {}", ino)));
        }

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        for child in vol.read_dir_at(dir)? {
            let kind = match child.kind {
                EntryKind::Directory => FileType::Directory,
                _ => FileType::RegularFile,
            };
            entries.push((sector_to_ino(child.sector, root), kind, child.name));
        }
        Ok(entries)
    }
}

fn utf8(name: &OsStr) -> Result<&str> {
    name.to_str()
        .ok_or_else(|| MarfsError::InvalidName(name.to_string_lossy().into_owned()))
}

/// Translate an error for the kernel, logging the ones that point at a
/// damaged image or device.
fn errno(op: &str, e: &MarfsError) -> c_int {
    if e.is_fatal() {
        error!("{} failed: {}", op, e);
    } else {
        debug!("{} rejected: {}", op, e);
    }
    e.errno()
}

impl<D: BlockDevice> Filesystem for MarfsFuse<D> {
    fn init(&mut self, req: &Request, _config: &mut KernelConfig) -> std::result::Result<(), c_int> {
        self.uid = req.uid();
        self.gid = req.gid();
        self.fs.init().map_err(|e| errno("init", &e))
    }

    fn destroy(&mut self) {
        if let Err(e) = self.fs.destroy() {
            error!("could not sync image on unmount: {}", e);
        }
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_attr(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("lookup", &e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.sector(ino).and_then(|sector| self.attr_of(sector)) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(errno("getattr", &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let result = self.sector(ino).and_then(|sector| {
            if let Some(size) = size {
                debug!("truncate() on inode {} to {}", ino, size);
                self.fs.write_volume().truncate_at(sector, size)?;
            }
            // timestamps are not stored
            self.attr_of(sector)
        });

        match result {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(errno("setattr", &e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("open() on inode {}", ino);
        let result = self
            .sector(ino)
            .and_then(|sector| self.fs.read_volume().metadata_at(sector));

        match result {
            Ok(meta) if meta.is_dir() => reply.error(libc::EISDIR),
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(errno("open", &e)),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir() on inode {}", ino);
        let result = self
            .sector(ino)
            .and_then(|sector| self.fs.read_volume().metadata_at(sector));

        match result {
            Ok(meta) if meta.is_dir() => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(errno("opendir", &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir() on inode {} from {}", ino, offset);
        let entries = match self.listing(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno("readdir", &e));
                return;
            }
        };

        for (i, (child, kind, name)) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(*child, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let result = self.sector(ino).and_then(|sector| {
            self.fs
                .read_volume()
                .read_at(sector, offset as u64, size as usize)
        });

        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let result = self
            .sector(ino)
            .and_then(|sector| self.fs.write_volume().write_at(sector, offset as u64, data));

        match result {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno("write", &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        match self.create_entry(parent, name, EntryKind::File) {
            Ok(attr) => reply.created(&self.ttl, &attr, 0, 0, 0),
            Err(e) => reply.error(errno("create", &e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        match self.create_entry(parent, name, EntryKind::Directory) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("mkdir", &e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.remove_entry(parent, name, EntryKind::File) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("unlink", &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.remove_entry(parent, name, EntryKind::Directory) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rmdir", &e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let result = (|| {
            let name = utf8(name)?;
            let newname = utf8(newname)?;
            let from = self.sector(parent)?;
            let to = self.sector(newparent)?;
            self.fs.write_volume().rename_at(from, name, to, newname)
        })();

        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rename", &e)),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.fs.stats() {
            Ok(stats) => reply.statfs(
                stats.total_sectors as u64,
                stats.free_sectors as u64,
                stats.free_sectors as u64,
                stats.used_sectors as u64,
                stats.free_sectors as u64,
                stats.sector_size,
                crate::entry::NAME_LENGTH as u32,
                stats.sector_size,
            ),
            Err(e) => reply.error(errno("statfs", &e)),
        }
    }
}

/// Mount options from the configuration followed by `-o` style extras
pub fn mount_options(config: &MountConfig, extra: &[String]) -> Vec<MountOption> {
    let mut options = vec![MountOption::FSName(config.fsname.clone())];
    options.push(if config.read_only {
        MountOption::RO
    } else {
        MountOption::RW
    });
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }

    for opt in extra.iter().flat_map(|o| o.split(',')).filter(|o| !o.is_empty()) {
        let parsed = match opt {
            "ro" => MountOption::RO,
            "rw" => MountOption::RW,
            "allow_other" => MountOption::AllowOther,
            "auto_unmount" => MountOption::AutoUnmount,
            "default_permissions" => MountOption::DefaultPermissions,
            other => MountOption::CUSTOM(other.to_string()),
        };

        // a later ro/rw overrides the configured one
        if matches!(parsed, MountOption::RO | MountOption::RW) {
            options.retain(|o| !matches!(o, MountOption::RO | MountOption::RW));
        }
        if !options.contains(&parsed) {
            options.push(parsed);
        }
    }

    options
}

/// Whether the configuration and `-o` flags together ask for a read-only
/// mount
pub fn is_read_only(config: &MountConfig, extra: &[String]) -> bool {
    mount_options(config, extra).contains(&MountOption::RO)
}

/// Mount `fs` at `mountpoint` and serve requests until it is unmounted
pub fn mount<D, P>(fs: MarFs<D>, mountpoint: P, config: &MountConfig, extra: &[String]) -> Result<()>
where
    D: BlockDevice + 'static,
    P: AsRef<Path>,
{
    let options = mount_options(config, extra);
    info!(
        "mounting at {} with {:?}",
        mountpoint.as_ref().display(),
        options
    );

    let adapter = MarfsFuse::new(fs, config);
    fuser::mount2(adapter, mountpoint.as_ref(), &options).map_err(|e| {
        warn!("mount failed: {}", e);
        MarfsError::Io(e)
    })
}
