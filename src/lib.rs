//! # MarFS - A Minimal Sector-Based Filesystem
//!
//! `marfs` stores a hierarchical filesystem inside a single image file that
//! is divided into fixed-size sectors:
//!
//! - **Sector 0** holds the header: magic, version, sector size, sector
//!   count and the root directory pointer
//! - **Every other sector** is free, part of a directory, or part of a file
//! - **Oversized entries** span several sectors linked into a chain
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use marfs::{format_path, Result};
//!
//! # fn main() -> Result<()> {
//! // The image must already exist with the desired size
//! let mut vol = format_path("disk.img", 1024)?;
//!
//! vol.create_dir("/docs")?;
//! vol.create_file("/docs/readme.txt")?;
//! vol.write("/docs/readme.txt", 0, b"Hello, World!")?;
//!
//! let content = vol.read("/docs/readme.txt", 0, 64)?;
//! assert_eq!(content, b"Hello, World!");
//!
//! vol.sync()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Driver Integration
//!
//! Host filesystem drivers call into the [`Operations`] trait, which
//! [`MarFs`] implements over a shared, lock-protected [`Volume`]. With the
//! `fuse` feature enabled, [`fuse::MarfsFuse`] adapts it to FUSE.

pub mod config;
pub mod core;
pub mod ops;

#[cfg(feature = "fuse")]
pub mod fuse;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{allocator, dir, entry, error, file, format, header, io, path, volume};

pub use crate::config::{Config, FormatConfig, MountConfig};
pub use crate::core::{
    dir::DirListing,
    entry::{EntryHeader, EntryKind, Layout},
    error::{MarfsError, Result},
    format::{format, format_path, format_with},
    header::{Header, Pointer, DEFAULT_SECTOR_SIZE, END, MAGIC, VERSION},
    io::{BlockDevice, SectorStore},
    volume::{Metadata, Volume, VolumeOptions, VolumeStats},
};
pub use crate::ops::{MarFs, Operations};
