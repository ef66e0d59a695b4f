//! Image formatting
//!
//! Formatting wipes the entry header of every sector after the header
//! sector, writes a fresh header and an empty root directory in sector 1.
//! Sector payloads are left alone; an empty header is enough to mark a
//! sector free.

use crate::entry::{DirEntry, Layout, ENTRY_HEADER_SIZE};
use crate::error::{MarfsError, Result};
use crate::header::{validate_sector_size, Header, END};
use crate::io::{device_len, BlockDevice, SectorStore};
use crate::volume::{Volume, VolumeOptions};
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Format `device` with default options and return the open volume
pub fn format<D: BlockDevice>(device: D, sector_size: u32) -> Result<Volume<D>> {
    format_with(device, sector_size, &VolumeOptions::default())
}

/// Format `device` into `device_len / sector_size` sectors
///
/// Fails without writing anything when the device cannot hold the header
/// sector and the root directory.
pub fn format_with<D: BlockDevice>(
    mut device: D,
    sector_size: u32,
    options: &VolumeOptions,
) -> Result<Volume<D>> {
    validate_sector_size(sector_size)?;
    let layout = Layout::new(sector_size)?;

    let size = device_len(&mut device)?;
    let minimum = 2 * sector_size as u64;
    if size < minimum {
        return Err(MarfsError::ImageTooSmall { size, minimum });
    }

    let count = size / sector_size as u64;
    if count >= END as u64 {
        return Err(MarfsError::InvalidArgument(format!(
            "{} sectors exceed the addressable range",
            count
        )));
    }
    let count = count as u32;

    let header = Header::new(sector_size, count);
    let store = SectorStore::new(device, sector_size, count, options.cache_sectors);

    let blank = [0u8; ENTRY_HEADER_SIZE];
    for sector in 1..count {
        store.write(sector, &blank)?;
    }

    store.write(0, &header.to_bytes())?;
    store.write(header.root.head, &DirEntry::new(header.root.head).to_bytes(&layout))?;
    store.flush()?;

    info!(
        "formatted MarFS image: {} sectors of {} bytes",
        count, sector_size
    );
    Ok(Volume::from_parts(header, layout, store))
}

/// Format an existing image file in place
pub fn format_path<P: AsRef<Path>>(path: P, sector_size: u32) -> Result<Volume<File>> {
    let path = path.as_ref();
    info!("formatting {}", path.display());
    format(crate::io::open_image(path, false)?, sector_size)
}
