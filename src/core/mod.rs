//! MarFS on-disk format and filesystem engine

pub mod allocator;
pub mod dir;
pub mod entry;
pub mod error;
pub mod file;
pub mod format;
pub mod header;
pub mod io;
pub mod path;
pub mod volume;

pub use volume::Volume;
