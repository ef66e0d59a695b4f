use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarfsError {
    #[error("Invalid magic in header: {0:?}")]
    InvalidMagic([u8; 6]),

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid sector size: {0} (must be a power of two between 128 and 65536)")]
    InvalidSectorSize(u32),

    #[error("{structure} encodes to {encoded} bytes, expected sector size {expected}")]
    LayoutMismatch {
        structure: &'static str,
        encoded: usize,
        expected: usize,
    },

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Image too small: {size} bytes, need at least {minimum}")]
    ImageTooSmall { size: u64, minimum: u64 },

    #[error("Sector {index} out of range (image has {count} sectors)")]
    SectorOutOfRange { index: u32, count: u32 },

    #[error("Invalid entry kind {kind} in sector {sector}")]
    InvalidEntryKind { sector: u32, kind: u32 },

    #[error("Image corrupted: {0}")]
    Corrupted(String),

    #[error("Out of space: no free sector left")]
    OutOfSpace,

    #[error("No such entry: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Name too long: {0} (max 32 bytes)")]
    NameTooLong(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("File too large: {0} bytes")]
    FileTooLarge(u64),

    #[error("Volume is mounted read-only")]
    ReadOnly,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl MarfsError {
    /// Host error number reported to the driver boundary
    pub fn errno(&self) -> i32 {
        match self {
            MarfsError::NotFound(_) => libc::ENOENT,
            MarfsError::AlreadyExists(_) => libc::EEXIST,
            MarfsError::NotADirectory(_) => libc::ENOTDIR,
            MarfsError::IsADirectory(_) => libc::EISDIR,
            MarfsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            MarfsError::OutOfSpace => libc::ENOSPC,
            MarfsError::NameTooLong(_) => libc::ENAMETOOLONG,
            MarfsError::InvalidName(_) | MarfsError::InvalidArgument(_) => libc::EINVAL,
            MarfsError::FileTooLarge(_) => libc::EFBIG,
            MarfsError::ReadOnly => libc::EROFS,
            _ => libc::EIO,
        }
    }

    /// True for errors that indicate a broken image or configuration rather
    /// than a rejected request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MarfsError::InvalidMagic(_)
                | MarfsError::UnsupportedVersion(_)
                | MarfsError::InvalidSectorSize(_)
                | MarfsError::LayoutMismatch { .. }
                | MarfsError::MalformedHeader(_)
                | MarfsError::ImageTooSmall { .. }
                | MarfsError::SectorOutOfRange { .. }
                | MarfsError::InvalidEntryKind { .. }
                | MarfsError::Corrupted(_)
                | MarfsError::OutOfSpace
                | MarfsError::Io(_)
                | MarfsError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MarfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(MarfsError::NotFound("/x".into()).errno(), libc::ENOENT);
        assert_eq!(MarfsError::AlreadyExists("/x".into()).errno(), libc::EEXIST);
        assert_eq!(MarfsError::NotADirectory("/x".into()).errno(), libc::ENOTDIR);
        assert_eq!(MarfsError::IsADirectory("/x".into()).errno(), libc::EISDIR);
        assert_eq!(
            MarfsError::DirectoryNotEmpty("/x".into()).errno(),
            libc::ENOTEMPTY
        );
        assert_eq!(MarfsError::OutOfSpace.errno(), libc::ENOSPC);
        assert_eq!(MarfsError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(MarfsError::Corrupted("cycle".into()).errno(), libc::EIO);
        assert_eq!(
            MarfsError::SectorOutOfRange { index: 9, count: 4 }.errno(),
            libc::EIO
        );
    }

    #[test]
    fn test_not_found_distinct_from_kind_mismatch() {
        let missing = MarfsError::NotFound("/a".into());
        let wrong_kind = MarfsError::NotADirectory("/a".into());
        assert_ne!(missing.errno(), wrong_kind.errno());
        assert_ne!(MarfsError::OutOfSpace.errno(), missing.errno());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(MarfsError::OutOfSpace.is_fatal());
        assert!(MarfsError::InvalidMagic(*b"nope\0\0").is_fatal());
        assert!(!MarfsError::NotFound("/a".into()).is_fatal());
        assert!(!MarfsError::AlreadyExists("/a".into()).is_fatal());
        assert!(!MarfsError::ReadOnly.is_fatal());
    }
}
