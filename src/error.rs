use thiserror::Error;

/// Error kinds returned by every mount/read operation in this crate.
///
/// Variants map onto the seven language-neutral error kinds of the on-disk
/// format contract: I/O, checksum, format, not-found, out-of-range,
/// permission, and unsupported-feature.
#[derive(Error, Debug)]
pub enum ApfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic: expected 0x{expected:08X}, found 0x{found:08X}")]
    InvalidMagic { expected: u32, found: u32 },

    #[error("checksum mismatch on object {oid:#x} (type {otype:#x})")]
    ChecksumMismatch { oid: u64, otype: u16 },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid B-tree: {0}")]
    InvalidBTree(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("out of range: offset {offset} size {size} exceeds {limit}")]
    OutOfRange { offset: u64, size: u64, limit: u64 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("no volume found in container")]
    NoVolume,
}

pub type Result<T> = std::result::Result<T, ApfsError>;
