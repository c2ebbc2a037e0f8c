use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Invalid page size: {0}")]
    InvalidPageSize(u32),

    #[error("Invalid page type: {0}")]
    InvalidPageType(u8),

    #[error("Invalid index type: {0}")]
    InvalidIndexType(u8),

    #[error("Page checksum verification failed (page {0})")]
    ChecksumMismatch(u64),

    #[error("Record checksum verification failed (index {0})")]
    RecordChecksumMismatch(u64),

    #[error("Page {page} out of bounds (region has {pages} pages)")]
    PageOutOfBounds { page: u64, pages: u64 },

    #[error("Encoded block is {size} bytes but a page holds at most {capacity}")]
    RecordTooLarge { size: usize, capacity: usize },

    #[error("Archive capacity exceeded")]
    CapacityExceeded,

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Corrupted archive: {0}")]
    Corrupted(String),

    #[error("Region is already initialized")]
    AlreadyInitialized,

    #[error("Region is not initialized")]
    NotInitialized,

    #[error("The caller is not the owner of the archive")]
    NotOwner,

    #[error("No block source answers callback {0}")]
    UnknownCallback(String),

    #[error("Redirection chain exceeded {0} hops")]
    TooManyRedirections(usize),

    #[error("Archive service has stopped")]
    ServiceStopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
