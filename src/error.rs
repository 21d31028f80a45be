//! Error types for the tick store.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("File version {found} is newer than this build ({current})")]
    VersionTooNew { found: String, current: String },

    #[error("File version {found} predates the oldest supported ({oldest})")]
    VersionTooOld { found: String, oldest: String },

    #[error("File left dirty by an unclosed session (open tolerant to repair)")]
    DirtyFile,

    #[error("Page cache full ({needed} slots needed, {free} free)")]
    CacheFull { needed: usize, free: usize },

    #[error("Symbol '{name}' already bound to index {bound}, cannot rebind to {requested}")]
    SymbolConflict {
        name: String,
        bound: u16,
        requested: u16,
    },

    #[error("Symbol table overflow (more than {0} symbols)")]
    SymbolOverflow(usize),

    #[error("Symbol index {0} not found")]
    SymbolNotFound(u16),

    #[error("Record index {0} out of range")]
    RecordNotFound(u64),

    #[error("Operation not allowed in read-only mode")]
    ReadOnlyMode,

    #[error("Sort error: {0}")]
    Sort(String),
}

impl StoreError {
    /// Whether the condition is tolerable for repair tooling: old
    /// versions and interrupted sessions are auto-upgradeable, real
    /// corruption (and files from newer tools) is not.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            StoreError::VersionTooOld { .. } | StoreError::DirtyFile
        )
    }
}
