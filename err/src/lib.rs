//! Error taxonomy shared by every crate in the workspace.

/// Every failure surfaced by the FATX/SVOD core falls into exactly one of
/// these kinds. No error is retried internally; a write-path failure may
/// leave the volume inconsistent (see the crate-level Non-goals).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),
    #[error("seek or access beyond a logical or physical end")]
    OutOfRange,
    #[error("not enough free clusters to satisfy the allocation")]
    OutOfSpace,
    #[error("cluster chain is inconsistent: {0}")]
    BadChain(&'static str),
    #[error("entry name exceeds 42 bytes")]
    NameTooLong,
    #[error("unsupported SVOD content: {0}")]
    UnsupportedContent(&'static str),
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("resign requested on a non-CON volume")]
    NotResignable,
    #[error("data file directory does not exist")]
    DirectoryMissing,
    #[error("data file directory is empty")]
    EmptyVolume,
    #[error("structurally invalid on-disk data: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
