use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Signature not found: {0}")]
    SignatureNotFound(String),

    #[error("Address {address:#x} (+{len} bytes) is outside the module image")]
    OutOfImage { address: u64, len: usize },

    #[error("Failed to change memory protection at {address:#x}: {message}")]
    ProtectFailed { address: u64, message: String },

    #[error("Patch at {address:#x} is in an invalid state: {message}")]
    PatchState { address: u64, message: String },

    #[error("Module query failed: {0}")]
    Module(String),

    #[error("GPU call failed: {0}")]
    Gpu(String),

    #[error("Fence wait exceeded {0:?}")]
    FenceTimeout(Duration),

    #[error("Initialization did not finish within {0:?}")]
    InitTimeout(Duration),

    #[error("Initialization worker panicked")]
    InitPanicked,

    #[error("Operation is not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for Error {
    fn from(e: windows::core::Error) -> Self {
        Error::Gpu(format!("{} ({:#010X})", e.message(), e.code().0))
    }
}
