#![forbid(unsafe_code)]
//! Error types for e2kit.
//!
//! Defines `E2Error` and a `Result<T>` alias used throughout the workspace.
//! Includes errno mappings so the command-line tools can exit with the
//! negative-errno convention.

use e2kit_types::ParseError;
use thiserror::Error;

/// Unified error type for all e2kit operations.
#[derive(Debug, Error)]
pub enum E2Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("file exists: {0}")]
    Exists(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("no space left on image")]
    NoSpace,

    #[error("corrupt image at block {block}: {detail}")]
    Corrupt { block: u32, detail: String },

    #[error("invalid on-disk format: {0}")]
    Parse(#[from] ParseError),
}

impl E2Error {
    /// Convert this error into a POSIX errno.
    ///
    /// The tools exit with the negated value, matching `return -ENOENT;`
    /// style exit codes.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::InvalidArgument(_) | Self::Parse(_) => libc::EINVAL,
            Self::NotFound(_) => libc::ENOENT,
            Self::Exists(_) => libc::EEXIST,
            Self::NotDirectory(_) => libc::ENOTDIR,
            Self::IsDirectory(_) => libc::EISDIR,
            Self::NoSpace => libc::ENOSPC,
            Self::Corrupt { .. } => libc::EIO,
        }
    }
}

/// Result alias using `E2Error`.
pub type Result<T> = std::result::Result<T, E2Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(E2Error::NotFound("/x".into()).to_errno(), libc::ENOENT);
        assert_eq!(E2Error::Exists("/x".into()).to_errno(), libc::EEXIST);
        assert_eq!(E2Error::IsDirectory("/d".into()).to_errno(), libc::EISDIR);
        assert_eq!(E2Error::NoSpace.to_errno(), libc::ENOSPC);
        assert_eq!(
            E2Error::Corrupt {
                block: 9,
                detail: "bad rec_len".into()
            }
            .to_errno(),
            libc::EIO
        );
    }

    #[test]
    fn io_errno_passthrough() {
        let err = E2Error::Io(std::io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(err.to_errno(), libc::EACCES);
    }
}
