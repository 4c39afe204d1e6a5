//! Error types for buffer and session operations
//!
//! Every variant corresponds to one errno the device reports to callers.
//! Errors are terminal for the call that raised them; nothing is retried
//! internally.

use std::io;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Operation is not permitted by the session's access mode, or the
    /// session (or the whole device) is already closed.
    #[error("bad descriptor: {0}")]
    BadDescriptor(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Satisfying the write would need more than the configured ceiling.
    #[error("capacity exceeded: {required} bytes needed, ceiling is {max} bytes")]
    CapacityExceeded { required: u64, max: usize },

    /// The allocator refused a growth that was within the ceiling.
    #[error("out of memory while growing buffer to {0} bytes")]
    OutOfMemory(usize),

    #[error("unsupported control command {0:#x}")]
    Unsupported(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

pub const EBADF: i32 = 9;
pub const ENOMEM: i32 = 12;
pub const EINVAL: i32 = 22;
pub const ENOTTY: i32 = 25;

impl Error {
    /// Errno a character device would return for this error
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::BadDescriptor(_) => EBADF,
            Self::InvalidArgument(_) => EINVAL,
            Self::CapacityExceeded { .. } | Self::OutOfMemory(_) => ENOMEM,
            Self::Unsupported(_) => ENOTTY,
        }
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::BadDescriptor(_) | Self::InvalidArgument(_) => {
                embedded_io::ErrorKind::InvalidInput
            }
            Self::CapacityExceeded { .. } | Self::OutOfMemory(_) => {
                embedded_io::ErrorKind::OutOfMemory
            }
            Self::Unsupported(_) => embedded_io::ErrorKind::Unsupported,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::BadDescriptor(_) | Error::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Error::CapacityExceeded { .. } | Error::OutOfMemory(_) => io::ErrorKind::OutOfMemory,
            Error::Unsupported(_) => io::ErrorKind::Unsupported,
        };
        io::Error::new(kind, e)
    }
}
