//! Common error types for Director components.

use std::fmt;

/// A specialized Result type for Director operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Director operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("kernel rejected operation: {}", errno_str(.errno))]
    KernelReject { errno: i32 },

    #[error("timed out waiting for kernel acknowledgment")]
    Timeout,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("dump interrupted: {0}")]
    DumpInterrupted(String),

    #[error("incomplete service identity: {0}")]
    IncompleteIdentity(String),

    #[error("unsupported address family: {0}")]
    UnsupportedAf(u16),

    #[error("bad address: {0}")]
    BadAddress(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

fn errno_str(errno: &i32) -> String {
    std::io::Error::from_raw_os_error(*errno).to_string()
}

impl Error {
    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a kernel rejection from a raw netlink error code.
    pub fn kernel_reject(errno: i32) -> Self {
        Error::KernelReject { errno }
    }

    /// Create a new decode error.
    pub fn decode(msg: impl fmt::Display) -> Self {
        Error::Decode(msg.to_string())
    }

    /// Create a new bad-address error.
    pub fn bad_address(msg: impl fmt::Display) -> Self {
        Error::BadAddress(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// The errno carried by a kernel rejection, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::KernelReject { errno } => Some(*errno),
            _ => None,
        }
    }

    /// Whether this error means the netlink channel itself has collapsed.
    ///
    /// Fatal errors require the transport to be reopened and the kernel
    /// state rebuilt; everything else is a per-operation failure that the
    /// next reconciliation cycle can retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Netlink(_) | Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Timeout.is_fatal());
        assert!(Error::netlink("socket closed").is_fatal());
        assert!(!Error::kernel_reject(libc::ENOENT).is_fatal());
        assert!(!Error::bad_address("short payload").is_fatal());
    }

    #[test]
    fn test_kernel_reject_errno() {
        let err = Error::kernel_reject(libc::EEXIST);
        assert_eq!(err.errno(), Some(libc::EEXIST));
        assert!(Error::Timeout.errno().is_none());
    }
}
