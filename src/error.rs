//! Error types for transfers and server lifecycle.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Failure of a single photo transfer.
///
/// Always contained within the connection that produced it.
#[derive(Debug)]
pub enum TransferError {
    /// Peer closed the stream before the expected byte count arrived.
    IncompleteStream { expected: usize, received: usize },
    /// Declared payload size exceeds the configured limit.
    PayloadTooLarge { declared: u32, limit: u32 },
    /// Partition directory or photo file could not be written.
    Storage { path: PathBuf, source: io::Error },
    /// Socket read/write error.
    Io(io::Error),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::IncompleteStream { expected, received } => write!(
                f,
                "stream closed after {} of {} bytes",
                received, expected
            ),
            TransferError::PayloadTooLarge { declared, limit } => {
                write!(f, "declared payload {} bytes exceeds limit {}", declared, limit)
            }
            TransferError::Storage { path, source } => {
                write!(f, "failed to store '{}': {}", path.display(), source)
            }
            TransferError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Storage { source, .. } => Some(source),
            TransferError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::Io(e)
    }
}

/// Server startup and lifecycle errors.
#[derive(Debug)]
pub enum ServerError {
    /// Bind address did not parse or resolve.
    InvalidAddress { addr: String, source: io::Error },
    /// Socket creation, bind or listen failed.
    Bind { addr: SocketAddr, source: io::Error },
    /// `start` called on a running server.
    AlreadyStarted,
    /// `start` called after `stop`; a new instance is required.
    Stopped,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::InvalidAddress { addr, source } => {
                write!(f, "invalid bind address '{}': {}", addr, source)
            }
            ServerError::Bind { addr, source } => {
                write!(f, "failed to bind {}: {}", addr, source)
            }
            ServerError::AlreadyStarted => write!(f, "server is already running"),
            ServerError::Stopped => write!(f, "server has been stopped and cannot restart"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::InvalidAddress { source, .. } => Some(source),
            ServerError::Bind { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = TransferError::IncompleteStream {
            expected: 10,
            received: 3,
        };
        assert_eq!(e.to_string(), "stream closed after 3 of 10 bytes");

        let e = ServerError::InvalidAddress {
            addr: "nowhere".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such host"),
        };
        assert_eq!(e.to_string(), "invalid bind address 'nowhere': no such host");
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn test_io_conversion() {
        let e: TransferError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(e, TransferError::Io(_)));
        assert!(std::error::Error::source(&e).is_some());
    }
}
