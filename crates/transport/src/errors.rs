use crate::semaphore::SemaphoreError;
use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Caller error: oversized payload or an undersized output buffer.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No producer has created this channel yet; retry later.
    #[error("shared region not ready (no producer on this channel yet)")]
    NotReady,

    /// The peer speaks a different protocol; do not retry.
    #[error("protocol mismatch: magic={magic:#010x}, version={version}")]
    VersionMismatch { magic: u32, version: u32 },

    /// A semaphore wait failed for a reason other than timeout; may retry.
    #[error("transient wait failure: {0}")]
    Transient(Errno),

    /// The OS refused to create, map, or name a resource.
    #[error("resource failure during {op}: {source}")]
    Resource { op: &'static str, source: Errno },
}

impl TransportError {
    pub(crate) fn resource(op: &'static str, source: Errno) -> Self {
        TransportError::Resource { op, source }
    }

    pub(crate) fn resource_io(op: &'static str, err: std::io::Error) -> Self {
        TransportError::Resource {
            op,
            source: Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }
}

impl From<SemaphoreError> for TransportError {
    fn from(err: SemaphoreError) -> Self {
        match err {
            SemaphoreError::Os(e) => TransportError::Resource {
                op: "semaphore",
                source: e,
            },
            SemaphoreError::InvalidName => TransportError::InvalidArgument("semaphore name"),
        }
    }
}
