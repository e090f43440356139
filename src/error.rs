//! Portable status codes surfaced by the engine.
//!
//! OS error values never leave the sys layer; everything above it consumes
//! the codes below.

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Portable error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Bad argument or unusable object state; reported synchronously.
    #[error("bad argument")]
    Fault,

    #[error("out of memory")]
    OutOfMemory,

    /// Operation was cancelled, e.g. by a socket close.
    #[error("operation aborted")]
    Aborted,

    /// The socket descriptor is gone; nothing further will complete.
    #[error("socket closed")]
    Closed,

    /// The resolved address list was exhausted without opening a socket.
    #[error("no candidate address could be opened")]
    Connecting,

    /// Operation is pending; the completion callback delivers the outcome.
    #[error("operation pending")]
    Waiting,

    #[error("not supported")]
    NotSupported,

    /// Transient failure, the caller may retry.
    #[error("retry")]
    Retry,

    #[error("fatal error")]
    Fatal,

    /// Any other OS network error, carrying the original errno.
    #[error("network error: {}", errno_message(*.0))]
    Network(i32),
}

impl Error {
    /// Map an errno captured at the sys boundary to a portable code.
    pub fn from_os(err: i32) -> Self {
        match err {
            libc::ENOMEM | libc::ENOBUFS => Error::OutOfMemory,
            libc::ECANCELED => Error::Aborted,
            libc::EBADF | libc::ENOTSOCK => Error::Closed,
            libc::EAGAIN | libc::EINTR => Error::Retry,
            libc::EINVAL | libc::EFAULT | libc::EDESTADDRREQ => Error::Fault,
            libc::EOPNOTSUPP | libc::EAFNOSUPPORT | libc::EPROTONOSUPPORT => Error::NotSupported,
            _ => Error::Network(err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Error::from_os(code),
            None => Error::Fatal,
        }
    }
}

fn errno_message(err: i32) -> String {
    match err {
        libc::EACCES => "permission denied".into(),
        libc::EADDRINUSE => "address already in use".into(),
        libc::EADDRNOTAVAIL => "address not available".into(),
        libc::ECONNREFUSED => "connection refused".into(),
        libc::ECONNRESET => "connection reset by peer".into(),
        libc::EHOSTUNREACH => "host unreachable".into(),
        libc::EINPROGRESS => "operation in progress".into(),
        libc::EISCONN => "already connected".into(),
        libc::EMFILE => "too many open files".into(),
        libc::ENETUNREACH => "network unreachable".into(),
        libc::ENOTCONN => "not connected".into(),
        libc::EPIPE => "broken pipe".into(),
        libc::ETIMEDOUT => "connection timed out".into(),
        _ => format!("errno {}", err),
    }
}
