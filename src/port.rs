//! Contract between the socket engine and the OS completion facility.
//!
//! The engine never issues an OS call directly; it submits operation
//! descriptors to a [`CompletionPort`] and consumes completions delivered
//! through one-shot sinks. A submission that succeeds synchronously still
//! posts a completion, so every begun operation finishes on exactly one
//! path. A submission that fails synchronously hands the descriptor back so
//! the engine can complete it locally.

use crate::addr::{
    AddressFamily, MessageFlags, MulticastOption, ShutdownOp, SocketAddress, SocketOption,
    SocketProperties,
};
use crate::{Error, Result};

#[cfg(target_family = "unix")]
pub mod sys;

#[cfg(target_family = "unix")]
pub use sys::SysPort;

/// OS socket descriptor.
pub type RawSock = std::os::fd::RawFd;

/// Invalid descriptor marker.
pub const INVALID_SOCK: RawSock = -1;

/// One overlapped operation submitted to the port.
#[derive(Debug)]
pub enum OpDesc {
    Connect {
        addr: SocketAddress,
    },
    Accept,
    Send {
        buffer: Vec<u8>,
        flags: MessageFlags,
    },
    SendTo {
        buffer: Vec<u8>,
        flags: MessageFlags,
        to: SocketAddress,
    },
    Recv {
        buffer: Vec<u8>,
    },
    RecvFrom {
        buffer: Vec<u8>,
    },
}

impl OpDesc {
    /// Recover the payload buffer from a descriptor that never ran.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            OpDesc::Send { buffer, .. }
            | OpDesc::SendTo { buffer, .. }
            | OpDesc::Recv { buffer }
            | OpDesc::RecvFrom { buffer } => Some(buffer),
            OpDesc::Connect { .. } | OpDesc::Accept => None,
        }
    }
}

/// Outcome of one completed operation.
pub struct Completion {
    pub status: Result<()>,
    /// Bytes transferred.
    pub bytes: usize,
    /// The payload buffer handed back, filled for receives.
    pub buffer: Option<Vec<u8>>,
    /// Datagram source address, when the operation produced one.
    pub from: Option<SocketAddress>,
    /// Portable flags observed on receive.
    pub flags: MessageFlags,
    /// Descriptor of the accepted connection.
    pub accepted: Option<RawSock>,
}

impl Completion {
    pub fn ok(bytes: usize) -> Self {
        Self {
            status: Ok(()),
            bytes,
            buffer: None,
            from: None,
            flags: MessageFlags::empty(),
            accepted: None,
        }
    }

    pub fn error(status: Error) -> Self {
        Self {
            status: Err(status),
            bytes: 0,
            buffer: None,
            from: None,
            flags: MessageFlags::empty(),
            accepted: None,
        }
    }

    pub fn with_buffer(mut self, buffer: Option<Vec<u8>>) -> Self {
        self.buffer = buffer;
        self
    }
}

/// One-shot completion delivery, invoked on whichever thread pumps the port.
pub type CompletionSink = Box<dyn FnOnce(Completion) + Send>;

/// Synchronous submission failure; the descriptor comes back so the caller
/// can recover the buffer and complete locally.
pub struct SubmitError {
    pub status: Error,
    pub op: OpDesc,
}

/// The completion-notification facility the engine runs over.
///
/// Implementations deliver every completion for a descriptor through the
/// sink supplied at submit time, including completions synthesized by
/// [`cancel`](CompletionPort::cancel) (status [`Error::Aborted`]).
pub trait CompletionPort: Send + Sync {
    /// Create an overlapped-capable descriptor for the given properties and
    /// register it with the port.
    fn create(&self, props: &SocketProperties) -> Result<RawSock>;

    fn bind(&self, fd: RawSock, addr: &SocketAddress) -> Result<()>;

    /// Start listening with the maximum backlog.
    fn listen(&self, fd: RawSock) -> Result<()>;

    fn submit(
        &self,
        fd: RawSock,
        op: OpDesc,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmitError>;

    /// Cancel pending operations on `fd`; each completes with
    /// [`Error::Aborted`] through its sink.
    fn cancel(&self, fd: RawSock);

    fn close(&self, fd: RawSock);

    /// Post-connect descriptor fixup (the "update connect context" hint).
    fn finish_connect(&self, fd: RawSock) -> Result<()>;

    /// Post-accept descriptor fixup (the "update accept context" hint).
    fn finish_accept(&self, listener: RawSock, accepted: RawSock) -> Result<()>;

    fn local_name(&self, fd: RawSock) -> Result<SocketAddress>;

    fn peer_name(&self, fd: RawSock) -> Result<SocketAddress>;

    fn get_option(&self, fd: RawSock, option: SocketOption) -> Result<u64>;

    fn set_option(&self, fd: RawSock, option: SocketOption, value: u64) -> Result<()>;

    fn shutdown(&self, fd: RawSock, how: ShutdownOp) -> Result<()>;

    fn multicast_join(&self, fd: RawSock, option: &MulticastOption) -> Result<()>;

    fn multicast_leave(&self, fd: RawSock, option: &MulticastOption) -> Result<()>;

    /// Bytes readable without blocking.
    fn available(&self, fd: RawSock) -> Result<u64>;

    /// Resolve a host/port pair into candidate addresses. `passive`
    /// requests bindable (listener) addresses.
    fn resolve(
        &self,
        host: Option<&str>,
        port: u16,
        family: AddressFamily,
        passive: bool,
    ) -> Result<Vec<SocketAddress>>;
}
