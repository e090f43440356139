//! Upward callback surface between the engine and its embedder.
//!
//! The engine solicits work through `begin_*` calls and delivers outcomes
//! through `end_*` calls. A `begin_*` returning [`None`] stops the drive
//! loop for that operation flavor; the loop resumes when the embedder
//! signals readiness again through `can_send`/`can_recv`. The engine may
//! invoke a `begin_*` from inside the completion that delivered the
//! previous `end_*` of the same flavor.

use std::sync::Arc;

use crate::addr::{MessageFlags, SocketAddress, SocketProperties};
use crate::socket::Socket;
use crate::Result;

/// Opaque correlation token supplied at `begin_*` and handed back at the
/// matching `end_*` (and at `opened`/`closed` for open/close calls).
pub type OpContext = usize;

/// Client interface bound to a socket at creation.
#[derive(Clone)]
pub struct ClientItf {
    pub props: SocketProperties,
    pub client: Arc<dyn SocketClient>,
}

/// One unit of send work supplied by the client.
pub struct SendRequest {
    pub buffer: Vec<u8>,
    pub flags: MessageFlags,
    /// Destination, consumed by the datagram send flavor only.
    pub to: Option<SocketAddress>,
    pub context: OpContext,
}

/// One receive buffer supplied by the client.
pub struct RecvRequest {
    pub buffer: Vec<u8>,
    pub context: OpContext,
}

/// Client interface for one incoming connection.
pub struct AcceptRequest {
    pub itf: ClientItf,
    pub context: OpContext,
}

/// Callback surface the engine dispatches into.
///
/// Callbacks run on whichever thread delivers the completion; implementors
/// synchronize their own state. Every event has a default implementation so
/// a client only provides the surface it consumes.
pub trait SocketClient: Send + Sync {
    /// Outcome of an `open` call; fires exactly once per open.
    fn opened(&self, result: Result<()>, context: OpContext) {
        let _ = (result, context);
    }

    /// Teardown finished; fires exactly once per close, after every
    /// outstanding operation has settled.
    fn closed(&self, context: OpContext) {
        let _ = context;
    }

    fn begin_accept(&self) -> Option<AcceptRequest> {
        None
    }

    fn end_accept(&self, result: Result<Socket>, context: OpContext) {
        let _ = (result, context);
    }

    fn begin_send(&self) -> Option<SendRequest> {
        None
    }

    fn end_send(&self, result: Result<usize>, buffer: Vec<u8>, context: OpContext) {
        let _ = (result, buffer, context);
    }

    fn begin_recv(&self) -> Option<RecvRequest> {
        None
    }

    fn end_recv(
        &self,
        result: Result<usize>,
        buffer: Vec<u8>,
        from: Option<SocketAddress>,
        flags: MessageFlags,
        context: OpContext,
    ) {
        let _ = (result, buffer, from, flags, context);
    }
}
