//! Per-flavor asynchronous operation machine.
//!
//! Each socket owns three ops (open, send, recv). The pending counter is
//! greater than zero while the port owns the operation or while a begin
//! loop is executing; it is the only synchronization around progress. The
//! begin flavor is a tagged variant fixed at socket creation, swapped
//! in-place only for shutdown silencing and the close shim.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::OpContext;
use crate::port::{Completion, OpDesc};
use crate::Error;

use super::{Socket, SocketCore};

/// Selects one of a socket's three operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpSel {
    Open,
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeginFlavor {
    Noop,
    Send,
    SendTo,
    Recv,
    RecvFrom,
    Accept,
    /// Teardown: account the cancelled completion and try the close join.
    CloseShim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompleteFlavor {
    Connect,
    Send,
    Recv,
    RecvFrom,
    Accept,
}

#[derive(Default)]
struct OpCtx {
    context: OpContext,
    accepted: Option<Socket>,
}

/// One outstanding I/O operation slot.
pub(crate) struct AsyncOp {
    pending: AtomicUsize,
    begin: Mutex<BeginFlavor>,
    complete: CompleteFlavor,
    ctx: Mutex<OpCtx>,
}

impl AsyncOp {
    pub(crate) fn new(begin: BeginFlavor, complete: CompleteFlavor) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            begin: Mutex::new(begin),
            complete,
            ctx: Mutex::new(OpCtx::default()),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn inc(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn begin_flavor(&self) -> BeginFlavor {
        *self.begin.lock().unwrap()
    }

    pub(crate) fn set_begin(&self, flavor: BeginFlavor) {
        *self.begin.lock().unwrap() = flavor;
    }

    pub(crate) fn set_context(&self, context: OpContext) {
        self.ctx.lock().unwrap().context = context;
    }

    pub(crate) fn take_context(&self) -> OpContext {
        std::mem::take(&mut self.ctx.lock().unwrap().context)
    }

    pub(crate) fn clear_context(&self) {
        self.ctx.lock().unwrap().context = 0;
    }

    fn set_accepted(&self, socket: Socket) {
        self.ctx.lock().unwrap().accepted = Some(socket);
    }

    fn take_accepted(&self) -> Option<Socket> {
        self.ctx.lock().unwrap().accepted.take()
    }
}

/// Kick off the operation if none is pending; the only place begin runs
/// outside a completion.
pub(crate) fn drive(core: &Arc<SocketCore>, sel: OpSel) {
    if core.op(sel).pending() == 0 {
        while begin(core, sel) {}
    }
}

/// Completion entry, invoked by the port on whichever thread pumps it.
pub(crate) fn on_completion(core: &Arc<SocketCore>, sel: OpSel, completion: Completion) {
    let op = core.op(sel);
    op.inc();

    match op.complete {
        CompleteFlavor::Connect => super::open::connect_done(core, completion),
        CompleteFlavor::Send => send_complete(core, completion),
        CompleteFlavor::Recv => recv_complete(core, completion),
        CompleteFlavor::RecvFrom => recvfrom_complete(core, completion),
        CompleteFlavor::Accept => accept_complete(core, completion),
    }

    // Continue until the client stops supplying buffers or the op is shut.
    while begin(core, sel) {}
    op.dec();
}

fn begin(core: &Arc<SocketCore>, sel: OpSel) -> bool {
    match core.op(sel).begin_flavor() {
        BeginFlavor::Noop => false,
        BeginFlavor::Send => send_begin(core),
        BeginFlavor::SendTo => sendto_begin(core),
        BeginFlavor::Recv => recv_begin(core),
        BeginFlavor::RecvFrom => recvfrom_begin(core),
        BeginFlavor::Accept => accept_begin(core),
        BeginFlavor::CloseShim => close_shim(core, sel),
    }
}

fn close_shim(core: &Arc<SocketCore>, sel: OpSel) -> bool {
    let op = core.op(sel);
    if op.pending() == 0 {
        return false;
    }

    // Account the settled operation, then check whether teardown can join.
    op.dec();
    core.close_check();
    op.inc();
    false
}

fn send_begin(core: &Arc<SocketCore>) -> bool {
    let req = match core.client.begin_send() {
        Some(req) => req,
        None => return false,
    };

    let op = &core.send_op;
    op.inc();
    op.set_context(req.context);

    let desc = OpDesc::Send {
        buffer: req.buffer,
        flags: req.flags,
    };
    match core.port.submit(core.fd(), desc, core.sink(OpSel::Send)) {
        Ok(()) => false,
        Err(err) => {
            log::error!(target: "socket", "fd({}) send failed ({})", core.fd(), err.status);
            send_complete(
                core,
                Completion::error(err.status).with_buffer(err.op.into_buffer()),
            );
            false
        }
    }
}

fn sendto_begin(core: &Arc<SocketCore>) -> bool {
    let req = match core.client.begin_send() {
        Some(req) => req,
        None => return false,
    };

    let op = &core.send_op;
    op.inc();
    op.set_context(req.context);

    let to = match req.to {
        Some(to) => to,
        None => {
            log::error!(target: "socket", "fd({}) sendto got no address", core.fd());
            send_complete(
                core,
                Completion::error(Error::Fault).with_buffer(Some(req.buffer)),
            );
            return false;
        }
    };

    let desc = OpDesc::SendTo {
        buffer: req.buffer,
        flags: req.flags,
        to,
    };
    match core.port.submit(core.fd(), desc, core.sink(OpSel::Send)) {
        Ok(()) => false,
        Err(err) => {
            log::error!(target: "socket", "fd({}) sendto failed ({})", core.fd(), err.status);
            send_complete(
                core,
                Completion::error(err.status).with_buffer(err.op.into_buffer()),
            );
            false
        }
    }
}

fn recv_begin(core: &Arc<SocketCore>) -> bool {
    let req = match core.client.begin_recv() {
        Some(req) => req,
        None => return false,
    };

    let op = &core.recv_op;
    op.inc();
    op.set_context(req.context);

    let desc = OpDesc::Recv { buffer: req.buffer };
    match core.port.submit(core.fd(), desc, core.sink(OpSel::Recv)) {
        Ok(()) => false,
        Err(err) => {
            log::error!(target: "socket", "fd({}) recv failed ({})", core.fd(), err.status);
            recv_complete(
                core,
                Completion::error(err.status).with_buffer(err.op.into_buffer()),
            );
            false
        }
    }
}

fn recvfrom_begin(core: &Arc<SocketCore>) -> bool {
    let req = match core.client.begin_recv() {
        Some(req) => req,
        None => return false,
    };

    let op = &core.recv_op;
    op.inc();
    op.set_context(req.context);

    let desc = OpDesc::RecvFrom { buffer: req.buffer };
    match core.port.submit(core.fd(), desc, core.sink(OpSel::Recv)) {
        Ok(()) => false,
        Err(err) => {
            log::error!(target: "socket", "fd({}) recvfrom failed ({})", core.fd(), err.status);
            recvfrom_complete(
                core,
                Completion::error(err.status).with_buffer(err.op.into_buffer()),
            );
            false
        }
    }
}

fn accept_begin(core: &Arc<SocketCore>) -> bool {
    let req = match core.client.begin_accept() {
        Some(req) => req,
        None => return false,
    };

    let op = &core.recv_op;
    op.inc();
    op.set_context(req.context);

    // The socket object that will carry the connection; its descriptor is
    // assigned when the accept completes.
    match Socket::create(core.port.clone(), req.itf) {
        Ok(accepted) => op.set_accepted(accepted),
        Err(err) => {
            log::error!(target: "socket", "failed to create accept socket ({})", err);
            accept_complete(core, Completion::error(err));
            return false;
        }
    }

    match core.port.submit(core.fd(), OpDesc::Accept, core.sink(OpSel::Recv)) {
        Ok(()) => false,
        Err(err) => {
            log::error!(target: "socket", "fd({}) accept failed ({})", core.fd(), err.status);
            accept_complete(core, Completion::error(err.status));
            false
        }
    }
}

fn send_complete(core: &Arc<SocketCore>, completion: Completion) {
    let op = &core.send_op;
    let context = op.take_context();
    let result = completion.status.map(|_| completion.bytes);

    core.client
        .end_send(result, completion.buffer.unwrap_or_default(), context);
    op.dec();
}

fn recv_complete(core: &Arc<SocketCore>, completion: Completion) {
    let op = &core.recv_op;
    let context = op.take_context();
    let result = completion.status.map(|_| completion.bytes);

    core.client.end_recv(
        result,
        completion.buffer.unwrap_or_default(),
        None,
        completion.flags,
        context,
    );
    op.dec();
}

fn recvfrom_complete(core: &Arc<SocketCore>, completion: Completion) {
    let op = &core.recv_op;
    let context = op.take_context();
    let result = completion.status.map(|_| completion.bytes);

    // Source address is absent on failure.
    core.client.end_recv(
        result,
        completion.buffer.unwrap_or_default(),
        completion.from,
        completion.flags,
        context,
    );
    op.dec();
}

fn accept_complete(core: &Arc<SocketCore>, completion: Completion) {
    let op = &core.recv_op;
    let context = op.take_context();
    let accepted = op.take_accepted();

    let result = match accepted {
        None => completion.status.and(Err(Error::Fault)),
        Some(ref socket) => completion.status.and_then(|_| {
            let fd = completion.accepted.ok_or(Error::Fatal)?;
            socket.core.set_fd(fd);

            core.port.finish_accept(core.fd(), fd)?;

            let local = core.port.local_name(fd)?;
            let peer = core.port.peer_name(fd)?;
            socket.core.set_local(local);
            socket.core.set_peer(peer.clone());

            // The accepted socket now describes the connection itself.
            let mut props = socket.core.props.lock().unwrap();
            props.family = peer.family();
            props.address = peer;
            Ok(())
        }),
    };

    match result {
        Ok(()) => {
            let socket = accepted.expect("accept succeeded without a socket");
            core.client.end_accept(Ok(socket.clone()), context);
            // The accepted socket is open from its client's point of view.
            super::open::open_complete(&socket.core, Ok(()), 0);
        }
        Err(err) => {
            log::error!(target: "socket", "failed accept ({})", err);
            core.client.end_accept(Err(err), context);
            if let Some(socket) = accepted {
                socket.core.close_fd();
            }
        }
    }
    op.dec();
}
