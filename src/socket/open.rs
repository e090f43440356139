//! Connect cascade: resolve a name, walk the candidate addresses, connect
//! or bind until one opens.
//!
//! At any quiescent point during an open, exactly one of "address list
//! present" or "descriptor valid" holds. Every candidate is tried at most
//! once, failures never leak a descriptor, and exactly one `opened` event
//! fires per `open` call.

use std::sync::Arc;

use crate::addr::{SocketAddress, SocketProperties};
use crate::client::OpContext;
use crate::port::{Completion, OpDesc, INVALID_SOCK};
use crate::{Error, Result};

use super::op::OpSel;
use super::SocketCore;

/// Resolved candidate addresses, owned for the duration of one open.
pub(crate) struct OpenState {
    list: Vec<SocketAddress>,
    cursor: usize,
}

pub(crate) fn open(core: &Arc<SocketCore>, context: OpContext) -> Result<()> {
    if core.fd() != INVALID_SOCK || core.open_state.lock().unwrap().is_some() {
        return Err(Error::Fault);
    }

    let props = core.properties();
    match props.address.clone() {
        SocketAddress::Proxy { host, port } => open_by_name(core, &props, &host, port, context),
        addr => open_by_addr(core, addr, context),
    }
}

/// Resolve the proxy name first, then try each returned address.
fn open_by_name(
    core: &Arc<SocketCore>,
    props: &SocketProperties,
    host: &str,
    port: u16,
    context: OpContext,
) -> Result<()> {
    let host_opt = (!host.is_empty()).then_some(host);
    let list = core
        .port
        .resolve(host_opt, port, props.family, props.flags.passive())?;
    if list.is_empty() {
        log::error!(target: "socket", "resolving {}:{} returned no addresses", host, port);
        return Err(Error::Connecting);
    }

    *core.open_state.lock().unwrap() = Some(OpenState { list, cursor: 0 });
    open_next(core, context);
    Ok(())
}

/// Open a concrete address without resolution.
fn open_by_addr(core: &Arc<SocketCore>, addr: SocketAddress, context: OpContext) -> Result<()> {
    core.open_op.set_context(context);
    core.set_family(addr.family());

    match open_begin(core, &addr) {
        Err(Error::Waiting) => Ok(()), // completion continues
        result => {
            open_complete(core, result.clone(), context);
            result
        }
    }
}

/// Try the next candidate address, or complete the open with the exhaustion
/// error.
pub(crate) fn open_next(core: &Arc<SocketCore>, context: OpContext) {
    let result = loop {
        let addr = {
            let guard = core.open_state.lock().unwrap();
            match guard.as_ref() {
                None => break Err(Error::Connecting),
                Some(state) if state.cursor >= state.list.len() => {
                    log::error!(target: "socket", "no other candidate addresses to open");
                    break Err(Error::Connecting);
                }
                Some(state) => state.list[state.cursor].clone(),
            }
        };

        core.open_op.set_context(context);
        core.set_family(addr.family());

        match open_begin(core, &addr) {
            Err(Error::Waiting) => return, // completion continues the walk
            Err(_) => {
                if let Some(state) = core.open_state.lock().unwrap().as_mut() {
                    state.cursor += 1;
                }
                continue;
            }
            Ok(()) => {
                log::debug!(target: "socket", "socket({}) opened synchronously", core.fd());
                break Ok(());
            }
        }
    };

    open_complete(core, result, context);
}

/// Terminal state of an open: exactly one `opened` event, list freed.
pub(crate) fn open_complete(core: &Arc<SocketCore>, result: Result<()>, context: OpContext) {
    core.client.opened(result, context);
    *core.open_state.lock().unwrap() = None;
}

/// Create the descriptor and branch into connect or bind-and-listen.
fn open_begin(core: &Arc<SocketCore>, addr: &SocketAddress) -> Result<()> {
    let props = core.properties();

    let fd = match core.port.create(&props) {
        Ok(fd) => fd,
        Err(err) => {
            log::error!(target: "socket", "failed creating socket for {} ({})", addr, err);
            return Err(err);
        }
    };
    core.set_fd(fd);

    let result = if props.sock_type.connection_oriented() && !props.flags.passive() {
        connect_begin(core, addr)
    } else {
        bind_begin(core, addr)
    };

    // Synchronous failure must not leak the descriptor.
    if let Err(err) = &result {
        if *err != Error::Waiting {
            core.close_fd();
        }
    }
    result
}

/// Submit the overlapped connect. `Waiting` means the completion callback
/// owns the rest, including a connect that succeeded at submit.
fn connect_begin(core: &Arc<SocketCore>, addr: &SocketAddress) -> Result<()> {
    let op = &core.open_op;
    op.inc();

    let desc = OpDesc::Connect { addr: addr.clone() };
    match core.port.submit(core.fd(), desc, core.sink(OpSel::Open)) {
        Ok(()) => Err(Error::Waiting),
        Err(err) => {
            log::error!(target: "socket", "failed connecting to {} ({})", addr, err.status);
            let result = connect_finish(core, Err(err.status));
            op.dec();
            result
        }
    }
}

/// Runs after the connect settled in any mode: apply the post-connect
/// fixup, query and cache both names. Any failure closes the descriptor so
/// the outer walk advances.
fn connect_finish(core: &Arc<SocketCore>, status: Result<()>) -> Result<()> {
    let result = status.and_then(|_| {
        core.port.finish_connect(core.fd())?;

        let local = core.port.local_name(core.fd())?;
        let peer = core.port.peer_name(core.fd())?;
        core.set_local(local);
        core.set_peer(peer);
        Ok(())
    });

    if result.is_err() {
        core.close_fd();
    }
    result
}

/// Complete flavor of the open op; runs from the completion callback.
pub(crate) fn connect_done(core: &Arc<SocketCore>, completion: Completion) {
    let op = &core.open_op;
    let context = op.take_context();

    match connect_finish(core, completion.status) {
        Ok(()) => {
            log::info!(target: "socket", "socket({}) connected", core.fd());
            open_complete(core, Ok(()), context);
        }
        Err(err) => {
            log::error!(target: "socket", "failed to connect socket, continue... ({})", err);
            open_next(core, context);
        }
    }

    op.clear_context();
    op.dec();
}

/// The synchronous bind (and for stream listeners, listen) path.
fn bind_begin(core: &Arc<SocketCore>, addr: &SocketAddress) -> Result<()> {
    let op = &core.open_op;
    op.inc();

    let result = bind_inner(core, addr);
    if let Err(err) = &result {
        log::error!(target: "socket", "failed binding socket ({})", err);
    }

    op.dec();
    result
}

fn bind_inner(core: &Arc<SocketCore>, addr: &SocketAddress) -> Result<()> {
    core.port.bind(core.fd(), addr)?;
    log::info!(target: "socket", "socket({}) bound to {}", core.fd(), addr);

    // Cache the bound name so an ephemeral-port listener is observable.
    if let Ok(local) = core.port.local_name(core.fd()) {
        core.set_local(local);
    }

    let props = core.properties();
    if !props.sock_type.connection_oriented() {
        return Ok(());
    }

    core.port.listen(core.fd())?;
    log::info!(target: "socket", "socket({}) listening", core.fd());
    Ok(())
}
