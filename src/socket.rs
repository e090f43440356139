//! Async socket object driven by a completion port.
//!
//! A [`Socket`] owns three operation slots (open, send, recv) whose begin
//! and complete behavior is fixed by the socket's properties at creation:
//! datagram sockets send-to and receive-from, passive stream sockets
//! accept, active stream sockets send and receive. All progress is
//! completion-driven; the embedder enables the send and receive loops with
//! [`can_send`](Socket::can_send) / [`can_recv`](Socket::can_recv) and
//! supplies buffers through its [`SocketClient`].

mod op;
mod open;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::addr::{
    AddressFamily, MulticastOption, ShutdownOp, SocketAddress, SocketOption, SocketProperties,
    SocketType,
};
use crate::client::{ClientItf, OpContext, SocketClient};
use crate::port::{CompletionPort, CompletionSink, RawSock, INVALID_SOCK};
use crate::{Error, Result};

use op::{AsyncOp, BeginFlavor, CompleteFlavor, OpSel};
use open::OpenState;

pub(crate) struct SocketCore {
    client: Arc<dyn SocketClient>,
    props: Mutex<SocketProperties>,
    port: Arc<dyn CompletionPort>,
    fd: AtomicI32,
    local: Mutex<Option<SocketAddress>>,
    peer: Mutex<Option<SocketAddress>>,
    open_state: Mutex<Option<OpenState>>,
    close_context: Mutex<Option<OpContext>>,
    open_op: AsyncOp,
    send_op: AsyncOp,
    recv_op: AsyncOp,
}

impl SocketCore {
    fn fd(&self) -> RawSock {
        self.fd.load(Ordering::Acquire)
    }

    fn set_fd(&self, fd: RawSock) {
        self.fd.store(fd, Ordering::Release);
    }

    /// Invalidate and close the descriptor, if still open.
    fn close_fd(&self) {
        let fd = self.fd.swap(INVALID_SOCK, Ordering::AcqRel);
        if fd != INVALID_SOCK {
            self.port.close(fd);
        }
    }

    fn properties(&self) -> SocketProperties {
        self.props.lock().unwrap().clone()
    }

    fn set_family(&self, family: AddressFamily) {
        self.props.lock().unwrap().family = family;
    }

    fn set_local(&self, addr: SocketAddress) {
        *self.local.lock().unwrap() = Some(addr);
    }

    fn set_peer(&self, addr: SocketAddress) {
        *self.peer.lock().unwrap() = Some(addr);
    }

    fn op(&self, sel: OpSel) -> &AsyncOp {
        match sel {
            OpSel::Open => &self.open_op,
            OpSel::Send => &self.send_op,
            OpSel::Recv => &self.recv_op,
        }
    }

    /// Build the one-shot completion delivery for one op slot.
    fn sink(self: &Arc<Self>, sel: OpSel) -> CompletionSink {
        let core = self.clone();
        Box::new(move |completion| op::on_completion(&core, sel, completion))
    }

    /// Join point of teardown: once a close is requested and every op has
    /// settled, close the descriptor and deliver the single `closed` event.
    fn close_check(&self) {
        let context = {
            let mut guard = self.close_context.lock().unwrap();
            if guard.is_none() {
                return;
            }
            if self.open_op.pending() != 0
                || self.send_op.pending() != 0
                || self.recv_op.pending() != 0
            {
                return;
            }
            guard.take()
        };

        if let Some(context) = context {
            self.close_fd();
            log::debug!(target: "socket", "socket closed, all operations settled");
            self.client.closed(context);
        }
    }
}

impl Drop for SocketCore {
    fn drop(&mut self) {
        self.close_fd();
    }
}

/// Handle to one engine socket; clones share the same underlying object.
#[derive(Clone)]
pub struct Socket {
    pub(crate) core: Arc<SocketCore>,
}

impl Socket {
    /// Create a socket bound to a client interface. The operation flavors
    /// are fixed here from the properties; the descriptor stays invalid
    /// until [`open`](Socket::open).
    pub fn create(port: Arc<dyn CompletionPort>, itf: ClientItf) -> Result<Socket> {
        let props = itf.props;

        let (send_begin, recv_begin, recv_complete) =
            if props.sock_type == SocketType::Dgram || props.sock_type == SocketType::Raw {
                // Non connection oriented sockets receive-from and send-to.
                (
                    BeginFlavor::SendTo,
                    BeginFlavor::RecvFrom,
                    CompleteFlavor::RecvFrom,
                )
            } else if props.flags.passive() {
                // Listener, can only receive new sockets.
                (BeginFlavor::Noop, BeginFlavor::Accept, CompleteFlavor::Accept)
            } else {
                (BeginFlavor::Send, BeginFlavor::Recv, CompleteFlavor::Recv)
            };

        Ok(Socket {
            core: Arc::new(SocketCore {
                client: itf.client,
                props: Mutex::new(props),
                port,
                fd: AtomicI32::new(INVALID_SOCK),
                local: Mutex::new(None),
                peer: Mutex::new(None),
                open_state: Mutex::new(None),
                close_context: Mutex::new(None),
                open_op: AsyncOp::new(BeginFlavor::Noop, CompleteFlavor::Connect),
                send_op: AsyncOp::new(send_begin, CompleteFlavor::Send),
                recv_op: AsyncOp::new(recv_begin, recv_complete),
            }),
        })
    }

    /// Begin the connect cascade. Returns immediately; the outcome arrives
    /// through a single `opened` event once the cascade settles.
    pub fn open(&self, context: OpContext) -> Result<()> {
        open::open(&self.core, context)
    }

    /// Begin teardown. Every op gets the close shim before the one OS
    /// cancel, so a cancelled completion can never solicit new work; the
    /// single `closed` event fires once every outstanding operation has
    /// settled.
    pub fn close(&self, context: OpContext) {
        *self.core.close_context.lock().unwrap() = Some(context);

        self.core.open_op.set_begin(BeginFlavor::CloseShim);
        self.core.send_op.set_begin(BeginFlavor::CloseShim);
        self.core.recv_op.set_begin(BeginFlavor::CloseShim);

        let fd = self.core.fd();
        if fd != INVALID_SOCK {
            self.core.port.cancel(fd);
        }
        self.core.close_check();
    }

    /// Enable the send operation loop.
    pub fn can_send(&self, ready: bool) -> Result<()> {
        if self.core.fd() == INVALID_SOCK {
            return Err(Error::Closed);
        }
        if ready {
            op::drive(&self.core, OpSel::Send);
        }
        Ok(())
    }

    /// Enable the receive (or accept) operation loop.
    pub fn can_recv(&self, ready: bool) -> Result<()> {
        if self.core.fd() == INVALID_SOCK {
            return Err(Error::Closed);
        }
        if ready {
            op::drive(&self.core, OpSel::Recv);
        }
        Ok(())
    }

    /// Cached local address, populated on connect or bind.
    pub fn local_addr(&self) -> Option<SocketAddress> {
        self.core.local.lock().unwrap().clone()
    }

    /// Cached peer address, populated on connect or accept.
    pub fn peer_addr(&self) -> Option<SocketAddress> {
        self.core.peer.lock().unwrap().clone()
    }

    pub fn properties(&self) -> SocketProperties {
        self.core.properties()
    }

    pub fn get_option(&self, option: SocketOption) -> Result<u64> {
        if option == SocketOption::Shutdown {
            return Err(Error::NotSupported);
        }

        let fd = self.core.fd();
        if fd == INVALID_SOCK {
            return Err(Error::Closed);
        }

        match option {
            SocketOption::Available => self.core.port.available(fd),
            _ => self.core.port.get_option(fd, option),
        }
    }

    pub fn set_option(&self, option: SocketOption, value: u64) -> Result<()> {
        match option {
            SocketOption::Available | SocketOption::Acceptconn => Err(Error::NotSupported),
            // The engine is always overlapped.
            SocketOption::Nonblocking => Ok(()),
            SocketOption::Shutdown => {
                let how = ShutdownOp::from_value(value).ok_or(Error::Fault)?;

                // Silence the shut direction so no further work is
                // solicited on it.
                if how != ShutdownOp::Read {
                    self.core.send_op.set_begin(BeginFlavor::Noop);
                }
                if how != ShutdownOp::Write {
                    self.core.recv_op.set_begin(BeginFlavor::Noop);
                }

                let fd = self.core.fd();
                if fd == INVALID_SOCK {
                    return Err(Error::Closed);
                }
                self.core.port.shutdown(fd, how)
            }
            _ => {
                let fd = self.core.fd();
                if fd == INVALID_SOCK {
                    return Err(Error::Closed);
                }
                self.core.port.set_option(fd, option, value)
            }
        }
    }

    pub fn join_multicast_group(&self, option: &MulticastOption) -> Result<()> {
        let fd = self.core.fd();
        if fd == INVALID_SOCK {
            return Err(Error::Closed);
        }
        self.core.port.multicast_join(fd, option)
    }

    pub fn leave_multicast_group(&self, option: &MulticastOption) -> Result<()> {
        let fd = self.core.fd();
        if fd == INVALID_SOCK {
            return Err(Error::Closed);
        }
        self.core.port.multicast_leave(fd, option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{ProtocolType, SocketFlags};
    use crate::client::{AcceptRequest, RecvRequest, SendRequest};
    use crate::port::{Completion, OpDesc, SubmitError};
    use std::collections::VecDeque;
    use std::net::SocketAddr;

    fn sa(s: &str) -> SocketAddress {
        SocketAddress::from(s.parse::<SocketAddr>().unwrap())
    }

    fn stream_props(address: SocketAddress, flags: SocketFlags) -> SocketProperties {
        SocketProperties {
            family: AddressFamily::Inet,
            sock_type: SocketType::Stream,
            proto_type: ProtocolType::Tcp,
            address,
            flags,
        }
    }

    // -- scripted completion port ------------------------------------------

    enum SubmitPlan {
        Park,
        Fail(Error),
    }

    struct Parked {
        fd: RawSock,
        op: OpDesc,
        sink: CompletionSink,
    }

    struct StubState {
        next_fd: RawSock,
        resolve: Vec<SocketAddress>,
        plans: VecDeque<SubmitPlan>,
        parked: VecDeque<Parked>,
        cancelled: Vec<RawSock>,
        closed: Vec<RawSock>,
        shutdowns: Vec<(RawSock, ShutdownOp)>,
        local: SocketAddress,
        peer: SocketAddress,
    }

    struct StubPort {
        state: Mutex<StubState>,
    }

    impl StubPort {
        fn new() -> Arc<StubPort> {
            Arc::new(StubPort {
                state: Mutex::new(StubState {
                    next_fd: 100,
                    resolve: Vec::new(),
                    plans: VecDeque::new(),
                    parked: VecDeque::new(),
                    cancelled: Vec::new(),
                    closed: Vec::new(),
                    shutdowns: Vec::new(),
                    local: sa("127.0.0.1:40001"),
                    peer: sa("127.0.0.1:40002"),
                }),
            })
        }

        fn plan(&self, plan: SubmitPlan) {
            self.state.lock().unwrap().plans.push_back(plan);
        }

        fn set_resolve(&self, list: Vec<SocketAddress>) {
            self.state.lock().unwrap().resolve = list;
        }

        fn created(&self) -> usize {
            (self.state.lock().unwrap().next_fd - 100) as usize
        }

        fn closed_count(&self) -> usize {
            self.state.lock().unwrap().closed.len()
        }

        fn parked_count(&self) -> usize {
            self.state.lock().unwrap().parked.len()
        }

        /// Deliver the oldest parked operation, filling the payload buffer
        /// back in unless the completion carries its own.
        fn complete_next(&self, completion: Completion) {
            let parked = self
                .state
                .lock()
                .unwrap()
                .parked
                .pop_front()
                .expect("no parked operation to complete");
            let completion = if completion.buffer.is_none() {
                completion.with_buffer(parked.op.into_buffer())
            } else {
                completion
            };
            (parked.sink)(completion);
        }
    }

    impl CompletionPort for StubPort {
        fn create(&self, _props: &SocketProperties) -> Result<RawSock> {
            let mut state = self.state.lock().unwrap();
            let fd = state.next_fd;
            state.next_fd += 1;
            Ok(fd)
        }

        fn bind(&self, _fd: RawSock, _addr: &SocketAddress) -> Result<()> {
            Ok(())
        }

        fn listen(&self, _fd: RawSock) -> Result<()> {
            Ok(())
        }

        fn submit(
            &self,
            fd: RawSock,
            op: OpDesc,
            sink: CompletionSink,
        ) -> std::result::Result<(), SubmitError> {
            let mut state = self.state.lock().unwrap();
            match state.plans.pop_front() {
                Some(SubmitPlan::Fail(status)) => Err(SubmitError { status, op }),
                Some(SubmitPlan::Park) | None => {
                    state.parked.push_back(Parked { fd, op, sink });
                    Ok(())
                }
            }
        }

        fn cancel(&self, fd: RawSock) {
            let cancelled: Vec<Parked> = {
                let mut state = self.state.lock().unwrap();
                state.cancelled.push(fd);
                let (cancelled, kept): (Vec<Parked>, Vec<Parked>) =
                    state.parked.drain(..).partition(|parked| parked.fd == fd);
                state.parked = kept.into_iter().collect();
                cancelled
            };
            for parked in cancelled {
                let completion =
                    Completion::error(Error::Aborted).with_buffer(parked.op.into_buffer());
                (parked.sink)(completion);
            }
        }

        fn close(&self, fd: RawSock) {
            self.state.lock().unwrap().closed.push(fd);
        }

        fn finish_connect(&self, _fd: RawSock) -> Result<()> {
            Ok(())
        }

        fn finish_accept(&self, _listener: RawSock, _accepted: RawSock) -> Result<()> {
            Ok(())
        }

        fn local_name(&self, _fd: RawSock) -> Result<SocketAddress> {
            Ok(self.state.lock().unwrap().local.clone())
        }

        fn peer_name(&self, _fd: RawSock) -> Result<SocketAddress> {
            Ok(self.state.lock().unwrap().peer.clone())
        }

        fn get_option(&self, _fd: RawSock, _option: SocketOption) -> Result<u64> {
            Ok(0)
        }

        fn set_option(&self, _fd: RawSock, _option: SocketOption, _value: u64) -> Result<()> {
            Ok(())
        }

        fn shutdown(&self, fd: RawSock, how: ShutdownOp) -> Result<()> {
            self.state.lock().unwrap().shutdowns.push((fd, how));
            Ok(())
        }

        fn multicast_join(&self, _fd: RawSock, _option: &MulticastOption) -> Result<()> {
            Ok(())
        }

        fn multicast_leave(&self, _fd: RawSock, _option: &MulticastOption) -> Result<()> {
            Ok(())
        }

        fn available(&self, _fd: RawSock) -> Result<u64> {
            Ok(0)
        }

        fn resolve(
            &self,
            _host: Option<&str>,
            _port: u16,
            _family: AddressFamily,
            _passive: bool,
        ) -> Result<Vec<SocketAddress>> {
            Ok(self.state.lock().unwrap().resolve.clone())
        }
    }

    // -- recording client --------------------------------------------------

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        Opened(Result<()>),
        Closed(OpContext),
        BeginSend,
        EndSend(Result<usize>),
        BeginRecv,
        EndRecv(Result<usize>, Vec<u8>, Option<SocketAddress>),
        BeginAccept,
        EndAccept(Result<()>),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Ev>>,
        sends: Mutex<VecDeque<SendRequest>>,
        recvs: Mutex<VecDeque<RecvRequest>>,
        accepts: Mutex<VecDeque<AcceptRequest>>,
        accepted: Mutex<Option<Socket>>,
    }

    impl Recorder {
        fn new() -> Arc<Recorder> {
            Arc::new(Recorder::default())
        }

        fn push(&self, ev: Ev) {
            self.events.lock().unwrap().push(ev);
        }

        fn events(&self) -> Vec<Ev> {
            self.events.lock().unwrap().clone()
        }

        fn queue_send(&self, buffer: Vec<u8>, to: Option<SocketAddress>, context: OpContext) {
            self.sends.lock().unwrap().push_back(SendRequest {
                buffer,
                flags: crate::addr::MessageFlags::empty(),
                to,
                context,
            });
        }

        fn queue_recv(&self, len: usize, context: OpContext) {
            self.recvs.lock().unwrap().push_back(RecvRequest {
                buffer: vec![0u8; len],
                context,
            });
        }

        fn queue_accept(&self, itf: ClientItf, context: OpContext) {
            self.accepts
                .lock()
                .unwrap()
                .push_back(AcceptRequest { itf, context });
        }

        fn take_accepted(&self) -> Option<Socket> {
            self.accepted.lock().unwrap().take()
        }
    }

    impl SocketClient for Recorder {
        fn opened(&self, result: Result<()>, _context: OpContext) {
            self.push(Ev::Opened(result));
        }

        fn closed(&self, context: OpContext) {
            self.push(Ev::Closed(context));
        }

        fn begin_accept(&self) -> Option<AcceptRequest> {
            let req = self.accepts.lock().unwrap().pop_front();
            if req.is_some() {
                self.push(Ev::BeginAccept);
            }
            req
        }

        fn end_accept(&self, result: Result<Socket>, _context: OpContext) {
            match result {
                Ok(socket) => {
                    *self.accepted.lock().unwrap() = Some(socket);
                    self.push(Ev::EndAccept(Ok(())));
                }
                Err(err) => self.push(Ev::EndAccept(Err(err))),
            }
        }

        fn begin_send(&self) -> Option<SendRequest> {
            let req = self.sends.lock().unwrap().pop_front();
            if req.is_some() {
                self.push(Ev::BeginSend);
            }
            req
        }

        fn end_send(&self, result: Result<usize>, _buffer: Vec<u8>, _context: OpContext) {
            self.push(Ev::EndSend(result));
        }

        fn begin_recv(&self) -> Option<RecvRequest> {
            let req = self.recvs.lock().unwrap().pop_front();
            if req.is_some() {
                self.push(Ev::BeginRecv);
            }
            req
        }

        fn end_recv(
            &self,
            result: Result<usize>,
            buffer: Vec<u8>,
            from: Option<SocketAddress>,
            _flags: crate::addr::MessageFlags,
            _context: OpContext,
        ) {
            self.push(Ev::EndRecv(result, buffer, from));
        }
    }

    fn opened_stream(port: &Arc<StubPort>, client: &Arc<Recorder>) -> Socket {
        let socket = Socket::create(
            port.clone(),
            ClientItf {
                props: stream_props(sa("127.0.0.1:9000"), SocketFlags::empty()),
                client: client.clone(),
            },
        )
        .unwrap();

        socket.open(3).unwrap();
        assert_eq!(socket.core.open_op.pending(), 1);

        port.complete_next(Completion::ok(0));
        assert_eq!(socket.core.open_op.pending(), 0);
        socket
    }

    #[test]
    fn test_connect_then_send_drive_loop() {
        let port = StubPort::new();
        let client = Recorder::new();
        let socket = opened_stream(&port, &client);

        assert_eq!(client.events(), vec![Ev::Opened(Ok(()))]);
        assert_eq!(socket.local_addr(), Some(sa("127.0.0.1:40001")));
        assert_eq!(socket.peer_addr(), Some(sa("127.0.0.1:40002")));

        client.queue_send(b"ping".to_vec(), None, 11);
        socket.can_send(true).unwrap();
        assert_eq!(socket.core.send_op.pending(), 1);
        assert_eq!(port.parked_count(), 1);

        port.complete_next(Completion::ok(4));
        assert_eq!(socket.core.send_op.pending(), 0);
        assert_eq!(
            client.events()[1..],
            [Ev::BeginSend, Ev::EndSend(Ok(4))]
        );
    }

    #[test]
    fn test_close_aborts_pending_recv_then_closes() {
        let port = StubPort::new();
        let client = Recorder::new();
        let socket = opened_stream(&port, &client);

        client.queue_recv(64, 21);
        socket.can_recv(true).unwrap();
        assert_eq!(socket.core.recv_op.pending(), 1);

        socket.close(42);

        let events = client.events();
        assert_eq!(
            events[events.len() - 2..],
            [
                Ev::EndRecv(Err(Error::Aborted), vec![0u8; 64], None),
                Ev::Closed(42)
            ]
        );
        assert_eq!(socket.core.open_op.pending(), 0);
        assert_eq!(socket.core.send_op.pending(), 0);
        assert_eq!(socket.core.recv_op.pending(), 0);
        assert_eq!(socket.core.fd(), INVALID_SOCK);
        assert_eq!(port.closed_count(), 1);

        // Everything after teardown fails closed.
        assert_eq!(socket.can_recv(true), Err(Error::Closed));
        assert_eq!(socket.can_send(true), Err(Error::Closed));
    }

    #[test]
    fn test_open_cascade_exhausts_candidates() {
        let port = StubPort::new();
        port.set_resolve(vec![sa("10.0.0.1:1"), sa("10.0.0.2:1"), sa("10.0.0.3:1")]);
        for _ in 0..3 {
            port.plan(SubmitPlan::Fail(Error::Network(libc::ECONNREFUSED)));
        }

        let client = Recorder::new();
        let socket = Socket::create(
            port.clone(),
            ClientItf {
                props: stream_props(
                    SocketAddress::Proxy {
                        host: "edge-device".to_owned(),
                        port: 1,
                    },
                    SocketFlags::empty(),
                ),
                client: client.clone(),
            },
        )
        .unwrap();

        socket.open(1).unwrap();

        // Every candidate tried exactly once, exactly one opened event.
        assert_eq!(client.events(), vec![Ev::Opened(Err(Error::Connecting))]);
        assert_eq!(port.created(), 3);
        assert_eq!(port.closed_count(), 3);
        assert_eq!(socket.core.fd(), INVALID_SOCK);
        assert!(socket.core.open_state.lock().unwrap().is_none());
        assert_eq!(socket.core.open_op.pending(), 0);
    }

    #[test]
    fn test_open_by_name_empty_resolution_fails_sync() {
        let port = StubPort::new();
        port.set_resolve(Vec::new());

        let client = Recorder::new();
        let socket = Socket::create(
            port.clone(),
            ClientItf {
                props: stream_props(
                    SocketAddress::Proxy {
                        host: "edge-device".to_owned(),
                        port: 1,
                    },
                    SocketFlags::empty(),
                ),
                client: client.clone(),
            },
        )
        .unwrap();

        assert_eq!(socket.open(1), Err(Error::Connecting));
        assert!(client.events().is_empty());
    }

    #[test]
    fn test_listener_accept_flow() {
        let port = StubPort::new();
        let listener_client = Recorder::new();

        let mut flags = SocketFlags::empty();
        flags.insert(SocketFlags::PASSIVE);
        let listener = Socket::create(
            port.clone(),
            ClientItf {
                props: stream_props(sa("0.0.0.0:0"), flags),
                client: listener_client.clone(),
            },
        )
        .unwrap();

        // Bind path completes synchronously.
        listener.open(2).unwrap();
        assert_eq!(listener_client.events(), vec![Ev::Opened(Ok(()))]);
        assert_eq!(listener.local_addr(), Some(sa("127.0.0.1:40001")));

        let conn_client = Recorder::new();
        listener_client.queue_accept(
            ClientItf {
                props: stream_props(sa("0.0.0.0:0"), SocketFlags::empty()),
                client: conn_client.clone(),
            },
            5,
        );
        listener.can_recv(true).unwrap();
        assert_eq!(listener.core.recv_op.pending(), 1);

        let mut completion = Completion::ok(0);
        completion.accepted = Some(555);
        port.complete_next(completion);

        assert_eq!(
            listener_client.events()[1..],
            [Ev::BeginAccept, Ev::EndAccept(Ok(()))]
        );
        assert_eq!(conn_client.events(), vec![Ev::Opened(Ok(()))]);
        assert_eq!(listener.core.recv_op.pending(), 0);

        let accepted = listener_client.take_accepted().unwrap();
        assert_eq!(accepted.core.fd(), 555);
        assert_eq!(accepted.peer_addr(), Some(sa("127.0.0.1:40002")));
        assert_eq!(accepted.properties().address, sa("127.0.0.1:40002"));
    }

    #[test]
    fn test_accept_failure_frees_accepted_socket() {
        let port = StubPort::new();
        let listener_client = Recorder::new();

        let mut flags = SocketFlags::empty();
        flags.insert(SocketFlags::PASSIVE);
        let listener = Socket::create(
            port.clone(),
            ClientItf {
                props: stream_props(sa("0.0.0.0:0"), flags),
                client: listener_client.clone(),
            },
        )
        .unwrap();
        listener.open(2).unwrap();

        let conn_client = Recorder::new();
        listener_client.queue_accept(
            ClientItf {
                props: stream_props(sa("0.0.0.0:0"), SocketFlags::empty()),
                client: conn_client.clone(),
            },
            5,
        );
        listener.can_recv(true).unwrap();

        port.complete_next(Completion::error(Error::Network(libc::ECONNABORTED)));

        let events = listener_client.events();
        assert_eq!(
            events.last(),
            Some(&Ev::EndAccept(Err(Error::Network(libc::ECONNABORTED))))
        );
        // No opened event on the dead socket, and nothing handed over.
        assert!(conn_client.events().is_empty());
        assert!(listener_client.take_accepted().is_none());
        assert_eq!(listener.core.recv_op.pending(), 0);
    }

    #[test]
    fn test_shutdown_read_silences_recv_side() {
        let port = StubPort::new();
        let client = Recorder::new();
        let socket = opened_stream(&port, &client);

        socket.set_option(SocketOption::Shutdown, 0).unwrap();
        assert_eq!(
            port.state.lock().unwrap().shutdowns,
            vec![(100, ShutdownOp::Read)]
        );

        // The receive side no longer solicits buffers.
        client.queue_recv(16, 1);
        socket.can_recv(true).unwrap();
        assert!(client.events().iter().all(|ev| *ev != Ev::BeginRecv));
        assert_eq!(socket.core.recv_op.pending(), 0);

        // The send side is still live.
        client.queue_send(b"x".to_vec(), None, 2);
        socket.can_send(true).unwrap();
        assert_eq!(socket.core.send_op.pending(), 1);
    }

    #[test]
    fn test_option_special_cases() {
        let port = StubPort::new();
        let client = Recorder::new();
        let socket = Socket::create(
            port.clone(),
            ClientItf {
                props: stream_props(sa("127.0.0.1:9000"), SocketFlags::empty()),
                client: client.clone(),
            },
        )
        .unwrap();

        assert_eq!(socket.get_option(SocketOption::Shutdown), Err(Error::NotSupported));
        assert_eq!(
            socket.set_option(SocketOption::Available, 1),
            Err(Error::NotSupported)
        );
        assert_eq!(
            socket.set_option(SocketOption::Acceptconn, 1),
            Err(Error::NotSupported)
        );
        assert_eq!(socket.set_option(SocketOption::Nonblocking, 1), Ok(()));

        // Not open yet: loops cannot be enabled.
        assert_eq!(socket.can_send(true), Err(Error::Closed));
        assert_eq!(socket.can_recv(true), Err(Error::Closed));
    }
}
