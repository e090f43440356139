//! `poll(2)` based completion port for POSIX hosts.
//!
//! Submissions run their syscall immediately in nonblocking mode; a
//! would-block parks the operation in a per-descriptor read or write slot
//! until readiness, at which point the syscall re-runs and the completion
//! is queued. `poll_once` dispatches queued completions outside the
//! registry lock, so sinks may re-enter the port. Completions therefore
//! only flow while an embedder thread pumps `poll_once`.

use std::collections::HashMap;
use std::mem::size_of;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use errno::{errno, set_errno};
use libc::{c_int, c_void};
use os_socketaddr::OsSocketAddr;

use crate::addr::{
    AddressFamily, MessageFlags, MulticastOption, ShutdownOp, SocketAddress, SocketOption,
    SocketProperties, SocketType,
};
use crate::port::{
    Completion, CompletionPort, CompletionSink, OpDesc, RawSock, SubmitError,
};
use crate::{Error, Result};

#[cfg(target_os = "linux")]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: c_int = 0;

#[cfg(target_os = "linux")]
use libc::{IPV6_ADD_MEMBERSHIP as IPV6_JOIN, IPV6_DROP_MEMBERSHIP as IPV6_LEAVE};
#[cfg(not(target_os = "linux"))]
use libc::{IPV6_JOIN_GROUP as IPV6_JOIN, IPV6_LEAVE_GROUP as IPV6_LEAVE};

enum Interest {
    Read,
    Write,
}

fn interest(op: &OpDesc) -> Interest {
    match op {
        OpDesc::Accept | OpDesc::Recv { .. } | OpDesc::RecvFrom { .. } => Interest::Read,
        OpDesc::Connect { .. } | OpDesc::Send { .. } | OpDesc::SendTo { .. } => Interest::Write,
    }
}

struct Pending {
    op: OpDesc,
    sink: CompletionSink,
}

#[derive(Default)]
struct FdOps {
    read: Option<Pending>,
    write: Option<Pending>,
}

#[derive(Default)]
struct PortState {
    ops: HashMap<RawSock, FdOps>,
    completed: Vec<(CompletionSink, Completion)>,
}

struct WakePipe {
    rd: RawSock,
    wr: RawSock,
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        unsafe {
            _ = libc::close(self.rd);
            _ = libc::close(self.wr);
        }
    }
}

/// Completion port emulation over `poll(2)`.
#[derive(Clone)]
pub struct SysPort {
    state: Arc<Mutex<PortState>>,
    wake: Arc<WakePipe>,
}

impl SysPort {
    pub fn new() -> Result<Self> {
        let mut fds = [0 as RawSock; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(last_net_error());
        }

        let wake = WakePipe {
            rd: fds[0],
            wr: fds[1],
        };
        noblock(wake.rd)?;
        noblock(wake.wr)?;

        Ok(Self {
            state: Arc::new(Mutex::new(PortState::default())),
            wake: Arc::new(wake),
        })
    }

    /// Run one poll round: dispatch queued completions, wait for readiness
    /// up to `timeout`, re-run ready operations and dispatch their
    /// completions. Returns the number of completions delivered.
    pub fn poll_once(&self, timeout: Duration) -> Result<usize> {
        let posted = std::mem::take(&mut self.state.lock().unwrap().completed);
        let mut dispatched = posted.len();
        for (sink, completion) in posted {
            sink(completion);
        }

        let mut fds: Vec<libc::pollfd> = vec![libc::pollfd {
            fd: self.wake.rd,
            events: libc::POLLIN,
            revents: 0,
        }];
        {
            let state = self.state.lock().unwrap();
            for (fd, entry) in &state.ops {
                let mut events: libc::c_short = 0;
                if entry.read.is_some() {
                    events |= libc::POLLIN;
                }
                if entry.write.is_some() {
                    events |= libc::POLLOUT;
                }
                if events != 0 {
                    fds.push(libc::pollfd {
                        fd: *fd,
                        events,
                        revents: 0,
                    });
                }
            }
        }

        let ready = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout.as_millis() as c_int,
            )
        };
        if ready < 0 {
            let e = errno();
            set_errno(e);
            if e.0 == libc::EINTR {
                return Ok(dispatched);
            }
            return Err(Error::from_os(e.0));
        }

        if fds[0].revents != 0 {
            let mut drain = [0u8; 64];
            while unsafe { libc::read(self.wake.rd, drain.as_mut_ptr() as *mut c_void, drain.len()) }
                > 0
            {}
        }

        let mut out: Vec<(CompletionSink, Completion)> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for pfd in &fds[1..] {
                if pfd.revents == 0 {
                    continue;
                }
                let hangup = pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
                let mut drained = false;
                if let Some(entry) = state.ops.get_mut(&pfd.fd) {
                    if pfd.revents & libc::POLLIN != 0 || hangup {
                        if let Some(pending) = entry.read.take() {
                            entry.read = retry(pfd.fd, pending, &mut out);
                        }
                    }
                    if pfd.revents & libc::POLLOUT != 0 || hangup {
                        if let Some(pending) = entry.write.take() {
                            entry.write = retry(pfd.fd, pending, &mut out);
                        }
                    }
                    drained = entry.read.is_none() && entry.write.is_none();
                }
                if drained {
                    state.ops.remove(&pfd.fd);
                }
            }
        }

        dispatched += out.len();
        for (sink, completion) in out {
            sink(completion);
        }

        log::trace!(target: "sys_port", "poll_once({})", dispatched);
        Ok(dispatched)
    }

    fn wake(&self) {
        let token = [1u8];
        _ = unsafe { libc::write(self.wake.wr, token.as_ptr() as *const c_void, 1) };
    }
}

impl CompletionPort for SysPort {
    fn create(&self, props: &SocketProperties) -> Result<RawSock> {
        let family = os_family(props.family)?;
        let sock_type = os_socket_type(props.sock_type)?;
        let proto = os_protocol(props.proto_type);

        let fd = unsafe { libc::socket(family, sock_type, proto) };
        if fd < 0 {
            return Err(last_net_error());
        }

        if let Err(err) = noblock(fd) {
            _ = unsafe { libc::close(fd) };
            return Err(err);
        }

        if props.flags.passive() {
            let on: c_int = 1;
            let ret = unsafe {
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_REUSEADDR,
                    &on as *const c_int as *const c_void,
                    size_of::<c_int>() as libc::socklen_t,
                )
            };
            if ret < 0 {
                let err = last_net_error();
                _ = unsafe { libc::close(fd) };
                return Err(err);
            }
        }

        log::trace!(target: "sys_port", "created socket({})", fd);
        Ok(fd)
    }

    fn bind(&self, fd: RawSock, addr: &SocketAddress) -> Result<()> {
        let inet = addr.to_inet().ok_or(Error::Fault)?;
        let os_addr: OsSocketAddr = inet.into();

        if unsafe { libc::bind(fd, os_addr.as_ptr(), os_addr.len()) } < 0 {
            return Err(last_net_error());
        }
        log::trace!(target: "sys_port", "fd({}) bound to {}", fd, inet);
        Ok(())
    }

    fn listen(&self, fd: RawSock) -> Result<()> {
        if unsafe { libc::listen(fd, libc::SOMAXCONN) } < 0 {
            return Err(last_net_error());
        }
        Ok(())
    }

    fn submit(
        &self,
        fd: RawSock,
        op: OpDesc,
        sink: CompletionSink,
    ) -> std::result::Result<(), SubmitError> {
        match attempt(fd, op) {
            Attempt::Complete(completion) => {
                self.state.lock().unwrap().completed.push((sink, completion));
                self.wake();
                Ok(())
            }
            Attempt::WouldBlock(op) => {
                {
                    let mut state = self.state.lock().unwrap();
                    let entry = state.ops.entry(fd).or_default();
                    let slot = match interest(&op) {
                        Interest::Read => &mut entry.read,
                        Interest::Write => &mut entry.write,
                    };
                    debug_assert!(slot.is_none(), "operation already pending on fd({})", fd);
                    *slot = Some(Pending { op, sink });
                }
                self.wake();
                Ok(())
            }
            Attempt::Failed(status, op) => Err(SubmitError { status, op }),
        }
    }

    fn cancel(&self, fd: RawSock) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.ops.remove(&fd) {
                for pending in [entry.read, entry.write].into_iter().flatten() {
                    log::trace!(target: "sys_port", "fd({}) pending op aborted", fd);
                    let completion =
                        Completion::error(Error::Aborted).with_buffer(pending.op.into_buffer());
                    state.completed.push((pending.sink, completion));
                }
            }
        }
        self.wake();
    }

    fn close(&self, fd: RawSock) {
        self.cancel(fd);
        log::trace!(target: "sys_port", "close socket({})", fd);
        _ = unsafe { libc::close(fd) };
    }

    fn finish_connect(&self, fd: RawSock) -> Result<()> {
        match so_error(fd)? {
            0 => Ok(()),
            err => Err(Error::from_os(err)),
        }
    }

    fn finish_accept(&self, _listener: RawSock, _accepted: RawSock) -> Result<()> {
        // Nothing to inherit on POSIX.
        Ok(())
    }

    fn local_name(&self, fd: RawSock) -> Result<SocketAddress> {
        sock_name(fd, false)
    }

    fn peer_name(&self, fd: RawSock) -> Result<SocketAddress> {
        sock_name(fd, true)
    }

    fn get_option(&self, fd: RawSock, option: SocketOption) -> Result<u64> {
        match option {
            SocketOption::Linger => {
                let mut value = libc::linger {
                    l_onoff: 0,
                    l_linger: 0,
                };
                let mut len = size_of::<libc::linger>() as libc::socklen_t;
                let ret = unsafe {
                    libc::getsockopt(
                        fd,
                        libc::SOL_SOCKET,
                        libc::SO_LINGER,
                        &mut value as *mut libc::linger as *mut c_void,
                        &mut len,
                    )
                };
                if ret < 0 {
                    return Err(last_net_error());
                }
                Ok(if value.l_onoff != 0 {
                    value.l_linger as u64
                } else {
                    0
                })
            }
            SocketOption::Error => Ok(so_error(fd)? as u64),
            SocketOption::Available => self.available(fd),
            SocketOption::Nonblocking => Ok(1),
            _ => {
                let (level, name) = os_option(option)?;
                let mut value: c_int = 0;
                let mut len = size_of::<c_int>() as libc::socklen_t;
                let ret = unsafe {
                    libc::getsockopt(
                        fd,
                        level,
                        name,
                        &mut value as *mut c_int as *mut c_void,
                        &mut len,
                    )
                };
                if ret < 0 {
                    return Err(last_net_error());
                }
                Ok(value as u64)
            }
        }
    }

    fn set_option(&self, fd: RawSock, option: SocketOption, value: u64) -> Result<()> {
        let ret = match option {
            SocketOption::Linger => {
                let value = libc::linger {
                    l_onoff: (value != 0) as c_int,
                    l_linger: value as c_int,
                };
                unsafe {
                    libc::setsockopt(
                        fd,
                        libc::SOL_SOCKET,
                        libc::SO_LINGER,
                        &value as *const libc::linger as *const c_void,
                        size_of::<libc::linger>() as libc::socklen_t,
                    )
                }
            }
            SocketOption::Error
            | SocketOption::Available
            | SocketOption::Shutdown
            | SocketOption::Acceptconn
            | SocketOption::Nonblocking => return Err(Error::NotSupported),
            _ => {
                let (level, name) = os_option(option)?;
                let value = value as c_int;
                unsafe {
                    libc::setsockopt(
                        fd,
                        level,
                        name,
                        &value as *const c_int as *const c_void,
                        size_of::<c_int>() as libc::socklen_t,
                    )
                }
            }
        };
        if ret < 0 {
            return Err(last_net_error());
        }
        Ok(())
    }

    fn shutdown(&self, fd: RawSock, how: ShutdownOp) -> Result<()> {
        let how = match how {
            ShutdownOp::Read => libc::SHUT_RD,
            ShutdownOp::Write => libc::SHUT_WR,
            ShutdownOp::Both => libc::SHUT_RDWR,
        };
        if unsafe { libc::shutdown(fd, how) } < 0 {
            return Err(last_net_error());
        }
        Ok(())
    }

    fn multicast_join(&self, fd: RawSock, option: &MulticastOption) -> Result<()> {
        multicast(fd, option, true)
    }

    fn multicast_leave(&self, fd: RawSock, option: &MulticastOption) -> Result<()> {
        multicast(fd, option, false)
    }

    fn available(&self, fd: RawSock) -> Result<u64> {
        let mut count: c_int = 0;
        if unsafe { libc::ioctl(fd, libc::FIONREAD, &mut count) } < 0 {
            return Err(last_net_error());
        }
        Ok(count as u64)
    }

    fn resolve(
        &self,
        host: Option<&str>,
        port: u16,
        family: AddressFamily,
        passive: bool,
    ) -> Result<Vec<SocketAddress>> {
        let host = match host {
            Some(h) if !h.is_empty() => h.to_owned(),
            _ if passive => match family {
                AddressFamily::Inet6 => "::".to_owned(),
                _ => "0.0.0.0".to_owned(),
            },
            _ => "localhost".to_owned(),
        };

        log::info!(target: "sys_port", "resolving {}:{}", host, port);

        let resolved = (host.as_str(), port).to_socket_addrs().map_err(Error::from)?;

        Ok(resolved
            .filter(|addr| match family {
                AddressFamily::Inet => addr.is_ipv4(),
                AddressFamily::Inet6 => addr.is_ipv6(),
                _ => true,
            })
            .map(SocketAddress::from)
            .collect())
    }
}

enum Attempt {
    Complete(Completion),
    WouldBlock(OpDesc),
    Failed(Error, OpDesc),
}

fn attempt(fd: RawSock, op: OpDesc) -> Attempt {
    match op {
        OpDesc::Connect { addr } => attempt_connect(fd, addr),
        OpDesc::Accept => attempt_accept(fd),
        OpDesc::Send { buffer, flags } => attempt_send(fd, buffer, flags, None),
        OpDesc::SendTo { buffer, flags, to } => attempt_send(fd, buffer, flags, Some(to)),
        OpDesc::Recv { buffer } => attempt_recv(fd, buffer, false),
        OpDesc::RecvFrom { buffer } => attempt_recv(fd, buffer, true),
    }
}

/// Re-run a parked operation once its descriptor signalled readiness. A
/// failure here is an asynchronous outcome and completes through the sink.
fn retry(
    fd: RawSock,
    pending: Pending,
    out: &mut Vec<(CompletionSink, Completion)>,
) -> Option<Pending> {
    if let OpDesc::Connect { .. } = pending.op {
        let completion = match so_error(fd) {
            Ok(0) => Completion::ok(0),
            Ok(err) => Completion::error(Error::from_os(err)),
            Err(err) => Completion::error(err),
        };
        out.push((pending.sink, completion));
        return None;
    }

    match attempt(fd, pending.op) {
        Attempt::Complete(completion) => {
            out.push((pending.sink, completion));
            None
        }
        Attempt::WouldBlock(op) => Some(Pending {
            op,
            sink: pending.sink,
        }),
        Attempt::Failed(status, op) => {
            let completion = Completion::error(status).with_buffer(op.into_buffer());
            out.push((pending.sink, completion));
            None
        }
    }
}

fn attempt_connect(fd: RawSock, addr: SocketAddress) -> Attempt {
    let inet = match addr.to_inet() {
        Some(inet) => inet,
        None => return Attempt::Failed(Error::Fault, OpDesc::Connect { addr }),
    };
    let os_addr: OsSocketAddr = inet.into();

    let ret = unsafe { libc::connect(fd, os_addr.as_ptr(), os_addr.len()) };
    if ret < 0 {
        let e = errno();
        set_errno(e);
        match e.0 {
            libc::EINPROGRESS | libc::EAGAIN | libc::EWOULDBLOCK | libc::EALREADY => {
                return Attempt::WouldBlock(OpDesc::Connect { addr });
            }
            libc::EISCONN => {}
            _ => return Attempt::Failed(Error::from_os(e.0), OpDesc::Connect { addr }),
        }
    }

    log::trace!(target: "sys_port", "fd({}) connected synchronously", fd);
    Attempt::Complete(Completion::ok(0))
}

fn attempt_accept(fd: RawSock) -> Attempt {
    let mut remote = [0u8; size_of::<libc::sockaddr_in6>()];
    let mut remote_len = remote.len() as libc::socklen_t;

    let conn = unsafe {
        libc::accept(
            fd,
            remote.as_mut_ptr() as *mut libc::sockaddr,
            &mut remote_len,
        )
    };
    if conn < 0 {
        let e = errno();
        set_errno(e);
        if e.0 == libc::EAGAIN || e.0 == libc::EWOULDBLOCK {
            return Attempt::WouldBlock(OpDesc::Accept);
        }
        return Attempt::Failed(Error::from_os(e.0), OpDesc::Accept);
    }

    if let Err(err) = noblock(conn) {
        _ = unsafe { libc::close(conn) };
        return Attempt::Failed(err, OpDesc::Accept);
    }

    let from = unsafe {
        OsSocketAddr::copy_from_raw(remote.as_mut_ptr() as *mut libc::sockaddr, remote_len)
    }
    .into_addr()
    .map(SocketAddress::from);

    log::trace!(target: "sys_port", "fd({}) accepted connection({}) from ({:?})", fd, conn, from);

    Attempt::Complete(Completion {
        status: Ok(()),
        bytes: 0,
        buffer: None,
        from,
        flags: MessageFlags::empty(),
        accepted: Some(conn),
    })
}

fn attempt_send(
    fd: RawSock,
    buffer: Vec<u8>,
    flags: MessageFlags,
    to: Option<SocketAddress>,
) -> Attempt {
    let os_dest = match &to {
        Some(dest) => dest.to_inet().map(OsSocketAddr::from),
        None => None,
    };
    if to.is_some() && os_dest.is_none() {
        return Attempt::Failed(Error::Fault, rebuild_send(buffer, flags, to));
    }

    let os_flags = os_message_flags(flags) | SEND_FLAGS;
    let sent = match &os_dest {
        Some(os_addr) => unsafe {
            libc::sendto(
                fd,
                buffer.as_ptr() as *const c_void,
                buffer.len(),
                os_flags,
                os_addr.as_ptr(),
                os_addr.len(),
            )
        },
        None => unsafe { libc::send(fd, buffer.as_ptr() as *const c_void, buffer.len(), os_flags) },
    };

    if sent < 0 {
        let e = errno();
        set_errno(e);
        if e.0 == libc::EAGAIN || e.0 == libc::EWOULDBLOCK {
            return Attempt::WouldBlock(rebuild_send(buffer, flags, to));
        }
        return Attempt::Failed(Error::from_os(e.0), rebuild_send(buffer, flags, to));
    }

    log::trace!(target: "sys_port", "fd({}) sent bytes({})", fd, sent);
    Attempt::Complete(Completion::ok(sent as usize).with_buffer(Some(buffer)))
}

fn rebuild_send(buffer: Vec<u8>, flags: MessageFlags, to: Option<SocketAddress>) -> OpDesc {
    match to {
        Some(to) => OpDesc::SendTo { buffer, flags, to },
        None => OpDesc::Send { buffer, flags },
    }
}

fn attempt_recv(fd: RawSock, mut buffer: Vec<u8>, datagram: bool) -> Attempt {
    let mut remote = [0u8; size_of::<libc::sockaddr_in6>()];
    let mut remote_len = remote.len() as libc::socklen_t;

    let received = if datagram {
        unsafe {
            libc::recvfrom(
                fd,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                0,
                remote.as_mut_ptr() as *mut libc::sockaddr,
                &mut remote_len,
            )
        }
    } else {
        unsafe { libc::recv(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len(), 0) }
    };

    if received < 0 {
        let e = errno();
        set_errno(e);
        let op = if datagram {
            OpDesc::RecvFrom { buffer }
        } else {
            OpDesc::Recv { buffer }
        };
        if e.0 == libc::EAGAIN || e.0 == libc::EWOULDBLOCK {
            return Attempt::WouldBlock(op);
        }
        return Attempt::Failed(Error::from_os(e.0), op);
    }

    let from = if datagram {
        unsafe {
            OsSocketAddr::copy_from_raw(remote.as_mut_ptr() as *mut libc::sockaddr, remote_len)
        }
        .into_addr()
        .map(SocketAddress::from)
    } else {
        None
    };

    log::trace!(target: "sys_port", "fd({}) received bytes({})", fd, received);

    Attempt::Complete(Completion {
        status: Ok(()),
        bytes: received as usize,
        buffer: Some(buffer),
        from,
        flags: MessageFlags::empty(),
        accepted: None,
    })
}

fn noblock(fd: RawSock) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(last_net_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(last_net_error());
        }
    }
    Ok(())
}

fn last_net_error() -> Error {
    let e = errno();
    set_errno(e);
    Error::from_os(e.0)
}

fn so_error(fd: RawSock) -> Result<i32> {
    let mut value: c_int = 0;
    let mut len = size_of::<c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut value as *mut c_int as *mut c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return Err(last_net_error());
    }
    Ok(value)
}

fn sock_name(fd: RawSock, peer: bool) -> Result<SocketAddress> {
    let mut buf = [0u8; size_of::<libc::sockaddr_in6>()];
    let mut len = buf.len() as libc::socklen_t;

    let ret = unsafe {
        if peer {
            libc::getpeername(fd, buf.as_mut_ptr() as *mut libc::sockaddr, &mut len)
        } else {
            libc::getsockname(fd, buf.as_mut_ptr() as *mut libc::sockaddr, &mut len)
        }
    };
    if ret < 0 {
        return Err(last_net_error());
    }

    unsafe { OsSocketAddr::copy_from_raw(buf.as_mut_ptr() as *mut libc::sockaddr, len) }
        .into_addr()
        .map(SocketAddress::from)
        .ok_or(Error::Fault)
}

fn os_family(family: AddressFamily) -> Result<c_int> {
    match family {
        AddressFamily::Inet => Ok(libc::AF_INET),
        AddressFamily::Inet6 => Ok(libc::AF_INET6),
        AddressFamily::Unspecified => Ok(libc::AF_UNSPEC),
        AddressFamily::Proxy => Err(Error::Fault),
    }
}

fn os_socket_type(sock_type: SocketType) -> Result<c_int> {
    match sock_type {
        SocketType::Stream => Ok(libc::SOCK_STREAM),
        SocketType::Dgram => Ok(libc::SOCK_DGRAM),
        SocketType::Raw => Ok(libc::SOCK_RAW),
        SocketType::SeqPacket => Ok(libc::SOCK_SEQPACKET),
        #[cfg(target_os = "linux")]
        SocketType::Rdm => Ok(libc::SOCK_RDM),
        #[cfg(not(target_os = "linux"))]
        SocketType::Rdm => Err(Error::NotSupported),
    }
}

fn os_protocol(proto: crate::addr::ProtocolType) -> c_int {
    use crate::addr::ProtocolType;
    match proto {
        ProtocolType::Unspecified => 0,
        ProtocolType::Tcp => libc::IPPROTO_TCP,
        ProtocolType::Udp => libc::IPPROTO_UDP,
        ProtocolType::Icmp => libc::IPPROTO_ICMP,
        ProtocolType::Icmpv6 => libc::IPPROTO_ICMPV6,
    }
}

fn os_option(option: SocketOption) -> Result<(c_int, c_int)> {
    match option {
        SocketOption::ReuseAddr => Ok((libc::SOL_SOCKET, libc::SO_REUSEADDR)),
        SocketOption::KeepAlive => Ok((libc::SOL_SOCKET, libc::SO_KEEPALIVE)),
        SocketOption::Broadcast => Ok((libc::SOL_SOCKET, libc::SO_BROADCAST)),
        SocketOption::OobInline => Ok((libc::SOL_SOCKET, libc::SO_OOBINLINE)),
        SocketOption::SndBuf => Ok((libc::SOL_SOCKET, libc::SO_SNDBUF)),
        SocketOption::RcvBuf => Ok((libc::SOL_SOCKET, libc::SO_RCVBUF)),
        SocketOption::Acceptconn => Ok((libc::SOL_SOCKET, libc::SO_ACCEPTCONN)),
        SocketOption::Ttl => Ok((libc::IPPROTO_IP, libc::IP_TTL)),
        _ => Err(Error::NotSupported),
    }
}

fn os_message_flags(flags: MessageFlags) -> c_int {
    let mut os_flags = 0;
    if flags.contains(MessageFlags::OOB) {
        os_flags |= libc::MSG_OOB;
    }
    if flags.contains(MessageFlags::PEEK) {
        os_flags |= libc::MSG_PEEK;
    }
    if flags.contains(MessageFlags::DONTROUTE) {
        os_flags |= libc::MSG_DONTROUTE;
    }
    os_flags
}

fn multicast(fd: RawSock, option: &MulticastOption, join: bool) -> Result<()> {
    let ret = match option.address {
        IpAddr::V4(group) => {
            let mreq = libc::ip_mreq {
                imr_multiaddr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(group.octets()),
                },
                imr_interface: libc::in_addr {
                    s_addr: option.interface_index,
                },
            };
            let name = if join {
                libc::IP_ADD_MEMBERSHIP
            } else {
                libc::IP_DROP_MEMBERSHIP
            };
            unsafe {
                libc::setsockopt(
                    fd,
                    libc::IPPROTO_IP,
                    name,
                    &mreq as *const libc::ip_mreq as *const c_void,
                    size_of::<libc::ip_mreq>() as libc::socklen_t,
                )
            }
        }
        IpAddr::V6(group) => {
            let mreq = libc::ipv6_mreq {
                ipv6mr_multiaddr: libc::in6_addr {
                    s6_addr: group.octets(),
                },
                ipv6mr_interface: option.interface_index,
            };
            let name = if join { IPV6_JOIN } else { IPV6_LEAVE };
            unsafe {
                libc::setsockopt(
                    fd,
                    libc::IPPROTO_IPV6,
                    name,
                    &mreq as *const libc::ipv6_mreq as *const c_void,
                    size_of::<libc::ipv6_mreq>() as libc::socklen_t,
                )
            }
        }
    };
    if ret < 0 {
        return Err(last_net_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{ProtocolType, SocketFlags};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::mpsc;

    fn udp_props() -> SocketProperties {
        SocketProperties {
            family: AddressFamily::Inet,
            sock_type: SocketType::Dgram,
            proto_type: ProtocolType::Udp,
            address: SocketAddress::Inet(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
            flags: SocketFlags::empty(),
        }
    }

    #[test]
    fn test_resolve_family_filter() {
        let port = SysPort::new().unwrap();

        let list = port
            .resolve(Some("localhost"), 4840, AddressFamily::Inet, false)
            .unwrap();
        assert!(!list.is_empty());
        assert!(list
            .iter()
            .all(|addr| addr.family() == AddressFamily::Inet));
    }

    #[test]
    fn test_resolve_passive_default_host() {
        let port = SysPort::new().unwrap();

        let list = port
            .resolve(None, 4840, AddressFamily::Inet, true)
            .unwrap();
        assert!(!list.is_empty());
        assert_eq!(list[0].port(), 4840);
    }

    #[test]
    fn test_cancel_completes_pending_with_aborted() {
        _ = pretty_env_logger::try_init();

        let port = SysPort::new().unwrap();
        let props = udp_props();

        let fd = port.create(&props).unwrap();
        port.bind(fd, &props.address).unwrap();

        let (tx, rx) = mpsc::channel();
        port.submit(
            fd,
            OpDesc::RecvFrom {
                buffer: vec![0u8; 64],
            },
            Box::new(move |completion| {
                tx.send((completion.status, completion.buffer.map(|b| b.len())))
                    .unwrap();
            }),
        )
        .unwrap_or_else(|_| panic!("recvfrom should park"));

        port.cancel(fd);
        port.poll_once(Duration::from_millis(10)).unwrap();

        let (status, buffer_len) = rx.try_recv().unwrap();
        assert_eq!(status, Err(Error::Aborted));
        assert_eq!(buffer_len, Some(64));

        port.close(fd);
    }
}
