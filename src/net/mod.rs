pub mod conn;
pub mod framing;
pub mod selector;
pub mod speed;

pub use conn::{Conn, ConnId, ConnState};
pub use framing::{HttpFramer, PacketKind, MAX_PACKAGE_SIZE, MIN_PACKAGE_SIZE};
#[cfg(target_os = "linux")]
pub use selector::EpollSelector;
pub use selector::{Event, PollSelector, Selector, INTEREST_READ, INTEREST_WRITE};
pub use speed::{SpeedSample, SPEED_UNLIMITED};

use std::io;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::AsRawFd;
use std::time::Duration;

use ahash::AHashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::warn;

use crate::actor::{Actor, ActorCtl};
use crate::config::FrameConfig;
use crate::error::{ConnError, ProtocolError};
use crate::message::{kind, unpack_close_req, AcceptedSock, ConnectCtx, ListenCtx};
use crate::message::{Message, MsgBuf, MsgCtx};
use crate::timer::TimerId;
use crate::warn_throttled;

/// Timer kind owned by the net layer; user handlers get every other kind.
pub const NET_TIMEOUT_TIMER: u32 = 10000;

/// What to do with a connection after `on_error`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorAction {
    Close,
    Keep,
}

/// Protocol behavior plugged into a [`NetActor`]. Defaults give HTTP
/// framing, accept-everything, close-on-error.
pub trait NetHandler: Send + 'static {
    /// Expected total length of the packet forming in `conn`.
    fn frame(&mut self, conn: &mut Conn) -> Result<usize, ProtocolError> {
        conn.frame_http()
    }

    /// A complete packet sits in `conn.data()`.
    fn on_packet(&mut self, conn: &mut Conn, api: &mut NetApi, ctl: &mut ActorCtl);

    /// Non-reserved message addressed to this actor.
    fn on_msg(&mut self, _core: &mut NetCore, ctl: &mut ActorCtl, msg: Message) {
        warn!("[NetActor] {} dropped message kind {}", ctl.self_addr(), msg.kind);
    }

    /// Claims or rejects an accepted socket. Returning `None` means the
    /// handler disposed of it (or kept it) itself.
    fn on_accept(&mut self, sock: Socket) -> Option<Socket> {
        Some(sock)
    }

    fn on_connect(&mut self, _conn: &mut Conn, _api: &mut NetApi, _ctl: &mut ActorCtl) {}

    fn on_close(&mut self, _conn: &mut Conn) {}

    fn on_error(&mut self, _conn: &mut Conn, _err: io::Error) -> ErrorAction {
        ErrorAction::Close
    }

    fn on_timer(&mut self, _core: &mut NetCore, ctl: &mut ActorCtl, _id: TimerId, kind: u32, _ctx: u64) {
        warn!("[NetActor] {} unhandled timer kind {kind}", ctl.self_addr());
    }
}

/// Connection operations available inside handler callbacks, borrowing
/// the selector and removal list away from the connection map.
pub struct NetApi<'a> {
    selector: &'a mut dyn Selector,
    removed: &'a mut Vec<ConnId>,
}

impl NetApi<'_> {
    /// Queues `data` for delivery, arming write interest if needed.
    pub fn send(&mut self, conn: &mut Conn, data: MsgBuf) -> Result<(), ConnError> {
        send_on(conn, self.selector, data)
    }

    /// Graceful close: drains queued sends first. Legal only on
    /// `Connected` (or already `Closing`) connections.
    pub fn close(&mut self, conn: &mut Conn) -> Result<(), ConnError> {
        close_on(conn, self.selector)
    }

    /// Immediate close. Queued sends are dropped.
    pub fn force_close(&mut self, conn: &mut Conn) {
        mark_removed(conn, self.selector, self.removed);
    }
}

fn mark_removed(conn: &mut Conn, selector: &mut dyn Selector, removed: &mut Vec<ConnId>) {
    if conn.state == ConnState::Closed {
        return;
    }
    conn.state = ConnState::Closed;
    selector.del(conn.sock.as_raw_fd());
    removed.push(conn.id());
}

fn send_on(conn: &mut Conn, selector: &mut dyn Selector, data: MsgBuf) -> Result<(), ConnError> {
    if !matches!(conn.state, ConnState::Connected | ConnState::Connecting) {
        return Err(ConnError::InvalidState);
    }
    let was_empty = conn.send_list.is_empty();
    conn.queue_send(data)?;
    if was_empty && conn.state == ConnState::Connected {
        selector.set_read_write(conn.sock.as_raw_fd())?;
    }
    Ok(())
}

fn close_on(conn: &mut Conn, selector: &mut dyn Selector) -> Result<(), ConnError> {
    match conn.state {
        ConnState::Connected => {
            conn.state = ConnState::Closing;
            selector.set_write(conn.sock.as_raw_fd())?;
            Ok(())
        }
        ConnState::Closing => Ok(()),
        _ => Err(ConnError::InvalidState),
    }
}

/// The connection engine of a net actor: the connection map, the
/// readiness selector, timeouts, and rate accounting. Owned by one
/// actor thread; nothing here is shared.
pub struct NetCore {
    conns: AHashMap<ConnId, Conn>,
    selector: Box<dyn Selector>,
    removed: Vec<ConnId>,
    dead: Vec<Conn>,
    events: Vec<Event>,
    speed: SpeedSample<16>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    send_speed_limit: u32,
    recv_speed_limit: u32,
    listen_backlog: i32,
    send_queue_limit: usize,
}

impl NetCore {
    pub fn new(selector: Box<dyn Selector>, cfg: &FrameConfig) -> Self {
        Self {
            conns: AHashMap::new(),
            selector,
            removed: Vec::new(),
            dead: Vec::new(),
            events: Vec::with_capacity(64),
            speed: SpeedSample::new(),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
            send_speed_limit: cfg.send_speed_limit,
            recv_speed_limit: cfg.recv_speed_limit,
            listen_backlog: cfg.listen_backlog,
            send_queue_limit: cfg.send_queue_limit,
        }
    }

    pub fn apply_cfg(&mut self, cfg: &FrameConfig) {
        self.connect_timeout = Duration::from_secs(cfg.connect_timeout_secs);
        self.idle_timeout = Duration::from_secs(cfg.idle_timeout_secs);
        self.send_speed_limit = cfg.send_speed_limit;
        self.recv_speed_limit = cfg.recv_speed_limit;
        self.listen_backlog = cfg.listen_backlog;
        self.send_queue_limit = cfg.send_queue_limit;
    }

    pub fn conn(&self, id: ConnId) -> Option<&Conn> {
        self.conns.get(&id)
    }

    pub fn conn_mut(&mut self, id: ConnId) -> Option<&mut Conn> {
        self.conns.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Current and 4-second average transfer rates as (read, written).
    pub fn speed(&self) -> ((u32, u32), (u32, u32)) {
        (self.speed.cur(), self.speed.avg(4))
    }

    /// One readiness round: poll, dispatch events, account rates, sweep
    /// removals. Returns a progress count for the host loop's backoff.
    pub fn poll_io<H: NetHandler>(&mut self, h: &mut H, ctl: &mut ActorCtl) -> u32 {
        let (rd_cur, wr_cur) = self.speed.cur();
        let mut mode = 0;
        if rd_cur < self.recv_speed_limit {
            mode |= INTEREST_READ;
        }
        if wr_cur < self.send_speed_limit {
            mode |= INTEREST_WRITE;
        }

        let mut read_bytes = 0u32;
        let mut write_bytes = 0u32;

        if mode != 0 {
            let mut events = std::mem::take(&mut self.events);
            events.clear();
            if let Err(e) = self.selector.poll(mode, 0, &mut events) {
                warn_throttled!(
                    Duration::from_secs(5),
                    "[NetCore] selector poll failed: {e}"
                );
            }
            for ev in &events {
                let id = ev.fd as ConnId;
                if ev.error {
                    self.on_error_event(id, h);
                    continue;
                }
                if ev.readable {
                    read_bytes = read_bytes.saturating_add(self.on_read_event(id, h, ctl));
                }
                if ev.writable {
                    write_bytes = write_bytes.saturating_add(self.on_write_event(id, h, ctl));
                }
            }
            self.events = events;
        }

        self.speed
            .sample(ctl.clock().unix_secs(), read_bytes, write_bytes);
        // Bytes moved are the loop's heat signal; idle writable reports
        // from a level-triggered backend contribute nothing.
        read_bytes
            .saturating_add(write_bytes)
            .saturating_add(self.sweep(h, ctl))
    }

    fn on_read_event<H: NetHandler>(&mut self, id: ConnId, h: &mut H, ctl: &mut ActorCtl) -> u32 {
        let idle_timeout = self.idle_timeout;
        let Self {
            conns,
            selector,
            removed,
            ..
        } = self;
        let Some(conn) = conns.get_mut(&id) else {
            return 0;
        };
        match conn.state {
            ConnState::Connected => {
                let mut api = NetApi {
                    selector: selector.as_mut(),
                    removed,
                };
                do_recv(conn, &mut api, h, ctl, idle_timeout)
            }
            ConnState::Listening => {
                do_accept(conn, h, ctl);
                0
            }
            _ => 0,
        }
    }

    fn on_write_event<H: NetHandler>(&mut self, id: ConnId, h: &mut H, ctl: &mut ActorCtl) -> u32 {
        let idle_timeout = self.idle_timeout;
        let Self {
            conns,
            selector,
            removed,
            ..
        } = self;
        let Some(conn) = conns.get_mut(&id) else {
            return 0;
        };
        let mut api = NetApi {
            selector: selector.as_mut(),
            removed,
        };
        match conn.state {
            ConnState::Connected => {
                if conn.send_list.is_empty() {
                    // Nothing to drain; stop watching for writability.
                    let _ = api.selector.set_read(conn.sock.as_raw_fd());
                    0
                } else {
                    do_send(conn, &mut api, h)
                }
            }
            ConnState::Connecting => {
                do_connect(conn, &mut api, h, ctl, idle_timeout);
                0
            }
            ConnState::Closing => {
                let written = do_send(conn, &mut api, h);
                if conn.send_list.is_empty() && conn.state == ConnState::Closing {
                    mark_removed(conn, api.selector, api.removed);
                }
                written
            }
            _ => 0,
        }
    }

    fn on_error_event<H: NetHandler>(&mut self, id: ConnId, h: &mut H) {
        let Self {
            conns,
            selector,
            removed,
            ..
        } = self;
        let Some(conn) = conns.get_mut(&id) else {
            return;
        };
        let err = conn
            .sock
            .take_error()
            .ok()
            .flatten()
            .unwrap_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe));
        match conn.state {
            ConnState::Closing | ConnState::Closed => {
                mark_removed(conn, selector.as_mut(), removed);
            }
            _ => {
                if h.on_error(conn, err) == ErrorAction::Close {
                    mark_removed(conn, selector.as_mut(), removed);
                }
            }
        }
    }

    /// Applies deferred removals: stale sockets first, then everything
    /// marked during this round. `on_close` fires exactly once per
    /// connection, here.
    fn sweep<H: NetHandler>(&mut self, h: &mut H, ctl: &mut ActorCtl) -> u32 {
        let mut swept = 0u32;
        for mut conn in self.dead.drain(..) {
            if let Some(t) = conn.timer.take() {
                ctl.del_timer(t);
            }
            h.on_close(&mut conn);
            swept += 1;
        }
        let removed = std::mem::take(&mut self.removed);
        for id in removed {
            // The descriptor may have been reused by a newer connection;
            // only a still-Closed entry belongs to this removal.
            let stale = self
                .conns
                .get(&id)
                .map(|c| c.state == ConnState::Closed)
                .unwrap_or(false);
            if !stale {
                continue;
            }
            if let Some(mut conn) = self.conns.remove(&id) {
                if let Some(t) = conn.timer.take() {
                    ctl.del_timer(t);
                }
                h.on_close(&mut conn);
                swept += 1;
            }
        }
        swept
    }

    /// Registers a connection: non-blocking mode, timeout timer, selector
    /// interest. A stale `Closed` entry under the same descriptor is
    /// displaced into the dead list.
    pub fn add_conn(&mut self, mut conn: Conn, ctl: &mut ActorCtl) -> io::Result<ConnId> {
        conn.sock.set_nonblocking(true)?;
        let id = conn.id();
        let fd = conn.sock.as_raw_fd();

        let interest = match conn.state {
            ConnState::Listening => INTEREST_READ,
            ConnState::Connecting => INTEREST_WRITE,
            _ => INTEREST_READ | INTEREST_WRITE,
        };
        self.selector.add(fd, interest)?;

        let timeout = match conn.state {
            ConnState::Connecting => Some(self.connect_timeout),
            ConnState::Connected => Some(self.idle_timeout),
            _ => None,
        };
        conn.timer = timeout.map(|wait| ctl.add_timer(wait, NET_TIMEOUT_TIMER, id as u64));

        if let Some(mut old) = self.conns.insert(id, conn) {
            if old.state != ConnState::Closed {
                warn!("[NetCore] conn {id} displaced while still {:?}", old.state);
                mark_removed(&mut old, self.selector.as_mut(), &mut self.removed);
            }
            self.dead.push(old);
        }
        Ok(id)
    }

    /// Binds and listens. Returns the connection id and the bound port,
    /// which differs from `port` when 0 was requested.
    pub fn create_listen_socket(
        &mut self,
        ip: &str,
        port: u16,
        client: crate::message::Addr,
        ctl: &mut ActorCtl,
    ) -> io::Result<(ConnId, u16)> {
        let ip: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let sock = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        sock.set_reuse_address(true)?;
        sock.set_nonblocking(true)?;
        sock.bind(&SocketAddr::from((ip, port)).into())?;
        sock.listen(self.listen_backlog)?;
        let bound = sock
            .local_addr()?
            .as_socket()
            .map(|a| a.port())
            .unwrap_or(port);
        let id = self.add_conn(Conn::listener(sock, client), ctl)?;
        Ok((id, bound))
    }

    /// Starts a non-blocking connect. The id is valid immediately; the
    /// handler's `on_connect` fires when the socket becomes writable.
    pub fn create_connect_socket(
        &mut self,
        ip: Ipv4Addr,
        port: u16,
        ctl: &mut ActorCtl,
    ) -> io::Result<ConnId> {
        let sock = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        sock.set_nonblocking(true)?;
        sock.set_nodelay(true)?;
        let addr = SocketAddr::from((ip, port)).into();
        let state = loop {
            match sock.connect(&addr) {
                Ok(()) => break ConnState::Connected,
                Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                    break ConnState::Connecting;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.add_conn(Conn::new(sock, state, self.send_queue_limit), ctl)
    }

    pub fn send(&mut self, id: ConnId, data: MsgBuf) -> Result<(), ConnError> {
        let Self {
            conns, selector, ..
        } = self;
        let conn = conns.get_mut(&id).ok_or(ConnError::NotFound)?;
        send_on(conn, selector.as_mut(), data)
    }

    pub fn close(&mut self, id: ConnId) -> Result<(), ConnError> {
        let Self {
            conns, selector, ..
        } = self;
        let conn = conns.get_mut(&id).ok_or(ConnError::NotFound)?;
        close_on(conn, selector.as_mut())
    }

    pub fn force_close(&mut self, id: ConnId) -> Result<(), ConnError> {
        let Self {
            conns,
            selector,
            removed,
            ..
        } = self;
        let conn = conns.get_mut(&id).ok_or(ConnError::NotFound)?;
        mark_removed(conn, selector.as_mut(), removed);
        Ok(())
    }

    /// Abortive close: RST instead of FIN.
    pub fn reset(&mut self, id: ConnId) -> Result<(), ConnError> {
        let Self {
            conns,
            selector,
            removed,
            ..
        } = self;
        let conn = conns.get_mut(&id).ok_or(ConnError::NotFound)?;
        conn.arm_reset()?;
        mark_removed(conn, selector.as_mut(), removed);
        Ok(())
    }

    /// Fires `on_connect` for a connect that completed synchronously and
    /// will never produce a Connecting write event.
    fn fire_connect_if_ready<H: NetHandler>(&mut self, id: ConnId, h: &mut H, ctl: &mut ActorCtl) {
        let Self {
            conns,
            selector,
            removed,
            ..
        } = self;
        let Some(conn) = conns.get_mut(&id) else {
            return;
        };
        if conn.state != ConnState::Connected {
            return;
        }
        let mut api = NetApi {
            selector: selector.as_mut(),
            removed,
        };
        h.on_connect(conn, &mut api, ctl);
    }

    fn handle_timeout<H: NetHandler>(&mut self, id: ConnId, h: &mut H) {
        let Self {
            conns,
            selector,
            removed,
            ..
        } = self;
        let Some(conn) = conns.get_mut(&id) else {
            return;
        };
        conn.timer = None;
        if matches!(conn.state, ConnState::Closing | ConnState::Closed) {
            return;
        }
        let err = io::Error::from_raw_os_error(libc::ETIMEDOUT);
        if h.on_error(conn, err) == ErrorAction::Close {
            if conn.state == ConnState::Connected {
                let _ = close_on(conn, selector.as_mut());
            } else {
                mark_removed(conn, selector.as_mut(), removed);
            }
        }
    }
}

fn do_recv<H: NetHandler>(
    conn: &mut Conn,
    api: &mut NetApi,
    h: &mut H,
    ctl: &mut ActorCtl,
    idle_timeout: Duration,
) -> u32 {
    let mut total = 0u32;
    loop {
        if conn.recv_len == conn.recv_buf.len() {
            conn.grow_recv_default();
        }
        let want = conn.recv_buf.len() - conn.recv_len;
        let n = match (&conn.sock).read(&mut conn.recv_buf[conn.recv_len..]) {
            Ok(0) => {
                // Peer closed. Whatever is buffered is the last packet.
                if conn.recv_len > 0 {
                    h.on_packet(conn, api, ctl);
                    conn.reset_packet();
                }
                mark_removed(conn, api.selector, api.removed);
                return total;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if h.on_error(conn, e) == ErrorAction::Close {
                    mark_removed(conn, api.selector, api.removed);
                }
                return total;
            }
        };
        total += n as u32;
        conn.recv_len += n;
        if let Some(t) = conn.timer {
            ctl.change_timer(t, idle_timeout);
        }

        loop {
            let expected = match h.frame(conn) {
                Ok(v) => v,
                Err(e) => {
                    warn!("[NetCore] conn {} protocol error: {e}", conn.id());
                    mark_removed(conn, api.selector, api.removed);
                    return total;
                }
            };
            if expected == conn.recv_len {
                h.on_packet(conn, api, ctl);
                conn.reset_packet();
                break;
            }
            if expected > conn.recv_len {
                conn.grow_recv(expected);
                break;
            }
            if expected == 0 {
                warn!("[NetCore] conn {} unframeable input", conn.id());
                mark_removed(conn, api.selector, api.removed);
                return total;
            }
            // A complete packet with pipelined bytes behind it: deliver
            // it, then pull the remainder to the front.
            let buffered = conn.recv_len;
            conn.recv_len = expected;
            h.on_packet(conn, api, ctl);
            conn.recv_buf.copy_within(expected..buffered, 0);
            conn.recv_len = buffered - expected;
            conn.framer.reset();
        }

        if conn.state != ConnState::Connected {
            return total;
        }
        if n < want {
            break;
        }
    }
    total
}

fn do_send<H: NetHandler>(conn: &mut Conn, api: &mut NetApi, h: &mut H) -> u32 {
    let mut total = 0u32;
    while let Some(item) = conn.send_list.front_mut() {
        let pending = &item.data.as_slice()[item.sent..];
        match conn.sock.send_with_flags(pending, libc::MSG_NOSIGNAL) {
            Ok(n) => {
                item.sent += n;
                total += n as u32;
                if item.sent < item.data.len() {
                    break;
                }
                conn.send_list.pop_front();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if h.on_error(conn, e) == ErrorAction::Close {
                    mark_removed(conn, api.selector, api.removed);
                }
                return total;
            }
        }
    }
    if conn.send_list.is_empty() && conn.state == ConnState::Connected {
        if let Err(e) = api.selector.set_read(conn.sock.as_raw_fd()) {
            warn!("[NetCore] conn {} interest update failed: {e}", conn.id());
        }
    }
    total
}

fn do_accept<H: NetHandler>(conn: &mut Conn, h: &mut H, ctl: &mut ActorCtl) {
    loop {
        match conn.sock.accept() {
            Ok((sock, _peer)) => {
                let Some(sock) = h.on_accept(sock) else {
                    continue;
                };
                let msg = Message {
                    kind: kind::ACCEPT_CLIENT_REQ,
                    ctx: MsgCtx::obj(AcceptedSock(sock)),
                    dst: conn.client,
                    ..Default::default()
                };
                if let Err(e) = ctl.send_msg(msg, false) {
                    // The socket is dropped with the undeliverable message.
                    warn!(
                        "[NetCore] listener {} could not hand off client: {e}",
                        conn.id()
                    );
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn_throttled!(
                    Duration::from_secs(5),
                    "[NetCore] accept failed on {}: {e}",
                    conn.id()
                );
                break;
            }
        }
    }
}

fn do_connect<H: NetHandler>(
    conn: &mut Conn,
    api: &mut NetApi,
    h: &mut H,
    ctl: &mut ActorCtl,
    idle_timeout: Duration,
) {
    match conn.sock.take_error() {
        Ok(None) => {
            conn.state = ConnState::Connected;
            if let Some(t) = conn.timer {
                ctl.change_timer(t, idle_timeout);
            }
            let fd = conn.sock.as_raw_fd();
            if let Err(e) = api.selector.set_read_write(fd) {
                warn!("[NetCore] conn {} interest update failed: {e}", conn.id());
            }
            h.on_connect(conn, api, ctl);
        }
        Ok(Some(err)) | Err(err) => {
            let _ = h.on_error(conn, err);
            // A connect that never completed has nothing to drain.
            mark_removed(conn, api.selector, api.removed);
        }
    }
}

/// A ready-made net actor: readiness loop, the reserved message
/// protocol (connect, listen, accept hand-off, DNS legs, close), and a
/// pluggable [`NetHandler`] for everything protocol-specific.
pub struct NetActor<H: NetHandler> {
    core: NetCore,
    handler: H,
}

impl<H: NetHandler> NetActor<H> {
    pub fn new(handler: H) -> Self {
        Self::with_selector(handler, Box::new(PollSelector::new()))
    }

    pub fn with_selector(handler: H, selector: Box<dyn Selector>) -> Self {
        Self {
            core: NetCore::new(selector, &FrameConfig::default()),
            handler,
        }
    }

    pub fn core(&self) -> &NetCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut NetCore {
        &mut self.core
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    fn on_accept_req(&mut self, ctl: &mut ActorCtl, mut msg: Message) {
        let Some(sock) = msg.take_ctx().downcast::<AcceptedSock>() else {
            warn!("[NetActor] accept request without a socket");
            return;
        };
        let conn = Conn::new(sock.0, ConnState::Connected, self.core.send_queue_limit);
        if let Err(e) = conn.set_nodelay(true) {
            warn!("[NetActor] nodelay on accepted socket failed: {e}");
        }
        // The response is sent only when registration fails.
        if let Err(e) = self.core.add_conn(conn, ctl) {
            let ret = errno_of(&e);
            msg.ctx = MsgCtx::scalar((ret as u64) << 32);
            if let Err(e) = ctl.send_resp_msg(&mut msg, kind::ACCEPT_CLIENT_RESP) {
                warn!("[NetActor] accept response undeliverable: {e}");
            }
        }
    }

    fn on_connect_req(&mut self, ctl: &mut ActorCtl, mut msg: Message) {
        let host = String::from_utf8_lossy(msg.buf.as_slice()).into_owned();
        let Some(port) = msg.ctx.downcast_ref::<ConnectCtx>().map(|c| c.port) else {
            warn!("[NetActor] connect request without context");
            return;
        };

        if let Ok(ip) = host.trim().parse::<Ipv4Addr>() {
            let (ret, conn_id) = match self.core.create_connect_socket(ip, port, ctl) {
                Ok(id) => (0, id),
                Err(e) => (errno_of(&e), 0),
            };
            if let Some(c) = msg.ctx.downcast_mut::<ConnectCtx>() {
                c.ret = ret;
                c.conn_id = conn_id;
                c.ip = Some(ip);
            }
            if let Err(e) = ctl.send_resp_msg(&mut msg, kind::CONNECT_HOST_RESP) {
                warn!("[NetActor] connect response undeliverable: {e}");
            }
            if ret == 0 {
                self.core
                    .fire_connect_if_ready(conn_id, &mut self.handler, ctl);
            }
            return;
        }

        // Hostname: take the DNS round trip. The resolver replies to us,
        // and we finish the connect in `on_dns_resp`.
        if let Some(c) = msg.ctx.downcast_mut::<ConnectCtx>() {
            c.requester = msg.src;
        }
        msg.kind = kind::QUERY_DNS_REQ;
        msg.dst = ctl.frame().dns_addr();
        if let Err(e) = ctl.send_msg(msg, false) {
            let Some(mut msg) = e.value else {
                return;
            };
            let requester = msg
                .ctx
                .downcast_mut::<ConnectCtx>()
                .map(|c| {
                    c.ret = libc::EBUSY;
                    c.requester
                })
                .unwrap_or(msg.src);
            msg.kind = kind::CONNECT_HOST_RESP;
            msg.dst = requester;
            if let Err(e) = ctl.send_msg(msg, false) {
                warn!("[NetActor] connect failure response undeliverable: {e}");
            }
        }
    }

    fn on_dns_resp(&mut self, ctl: &mut ActorCtl, mut msg: Message) {
        let Some(c) = msg.ctx.downcast_mut::<ConnectCtx>() else {
            warn!("[NetActor] dns response without context");
            return;
        };
        if c.ret == 0 {
            match c.ip {
                Some(ip) => {
                    let port = c.port;
                    match self.core.create_connect_socket(ip, port, ctl) {
                        Ok(id) => c.conn_id = id,
                        Err(e) => c.ret = errno_of(&e),
                    }
                }
                None => c.ret = libc::EINVAL,
            }
        }
        let requester = c.requester;
        let ready = if c.ret == 0 { Some(c.conn_id) } else { None };
        msg.kind = kind::CONNECT_HOST_RESP;
        msg.dst = requester;
        if let Err(e) = ctl.send_msg(msg, false) {
            warn!("[NetActor] connect response undeliverable: {e}");
        }
        if let Some(id) = ready {
            self.core.fire_connect_if_ready(id, &mut self.handler, ctl);
        }
    }

    fn on_listen_req(&mut self, ctl: &mut ActorCtl, mut msg: Message) {
        let ip = String::from_utf8_lossy(msg.buf.as_slice()).into_owned();
        let Some((port, client)) = msg
            .ctx
            .downcast_ref::<ListenCtx>()
            .map(|c| (c.port, c.client))
        else {
            warn!("[NetActor] listen request without context");
            return;
        };

        let outcome = self.core.create_listen_socket(&ip, port, client, ctl);
        if let Some(c) = msg.ctx.downcast_mut::<ListenCtx>() {
            match outcome {
                Ok((id, bound)) => {
                    c.ret = 0;
                    c.conn_id = id;
                    c.bound_port = bound;
                }
                Err(e) => c.ret = errno_of(&e),
            }
        }
        if let Err(e) = ctl.send_resp_msg(&mut msg, kind::LISTEN_ADDR_RESP) {
            warn!("[NetActor] listen response undeliverable: {e}");
        }
    }

    fn on_close_req(&mut self, msg: Message) {
        let Some(packed) = msg.ctx.as_scalar() else {
            warn!("[NetActor] close request without context");
            return;
        };
        let (id, force) = unpack_close_req(packed);
        let res = if force {
            self.core.force_close(id)
        } else {
            self.core.close(id)
        };
        if let Err(e) = res {
            warn!("[NetActor] close of conn {id} failed: {e}");
        }
    }
}

impl<H: NetHandler> Actor for NetActor<H> {
    fn on_start(&mut self, ctl: &mut ActorCtl) {
        self.core.apply_cfg(ctl.frame().cfg());
    }

    fn poll(&mut self, ctl: &mut ActorCtl) -> u32 {
        self.core.poll_io(&mut self.handler, ctl)
    }

    fn process_msg(&mut self, ctl: &mut ActorCtl, msg: Message) {
        match msg.kind {
            kind::ACCEPT_CLIENT_REQ => self.on_accept_req(ctl, msg),
            // Only failures come back; a listener whose client is this
            // same actor sees them here.
            kind::ACCEPT_CLIENT_RESP => {
                let ret = msg.ctx.as_scalar().map(|v| (v >> 32) as i32).unwrap_or(-1);
                warn!("[NetActor] accepted client registration failed: errno {ret}");
            }
            kind::CONNECT_HOST_REQ => self.on_connect_req(ctl, msg),
            kind::QUERY_DNS_RESP => self.on_dns_resp(ctl, msg),
            kind::LISTEN_ADDR_REQ => self.on_listen_req(ctl, msg),
            kind::CLOSE_CONN_REQ => self.on_close_req(msg),
            _ => self.handler.on_msg(&mut self.core, ctl, msg),
        }
    }

    fn on_timer(&mut self, ctl: &mut ActorCtl, id: TimerId, kind: u32, ctx: u64) {
        if kind == NET_TIMEOUT_TIMER {
            self.core.handle_timeout(ctx as ConnId, &mut self.handler);
        } else {
            self.handler.on_timer(&mut self.core, ctl, id, kind, ctx);
        }
    }
}

fn errno_of(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}
