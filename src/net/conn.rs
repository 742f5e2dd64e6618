use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::Duration;

use socket2::Socket;

use crate::error::{ConnError, ProtocolError};
use crate::message::{Addr, MsgBuf};
use crate::net::framing::{HttpFramer, PacketKind};
use crate::timer::TimerId;

/// Connection ids are the raw descriptor; unique while the socket lives.
pub type ConnId = u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnState {
    /// Non-blocking connect in flight; completion arrives as writability.
    Connecting,
    Connected,
    Listening,
    /// Close requested; draining queued sends before the descriptor goes.
    Closing,
    Closed,
}

pub(crate) struct SendItem {
    pub data: MsgBuf,
    pub sent: usize,
}

/// One socket under a net actor: its state, receive buffer, framer,
/// pending sends, and the timeout timer guarding it.
pub struct Conn {
    pub(crate) sock: Socket,
    pub(crate) state: ConnState,
    pub(crate) framer: HttpFramer,
    pub(crate) recv_buf: Vec<u8>,
    pub(crate) recv_len: usize,
    pub(crate) send_list: VecDeque<SendItem>,
    pub(crate) send_queue_limit: usize,
    pub(crate) timer: Option<TimerId>,
    /// For listeners: where accepted sockets are announced.
    pub(crate) client: Addr,
    /// Free slot for the owning handler.
    pub ctx: u64,
}

impl Conn {
    pub(crate) fn new(sock: Socket, state: ConnState, send_queue_limit: usize) -> Self {
        Self {
            sock,
            state,
            framer: HttpFramer::new(),
            recv_buf: vec![0; 4096],
            recv_len: 0,
            send_list: VecDeque::new(),
            send_queue_limit,
            timer: None,
            client: Addr::INVALID,
            ctx: 0,
        }
    }

    pub(crate) fn listener(sock: Socket, client: Addr) -> Self {
        let mut conn = Self::new(sock, ConnState::Listening, 0);
        conn.client = client;
        conn
    }

    #[inline]
    pub fn id(&self) -> ConnId {
        self.sock.as_raw_fd() as ConnId
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.state
    }

    #[inline]
    pub fn packet_kind(&self) -> PacketKind {
        self.framer.kind()
    }

    /// The current packet's bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.recv_buf[..self.recv_len]
    }

    /// Header part of an HTTP packet; empty for opaque traffic.
    pub fn header(&self) -> &[u8] {
        &self.recv_buf[..self.framer.header_len().min(self.recv_len)]
    }

    /// Body part of an HTTP packet; the whole packet for opaque traffic.
    pub fn body(&self) -> &[u8] {
        &self.recv_buf[self.framer.header_len().min(self.recv_len)..self.recv_len]
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let addr = self.sock.local_addr()?;
        addr.as_socket()
            .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        let addr = self.sock.peer_addr()?;
        addr.as_socket()
            .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))
    }

    pub fn set_nodelay(&self, on: bool) -> io::Result<()> {
        self.sock.set_nodelay(on)
    }

    /// Arms SO_LINGER(0) so the eventual close sends RST instead of FIN.
    pub(crate) fn arm_reset(&self) -> io::Result<()> {
        self.sock.set_linger(Some(Duration::ZERO))
    }

    pub(crate) fn frame_http(&mut self) -> Result<usize, ProtocolError> {
        let Self {
            framer,
            recv_buf,
            recv_len,
            ..
        } = self;
        framer.frame(recv_buf, recv_len)
    }

    pub(crate) fn queue_send(&mut self, data: MsgBuf) -> Result<(), ConnError> {
        if self.send_list.len() >= self.send_queue_limit {
            return Err(ConnError::QueueFull);
        }
        self.send_list.push_back(SendItem { data, sent: 0 });
        Ok(())
    }

    pub(crate) fn grow_recv(&mut self, need: usize) {
        if need > self.recv_buf.len() {
            self.recv_buf.resize(need, 0);
        }
    }

    /// Default grow when the buffer filled with no framing hint.
    pub(crate) fn grow_recv_default(&mut self) {
        let need = self.recv_buf.len() * 2 + 512;
        self.recv_buf.resize(need, 0);
    }

    /// Drops the delivered packet and starts framing the next one.
    pub(crate) fn reset_packet(&mut self) {
        self.recv_len = 0;
        self.framer.reset();
    }
}
