use std::any::Any;
use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::error::SendError;

pub type PoolId = u16;
pub type ActorId = u16;

/// Stable message tags. User traffic starts at [`kind::USER_BASE`]; the
/// range below it is owned by the runtime and never reassigned.
pub mod kind {
    pub const UNKNOWN: u32 = 0;
    pub const STOP_ACTOR: u32 = 1;
    pub const CONNECT_HOST_REQ: u32 = 2;
    pub const CONNECT_HOST_RESP: u32 = 3;
    pub const LISTEN_ADDR_REQ: u32 = 4;
    pub const LISTEN_ADDR_RESP: u32 = 5;
    pub const ACCEPT_CLIENT_REQ: u32 = 6;
    pub const ACCEPT_CLIENT_RESP: u32 = 7;
    pub const QUERY_DNS_REQ: u32 = 8;
    pub const QUERY_DNS_RESP: u32 = 9;
    pub const CLOSE_CONN_REQ: u32 = 10;
    pub const CLOSE_CONN_RESP: u32 = 11;
    pub const USER_BASE: u32 = 12;
}

/// Routing address of an actor: pool slot plus actor slot within it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Addr {
    pub pool: PoolId,
    pub actor: ActorId,
}

impl Addr {
    pub const INVALID: Addr = Addr {
        pool: PoolId::MAX,
        actor: ActorId::MAX,
    };

    pub fn new(pool: PoolId, actor: ActorId) -> Self {
        Self { pool, actor }
    }

    /// Address with a valid pool but no specific actor. Routable only
    /// through a pool's shared queue.
    pub fn any_in(pool: PoolId) -> Self {
        Self {
            pool,
            actor: ActorId::MAX,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.pool != PoolId::MAX
    }

    #[inline]
    pub fn has_actor(&self) -> bool {
        self.actor != ActorId::MAX
    }
}

impl Default for Addr {
    fn default() -> Self {
        Addr::INVALID
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pool, self.actor)
    }
}

/// Arbitrary owned context riding along with a message. The blanket impl
/// covers every `Any + Send` type, so callers never implement this by hand.
pub trait MsgObj: Any + Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any + Send> MsgObj for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Message payload. Moves with the message; receivers detach it with
/// [`MsgBuf::take`] to claim ownership without copying.
#[derive(Default)]
pub enum MsgBuf {
    #[default]
    Empty,
    Static(&'static [u8]),
    Owned(Vec<u8>),
    Shared(Bytes),
}

impl MsgBuf {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            MsgBuf::Empty => 0,
            MsgBuf::Static(b) => b.len(),
            MsgBuf::Owned(v) => v.len(),
            MsgBuf::Shared(b) => b.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            MsgBuf::Empty => &[],
            MsgBuf::Static(b) => b,
            MsgBuf::Owned(v) => v.as_slice(),
            MsgBuf::Shared(b) => b.as_ref(),
        }
    }

    /// Detaches the payload, leaving `Empty` behind.
    #[inline]
    pub fn take(&mut self) -> MsgBuf {
        std::mem::take(self)
    }

    /// Converts into a plain vec, copying only for the borrowed variants.
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            MsgBuf::Empty => Vec::new(),
            MsgBuf::Static(b) => b.to_vec(),
            MsgBuf::Owned(v) => v,
            MsgBuf::Shared(b) => b.to_vec(),
        }
    }
}

impl fmt::Debug for MsgBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgBuf::Empty => write!(f, "MsgBuf::Empty"),
            MsgBuf::Static(b) => write!(f, "MsgBuf::Static({}B)", b.len()),
            MsgBuf::Owned(v) => write!(f, "MsgBuf::Owned({}B)", v.len()),
            MsgBuf::Shared(b) => write!(f, "MsgBuf::Shared({}B)", b.len()),
        }
    }
}

impl From<Vec<u8>> for MsgBuf {
    fn from(v: Vec<u8>) -> Self {
        MsgBuf::Owned(v)
    }
}

impl From<&'static [u8]> for MsgBuf {
    fn from(b: &'static [u8]) -> Self {
        MsgBuf::Static(b)
    }
}

impl From<&'static str> for MsgBuf {
    fn from(s: &'static str) -> Self {
        MsgBuf::Static(s.as_bytes())
    }
}

impl From<Bytes> for MsgBuf {
    fn from(b: Bytes) -> Self {
        MsgBuf::Shared(b)
    }
}

/// Out-of-band message context: nothing, a packed scalar, or a boxed object.
#[derive(Default)]
pub enum MsgCtx {
    #[default]
    Empty,
    Scalar(u64),
    Object(Box<dyn MsgObj>),
}

impl MsgCtx {
    pub fn scalar(v: u64) -> Self {
        MsgCtx::Scalar(v)
    }

    pub fn obj<T: MsgObj>(v: T) -> Self {
        MsgCtx::Object(Box::new(v))
    }

    #[inline]
    pub fn take(&mut self) -> MsgCtx {
        std::mem::take(self)
    }

    pub fn as_scalar(&self) -> Option<u64> {
        match self {
            MsgCtx::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Consumes the context, returning the object if it holds a `T`.
    pub fn downcast<T: Any>(self) -> Option<Box<T>> {
        match self {
            MsgCtx::Object(obj) => obj.into_any().downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            // Deref past the box: the blanket impl also covers
            // `Box<dyn MsgObj>`, and resolving on the box would return
            // the box's own TypeId.
            MsgCtx::Object(obj) => (**obj).as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        match self {
            MsgCtx::Object(obj) => (**obj).as_any_mut().downcast_mut::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for MsgCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgCtx::Empty => write!(f, "MsgCtx::Empty"),
            MsgCtx::Scalar(v) => write!(f, "MsgCtx::Scalar({v})"),
            MsgCtx::Object(_) => write!(f, "MsgCtx::Object"),
        }
    }
}

/// The unit of actor communication. Moves end to end; a failed send hands
/// it back inside [`SendError`].
#[derive(Debug, Default)]
pub struct Message {
    pub kind: u32,
    pub buf: MsgBuf,
    pub ctx: MsgCtx,
    pub src: Addr,
    pub dst: Addr,
}

impl Message {
    pub fn new(kind: u32, dst: Addr) -> Self {
        Self {
            kind,
            dst,
            ..Default::default()
        }
    }

    pub fn with_buf(kind: u32, dst: Addr, buf: impl Into<MsgBuf>) -> Self {
        Self {
            kind,
            dst,
            buf: buf.into(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn take_buf(&mut self) -> MsgBuf {
        self.buf.take()
    }

    #[inline]
    pub fn take_ctx(&mut self) -> MsgCtx {
        self.ctx.take()
    }
}

pub type SendResult = Result<(), SendError<Message>>;

/// Context object for connect requests and their DNS leg. Travels as
/// `MsgCtx::Object` and is mutated in place as the request progresses.
#[derive(Debug, Default)]
pub struct ConnectCtx {
    /// 0 on success, raw errno otherwise.
    pub ret: i32,
    pub seq: u64,
    /// Actor that initiated the connect and receives the final response.
    pub requester: Addr,
    pub port: u16,
    pub ip: Option<Ipv4Addr>,
    pub conn_id: u32,
}

/// Context object for listen requests.
#[derive(Debug, Default)]
pub struct ListenCtx {
    pub ret: i32,
    pub seq: u64,
    pub conn_id: u32,
    /// Actor that accepted client sockets are announced to.
    pub client: Addr,
    pub port: u16,
    /// Actual port after binding, meaningful when `port` was 0.
    pub bound_port: u16,
}

/// An accepted client socket handed from a listening actor to its owner.
pub struct AcceptedSock(pub socket2::Socket);

impl fmt::Debug for AcceptedSock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AcceptedSock")
    }
}

/// CLOSE_CONN_REQ packs its arguments into the scalar ctx.
#[inline]
pub fn pack_close_req(conn_id: u32, force: bool) -> u64 {
    ((force as u64) << 32) | conn_id as u64
}

#[inline]
pub fn unpack_close_req(v: u64) -> (u32, bool) {
    (v as u32, (v >> 32) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buf_detach_leaves_empty() {
        let mut msg = Message::with_buf(kind::USER_BASE, Addr::new(1, 0), b"hello".to_vec());
        let buf = msg.take_buf();
        assert_eq!(buf.as_slice(), b"hello");
        assert!(msg.buf.is_empty());
        assert!(matches!(msg.buf, MsgBuf::Empty));
    }

    #[test]
    fn ctx_downcast_consumes_object() {
        let mut msg = Message::new(kind::CONNECT_HOST_REQ, Addr::new(1, 0));
        msg.ctx = MsgCtx::obj(ConnectCtx {
            seq: 7,
            port: 80,
            ..Default::default()
        });

        let ctx = msg.take_ctx().downcast::<ConnectCtx>();
        assert_eq!(ctx.map(|c| (c.seq, c.port)), Some((7, 80)));
        assert!(matches!(msg.ctx, MsgCtx::Empty));
    }

    #[test]
    fn ctx_downcast_wrong_type_is_none() {
        let ctx = MsgCtx::obj(ListenCtx::default());
        assert!(ctx.downcast::<ConnectCtx>().is_none());
    }

    #[test]
    fn ctx_downcast_ref_reads_boxed_object() {
        let ctx = MsgCtx::obj(ListenCtx {
            port: 8080,
            ..Default::default()
        });
        assert_eq!(ctx.downcast_ref::<ListenCtx>().map(|c| c.port), Some(8080));
        assert!(ctx.downcast_ref::<ConnectCtx>().is_none());
    }

    #[test]
    fn ctx_downcast_mut_updates_in_place() {
        let mut ctx = MsgCtx::obj(ConnectCtx::default());
        if let Some(c) = ctx.downcast_mut::<ConnectCtx>() {
            c.requester = Addr::new(2, 3);
        }
        assert_eq!(
            ctx.downcast_ref::<ConnectCtx>().map(|c| c.requester),
            Some(Addr::new(2, 3))
        );
    }

    #[test]
    fn close_req_roundtrip() {
        let (id, force) = unpack_close_req(pack_close_req(42, true));
        assert_eq!(id, 42);
        assert!(force);
        let (id, force) = unpack_close_req(pack_close_req(u32::MAX, false));
        assert_eq!(id, u32::MAX);
        assert!(!force);
    }
}
