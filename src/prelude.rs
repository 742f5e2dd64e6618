pub use crate::actor::{Actor, ActorCtl, ActorState};
pub use crate::clock::Clock;
pub use crate::config::FrameConfig;
pub use crate::dns::{DnsActor, HostResolver, SystemResolver};
pub use crate::error::{ConnError, ProtocolError, SendError, SendFailReason};
pub use crate::frame::Frame;
pub use crate::mailbox::Mailbox;
pub use crate::message::{kind, AcceptedSock, Addr, ConnectCtx, ListenCtx, Message, MsgBuf, MsgCtx};
pub use crate::net::{Conn, ConnState, ErrorAction, NetActor, NetApi, NetCore, NetHandler};
pub use crate::timer::{TimerHeap, TimerId};
pub use crate::utils::CancelToken;
