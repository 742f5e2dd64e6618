pub mod pool;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::SendError;
use crate::frame::FrameCore;
use crate::mailbox::Mailbox;
use crate::message::{kind, Addr, Message, MsgObj, SendResult};
use crate::timer::{TimerHeap, TimerId};
use crate::utils::backoff::IdleBackoff;
use crate::utils::{try_pin_core, CancelToken};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ActorState {
    Init,
    Working,
    End,
}

impl ActorState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ActorState::Working,
            2 => ActorState::End,
            _ => ActorState::Init,
        }
    }
}

/// The behavior an actor plugs into its host thread. Every callback runs
/// on that one thread; `&mut self` is never contended.
pub trait Actor: Send + 'static {
    fn on_start(&mut self, _ctl: &mut ActorCtl) {}

    fn process_msg(&mut self, ctl: &mut ActorCtl, msg: Message);

    fn on_timer(&mut self, _ctl: &mut ActorCtl, _id: TimerId, _kind: u32, _ctx: u64) {}

    /// Non-message work per dispatch round, e.g. readiness polling.
    /// Returns a progress count; zero rounds escalate the idle backoff.
    fn poll(&mut self, _ctl: &mut ActorCtl) -> u32 {
        0
    }

    fn on_stop(&mut self, _ctl: &mut ActorCtl) {}
}

/// Per-round control surface handed to actor callbacks: routing, timers,
/// the coarse clock, and the stop latch.
pub struct ActorCtl<'a> {
    pub(crate) frame: &'a FrameCore,
    pub(crate) timers: &'a mut TimerHeap,
    pub(crate) self_addr: Addr,
    pub(crate) stop: bool,
}

impl<'a> ActorCtl<'a> {
    pub(crate) fn new(frame: &'a FrameCore, timers: &'a mut TimerHeap, self_addr: Addr) -> Self {
        Self {
            frame,
            timers,
            self_addr,
            stop: false,
        }
    }

    #[inline]
    pub fn self_addr(&self) -> Addr {
        self.self_addr
    }

    #[inline]
    pub fn frame(&self) -> &FrameCore {
        self.frame
    }

    #[inline]
    pub fn clock(&self) -> &crate::clock::Clock {
        self.frame.clock()
    }

    #[inline]
    pub fn now_us(&self) -> u64 {
        self.frame.clock().us_tick()
    }

    pub fn next_seq(&self) -> u64 {
        self.frame.next_seq()
    }

    /// Requests loop exit after the current dispatch round.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn add_timer(&mut self, wait: Duration, kind: u32, ctx: u64) -> TimerId {
        let expire_us = self.now_us() + wait.as_micros() as u64;
        self.timers.add_us(expire_us, kind, ctx)
    }

    pub fn del_timer(&mut self, id: TimerId) -> bool {
        self.timers.del(id)
    }

    pub fn change_timer(&mut self, id: TimerId, wait: Duration) -> bool {
        let expire_us = self.now_us() + wait.as_micros() as u64;
        self.timers.change_us(id, expire_us)
    }

    /// Routes a message, stamping the sender. With `force` the send fails
    /// instead of spilling into the pool's shared queue.
    pub fn send_msg(&self, mut msg: Message, force: bool) -> SendResult {
        msg.src = self.self_addr;
        self.frame.route(msg, force)
    }

    /// Replies to `req`, reusing its buffer and context without copying.
    /// The request's payload is detached either way.
    pub fn send_resp_msg(&self, req: &mut Message, kind: u32) -> SendResult {
        let resp = Message {
            kind,
            buf: req.take_buf(),
            ctx: req.take_ctx(),
            src: self.self_addr,
            dst: req.src,
        };
        self.frame.route(resp, false)
    }

    /// Asks the net actor at `net` to bind and listen. Accepted client
    /// sockets are announced to `client`. Returns the request sequence.
    pub fn add_listener(
        &self,
        net: Addr,
        ip: &str,
        port: u16,
        client: Addr,
    ) -> Result<u64, SendError<Message>> {
        self.frame.add_listener(net, self.self_addr, ip, port, client)
    }

    /// Asks the net actor at `net` to connect to `host:port`. Hostnames
    /// take a DNS round trip; the response comes back to this actor.
    pub fn add_connector(
        &self,
        net: Addr,
        host: &str,
        port: u16,
    ) -> Result<u64, SendError<Message>> {
        self.frame.add_connector(net, self.self_addr, host, port)
    }

    pub fn close_conn(&self, net: Addr, conn_id: u32, force: bool) -> SendResult {
        self.frame.close_conn(net, self.self_addr, conn_id, force)
    }

    /// Parks request context in the frame registry, keyed by sequence.
    pub fn stash_ctx(&self, seq: u64, ctx: Box<dyn MsgObj>) {
        self.frame.stash_ctx(seq, ctx);
    }

    pub fn take_ctx(&self, seq: u64) -> Option<Box<dyn MsgObj>> {
        self.frame.take_ctx(seq)
    }
}

/// Shared routing endpoint of one actor: its address, inbox, and state.
pub struct ActorSlot {
    pub addr: Addr,
    pub mailbox: Mailbox<Message>,
    state: AtomicU8,
}

impl ActorSlot {
    pub(crate) fn new(addr: Addr, queue_cap: usize) -> Self {
        Self {
            addr,
            mailbox: Mailbox::with_capacity(queue_cap),
            state: AtomicU8::new(0),
        }
    }

    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ActorState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Pool-side record of one actor. The behavior object is staged in the
/// [`crate::frame::Frame`] until spawn; only `Sync` state lives here.
pub(crate) struct ActorCell {
    pub slot: Arc<ActorSlot>,
    pub core_id: Option<usize>,
}

/// Host loop running one actor on its own thread until stop or cancel.
///
/// Each round: poll, drain the private inbox, drain the pool's shared
/// queue, fire due timers. A round with zero progress escalates the
/// idle backoff so quiet actors cost almost nothing.
pub(crate) fn run_actor(
    frame: Arc<FrameCore>,
    mut body: Box<dyn Actor>,
    slot: Arc<ActorSlot>,
    shared: Option<Arc<Mailbox<Message>>>,
    cancel: CancelToken,
    core_id: Option<usize>,
) {
    let addr = slot.addr;
    if let Some(core) = core_id {
        match try_pin_core(core) {
            Ok(core) => info!("[Actor] {addr} pinned to core {core}"),
            Err(e) => warn!("[Actor] {addr} core pin failed: {e}"),
        }
    }

    let batch = frame.cfg().msg_batch;
    let mut timers = TimerHeap::new();
    let mut inbox: Vec<Message> = Vec::with_capacity(batch);
    let mut backoff = IdleBackoff::new(Duration::from_millis(frame.cfg().idle_sleep_ms));

    slot.set_state(ActorState::Working);
    info!("[Actor] {addr} started");

    {
        let mut ctl = ActorCtl::new(&frame, &mut timers, addr);
        body.on_start(&mut ctl);
        if ctl.stop {
            slot.set_state(ActorState::End);
            body.on_stop(&mut ActorCtl::new(&frame, &mut timers, addr));
            info!("[Actor] {addr} stopped at startup");
            return;
        }
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut ctl = ActorCtl::new(&frame, &mut timers, addr);
        let mut progress = body.poll(&mut ctl);

        inbox.clear();
        slot.mailbox.pop_batch(&mut inbox, batch);
        for msg in inbox.drain(..) {
            progress += 1;
            if msg.kind == kind::STOP_ACTOR {
                ctl.stop = true;
                continue;
            }
            body.process_msg(&mut ctl, msg);
        }

        if let Some(queue) = &shared {
            inbox.clear();
            queue.pop_batch(&mut inbox, batch);
            for msg in inbox.drain(..) {
                progress += 1;
                if msg.kind == kind::STOP_ACTOR {
                    ctl.stop = true;
                    continue;
                }
                body.process_msg(&mut ctl, msg);
            }
        }

        let now_us = frame.clock().us_tick();
        while let Some((id, entry)) = ctl.timers.pop_due(now_us) {
            progress += 1;
            body.on_timer(&mut ctl, id, entry.kind, entry.ctx);
        }

        if ctl.stop {
            break;
        }

        if progress == 0 {
            backoff.wait();
        } else {
            backoff.reset();
        }
    }

    slot.set_state(ActorState::End);
    let mut ctl = ActorCtl::new(&frame, &mut timers, addr);
    body.on_stop(&mut ctl);
    info!("[Actor] {addr} stopped");
}
