use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ahash::AHashMap;
use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use tracing::{info, warn};

use crate::actor::pool::Pool;
use crate::actor::{run_actor, Actor};
use crate::clock::Clock;
use crate::config::FrameConfig;
use crate::dns::{DnsActor, SystemResolver};
use crate::error::SendError;
use crate::message::{kind, Addr, Message, MsgBuf, MsgCtx, MsgObj, PoolId, SendResult};
use crate::message::{pack_close_req, ConnectCtx, ListenCtx};
use crate::utils::CancelToken;

/// Shared spine of the frame: pools, routing, the coarse clock, the
/// sequence counter, and the pending-context registry. Every actor host
/// thread holds an `Arc` to this.
pub struct FrameCore {
    pools: RwLock<Vec<Pool>>,
    ctxs: Mutex<AHashMap<u64, Box<dyn MsgObj>>>,
    seq: AtomicU64,
    clock: Clock,
    cancel: CancelToken,
    cfg: FrameConfig,
}

impl FrameCore {
    fn new(cfg: FrameConfig) -> Self {
        Self {
            pools: RwLock::new(Vec::new()),
            ctxs: Mutex::new(AHashMap::new()),
            seq: AtomicU64::new(1),
            clock: Clock::now(),
            cancel: CancelToken::new_root(),
            cfg,
        }
    }

    #[inline]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[inline]
    pub fn cfg(&self) -> &FrameConfig {
        &self.cfg
    }

    /// The DNS actor is always the first actor of the reserved pool.
    #[inline]
    pub fn dns_addr(&self) -> Addr {
        Addr::new(0, 0)
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Delivers `msg` to its destination pool. The message comes back
    /// inside the error when routing fails.
    pub fn route(&self, msg: Message, force: bool) -> SendResult {
        let pools = self.pools.read();
        let Some(pool) = pools.get(msg.dst.pool as usize) else {
            warn!("[Frame] no route to {}", msg.dst);
            return Err(SendError::no_route(Some(msg)));
        };
        pool.push_msg(msg, force)
    }

    pub fn stash_ctx(&self, seq: u64, ctx: Box<dyn MsgObj>) {
        self.ctxs.lock().insert(seq, ctx);
    }

    pub fn take_ctx(&self, seq: u64) -> Option<Box<dyn MsgObj>> {
        self.ctxs.lock().remove(&seq)
    }

    pub(crate) fn add_listener(
        &self,
        net: Addr,
        src: Addr,
        ip: &str,
        port: u16,
        client: Addr,
    ) -> Result<u64, SendError<Message>> {
        let seq = self.next_seq();
        let msg = Message {
            kind: kind::LISTEN_ADDR_REQ,
            buf: MsgBuf::Owned(ip.as_bytes().to_vec()),
            ctx: MsgCtx::obj(ListenCtx {
                seq,
                client,
                port,
                ..Default::default()
            }),
            src,
            dst: net,
        };
        self.route(msg, false)?;
        Ok(seq)
    }

    pub(crate) fn add_connector(
        &self,
        net: Addr,
        src: Addr,
        host: &str,
        port: u16,
    ) -> Result<u64, SendError<Message>> {
        let seq = self.next_seq();
        let msg = Message {
            kind: kind::CONNECT_HOST_REQ,
            buf: MsgBuf::Owned(host.as_bytes().to_vec()),
            ctx: MsgCtx::obj(ConnectCtx {
                seq,
                requester: src,
                port,
                ..Default::default()
            }),
            src,
            dst: net,
        };
        self.route(msg, false)?;
        Ok(seq)
    }

    pub(crate) fn close_conn(&self, net: Addr, src: Addr, conn_id: u32, force: bool) -> SendResult {
        let msg = Message {
            kind: kind::CLOSE_CONN_REQ,
            ctx: MsgCtx::scalar(pack_close_req(conn_id, force)),
            src,
            dst: net,
            ..Default::default()
        };
        self.route(msg, false)
    }

    #[cfg(test)]
    pub(crate) fn slot(&self, addr: Addr) -> Option<Arc<crate::actor::ActorSlot>> {
        let pools = self.pools.read();
        pools
            .get(addr.pool as usize)
            .and_then(|p| p.slot(addr.actor))
            .cloned()
    }

    #[cfg(test)]
    pub(crate) fn pool_shared_len(&self, pool: PoolId) -> usize {
        let pools = self.pools.read();
        pools.get(pool as usize).map_or(0, |p| p.shared.len())
    }
}

/// Owner of the actor threads. Pool 0 is created up front and holds the
/// DNS actor; user pools and actors are added before or after `start`.
///
/// Behavior objects are staged here until their thread spawns, keeping
/// the shared [`FrameCore`] free of non-`Sync` state.
pub struct Frame {
    core: Arc<FrameCore>,
    bodies: AHashMap<Addr, Box<dyn Actor>>,
    joins: Vec<JoinHandle<()>>,
    started: bool,
}

impl Frame {
    pub fn new(cfg: FrameConfig) -> Self {
        let dns_ttl = Duration::from_secs(cfg.dns_cache_ttl_secs);
        let actor_queue = cfg.actor_queue_size;
        let pool_queue = cfg.pool_queue_size;
        let core = FrameCore::new(cfg);
        let dns_actor;
        {
            let mut pools = core.pools.write();
            let mut reserved = Pool::new(0, pool_queue);
            dns_actor = reserved.add(actor_queue, None);
            pools.push(reserved);
        }
        let mut bodies: AHashMap<Addr, Box<dyn Actor>> = AHashMap::new();
        bodies.insert(
            Addr::new(0, dns_actor),
            Box::new(DnsActor::new(SystemResolver, dns_ttl)),
        );
        Self {
            core: Arc::new(core),
            bodies,
            joins: Vec::new(),
            started: false,
        }
    }

    #[inline]
    pub fn core(&self) -> &Arc<FrameCore> {
        &self.core
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.core.cancel.clone()
    }

    pub fn add_pool(&mut self) -> PoolId {
        let mut pools = self.core.pools.write();
        let id = pools.len() as PoolId;
        pools.push(Pool::new(id, self.core.cfg.pool_queue_size));
        id
    }

    pub fn add_actor(&mut self, pool: PoolId, body: impl Actor) -> anyhow::Result<Addr> {
        self.add_actor_inner(pool, Box::new(body), None)
    }

    pub fn add_actor_pinned(
        &mut self,
        pool: PoolId,
        body: impl Actor,
        core_id: usize,
    ) -> anyhow::Result<Addr> {
        self.add_actor_inner(pool, Box::new(body), Some(core_id))
    }

    fn add_actor_inner(
        &mut self,
        pool: PoolId,
        body: Box<dyn Actor>,
        core_id: Option<usize>,
    ) -> anyhow::Result<Addr> {
        let actor = {
            let mut pools = self.core.pools.write();
            let slot = pools
                .get_mut(pool as usize)
                .with_context(|| format!("pool {pool} does not exist"))?;
            slot.add(self.core.cfg.actor_queue_size, core_id)
        };
        let addr = Addr::new(pool, actor);
        self.bodies.insert(addr, body);
        if self.started {
            self.spawn(addr)?;
        }
        Ok(addr)
    }

    /// Spawns one host thread per actor that is not running yet.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.started = true;
        let mut addrs: Vec<Addr> = self.bodies.keys().copied().collect();
        addrs.sort_by_key(|a| (a.pool, a.actor));
        for addr in addrs {
            self.spawn(addr)?;
        }
        info!("[Frame] started {} actors", self.joins.len());
        Ok(())
    }

    fn spawn(&mut self, addr: Addr) -> anyhow::Result<()> {
        let body = self
            .bodies
            .remove(&addr)
            .with_context(|| format!("actor {addr} already spawned"))?;
        let (slot, shared, core_id) = {
            let pools = self.core.pools.read();
            let pool = pools
                .get(addr.pool as usize)
                .with_context(|| format!("pool {} does not exist", addr.pool))?;
            // Pool 0 actors never drain the shared queue.
            let shared = (pool.id != 0).then(|| pool.shared.clone());
            let cell = pool
                .cells
                .get(addr.actor as usize)
                .with_context(|| format!("actor {addr} does not exist"))?;
            (cell.slot.clone(), shared, cell.core_id)
        };

        let frame = self.core.clone();
        let cancel = self.core.cancel.new_child();
        let join = std::thread::Builder::new()
            .name(format!("swarm-{}:{}", addr.pool, addr.actor))
            .spawn(move || run_actor(frame, body, slot, shared, cancel, core_id))
            .with_context(|| format!("failed to spawn actor thread {addr}"))?;
        self.joins.push(join);
        Ok(())
    }

    /// Asks one actor to leave its loop after the current round.
    pub fn stop_actor(&self, addr: Addr) -> SendResult {
        self.core.route(Message::new(kind::STOP_ACTOR, addr), true)
    }

    /// Starts everything, then ticks the coarse clock until a termination
    /// signal or cancellation, then joins all actor threads.
    pub fn run(mut self) -> anyhow::Result<()> {
        let _log_guard = match &self.core.cfg.logger {
            Some(logger) => logger.init()?,
            None => None,
        };
        if !self.started {
            self.start()?;
        }

        let term = Arc::new(AtomicBool::new(false));
        for sig in TERM_SIGNALS {
            flag::register(*sig, Arc::clone(&term))
                .with_context(|| format!("failed to register signal {sig}"))?;
        }

        let tick = Duration::from_millis(self.core.cfg.tick_interval_ms);
        loop {
            if term.load(Ordering::Relaxed) {
                info!("[Frame] termination signal received");
                break;
            }
            if self.core.cancel.is_cancelled() {
                info!("[Frame] cancelled");
                break;
            }
            self.core.clock.refresh();
            std::thread::sleep(tick);
        }

        self.shutdown();
        Ok(())
    }

    /// Cancels every actor and joins the host threads.
    pub fn shutdown(&mut self) {
        self.core.cancel.cancel();
        for join in self.joins.drain(..) {
            if join.join().is_err() {
                warn!("[Frame] actor thread panicked");
            }
        }
        info!("[Frame] stopped");
    }
}
