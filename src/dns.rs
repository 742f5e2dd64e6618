use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use ahash::{AHashMap, RandomState};
use tracing::{trace, warn};

use crate::actor::{Actor, ActorCtl};
use crate::message::{kind, ConnectCtx, Message};
use crate::timer::TimerId;

/// Name resolution seam. The production impl blocks on the platform
/// resolver, which is why DNS gets its own actor thread.
pub trait HostResolver: Send + 'static {
    fn resolve_v4(&mut self, host: &str) -> io::Result<Ipv4Addr>;
}

/// Resolver over the platform's getaddrinfo.
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve_v4(&mut self, host: &str) -> io::Result<Ipv4Addr> {
        let addrs = (host, 0u16).to_socket_addrs()?;
        for addr in addrs {
            if let SocketAddr::V4(v4) = addr {
                return Ok(*v4.ip());
            }
        }
        Err(io::Error::from(io::ErrorKind::AddrNotAvailable))
    }
}

/// Actor-local timer kind for cache eviction.
const DNS_EXPIRE_TIMER: u32 = 1;

struct DnsEntry {
    host: String,
    ip: Ipv4Addr,
}

/// Caching DNS actor. Lives in the reserved pool; connect requests with
/// a hostname are forwarded here by net actors and answered in place.
/// Entries evict on a TTL timer, never on lookup.
pub struct DnsActor<R = SystemResolver> {
    resolver: R,
    cache: AHashMap<u64, DnsEntry>,
    ttl: Duration,
    hasher: RandomState,
}

impl<R: HostResolver> DnsActor<R> {
    pub fn new(resolver: R, ttl: Duration) -> Self {
        Self {
            resolver,
            cache: AHashMap::new(),
            ttl,
            hasher: RandomState::new(),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn key_of(&self, host: &str) -> u64 {
        self.hasher.hash_one(host)
    }

    fn lookup(&mut self, ctl: &mut ActorCtl, host: &str) -> Result<Ipv4Addr, i32> {
        let key = self.key_of(host);
        if let Some(entry) = self.cache.get(&key) {
            if entry.host == host {
                return Ok(entry.ip);
            }
            // Hash collision; resolve without caching.
            return self
                .resolver
                .resolve_v4(host)
                .map_err(|e| e.raw_os_error().unwrap_or(libc::EIO));
        }
        match self.resolver.resolve_v4(host) {
            Ok(ip) => {
                ctl.add_timer(self.ttl, DNS_EXPIRE_TIMER, key);
                self.cache.insert(
                    key,
                    DnsEntry {
                        host: host.to_string(),
                        ip,
                    },
                );
                trace!("[Dns] cached {host} -> {ip}");
                Ok(ip)
            }
            Err(e) => Err(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }
}

impl<R: HostResolver> Actor for DnsActor<R> {
    fn process_msg(&mut self, ctl: &mut ActorCtl, mut msg: Message) {
        if msg.kind != kind::QUERY_DNS_REQ {
            warn!("[Dns] dropped message kind {}", msg.kind);
            return;
        }

        let outcome = match std::str::from_utf8(msg.buf.as_slice()) {
            Ok(host) => {
                let host = host.trim().to_string();
                self.lookup(ctl, &host)
            }
            Err(_) => Err(libc::EINVAL),
        };

        if let Some(c) = msg.ctx.downcast_mut::<ConnectCtx>() {
            match outcome {
                Ok(ip) => {
                    c.ret = 0;
                    c.ip = Some(ip);
                }
                Err(errno) => c.ret = errno,
            }
        } else {
            warn!("[Dns] query without context from {}", msg.src);
            return;
        }

        // Reply reuses the request buffer, no copy.
        if let Err(e) = ctl.send_resp_msg(&mut msg, kind::QUERY_DNS_RESP) {
            warn!("[Dns] response undeliverable: {e}");
        }
    }

    fn on_timer(&mut self, _ctl: &mut ActorCtl, _id: TimerId, kind: u32, ctx: u64) {
        if kind == DNS_EXPIRE_TIMER {
            if let Some(entry) = self.cache.remove(&ctx) {
                trace!("[Dns] evicted {}", entry.host);
            }
        }
    }
}
