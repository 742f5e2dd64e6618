#[cfg(test)]
mod tests {
    use crate::actor::{Actor, ActorCtl, ActorState};
    use crate::config::FrameConfig;
    use crate::dns::{DnsActor, HostResolver};
    use crate::error::{ConnError, SendFailReason};
    use crate::frame::Frame;
    use crate::message::{kind, Addr, ConnectCtx, ListenCtx, Message, MsgBuf};
    use crate::net::{Conn, ConnState, NetActor, NetApi, NetCore, NetHandler, PollSelector};
    use crate::timer::TimerHeap;
    use std::io;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Actor that swallows everything; used as a routing endpoint.
    struct Sink;

    impl Actor for Sink {
        fn process_msg(&mut self, _ctl: &mut ActorCtl, _msg: Message) {}
    }

    fn small_frame() -> Frame {
        let cfg = FrameConfig {
            actor_queue_size: 3, // two usable slots
            pool_queue_size: 8,
            ..Default::default()
        };
        Frame::new(cfg)
    }

    #[test]
    fn core_handle_crosses_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<crate::frame::FrameCore>>();
    }

    #[test]
    fn full_private_queue_spills_into_shared() {
        let mut frame = small_frame();
        let pool = frame.add_pool();
        let addr = frame.add_actor(pool, Sink).unwrap();
        let core = frame.core();

        core.route(Message::new(kind::USER_BASE, addr), false).unwrap();
        core.route(Message::new(kind::USER_BASE, addr), false).unwrap();
        assert_eq!(core.pool_shared_len(pool), 0);

        // Third message bounces off the full private mailbox.
        core.route(Message::new(kind::USER_BASE, addr), false).unwrap();
        assert_eq!(core.pool_shared_len(pool), 1);
    }

    #[test]
    fn forced_send_fails_instead_of_spilling() {
        let mut frame = small_frame();
        let pool = frame.add_pool();
        let addr = frame.add_actor(pool, Sink).unwrap();
        let core = frame.core();

        core.route(Message::new(kind::USER_BASE, addr), true).unwrap();
        core.route(Message::new(kind::USER_BASE, addr), true).unwrap();
        let err = core
            .route(Message::new(kind::USER_BASE, addr), true)
            .unwrap_err();
        assert_eq!(err.reason, SendFailReason::Full);
        assert!(err.value.is_some());
        assert_eq!(core.pool_shared_len(pool), 0);
    }

    #[test]
    fn reserved_pool_never_uses_shared_queue() {
        let frame = small_frame();
        let core = frame.core();
        let dns = core.dns_addr();

        core.route(Message::new(kind::USER_BASE, dns), false).unwrap();
        core.route(Message::new(kind::USER_BASE, dns), false).unwrap();
        let err = core
            .route(Message::new(kind::USER_BASE, dns), false)
            .unwrap_err();
        assert_eq!(err.reason, SendFailReason::Full);
        assert_eq!(core.pool_shared_len(0), 0);

        // Pool-addressed messages have no route in the reserved pool.
        let err = core
            .route(Message::new(kind::USER_BASE, Addr::any_in(0)), false)
            .unwrap_err();
        assert_eq!(err.reason, SendFailReason::NoRoute);
    }

    #[test]
    fn routing_to_unknown_pool_returns_message() {
        let frame = small_frame();
        let err = frame
            .core()
            .route(Message::new(kind::USER_BASE, Addr::new(9, 0)), false)
            .unwrap_err();
        assert_eq!(err.reason, SendFailReason::NoRoute);
        assert_eq!(err.value.map(|m| m.kind), Some(kind::USER_BASE));
    }

    struct CountingResolver {
        calls: Arc<AtomicU32>,
    }

    impl HostResolver for CountingResolver {
        fn resolve_v4(&mut self, _host: &str) -> io::Result<Ipv4Addr> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(Ipv4Addr::new(10, 0, 0, 1))
        }
    }

    fn dns_query(host: &str, requester: Addr) -> Message {
        Message {
            kind: kind::QUERY_DNS_REQ,
            buf: MsgBuf::Owned(host.as_bytes().to_vec()),
            ctx: crate::message::MsgCtx::obj(ConnectCtx {
                port: 80,
                requester,
                ..Default::default()
            }),
            src: requester,
            dst: Addr::new(0, 0),
        }
    }

    #[test]
    fn dns_cache_resolves_once_within_ttl() {
        let mut frame = Frame::new(FrameConfig::default());
        let pool = frame.add_pool();
        let requester = frame.add_actor(pool, Sink).unwrap();
        let core = frame.core().clone();

        let calls = Arc::new(AtomicU32::new(0));
        let ttl = Duration::from_secs(60);
        let mut dns = DnsActor::new(
            CountingResolver {
                calls: calls.clone(),
            },
            ttl,
        );

        let mut timers = TimerHeap::new();
        let mut ctl = ActorCtl::new(&core, &mut timers, Addr::new(0, 0));

        dns.process_msg(&mut ctl, dns_query("example.test", requester));
        dns.process_msg(&mut ctl, dns_query("example.test", requester));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(dns.cache_len(), 1);

        let inbox = core.slot(requester).unwrap();
        let resp = inbox.mailbox.pop().unwrap();
        assert_eq!(resp.kind, kind::QUERY_DNS_RESP);
        let ctx = resp.ctx.downcast_ref::<ConnectCtx>().unwrap();
        assert_eq!(ctx.ret, 0);
        assert_eq!(ctx.ip, Some(Ipv4Addr::new(10, 0, 0, 1)));

        // Push the clock past the TTL and fire the eviction timer.
        core.clock().advance_us(ttl.as_micros() as u64 + 1);
        let now = core.clock().us_tick();
        while let Some((id, entry)) = ctl.timers.pop_due(now) {
            dns.on_timer(&mut ctl, id, entry.kind, entry.ctx);
        }
        assert_eq!(dns.cache_len(), 0);

        dns.process_msg(&mut ctl, dns_query("example.test", requester));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[derive(Default)]
    struct CloseCounter {
        closes: u32,
    }

    impl NetHandler for CloseCounter {
        fn on_packet(&mut self, _conn: &mut Conn, _api: &mut NetApi, _ctl: &mut ActorCtl) {}

        fn on_close(&mut self, _conn: &mut Conn) {
            self.closes += 1;
        }
    }

    #[test]
    fn close_on_connecting_is_rejected_and_force_close_releases_once() {
        let frame = Frame::new(FrameConfig::default());
        let core = frame.core().clone();
        let mut timers = TimerHeap::new();
        let mut ctl = ActorCtl::new(&core, &mut timers, Addr::new(0, 0));

        let mut net = NetCore::new(Box::new(PollSelector::new()), &FrameConfig::default());
        let sock = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )
        .unwrap();
        let conn = Conn::new(sock, ConnState::Connecting, 64);
        let id = net.add_conn(conn, &mut ctl).unwrap();
        assert_eq!(net.conn(id).map(|c| c.state()), Some(ConnState::Connecting));

        assert!(matches!(net.close(id), Err(ConnError::InvalidState)));
        assert!(net.conn(id).is_some());

        net.force_close(id).unwrap();
        let mut handler = CloseCounter::default();
        net.poll_io(&mut handler, &mut ctl);
        assert!(net.conn(id).is_none());
        assert_eq!(handler.closes, 1);

        assert!(matches!(net.force_close(id), Err(ConnError::NotFound)));
        net.poll_io(&mut handler, &mut ctl);
        assert_eq!(handler.closes, 1);
    }

    const HELLO_RESP: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 15\r\n\r\nHello, World!\r\n";
    const HELLO_REQ: &[u8] = b"GET / HTTP/1.1\r\nUser-Agent: swarmrt\r\n\r\n";

    struct HelloServer;

    impl NetHandler for HelloServer {
        fn on_packet(&mut self, conn: &mut Conn, api: &mut NetApi, _ctl: &mut ActorCtl) {
            let _ = api.send(conn, MsgBuf::Static(HELLO_RESP));
            let _ = api.close(conn);
        }
    }

    struct HelloClient {
        tx: mpsc::Sender<Vec<u8>>,
    }

    impl NetHandler for HelloClient {
        fn frame(&mut self, conn: &mut Conn) -> Result<usize, crate::error::ProtocolError> {
            Ok(conn.data().len())
        }

        fn on_connect(&mut self, conn: &mut Conn, api: &mut NetApi, _ctl: &mut ActorCtl) {
            let _ = api.send(conn, MsgBuf::Static(HELLO_REQ));
        }

        fn on_packet(&mut self, conn: &mut Conn, _api: &mut NetApi, _ctl: &mut ActorCtl) {
            let _ = self.tx.send(conn.data().to_vec());
        }
    }

    /// Wires the demo together: listens, then dials the bound port.
    struct Driver {
        server_net: Addr,
        client_net: Addr,
    }

    impl Actor for Driver {
        fn on_start(&mut self, ctl: &mut ActorCtl) {
            ctl.add_listener(self.server_net, "127.0.0.1", 0, self.server_net)
                .unwrap();
        }

        fn process_msg(&mut self, ctl: &mut ActorCtl, msg: Message) {
            if msg.kind != kind::LISTEN_ADDR_RESP {
                return;
            }
            let Some(c) = msg.ctx.downcast_ref::<ListenCtx>() else {
                return;
            };
            assert_eq!(c.ret, 0);
            assert_ne!(c.bound_port, 0);
            ctl.add_connector(self.client_net, "127.0.0.1", c.bound_port)
                .unwrap();
        }
    }

    #[test]
    fn http_round_trip_over_loopback() {
        let cfg = FrameConfig {
            tick_interval_ms: 5,
            ..Default::default()
        };
        let mut frame = Frame::new(cfg);
        let pool = frame.add_pool();

        let (tx, rx) = mpsc::channel();
        let server_net = frame.add_actor(pool, NetActor::new(HelloServer)).unwrap();
        let client_net = frame
            .add_actor(pool, NetActor::new(HelloClient { tx }))
            .unwrap();
        frame
            .add_actor(
                pool,
                Driver {
                    server_net,
                    client_net,
                },
            )
            .unwrap();

        let cancel = frame.cancel_token();
        let runner = thread::spawn(move || frame.run());

        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !String::from_utf8_lossy(&got).contains("Hello, World!") {
            let left = deadline.saturating_duration_since(Instant::now());
            assert!(!left.is_zero(), "no response before deadline");
            match rx.recv_timeout(left) {
                Ok(bytes) => got.extend(bytes),
                Err(e) => panic!("response channel died: {e}"),
            }
        }
        assert!(String::from_utf8_lossy(&got).starts_with("HTTP/1.1 200 OK"));

        cancel.cancel();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn config_file_overrides_defaults_only_where_set() {
        let path = std::env::temp_dir().join("swarmrt-test-frame.toml");
        std::fs::write(&path, "idle_sleep_ms = 7\nlisten_backlog = 11\n").unwrap();

        let cfg: FrameConfig = crate::utils::config_io::load_cfg(path.to_string_lossy()).unwrap();
        assert_eq!(cfg.idle_sleep_ms, 7);
        assert_eq!(cfg.listen_backlog, 11);
        assert_eq!(cfg.msg_batch, FrameConfig::default().msg_batch);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn stop_message_ends_actor_loop() {
        let cfg = FrameConfig {
            idle_sleep_ms: 5,
            ..Default::default()
        };
        let mut frame = Frame::new(cfg);
        let pool = frame.add_pool();
        let addr = frame.add_actor(pool, Sink).unwrap();
        frame.start().unwrap();

        frame.stop_actor(addr).unwrap();
        let slot = frame.core().slot(addr).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while slot.state() != ActorState::End {
            assert!(Instant::now() < deadline, "actor never stopped");
            thread::sleep(Duration::from_millis(5));
        }

        frame.shutdown();
    }
}
