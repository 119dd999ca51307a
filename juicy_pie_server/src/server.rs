// TCP listener and session manager.
//
// Architecture: one accept thread plus the host's simulation loop.
//
// - **Accept thread** (non-blocking `TcpListener::accept()` loop): accepts new
//   connections and hands the raw `TcpStream` to the simulation thread over a
//   crossbeam channel. It never touches sessions or the world.
// - **Simulation thread**: the host calls `Server::tick(&mut world)` once per
//   simulation tick. Each call admits pending connections (constructing a
//   `Session` per stream), ticks every live session in insertion order, then
//   closes and drops every session that reports pending removal.
//
// Sessions and the registry are owned by the simulation thread only, so
// handlers may hold non-`Send` state and always see the world exclusively.
//
// Over `max_sessions`, a new connection receives a single `Server is full`
// line and is dropped without starting any session threads.
//
// Shutdown: `shutdown()` stops the accept thread and kicks every session with
// `Server shutting down`. Dropping the server does the same.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use juicy_pie_protocol::write_line;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::Registry;
use crate::session::{Session, SessionOptions};

/// Reply sent to a connection turned away because the server is full.
pub const SERVER_FULL: &str = "Server is full";

/// Kick reason sent to every session on shutdown.
pub const SHUTTING_DOWN: &str = "Server shutting down";

/// How long the accept thread sleeps when no connection is waiting.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accepts connections and drives every live session.
pub struct Server<W> {
    local_addr: SocketAddr,
    registry: Arc<Registry<W>>,
    sessions: Vec<Session<W>>,
    incoming: Receiver<TcpStream>,
    keep_running: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    options: SessionOptions,
    max_sessions: usize,
}

impl<W> Server<W> {
    /// Bind the listener and start the accept thread. The registry is frozen
    /// from here on.
    pub fn bind(config: &ServerConfig, registry: Registry<W>) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener =
            TcpListener::bind(&addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        // Non-blocking so the accept thread can observe `keep_running`.
        listener.set_nonblocking(true)?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let (tx, incoming) = crossbeam_channel::unbounded();
        let acceptor = {
            let keep_running = Arc::clone(&keep_running);
            thread::Builder::new()
                .name("juicy-pie-accept".into())
                .spawn(move || accept_loop(&listener, &tx, &keep_running))?
        };

        info!(addr = %local_addr, commands = registry.len(), "listening for control clients");

        Ok(Self {
            local_addr,
            registry: Arc::new(registry),
            sessions: Vec::new(),
            incoming,
            keep_running,
            acceptor: Some(acceptor),
            options: config.session_options(),
            max_sessions: config.max_sessions,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Registry<W> {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> &[Session<W>] {
        &self.sessions
    }

    /// One simulation tick: admit new connections, dispatch queued commands
    /// for every session, and drop finished sessions. Returns the number of
    /// commands dispatched.
    pub fn tick(&mut self, world: &mut W) -> usize {
        self.admit_pending(world);

        let mut processed = 0;
        for session in &mut self.sessions {
            processed += session.tick(world).processed;
        }

        self.sessions.retain_mut(|session| {
            if session.is_pending_removal() {
                session.close();
                false
            } else {
                true
            }
        });
        processed
    }

    fn admit_pending(&mut self, host: &W) {
        while let Ok(stream) = self.incoming.try_recv() {
            if self.sessions.len() >= self.max_sessions {
                reject(stream, SERVER_FULL);
                continue;
            }
            match Session::open(
                stream,
                Arc::clone(&self.registry),
                host,
                self.options.clone(),
            ) {
                Ok(session) => self.sessions.push(session),
                Err(e) => warn!(error = %e, "failed to open session"),
            }
        }
    }

    /// Stop accepting and kick every session. Idempotent.
    pub fn shutdown(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        for mut session in self.sessions.drain(..) {
            session.kick(SHUTTING_DOWN);
        }
        // Connections accepted but never admitted.
        while let Ok(stream) = self.incoming.try_recv() {
            reject(stream, SHUTTING_DOWN);
        }
    }
}

impl<W> Drop for Server<W> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: &TcpListener, tx: &Sender<TcpStream>, keep_running: &AtomicBool) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(error = %e, "failed to make accepted stream blocking");
                    continue;
                }
                if tx.send(stream).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!(error = %e, "error accepting control client");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

/// Best-effort single line to a connection that will not get a session.
fn reject(mut stream: TcpStream, reason: &str) {
    let peer = stream.peer_addr().ok();
    let result = write_line(&mut stream, reason).and_then(|()| stream.flush());
    if let Err(e) = result {
        warn!(?peer, error = %e, "failed to notify rejected connection");
    }
    info!(?peer, reason, "rejected connection");
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;
    use std::time::Instant;

    use juicy_pie_protocol::{MAX_LINE_BYTES, read_line};

    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    fn counter_registry() -> Registry<u64> {
        let mut registry = Registry::<u64>::new();
        registry.register_value("inc", |call| {
            *call.world += 1;
            Ok(call.world.to_string())
        });
        registry
    }

    /// Tick until `cond` holds, failing after five seconds.
    fn tick_until(
        server: &mut Server<u64>,
        world: &mut u64,
        mut cond: impl FnMut(&Server<u64>) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond(server) {
            assert!(Instant::now() < deadline, "timed out waiting for server");
            server.tick(world);
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn connect(addr: SocketAddr) -> (BufReader<TcpStream>, TcpStream) {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (BufReader::new(stream.try_clone().unwrap()), stream)
    }

    fn recv(reader: &mut BufReader<TcpStream>) -> Option<String> {
        read_line(reader, MAX_LINE_BYTES).unwrap()
    }

    #[test]
    fn bind_failure_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..ServerConfig::default()
        };
        match Server::bind(&config, counter_registry()) {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, config.listen_addr()),
            Err(other) => panic!("expected Bind error, got {other:?}"),
            Ok(_) => panic!("expected Bind error, got a server"),
        }
    }

    #[test]
    fn admits_ticks_and_removes_sessions() {
        let mut server = Server::bind(&test_config(), counter_registry()).unwrap();
        let mut world = 0_u64;

        let (mut reader, mut writer) = connect(server.local_addr());
        tick_until(&mut server, &mut world, |s| s.session_count() == 1);

        write_line(&mut writer, "inc()").unwrap();
        writer.flush().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while world == 0 {
            assert!(Instant::now() < deadline, "command never dispatched");
            server.tick(&mut world);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(recv(&mut reader).as_deref(), Some("1"));

        drop(writer);
        drop(reader);
        tick_until(&mut server, &mut world, |s| s.session_count() == 0);
    }

    #[test]
    fn rejects_connections_over_limit() {
        let config = ServerConfig {
            max_sessions: 1,
            ..test_config()
        };
        let mut server = Server::bind(&config, counter_registry()).unwrap();
        let mut world = 0_u64;

        let (_first_reader, _first_writer) = connect(server.local_addr());
        tick_until(&mut server, &mut world, |s| s.session_count() == 1);

        let (mut second, _second_writer) = connect(server.local_addr());
        let deadline = Instant::now() + Duration::from_secs(5);
        // The rejection happens during a tick; keep ticking until it arrives.
        second
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let reply = loop {
            assert!(Instant::now() < deadline, "no rejection received");
            server.tick(&mut world);
            match read_line(&mut second, MAX_LINE_BYTES) {
                Ok(Some(line)) => break line,
                Ok(None) => panic!("closed without a reason"),
                Err(_) => continue,
            }
        };
        assert_eq!(reply, SERVER_FULL);
        assert_eq!(server.session_count(), 1);
    }

    #[test]
    fn shutdown_kicks_every_session() {
        let mut server = Server::bind(&test_config(), counter_registry()).unwrap();
        let mut world = 0_u64;

        let (mut a, _a_writer) = connect(server.local_addr());
        let (mut b, _b_writer) = connect(server.local_addr());
        tick_until(&mut server, &mut world, |s| s.session_count() == 2);

        server.shutdown();
        assert_eq!(server.session_count(), 0);
        assert_eq!(recv(&mut a).as_deref(), Some(SHUTTING_DOWN));
        assert_eq!(recv(&mut b).as_deref(), Some(SHUTTING_DOWN));
        assert_eq!(recv(&mut a), None);

        // Idempotent.
        server.shutdown();
    }
}
