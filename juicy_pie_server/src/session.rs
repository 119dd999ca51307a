// One client connection: I/O threads, queues, and the per-tick dispatch loop.
//
// A `Session` bridges two execution models. Socket reads and writes block, so
// each session owns two dedicated threads:
// - the **reader** blocks on `read_line` and pushes raw lines into the
//   inbound channel (single producer, single consumer);
// - the **writer** drains the mutex-guarded outbound deque, writes each reply
//   plus `\n`, flushes, then sleeps briefly.
//
// Everything else happens in `tick()`, which the session manager calls once
// per simulation tick on the simulation thread. `tick()` pops at most
// `max_commands_per_tick` lines, parses each, looks up its handler and
// invokes it with `&mut W`. Handlers therefore never run on an I/O thread,
// and the world needs no locking.
//
// Lifecycle flags (shared with the I/O threads):
// - `running` drops to false on EOF, on an I/O error, or on `close()`.
// - `pending_removal` becomes true in `tick()` once `running` is false *and*
//   the inbound queue is empty (every received command is dispatched first),
//   or immediately on `close()`/`kick()`. After that `send()` is a no-op.
//
// State machine: `Open → Closing → Closed`. `close()` is idempotent and never
// fails: it releases the attachment, shuts down the socket so a blocked read
// returns, joins both threads with a bounded timeout, and closes the
// transport. Dropping a session closes it.
//
// See also: `server.rs` for the manager that creates, ticks and removes
// sessions, `registry.rs` / `handler.rs` for dispatch targets.

use std::collections::VecDeque;
use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use juicy_pie_protocol::framing::{read_line, write_line};
use juicy_pie_protocol::{FAIL, MAX_LINE_BYTES, SUCCESS, parse_line};
use tracing::{debug, info, warn};

use crate::attachment::Attachment;
use crate::handler::{Call, Response};
use crate::registry::Registry;
use crate::socket;

/// Default cap on commands dispatched per session per tick. Bounds the time
/// any one client can add to a tick, however fast it sends.
pub const MAX_COMMANDS_PER_TICK: usize = 9000;

/// Tunables for a single session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_commands_per_tick: usize,
    pub max_line_bytes: usize,
    pub join_timeout: Duration,
    pub writer_idle: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_commands_per_tick: MAX_COMMANDS_PER_TICK,
            max_line_bytes: MAX_LINE_BYTES,
            join_timeout: Duration::from_secs(2),
            writer_idle: Duration::from_millis(1),
        }
    }
}

/// Coarse lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Outcome of one `tick()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Lines dispatched this tick.
    pub processed: usize,
    /// Lines left queued because the per-tick cap was reached.
    pub deferred: usize,
}

/// State shared between the session and its I/O threads.
struct Shared {
    running: AtomicBool,
    pending_removal: AtomicBool,
    outbound: Mutex<VecDeque<String>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            pending_removal: AtomicBool::new(false),
            outbound: Mutex::new(VecDeque::new()),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear `running`; returns whether it was still set.
    fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    fn outbound(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Server-side state for one connected client.
pub struct Session<W> {
    peer: SocketAddr,
    control: TcpStream,
    inbound: Receiver<String>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    attachment: Attachment,
    registry: Arc<Registry<W>>,
    options: SessionOptions,
    closed: bool,
}

impl<W> Session<W> {
    /// Take ownership of an accepted connection: tune the socket, start the
    /// reader and writer threads, and create handler contexts against `host`.
    ///
    /// On error no thread is left running; the caller drops the stream.
    pub fn open(
        stream: TcpStream,
        registry: Arc<Registry<W>>,
        host: &W,
        options: SessionOptions,
    ) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        socket::configure(&stream)?;
        let reader_stream = BufReader::new(stream.try_clone()?);
        let writer_stream = BufWriter::new(stream.try_clone()?);

        let shared = Arc::new(Shared::new());
        let (tx, inbound) = crossbeam_channel::unbounded();

        let reader = {
            let shared = Arc::clone(&shared);
            let max_line_bytes = options.max_line_bytes;
            thread::Builder::new()
                .name(format!("session-in-{peer}"))
                .spawn(move || reader_loop(reader_stream, tx, &shared, peer, max_line_bytes))?
        };

        let writer = {
            let shared = Arc::clone(&shared);
            let idle = options.writer_idle;
            thread::Builder::new()
                .name(format!("session-out-{peer}"))
                .spawn(move || writer_loop(writer_stream, &shared, peer, idle))
        };
        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                shared.stop();
                let _ = stream.shutdown(Shutdown::Both);
                let _ = reader.join();
                return Err(e);
            }
        };

        let mut attachment = Attachment::new(Some(peer));
        registry.create_contexts(host, &mut attachment);
        info!(%peer, contexts = attachment.context_count(), "opened connection");

        Ok(Self {
            peer,
            control: stream,
            inbound,
            shared,
            reader: Some(reader),
            writer: Some(writer),
            attachment,
            registry,
            options,
            closed: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_pending_removal(&self) -> bool {
        self.shared.pending_removal.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.is_running() && !self.is_pending_removal() {
            SessionState::Open
        } else {
            SessionState::Closing
        }
    }

    /// Lines received but not yet dispatched.
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// Replies enqueued but not yet picked up by the writer thread.
    pub fn queued_replies(&self) -> usize {
        self.shared.outbound().len()
    }

    /// Dispatch queued lines. Called once per simulation tick on the
    /// simulation thread; never blocks on I/O.
    pub fn tick(&mut self, world: &mut W) -> TickReport {
        if self.closed {
            return TickReport::default();
        }

        let cap = self.options.max_commands_per_tick;
        let mut processed = 0;
        while processed < cap {
            let Ok(line) = self.inbound.try_recv() else {
                break;
            };
            self.handle_line(world, &line);
            processed += 1;
        }

        let deferred = if processed >= cap {
            self.inbound.len()
        } else {
            0
        };
        if deferred > 0 {
            warn!(
                peer = %self.peer,
                deferred,
                "over {cap} commands were queued - deferring {deferred} to next tick"
            );
        }

        if !self.is_running() && self.inbound.is_empty() {
            self.shared.pending_removal.store(true, Ordering::SeqCst);
        }

        TickReport {
            processed,
            deferred,
        }
    }

    fn handle_line(&mut self, world: &mut W, line: &str) {
        let instruction = match parse_line(line) {
            Ok(instruction) => instruction,
            Err(e) => {
                self.send(e.to_string());
                return;
            }
        };

        let reply = match self.registry.get_handler(instruction.command()) {
            Some((handler_id, handler)) => {
                let mut call = Call {
                    world,
                    attachment: &mut self.attachment,
                    instruction,
                    handler_id,
                    registry: &*self.registry,
                };
                match handler.invoke(&mut call) {
                    Ok(Response::Reply(text)) => text,
                    Ok(Response::Done) => SUCCESS.to_string(),
                    Err(e) => e.to_string(),
                }
            }
            None => {
                warn!(peer = %self.peer, command = instruction.command(), "command is not supported");
                FAIL.to_string()
            }
        };
        self.send(reply);
    }

    /// Queue a reply line for the writer thread. Dropped once the session is
    /// pending removal.
    pub fn send(&self, message: impl Into<String>) {
        if self.is_pending_removal() {
            return;
        }
        self.shared.outbound().push_back(message.into());
    }

    /// Write `reason` straight to the socket, then close. The write gives up
    /// after `join_timeout` if the peer is not reading.
    pub fn kick(&mut self, reason: &str) {
        if !self.closed {
            let mut stream = &self.control;
            let result = stream
                .set_write_timeout(Some(self.options.join_timeout))
                .and_then(|()| write_line(&mut stream, reason))
                .and_then(|()| stream.flush());
            if let Err(e) = result {
                debug!(peer = %self.peer, error = %e, "failed to send kick reason");
            }
        }
        self.close();
    }

    /// Stop the session and release everything it owns. Safe to call more
    /// than once; only the first call does any work.
    pub fn close(&mut self) {
        self.shared.stop();
        self.shared.pending_removal.store(true, Ordering::SeqCst);
        if self.closed {
            return;
        }
        self.closed = true;

        self.attachment.close();

        // Wake the reader if it is blocked in read_line.
        let _ = self.control.shutdown(Shutdown::Read);

        let timeout = self.options.join_timeout;
        for (name, handle) in [("input", self.reader.take()), ("output", self.writer.take())] {
            if !join_with_timeout(handle, timeout) {
                warn!(peer = %self.peer, "failed to stop {name} thread within {timeout:?}");
            }
        }

        if let Err(e) = self.control.shutdown(Shutdown::Both) {
            if e.kind() != std::io::ErrorKind::NotConnected {
                warn!(peer = %self.peer, error = %e, "failed to close socket");
            }
        }
        info!(peer = %self.peer, "closed connection");
    }
}

impl<W> Drop for Session<W> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader thread: push each received line into the inbound channel until
/// EOF, an error, or the session stops.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    tx: Sender<String>,
    shared: &Shared,
    peer: SocketAddr,
    max_line_bytes: usize,
) {
    info!(%peer, "starting input thread");
    while shared.is_running() {
        match read_line(&mut reader, max_line_bytes) {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => {
                shared.stop();
            }
            Err(e) => {
                if shared.stop() {
                    warn!(%peer, error = %e, "error occurred in input thread");
                }
            }
        }
    }
}

/// Writer thread: flush queued replies until the session stops or a write
/// fails.
fn writer_loop(
    mut writer: BufWriter<TcpStream>,
    shared: &Shared,
    peer: SocketAddr,
    idle: Duration,
) {
    info!(%peer, "starting output thread");
    while shared.is_running() {
        let batch: Vec<String> = shared.outbound().drain(..).collect();
        let result = batch
            .iter()
            .try_for_each(|line| write_line(&mut writer, line))
            .and_then(|()| writer.flush());
        if let Err(e) = result {
            if shared.stop() {
                warn!(%peer, error = %e, "error occurred in output thread");
            }
            break;
        }
        thread::yield_now();
        thread::sleep(idle);
    }
}

/// Join `handle`, giving up after `timeout`. Returns false if the thread was
/// still running; it is then left detached.
fn join_with_timeout(handle: Option<JoinHandle<()>>, timeout: Duration) -> bool {
    let Some(handle) = handle else {
        return true;
    };
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    if handle.join().is_err() {
        warn!("session I/O thread panicked");
    }
    true
}
