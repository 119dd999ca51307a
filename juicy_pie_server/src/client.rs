// Line-protocol client for driving a control server.
//
// Used by the integration tests and by anything that wants to script a running
// server from Rust. Architecture:
// - `connect()` opens the TCP stream on the calling thread and spawns a
//   background reader thread.
// - The reader thread calls `read_line()` in a loop and pushes every reply
//   line into a crossbeam channel. EOF or a read error ends the thread, which
//   drops the sender so the inbox reports disconnection.
// - The caller holds a `BufWriter<TcpStream>` for sending; `send()` flushes
//   after every line so a request is never stuck in the buffer.
// - `poll()` drains the inbox without blocking; `recv_timeout()` waits for the
//   next line.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use juicy_pie_protocol::{MAX_LINE_BYTES, read_line, write_line};

/// TCP client speaking the newline-delimited command protocol.
pub struct LineClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<String>,
    reader_thread: Option<JoinHandle<()>>,
    peer: SocketAddr,
}

impl LineClient {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let reader = BufReader::new(stream.try_clone()?);

        let (tx, inbox) = crossbeam_channel::unbounded();
        let reader_thread = thread::Builder::new()
            .name(format!("line-client-{peer}"))
            .spawn(move || reader_loop(reader, &tx))?;

        Ok(Self {
            writer: BufWriter::new(stream),
            inbox,
            reader_thread: Some(reader_thread),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one request line (the terminator is added here).
    pub fn send(&mut self, line: &str) -> io::Result<()> {
        write_line(&mut self.writer, line)?;
        self.writer.flush()
    }

    /// Drain all reply lines received so far (non-blocking).
    pub fn poll(&self) -> Vec<String> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next reply line. `None` on timeout or
    /// once the server has closed the connection and the inbox is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        match self.inbox.recv_timeout(timeout) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// True once the server side has closed and every received line has
    /// been drained.
    pub fn is_disconnected(&self) -> bool {
        self.inbox.is_empty()
            && self
                .reader_thread
                .as_ref()
                .is_none_or(JoinHandle::is_finished)
    }

    /// Close both directions and wait for the reader thread.
    pub fn disconnect(&mut self) {
        let _ = self.writer.flush();
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LineClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn reader_loop(mut reader: BufReader<TcpStream>, tx: &Sender<String>) {
    while let Ok(Some(line)) = read_line(&mut reader, MAX_LINE_BYTES) {
        if tx.send(line).is_err() {
            break; // Client dropped the receiver.
        }
    }
}
