// juicy_pie_server — line-protocol control server for a tick-driven
// simulation.
//
// Clients connect over TCP and send one command per line
// (`name(arg,arg,...,)`). Each connection is a `Session` with its own reader
// and writer threads; commands are queued and executed on the host's
// simulation thread during `Server::tick()`, so handlers get exclusive access
// to the world without locking. Every command produces exactly one reply line.
//
// Module overview:
// - `handler.rs`:    The `Handler` trait, `Call` and `Response`, optional
//                    session-context and clearable capabilities.
// - `registry.rs`:   Command name → handler table, frozen once serving starts.
// - `attachment.rs`: Per-session handler contexts, released on close.
// - `session.rs`:    One connection: I/O threads, inbound/outbound queues,
//                    per-tick dispatch with a command cap, idempotent close.
// - `server.rs`:     Accept thread and session manager driven by `tick()`.
// - `socket.rs`:     Latency and keep-alive tuning for accepted streams.
// - `config.rs`:     `ServerConfig` and `Features`, loadable from JSON.
// - `error.rs`:      `CommandError` (reply text) and `ServerError` (startup).
// - `client.rs`:     `LineClient`, a small blocking client for tests and tools.
// - `demo.rs`:       `DemoWorld` and the command set served by `juicy-pie`.
// - `script.rs`:     `script.eval`, a per-session Rhai interpreter.
//
// Wire-level framing and instruction parsing live in `juicy_pie_protocol`.

pub mod attachment;
pub mod client;
pub mod config;
pub mod demo;
pub mod error;
pub mod handler;
pub mod registry;
pub mod script;
pub mod server;
pub mod session;
mod socket;

pub use attachment::Attachment;
pub use client::LineClient;
pub use config::{Features, ServerConfig};
pub use error::{CommandError, ServerError};
pub use handler::{Call, Clearable, Handler, Response};
pub use registry::{HandlerId, Registry};
pub use server::Server;
pub use session::{Session, SessionOptions, SessionState, TickReport};
