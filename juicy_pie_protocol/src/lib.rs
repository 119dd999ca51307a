// juicy_pie_protocol — the line protocol spoken between control clients and
// the simulation server.
//
// This crate defines the wire grammar, line framing, and fixed reply strings.
// It is shared by the server (`juicy_pie_server`) and by any Rust client, and
// has no dependency on the server, the simulation, or a runtime.
//
// Module overview:
// - `framing.rs`:     Newline framing over any `BufRead`/`Write` stream, with a
//                     per-line length cap.
// - `instruction.rs`: `parse_line` and the `Instruction` argument cursor, plus
//                     `FormatError` / `ArgumentError`.
// - `reply.rs`:       `WRONG_FORMAT`, `FAIL`, `SUCCESS`.
//
// Design decisions:
// - **Plain text.** One command per line, one reply per line. No versioning,
//   no authentication, no binary payloads.
// - **Tokenize only.** The parser never interprets arguments; handlers do.
// - **No async runtime.** Framing uses `std::io`, matching the blocking
//   reader/writer threads on the server.

pub mod framing;
pub mod instruction;
pub mod reply;

pub use framing::{MAX_LINE_BYTES, read_line, write_line};
pub use instruction::{ArgumentError, FormatError, Instruction, parse_line};
pub use reply::{FAIL, SUCCESS, WRONG_FORMAT};
