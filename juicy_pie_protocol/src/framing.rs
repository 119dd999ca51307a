// Newline-delimited line framing over TCP.
//
// The wire format is one UTF-8 line per command (client → server) and one
// line per reply (server → client), terminated by `\n`. A trailing `\r` is
// stripped on read so telnet-style clients work unchanged. Malformed UTF-8 is
// a content problem, not a framing one: it decodes lossily and the line is
// still delivered.
//
// `read_line` caps the number of bytes it will buffer for a single line. A
// client that streams bytes without ever sending a newline gets an
// `InvalidData` error instead of growing the buffer without bound; the session
// treats that like any other read failure and ends the connection.
//
// `write_line` does not flush. The session's writer thread drains every queued
// reply and then flushes once per cycle.

use std::io::{self, BufRead, Read, Write};

/// Default maximum line length in bytes (64 KiB), excluding the terminator.
/// Commands are short; the largest expected payload is a script body sent to
/// `script.eval`.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Read one line. Returns `Ok(None)` on clean end-of-stream.
///
/// A final line without a terminator is still returned. Bytes that are not
/// valid UTF-8 decode to U+FFFD. Returns `InvalidData` if the line content
/// (terminator excluded) exceeds `max_len` bytes.
pub fn read_line<R: BufRead>(reader: &mut R, max_len: usize) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    // Room for the content plus a `\r\n` terminator.
    let limit = max_len as u64 + 2;
    let n = reader.by_ref().take(limit).read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line too long (max {max_len} bytes)"),
        ));
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Write `line` followed by `\n`.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_lines_in_sequence() {
        let mut cursor = Cursor::new(b"first\nsecond\r\nthird\n".to_vec());
        assert_eq!(read_line(&mut cursor, 64).unwrap().as_deref(), Some("first"));
        assert_eq!(read_line(&mut cursor, 64).unwrap().as_deref(), Some("second"));
        assert_eq!(read_line(&mut cursor, 64).unwrap().as_deref(), Some("third"));
        assert_eq!(read_line(&mut cursor, 64).unwrap(), None);
    }

    #[test]
    fn empty_line_is_not_end_of_stream() {
        let mut cursor = Cursor::new(b"\n".to_vec());
        assert_eq!(read_line(&mut cursor, 64).unwrap().as_deref(), Some(""));
        assert_eq!(read_line(&mut cursor, 64).unwrap(), None);
    }

    #[test]
    fn unterminated_final_line_is_returned() {
        let mut cursor = Cursor::new(b"chat.post(bye,)".to_vec());
        assert_eq!(
            read_line(&mut cursor, 64).unwrap().as_deref(),
            Some("chat.post(bye,)")
        );
        assert_eq!(read_line(&mut cursor, 64).unwrap(), None);
    }

    #[test]
    fn line_at_limit_is_accepted() {
        let mut data = vec![b'a'; 8];
        data.push(b'\n');
        data.extend_from_slice(&[b'b'; 8]);
        data.extend_from_slice(b"\r\n");
        let mut cursor = Cursor::new(data);
        assert_eq!(read_line(&mut cursor, 8).unwrap().unwrap(), "aaaaaaaa");
        assert_eq!(read_line(&mut cursor, 8).unwrap().unwrap(), "bbbbbbbb");
        assert_eq!(read_line(&mut cursor, 8).unwrap(), None);
    }

    #[test]
    fn line_one_over_limit_is_rejected() {
        let mut data = vec![b'a'; 9];
        data.extend_from_slice(b"\r\n");
        let mut cursor = Cursor::new(data);
        let err = read_line(&mut cursor, 8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_oversized_line() {
        let mut cursor = Cursor::new(vec![b'a'; 100]);
        let err = read_line(&mut cursor, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut cursor = Cursor::new(b"chat(caf\xe9,)\nnext()\n".to_vec());
        assert_eq!(
            read_line(&mut cursor, 64).unwrap().as_deref(),
            Some("chat(caf\u{FFFD},)")
        );
        assert_eq!(read_line(&mut cursor, 64).unwrap().as_deref(), Some("next()"));
    }

    #[test]
    fn write_line_appends_terminator() {
        let mut buf = Vec::new();
        write_line(&mut buf, "64").unwrap();
        write_line(&mut buf, "Fail").unwrap();
        assert_eq!(buf, b"64\nFail\n");
    }
}
