// Transport tuning for accepted connections.
//
// Control clients send many tiny request/response lines, so Nagle's algorithm
// is disabled and keep-alive is enabled so dead peers are eventually noticed
// by the blocked reader thread. On IPv4 we also ask for the low-delay type of
// service; that one is best-effort and failure is only logged.
//
// `std::net::TcpStream` has no keep-alive or TOS setters, so on unix those go
// through `libc::setsockopt` directly. Elsewhere they are no-ops.

use std::io;
use std::net::TcpStream;

use tracing::debug;

/// IPTOS_LOWDELAY from RFC 1349.
#[cfg(unix)]
const IPTOS_LOWDELAY: libc::c_int = 0x10;

/// Apply latency and liveness options to a freshly accepted stream.
pub fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    set_keepalive(stream)?;
    if let Err(e) = set_low_delay(stream) {
        debug!(error = %e, "could not set low-delay type of service");
    }
    Ok(())
}

#[cfg(unix)]
fn set_keepalive(stream: &TcpStream) -> io::Result<()> {
    setsockopt_int(stream, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)
}

#[cfg(unix)]
fn set_low_delay(stream: &TcpStream) -> io::Result<()> {
    if !stream.local_addr()?.is_ipv4() {
        return Ok(());
    }
    setsockopt_int(stream, libc::IPPROTO_IP, libc::IP_TOS, IPTOS_LOWDELAY)
}

#[cfg(unix)]
fn setsockopt_int(
    stream: &TcpStream,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: the fd is owned by `stream` and stays open for the call; the
    // option value points at a live `c_int` of exactly `len` bytes.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            level,
            name,
            std::ptr::from_ref(&value).cast::<libc::c_void>(),
            len,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_keepalive(_stream: &TcpStream) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn set_low_delay(_stream: &TcpStream) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn configure_disables_nagle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        configure(&server).unwrap();
        assert!(server.nodelay().unwrap());
        drop(client);
    }
}
