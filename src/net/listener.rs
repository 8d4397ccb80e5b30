//! Listening socket acquisition.
//!
//! # Responsibilities
//! - Bind TCP/UDP sockets before privileges are dropped, so ports below
//!   1024 work
//! - Retry TCP binds that hit `EADDRINUSE`, which tolerates the old
//!   supervisor's sockets lingering in TIME_WAIT during a restart
//! - Leave sockets inheritable and non-blocking for the worker accept loops
//!
//! # Design Decisions
//! - Sockets are created through libc so the reuse/keepalive options can be
//!   set before bind; the result is handed back as a std socket
//! - The final bind failure surfaces the OS error verbatim

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use crate::error::{BrimError, Result};

/// Seconds between TCP bind attempts.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Idle seconds before TCP keepalive probing starts.
const KEEPALIVE_IDLE_SECS: libc::c_int = 600;

/// Bind a listening TCP socket, retrying `EADDRINUSE` up to
/// `retry_attempts` times with a one second pause between attempts.
pub fn bind_tcp(
    section: &str,
    ip: &str,
    port: u16,
    backlog: i32,
    retry_attempts: u32,
) -> Result<TcpListener> {
    let addr = resolve(section, ip, port)?;
    let attempts = retry_attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match try_bind_tcp(&addr, backlog) {
            Ok(listener) => {
                tracing::info!(section, address = %addr, backlog, "listener bound");
                return Ok(listener);
            }
            Err(err) if err.raw_os_error() == Some(libc::EADDRINUSE) => {
                if attempt + 1 < attempts {
                    tracing::debug!(section, address = %addr, attempt, "address in use, retrying");
                    std::thread::sleep(RETRY_DELAY);
                }
                last_err = Some(err);
            }
            Err(err) => {
                return Err(bind_error(section, &addr, err));
            }
        }
    }
    Err(bind_error(
        section,
        &addr,
        last_err.unwrap_or_else(|| io::Error::from_raw_os_error(libc::EADDRINUSE)),
    ))
}

/// Bind a UDP socket. Datagram binds are not retried.
pub fn bind_udp(section: &str, ip: &str, port: u16) -> Result<UdpSocket> {
    let addr = resolve(section, ip, port)?;
    match try_bind_udp(&addr) {
        Ok(socket) => {
            tracing::info!(section, address = %addr, "datagram socket bound");
            Ok(socket)
        }
        Err(err) => Err(bind_error(section, &addr, err)),
    }
}

fn bind_error(section: &str, addr: &SocketAddr, err: io::Error) -> BrimError {
    BrimError::Bind {
        section: section.to_string(),
        addr: addr.to_string(),
        message: err.to_string(),
    }
}

/// Translate the configured address into something bindable. `*` and the
/// empty string mean all interfaces.
fn resolve(section: &str, ip: &str, port: u16) -> Result<SocketAddr> {
    let host = if ip.is_empty() || ip == "*" { "0.0.0.0" } else { ip };
    (host, port)
        .to_socket_addrs()
        .map_err(|err| bind_addr_error(section, host, port, &err))?
        .next()
        .ok_or_else(|| {
            bind_addr_error(
                section,
                host,
                port,
                &io::Error::new(io::ErrorKind::NotFound, "no usable address"),
            )
        })
}

fn bind_addr_error(section: &str, host: &str, port: u16, err: &io::Error) -> BrimError {
    BrimError::Bind {
        section: section.to_string(),
        addr: format!("{host}:{port}"),
        message: err.to_string(),
    }
}

fn try_bind_tcp(addr: &SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let fd = open_socket(addr, libc::SOCK_STREAM)?;
    set_option(&fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
    set_option(&fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
    set_option(&fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, KEEPALIVE_IDLE_SECS)?;
    bind_fd(&fd, addr)?;
    // SAFETY: fd is a bound stream socket we own.
    if unsafe { libc::listen(fd.as_raw_fd(), backlog) } < 0 {
        return Err(io::Error::last_os_error());
    }
    prepare_inherited(&fd)?;
    Ok(TcpListener::from(fd))
}

fn try_bind_udp(addr: &SocketAddr) -> io::Result<UdpSocket> {
    // No SO_REUSEADDR here: on Linux that would let two datagram sockets
    // share the port and silently split traffic between supervisors.
    let fd = open_socket(addr, libc::SOCK_DGRAM)?;
    bind_fd(&fd, addr)?;
    prepare_inherited(&fd)?;
    Ok(UdpSocket::from(fd))
}

fn open_socket(addr: &SocketAddr, sock_type: libc::c_int) -> io::Result<OwnedFd> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    // SAFETY: plain socket creation; the fd is wrapped immediately.
    let fd = unsafe { libc::socket(family, sock_type, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by socket() and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn set_option(
    fd: &OwnedFd,
    level: libc::c_int,
    option: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    // SAFETY: fd is open; value outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            level,
            option,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind_fd(fd: &OwnedFd, addr: &SocketAddr) -> io::Result<()> {
    let rc = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from(*v4.ip()).to_be(),
                },
                sin_zero: [0; 8],
            };
            // SAFETY: sin is a fully initialized sockaddr_in.
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            // SAFETY: sin6 is a fully initialized sockaddr_in6.
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sockets must survive the fork into workers: clear close-on-exec and make
/// the descriptor non-blocking for the async accept/recv loops.
fn prepare_inherited(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: fd is open; F_SETFD with no flags clears FD_CLOEXEC.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, 0) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is open; reading then updating the status flags.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_tcp_ephemeral_port() {
        let listener = bind_tcp("wsgi", "127.0.0.1", 0, 16, 1).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_star_means_all_interfaces() {
        let listener = bind_tcp("wsgi", "*", 0, 16, 1).unwrap();
        assert!(listener.local_addr().unwrap().ip().is_unspecified());
    }

    #[test]
    fn test_bind_conflict_reports_os_error() {
        let first = bind_tcp("wsgi", "127.0.0.1", 0, 16, 1).unwrap();
        let port = first.local_addr().unwrap().port();
        let err = bind_tcp("wsgi", "127.0.0.1", port, 16, 1).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("[wsgi] could not bind"), "{message}");
        assert!(message.to_lowercase().contains("in use"), "{message}");
    }

    #[test]
    fn test_bind_udp() {
        let socket = bind_udp("udp", "127.0.0.1", 0).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_udp_conflict_is_immediate() {
        let first = bind_udp("udp", "127.0.0.1", 0).unwrap();
        let port = first.local_addr().unwrap().port();
        let _hold = &first;
        assert!(bind_udp("udp", "127.0.0.1", port).is_err());
    }
}
