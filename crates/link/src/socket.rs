use std::io::{self, Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Result of a socket call that must never block the caller.
#[derive(Debug)]
pub enum IoOutcome<T> {
    Success(T),
    WouldBlock,
    Error(io::Error),
}

impl<T> IoOutcome<T> {
    pub fn from_result(result: io::Result<T>) -> Self {
        match result {
            Ok(value) => IoOutcome::Success(value),
            Err(e) if is_transient(&e) => IoOutcome::WouldBlock,
            Err(e) => IoOutcome::Error(e),
        }
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, IoOutcome::WouldBlock)
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || matches!(
        e.raw_os_error(),
        Some(libc::EINPROGRESS) | Some(libc::EALREADY)
    )
}

#[derive(Debug)]
pub struct NonBlockingSocket {
    stream: TcpStream,
}

impl NonBlockingSocket {
    /// Creates an unconnected IPv4 stream socket in non-blocking mode.
    pub fn open() -> io::Result<Self> {
        // SAFETY: socket(2) takes no pointers; the result is checked below.
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by socket(2) and nothing else owns it.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Self::from_stream(TcpStream::from(owned))
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self { stream })
    }

    pub fn connect(&self, addr: SocketAddrV4) -> IoOutcome<()> {
        let raw = sockaddr_in(addr);
        // SAFETY: `raw` is a fully initialised sockaddr_in that outlives the
        // call, and the length passed matches its size.
        let rc = unsafe {
            libc::connect(
                self.stream.as_raw_fd(),
                &raw as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            IoOutcome::Success(())
        } else {
            IoOutcome::from_result(Err(io::Error::last_os_error()))
        }
    }

    pub fn send(&mut self, buf: &[u8]) -> IoOutcome<usize> {
        IoOutcome::from_result(self.stream.write(buf))
    }

    /// `Success(0)` means the peer closed the connection.
    pub fn recv(&mut self, buf: &mut [u8]) -> IoOutcome<usize> {
        IoOutcome::from_result(self.stream.read(buf))
    }

    pub fn is_readable(&self) -> io::Result<bool> {
        poll_ready(self.stream.as_raw_fd(), libc::POLLIN)
    }

    pub fn is_writable(&self) -> io::Result<bool> {
        poll_ready(self.stream.as_raw_fd(), libc::POLLOUT)
    }

    /// Reads and clears the pending socket error (`SO_ERROR`).
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.stream.take_error()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }
}

#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    pub fn bind(addr: SocketAddrV4) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn has_pending(&self) -> io::Result<bool> {
        poll_ready(self.listener.as_raw_fd(), libc::POLLIN)
    }

    pub fn accept(&self) -> IoOutcome<(NonBlockingSocket, SocketAddr)> {
        match self.listener.accept() {
            Ok((stream, addr)) => match NonBlockingSocket::from_stream(stream) {
                Ok(socket) => IoOutcome::Success((socket, addr)),
                Err(e) => IoOutcome::Error(e),
            },
            Err(e) => IoOutcome::from_result(Err(e)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Zero-timeout readiness check. Error and hang-up conditions count as ready
/// so the caller gets to observe them through the next call.
fn poll_ready(fd: RawFd, events: libc::c_short) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: `pollfd` is a single valid entry and nfds is 1.
    let ready = unsafe { libc::poll(&mut pollfd, 1, 0) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if pollfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    Ok(ready > 0 && pollfd.revents & (events | libc::POLLERR | libc::POLLHUP) != 0)
}

fn sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is plain old data and all-zero is a valid value.
    let mut raw: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    raw.sin_family = libc::AF_INET as libc::sa_family_t;
    raw.sin_port = addr.port().to_be();
    raw.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        raw.sin_len = std::mem::size_of::<libc::sockaddr_in>() as u8;
    }
    raw
}
