//! Listening endpoints and accepted connection streams.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener as StdTcpListener};
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

/// A stream-oriented endpoint a server can listen on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// An IPv4 or IPv6 socket address.
    Ip(SocketAddr),
    /// A local filesystem socket path.
    ///
    /// Callers are responsible for unlinking a stale path before binding.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// An IPv4 endpoint from address octets and a port.
    pub fn ip4(addr: [u8; 4], port: u16) -> Endpoint {
        Endpoint::Ip(SocketAddr::from((addr, port)))
    }

    /// An IPv6 endpoint from address segments and a port, scope zero.
    pub fn ip6(addr: [u16; 8], port: u16) -> Endpoint {
        Endpoint::Ip(SocketAddr::from((addr, port)))
    }

    /// A unix socket endpoint at `path`.
    #[cfg(unix)]
    pub fn unix<P: AsRef<Path>>(path: P) -> Endpoint {
        Endpoint::Unix(path.as_ref().to_owned())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Endpoint {
        Endpoint::Ip(addr)
    }
}

/// The socket a server listens on.
pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Binds and listens on `endpoint`, with address reuse enabled so a
    /// rapid restart succeeds.
    pub(crate) fn bind(endpoint: &Endpoint) -> crate::Result<Listener> {
        match endpoint {
            Endpoint::Ip(addr) => bind_tcp(*addr).map(Listener::Tcp),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let listener = UnixListener::bind(path).map_err(crate::Error::new_listen)?;
                Ok(Listener::Unix(listener))
            }
        }
    }

    /// Binds a wildcard address on `port`: the IPv6 wildcard where the
    /// host supports it, otherwise the IPv4 wildcard.
    pub(crate) fn bind_port(port: u16) -> crate::Result<Listener> {
        match bind_tcp(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))) {
            Ok(listener) => Ok(Listener::Tcp(listener)),
            Err(err) => {
                debug!("IPv6 wildcard bind failed ({}), trying IPv4", err);
                bind_tcp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).map(Listener::Tcp)
            }
        }
    }

    /// The endpoint actually bound, after the OS assigned any ephemeral
    /// port.
    pub(crate) fn local_endpoint(&self) -> Option<Endpoint> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok().map(Endpoint::Ip),
            #[cfg(unix)]
            Listener::Unix(listener) => listener
                .local_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(Endpoint::unix)),
        }
    }

    pub(crate) async fn accept(&self) -> io::Result<(Io, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Io::Tcp(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Io::Unix(stream), String::from("uds")))
            }
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut st = f.debug_struct("Listener");
        st.field("endpoint", &self.local_endpoint());
        st.finish()
    }
}

fn bind_tcp(addr: SocketAddr) -> crate::Result<TcpListener> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(crate::Error::new_listen)?;
    socket
        .set_reuse_address(true)
        .map_err(crate::Error::new_listen)?;
    socket
        .bind(&addr.into())
        .map_err(crate::Error::new_listen)?;
    socket.listen(1024).map_err(crate::Error::new_listen)?;

    let std_listener: StdTcpListener = socket.into();
    // TcpListener::from_std doesn't set O_NONBLOCK
    std_listener
        .set_nonblocking(true)
        .map_err(crate::Error::new_listen)?;
    TcpListener::from_std(std_listener).map_err(crate::Error::new_listen)
}

/// This function defines errors that are per-connection. Which basically
/// means that if we get this error from `accept()` system call it means
/// next connection might be ready to be accepted.
///
/// All other errors will incur a timeout before next `accept()` is
/// performed. The timeout is useful to handle resource exhaustion errors
/// like ENFILE and EMFILE. Otherwise, could enter into tight loop.
pub(crate) fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// An accepted connection stream, TCP or unix.
#[derive(Debug)]
pub enum Io {
    /// A connection accepted from a TCP listener.
    Tcp(TcpStream),
    /// A connection accepted from a unix socket listener.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Io {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Io::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Io::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Io {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Io::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Io::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Io::Tcp(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
            #[cfg(unix)]
            Io::Unix(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // TCP and unix stream flushes are noops
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Io::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Io::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Io::Tcp(stream) => stream.is_write_vectored(),
            #[cfg(unix)]
            Io::Unix(stream) => stream.is_write_vectored(),
        }
    }
}
