use crate::config::{ServerConfig, MIN_PORT};
use crate::error::{ServerError, ServerResult};
use log::debug;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// How long a closing socket may linger to flush unsent data
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

/// The non-blocking listening socket
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    linger_on_close: bool,
}

impl Acceptor {
    /// Create a listener for `config.listen_address:config.port`
    pub fn bind(config: &ServerConfig) -> ServerResult<Self> {
        if config.port != 0 && config.port < MIN_PORT {
            return Err(ServerError::Startup(format!("Port {} is out of range", config.port)));
        }

        let address = config.socket_address();
        let socket_addr = address
            .to_socket_addrs()
            .map_err(|e| ServerError::Startup(format!("Cannot resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| ServerError::Startup(format!("No socket addresses found for {}", address)))?;

        let socket = Self::create_socket(&socket_addr, config.backlog)
            .map_err(|e| ServerError::Startup(format!("Cannot listen on {}: {}", socket_addr, e)))?;
        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            linger_on_close: config.linger_on_close,
        })
    }

    /// Accept one pending connection as a non-blocking stream
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept()?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        if self.linger_on_close {
            SockRef::from(&stream).set_linger(Some(LINGER_TIMEOUT))?;
        }

        debug!("Accepted {} on fd {}", addr, stream.as_raw_fd());
        Ok((stream, addr))
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn create_socket(addr: &SocketAddr, backlog: i32) -> io::Result<Socket> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;

        socket.bind(&(*addr).into())?;
        socket.listen(backlog)?;

        Ok(socket)
    }
}
