use crate::buffer::ByteBuffer;
use crate::mux::Registry;
use crate::request::{ParseOutcome, RequestParser};
use crate::response::{Response, ResponseBuilder, STATUS_INTERNAL_ERROR};
use crate::stats::ServerStats;
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};
use std::io::{self, ErrorKind, IoSlice, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

/// Represents a TCP connection with a client.
///
/// Shared by `Arc` between the reactor's table, its idle timer and any task
/// queued for it. All mutable state sits behind one lock, held for the whole
/// of a read or write task.
pub struct Connection {
    id: u64,
    fd: RawFd,
    peer_addr: SocketAddr,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// Take ownership of an accepted stream and count it as live
    pub fn new(
        id: u64,
        stream: TcpStream,
        peer_addr: SocketAddr,
        stats: Arc<ServerStats>,
        initial_buffer_size: usize,
    ) -> Self {
        stats.live_connections.increment(1);

        Self {
            id,
            fd: stream.as_raw_fd(),
            peer_addr,
            state: Mutex::new(ConnectionState {
                stream: Some(stream),
                closed: false,
                inbound: ByteBuffer::new(initial_buffer_size),
                outbound: ByteBuffer::new(initial_buffer_size),
                parser: RequestParser::new(),
                response: Response::new(),
                file_offset: 0,
                stats,
            }),
        }
    }

    /// Get the connection's unique ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Descriptor number at accept time; may be reused once closed
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Get the connection's peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().is_closed()
    }

    /// Close under the lock; see [`ConnectionState::close`]
    pub fn close(&self, registry: &Registry) -> bool {
        let closed = self.state.lock().close(registry);
        if closed {
            debug!("Connection {} ({}) closed", self.id, self.peer_addr);
        }
        closed
    }
}

/// Per-connection buffers, parser and in-flight response
pub struct ConnectionState {
    stream: Option<TcpStream>,
    closed: bool,
    inbound: ByteBuffer,
    outbound: ByteBuffer,
    parser: RequestParser,
    response: Response,
    /// Bytes of the mapped file already written
    file_offset: usize,
    stats: Arc<ServerStats>,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn inbound(&self) -> &ByteBuffer {
        &self.inbound
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Read until the socket would block.
    ///
    /// Returns the bytes read, which may be 0 for a spurious wakeup. A peer
    /// that closed without sending anything yields `UnexpectedEof`.
    pub fn drive_read(&mut self) -> io::Result<usize> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(not_connected()),
        };

        let mut total = 0;
        loop {
            match self.inbound.fill_from(stream) {
                Ok(0) if total == 0 => {
                    return Err(io::Error::new(ErrorKind::UnexpectedEof, "peer closed"));
                }
                Ok(0) => break,
                Ok(n) => total += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }

    /// Feed buffered bytes to the parser and, once the request is finished
    /// (successfully or not), build the response.
    ///
    /// Returns true when a response is ready to write.
    pub fn drive_process(&mut self, builder: &ResponseBuilder) -> bool {
        if self.parser.is_finished() {
            self.parser.reset();
        }
        if self.inbound.is_empty() {
            return false;
        }

        let seeded = match self.parser.parse(&mut self.inbound) {
            ParseOutcome::Incomplete => return false,
            ParseOutcome::Success => None,
            ParseOutcome::Error => Some(STATUS_INTERNAL_ERROR),
        };
        self.inbound.clear();

        let request = self.parser.request();
        debug!("{} {} (seeded {:?})", request.method, request.target, seeded);

        // A failed parse leaves the stream out of step with the client
        let keep_alive = seeded.is_none() && request.is_keep_alive();
        self.response.init(request.path(), keep_alive, seeded);
        self.outbound.clear();
        builder.build(request, &mut self.outbound, &mut self.response);

        self.file_offset = 0;
        self.stats.requests.increment(1);
        true
    }

    /// One vectored write of the header bytes followed by the unsent part of
    /// the mapped file. Returns the bytes the socket accepted.
    pub fn drive_write(&mut self) -> io::Result<usize> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(not_connected()),
        };

        let header = self.outbound.peek();
        let file = &self.response.file_bytes()[self.file_offset..];
        let header_len = header.len();

        if header_len + file.len() == 0 {
            return Ok(0);
        }

        let n = if header_len == 0 {
            stream.write(file)?
        } else {
            stream.write_vectored(&[IoSlice::new(header), IoSlice::new(file)])?
        };

        if n == 0 {
            return Err(io::Error::new(ErrorKind::WriteZero, "socket accepted no bytes"));
        }

        if n >= header_len {
            self.outbound.clear();
            self.file_offset += n - header_len;
        } else {
            self.outbound.consume(n);
        }

        Ok(n)
    }

    /// Header plus file bytes still to be written
    pub fn pending_write_bytes(&self) -> usize {
        self.outbound.readable_count() + self.response.file_len() - self.file_offset
    }

    pub fn is_keep_alive(&self) -> bool {
        self.response.is_keep_alive()
    }

    /// Drop the finished response; bytes already read for a following
    /// request stay buffered.
    pub fn reset_for_next_request(&mut self) {
        self.parser.reset();
        self.outbound.clear();
        self.response.unmap();
        self.file_offset = 0;
    }

    /// Deregister, shut down and release everything held for the connection.
    ///
    /// Only the first call does anything; it returns true, later calls false.
    pub fn close(&mut self, registry: &Registry) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        // Released before the peer can observe the shutdown
        self.stats.live_connections.decrement(1);

        if let Some(stream) = self.stream.take() {
            if let Err(e) = registry.deregister(stream.as_raw_fd()) {
                warn!("Failed to deregister fd {}: {}", stream.as_raw_fd(), e);
            }
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.response.unmap();
        self.inbound.clear();
        self.outbound.clear();
        self.parser.reset();
        self.file_offset = 0;
        true
    }
}

fn not_connected() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "connection already closed")
}
