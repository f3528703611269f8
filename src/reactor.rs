use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::ServerResult;
use crate::mux::{Event, Interest, Poller, Registry};
use crate::pool::ThreadPool;
use crate::response::ResponseBuilder;
use crate::routes::RouteTable;
use crate::stats::ServerStats;
use crate::timer::TimerHeap;
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single wait, so a raised shutdown flag is noticed promptly
const MAX_WAIT_MS: i32 = 1000;

const BUSY_MESSAGE: &[u8] = b"Server Busy!";

/// Sent by whichever thread closes a connection: `(id, fd)`
type ClosedNotice = (u64, RawFd);

/// Everything a worker task needs besides the connection itself
#[derive(Clone)]
struct TaskContext {
    registry: Registry,
    builder: Arc<ResponseBuilder>,
    closed_tx: Sender<ClosedNotice>,
    interest: Interest,
}

/// Single-threaded readiness loop.
///
/// Owns the listener, the poller, the idle timers and the connection table;
/// reading, parsing, building and writing run on the worker pool.
pub struct Reactor {
    acceptor: Acceptor,
    poller: Poller,
    timers: TimerHeap,
    pool: ThreadPool,
    connections: HashMap<RawFd, Arc<Connection>>,
    context: TaskContext,
    closed_rx: Receiver<ClosedNotice>,
    stats: Arc<ServerStats>,
    shutdown: Arc<AtomicBool>,
    idle_timeout: Option<Duration>,
    max_connections: usize,
    initial_buffer_size: usize,
    next_id: u64,
}

impl Reactor {
    /// Bind the listener and start the workers
    pub fn new(config: ServerConfig, routes: Arc<RouteTable>) -> ServerResult<Self> {
        config.validate()?;

        let acceptor = Acceptor::bind(&config)?;
        let poller = Poller::new(config.max_events)?;
        let registry = poller.registry();

        let mut listen_interest = Interest::READABLE | Interest::HANGUP;
        let mut interest = Interest::ONESHOT | Interest::HANGUP;
        if config.edge_triggered {
            listen_interest = listen_interest | Interest::EDGE;
            interest = interest | Interest::EDGE;
        }
        registry.register(acceptor.fd(), listen_interest)?;

        let pool = ThreadPool::new(config.worker_threads)?;
        let (closed_tx, closed_rx) = channel::unbounded();

        info!(
            "Listening on {}: {} workers, edge-triggered {}, idle timeout {:?}, root {:?}",
            acceptor.local_addr(),
            config.worker_threads,
            config.edge_triggered,
            config.idle_timeout(),
            config.document_root
        );

        Ok(Self {
            acceptor,
            poller,
            timers: TimerHeap::new(),
            pool,
            connections: HashMap::new(),
            context: TaskContext {
                registry,
                builder: Arc::new(ResponseBuilder::new(config.document_root.clone(), routes)),
                closed_tx,
                interest,
            },
            closed_rx,
            stats: Arc::new(ServerStats::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            idle_timeout: config.idle_timeout(),
            max_connections: config.max_connections,
            initial_buffer_size: config.initial_buffer_size,
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Flag that makes [`Reactor::run`] return once set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Connections in the table
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve until the shutdown flag is raised, then stop the workers and
    /// close every remaining connection.
    pub fn run(&mut self) -> ServerResult<()> {
        let result = self.serve();
        self.stop();
        result
    }

    fn serve(&mut self) -> ServerResult<()> {
        while !self.shutdown.load(Ordering::Acquire) {
            self.apply_closed();
            let wait = self.timers.next_wait(Instant::now());
            self.apply_closed();

            let timeout_ms = match wait {
                Some(wait) => {
                    let ms = (wait.as_micros() + 999) / 1000;
                    ms.min(MAX_WAIT_MS as u128) as i32
                }
                None => MAX_WAIT_MS,
            };

            let events = self.poller.poll(timeout_ms)?;
            for event in events {
                self.dispatch(event);
            }
        }

        Ok(())
    }

    fn dispatch(&mut self, event: Event) {
        if event.fd == self.acceptor.fd() {
            self.accept_all();
            return;
        }

        let conn = match self.connections.get(&event.fd) {
            Some(conn) => conn.clone(),
            None => {
                debug!("Event for unknown fd {}", event.fd);
                return;
            }
        };

        if event.is_hangup() {
            self.close_connection(&conn);
        } else if event.is_readable() {
            self.extend_timer(&conn);
            let context = self.context.clone();
            self.submit(move || read_task(&conn, &context));
        } else if event.is_writable() {
            self.extend_timer(&conn);
            let context = self.context.clone();
            self.submit(move || write_task(&conn, &context));
        } else {
            error!("Unexpected event {:#x} on fd {}", event.mask, event.fd);
        }
    }

    fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.pool.submit(task) {
            warn!("Worker pool is shut down; dropping task");
        }
    }

    fn accept_all(&mut self) {
        loop {
            match self.acceptor.accept() {
                Ok((stream, peer)) => {
                    if self.stats.live_connections.value() >= self.max_connections {
                        self.stats.rejected.increment(1);
                        reject(stream, peer);
                        continue;
                    }
                    self.add_connection(stream, peer);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn add_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;

        let fd = stream.as_raw_fd();
        let conn = Arc::new(Connection::new(
            id,
            stream,
            peer,
            self.stats.clone(),
            self.initial_buffer_size,
        ));

        if let Err(e) = self
            .context
            .registry
            .register(fd, self.context.interest | Interest::READABLE)
        {
            error!("Failed to register connection {} ({}): {}", id, peer, e);
            conn.close(&self.context.registry);
            return;
        }

        if let Some(timeout) = self.idle_timeout {
            let expired = conn.clone();
            let registry = self.context.registry.clone();
            let closed_tx = self.context.closed_tx.clone();
            let stats = self.stats.clone();
            self.timers.schedule(id, timeout, move || {
                if expired.close(&registry) {
                    stats.timeouts.increment(1);
                    info!("Connection {} ({}) idle, closed", expired.id(), expired.peer_addr());
                }
                let _ = closed_tx.send((expired.id(), expired.fd()));
            });
        }

        self.connections.insert(fd, conn);
        self.stats.accepted.increment(1);
        info!("Client {} connected as {} on fd {}", peer, id, fd);
    }

    fn extend_timer(&mut self, conn: &Connection) {
        if let Some(timeout) = self.idle_timeout {
            self.timers.adjust(conn.id(), timeout);
        }
    }

    fn close_connection(&mut self, conn: &Connection) {
        self.timers.remove(conn.id());
        self.forget(conn.id(), conn.fd());
        conn.close(&self.context.registry);
    }

    /// Drop the table entry for `fd` unless it now belongs to a newer connection
    fn forget(&mut self, id: u64, fd: RawFd) {
        if self.connections.get(&fd).map(|conn| conn.id()) == Some(id) {
            self.connections.remove(&fd);
        }
    }

    /// Handle connections closed by workers or by expired timers
    fn apply_closed(&mut self) {
        while let Ok((id, fd)) = self.closed_rx.try_recv() {
            self.timers.remove(id);
            self.forget(id, fd);
        }
    }

    fn stop(&mut self) {
        info!("Shutting down");
        self.pool.shutdown();

        for (_, conn) in self.connections.drain() {
            conn.close(&self.context.registry);
        }
        self.timers.clear();
        while self.closed_rx.try_recv().is_ok() {}

        info!("Final stats:\n{}", self.stats.format());
    }
}

fn reject(mut stream: TcpStream, peer: SocketAddr) {
    warn!("Rejecting {}: server busy", peer);
    let _ = stream.write(BUSY_MESSAGE);
}

fn rearm(conn: &Connection, state: &mut ConnectionState, context: &TaskContext, direction: Interest) {
    if let Err(e) = context.registry.modify(conn.fd(), context.interest | direction) {
        error!("Failed to re-arm connection {}: {}", conn.id(), e);
        close_locked(conn, state, context);
    }
}

fn close_locked(conn: &Connection, state: &mut ConnectionState, context: &TaskContext) {
    if state.close(&context.registry) {
        debug!("Connection {} ({}) closed", conn.id(), conn.peer_addr());
        let _ = context.closed_tx.send((conn.id(), conn.fd()));
    }
}

/// Drain the socket, then parse and build a response if a request is complete
fn read_task(conn: &Connection, context: &TaskContext) {
    let mut state = conn.lock();
    if state.is_closed() {
        return;
    }

    match state.drive_read() {
        Ok(n) => debug!("Read {} bytes from connection {}", n, conn.id()),
        Err(e) => {
            debug!("Read from connection {} failed: {}", conn.id(), e);
            close_locked(conn, &mut state, context);
            return;
        }
    }

    if state.drive_process(&context.builder) {
        rearm(conn, &mut state, context, Interest::WRITABLE);
    } else {
        rearm(conn, &mut state, context, Interest::READABLE);
    }
}

/// Write until done or the socket would block
fn write_task(conn: &Connection, context: &TaskContext) {
    let mut state = conn.lock();
    if state.is_closed() {
        return;
    }

    while state.pending_write_bytes() > 0 {
        match state.drive_write() {
            Ok(_) => {}
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                rearm(conn, &mut state, context, Interest::WRITABLE);
                return;
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("Write to connection {} failed: {}", conn.id(), e);
                close_locked(conn, &mut state, context);
                return;
            }
        }
    }

    if !state.is_keep_alive() {
        close_locked(conn, &mut state, context);
        return;
    }

    state.reset_for_next_request();
    if state.drive_process(&context.builder) {
        rearm(conn, &mut state, context, Interest::WRITABLE);
    } else {
        rearm(conn, &mut state, context, Interest::READABLE);
    }
}
