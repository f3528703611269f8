pub mod acceptor;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod mux;
pub mod pool;
pub mod reactor;
pub mod request;
pub mod response;
pub mod routes;
pub mod server;
pub mod stats;
pub mod store;
pub mod timer;

/// Re-exports of common components for easier access
pub use acceptor::Acceptor;
pub use buffer::ByteBuffer;
pub use config::{LogLevel, ServerConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{ServerError, ServerResult};
pub use mux::{Event, Interest, Poller, Registry};
pub use pool::ThreadPool;
pub use reactor::Reactor;
pub use request::{ParseOutcome, ParseState, Request, RequestParser};
pub use response::{Response, ResponseBuilder};
pub use routes::{Handler, RouteTable};
pub use server::Server;
pub use stats::{Counter, ServerStats};
pub use store::{StoreConfig, StoreHandle, StorePool};
pub use timer::{TimerHeap, TimerId};
