use crate::buffer::ByteBuffer;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::reactor::Reactor;
use crate::request::Request;
use crate::routes::RouteTable;
use crate::store::StorePool;
use std::sync::Arc;

/// Collects routes before serving starts, then hands them to a [`Reactor`]
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    routes: RouteTable,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            routes: RouteTable::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn register_static_alias(&mut self, path: &str, target: &str) -> &mut Self {
        self.routes.register_static_alias(path, target);
        self
    }

    pub fn register_dynamic_handler<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut ByteBuffer) -> bool + Send + Sync + 'static,
    {
        self.routes.register_dynamic_handler(path, handler);
        self
    }

    /// Open the configured store pool for handlers to share.
    ///
    /// `None` when `store.pool_size` is 0.
    pub fn open_store<C, F>(&self, connector: F) -> ServerResult<Option<StorePool<C>>>
    where
        C: Send,
        F: FnMut(&crate::store::StoreConfig) -> ServerResult<C>,
    {
        if self.config.store.pool_size == 0 {
            return Ok(None);
        }
        StorePool::new(&self.config.store, connector).map(Some)
    }

    /// Freeze the routes and bind the listener
    pub fn bind(self) -> ServerResult<Reactor> {
        Reactor::new(self.config, Arc::new(self.routes))
    }

    /// Bind and serve until the reactor's shutdown flag is raised
    pub fn run(self) -> ServerResult<()> {
        self.bind()?.run()
    }
}
