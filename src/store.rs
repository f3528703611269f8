use crate::error::{ServerError, ServerResult};
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Connection parameters for the backing data store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Connections opened up front; 0 disables the store
    pub pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "webserver".to_string(),
            pool_size: 0,
        }
    }
}

impl StoreConfig {
    pub fn url(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

struct Idle<C> {
    connections: Mutex<Vec<C>>,
    capacity: usize,
}

/// A fixed set of store connections shared by dynamic handlers.
///
/// The driver is supplied as a connector closure; the pool only hands
/// connections out and takes them back.
pub struct StorePool<C> {
    idle: Arc<Idle<C>>,
}

impl<C> Clone for StorePool<C> {
    fn clone(&self) -> Self {
        Self {
            idle: self.idle.clone(),
        }
    }
}

impl<C> fmt::Debug for StorePool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorePool")
            .field("capacity", &self.idle.capacity)
            .field("available", &self.idle.connections.lock().len())
            .finish()
    }
}

impl<C: Send> StorePool<C> {
    /// Open `config.pool_size` connections with `connector`.
    ///
    /// Any connector failure aborts construction.
    pub fn new<F>(config: &StoreConfig, mut connector: F) -> ServerResult<Self>
    where
        F: FnMut(&StoreConfig) -> ServerResult<C>,
    {
        let mut connections = Vec::with_capacity(config.pool_size);
        for i in 0..config.pool_size {
            let conn = connector(config).map_err(|e| {
                ServerError::Store(format!("Connection {} to {} failed: {}", i, config.url(), e))
            })?;
            connections.push(conn);
        }

        info!(
            "Store pool ready: {} connections to {}/{}",
            connections.len(),
            config.url(),
            config.database
        );

        Ok(Self {
            idle: Arc::new(Idle {
                capacity: connections.len(),
                connections: Mutex::new(connections),
            }),
        })
    }

    /// Take a connection without blocking; `None` when all are in use
    pub fn acquire(&self) -> Option<StoreHandle<C>> {
        let conn = self.idle.connections.lock().pop();
        if conn.is_none() {
            debug!("Store pool exhausted");
        }
        conn.map(|conn| StoreHandle {
            conn: Some(conn),
            idle: self.idle.clone(),
        })
    }

    /// Return a connection early; dropping the handle does the same
    pub fn release(&self, handle: StoreHandle<C>) {
        drop(handle);
    }

    /// Connections not currently handed out
    pub fn available(&self) -> usize {
        self.idle.connections.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.idle.capacity
    }
}

/// A borrowed store connection; returns to its pool when dropped
pub struct StoreHandle<C> {
    conn: Option<C>,
    idle: Arc<Idle<C>>,
}

impl<C> Deref for StoreHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `Drop` takes the connection out
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("store handle used after release"),
        }
    }
}

impl<C> DerefMut for StoreHandle<C> {
    fn deref_mut(&mut self) -> &mut C {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("store handle used after release"),
        }
    }
}

impl<C> Drop for StoreHandle<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.idle.connections.lock().push(conn);
        }
    }
}
