use crate::buffer::ByteBuffer;
use crate::request::Request;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A dynamic route handler.
///
/// Writes its response body into the buffer and returns true on success;
/// returning false turns the response into a 500.
pub type Handler = Arc<dyn Fn(&Request, &mut ByteBuffer) -> bool + Send + Sync>;

/// Static aliases and dynamic handlers, keyed by exact request path.
///
/// Built once before serving starts, then shared read-only.
#[derive(Clone, Default)]
pub struct RouteTable {
    aliases: HashMap<String, String>,
    handlers: HashMap<String, Handler>,
}

// Custom Debug implementation since handlers can't be automatically derived
impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<&String> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("RouteTable")
            .field("aliases", &self.aliases)
            .field("handlers", &handlers)
            .finish()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `target` whenever `path` is requested, e.g. `/` -> `/index.html`
    pub fn register_static_alias(&mut self, path: &str, target: &str) -> &mut Self {
        self.aliases.insert(path.to_string(), target.to_string());
        self
    }

    /// Route `path` to `handler`; replaces any earlier handler for the path
    pub fn register_dynamic_handler<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut ByteBuffer) -> bool + Send + Sync + 'static,
    {
        self.handlers.insert(path.to_string(), Arc::new(handler));
        self
    }

    pub fn alias(&self, path: &str) -> Option<&str> {
        self.aliases.get(path).map(String::as_str)
    }

    pub fn handler(&self, path: &str) -> Option<&Handler> {
        self.handlers.get(path)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_lookup_is_exact() {
        let mut routes = RouteTable::new();
        routes
            .register_static_alias("/", "/index.html")
            .register_dynamic_handler("/action/ping", |_, out| {
                out.append(b"pong");
                true
            });

        assert_eq!(routes.alias("/"), Some("/index.html"));
        assert_eq!(routes.alias("/index"), None);
        assert!(routes.handler("/action/ping").is_some());
        assert!(routes.handler("/action/ping/").is_none());

        let mut out = ByteBuffer::default();
        let handler = routes.handler("/action/ping").unwrap();
        assert!(handler(&Request::new("GET", "/action/ping"), &mut out));
        assert_eq!(out.peek(), b"pong");
    }
}
