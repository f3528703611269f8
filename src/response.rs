use crate::buffer::ByteBuffer;
use crate::request::Request;
use crate::routes::RouteTable;
use log::{debug, error};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Get the reason phrase for a supported status code
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    match code {
        200 => Some("OK"),
        400 => Some("Bad Request"),
        403 => Some("Forbidden"),
        404 => Some("Not Found"),
        500 => Some("Internal Server Error"),
        _ => None,
    }
}

/// Page served in place of the requested file for an error status
pub fn error_page(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

/// Get the content type for a target based on its extension
pub fn content_type(target: &str) -> &'static str {
    let ext = Path::new(target)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match ext {
        "html" => "text/html",
        "xml" => "text/xml",
        "xhtml" => "application/xhtml+xml",
        "txt" => "text/plain",
        "rtf" => "application/rtf",
        "pdf" => "application/pdf",
        "word" => "application/nsword",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "au" => "audio/basic",
        "mpeg" | "mpg" => "video/mpeg",
        "avi" => "video/x-msvideo",
        "gz" => "application/x-gzip",
        "tar" => "application/x-tar",
        "css" => "text/css",
        "js" => "text/javascript",
        _ => "text/plain",
    }
}

/// Response state owned by one connection.
///
/// The mapped file lives here and is released when the connection closes or
/// right before the next response is built.
#[derive(Debug, Default)]
pub struct Response {
    code: Option<u16>,
    keep_alive: bool,
    target: String,
    mapping: Option<Mmap>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for building a response to `target`.
    ///
    /// A `seeded` error code survives a successful file lookup.
    pub fn init(&mut self, target: &str, keep_alive: bool, seeded: Option<u16>) {
        self.code = seeded;
        self.keep_alive = keep_alive;
        self.target = target.to_string();
    }

    /// Status code of the last built response
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Target after alias and error-page substitution
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Bytes of the mapped file, empty when nothing is mapped
    pub fn file_bytes(&self) -> &[u8] {
        self.mapping.as_deref().unwrap_or(&[])
    }

    pub fn file_len(&self) -> usize {
        self.file_bytes().len()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Release the file mapping, if any
    pub fn unmap(&mut self) {
        self.mapping = None;
    }
}

enum FileStatus {
    Readable,
    Forbidden,
    Missing,
}

/// Builds response headers into a buffer and maps static files for the body
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    document_root: PathBuf,
    routes: Arc<RouteTable>,
}

impl ResponseBuilder {
    pub fn new<P: Into<PathBuf>>(document_root: P, routes: Arc<RouteTable>) -> Self {
        Self {
            document_root: document_root.into(),
            routes,
        }
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Write the status line, headers and (inline) body for `request` into
    /// `out`. Static file bodies are mapped into `response` instead of copied.
    pub fn build(&self, request: &Request, out: &mut ByteBuffer, response: &mut Response) {
        response.unmap();

        let handler = match response.code {
            None => self.routes.handler(&response.target),
            Some(_) => None,
        };

        if let Some(handler) = handler {
            debug!("Processing dynamic request {}", response.target);

            let mut scratch = ByteBuffer::default();
            if handler(request, &mut scratch) {
                response.code = Some(STATUS_OK);
                self.write_head(out, response);
                out.append_str(&format!("Content-Length: {}\r\n\r\n", scratch.readable_count()));
                out.append_buffer(&scratch);
                return;
            }

            error!("Dynamic handler for {} failed", response.target);
            response.code = Some(STATUS_INTERNAL_ERROR);
        } else {
            if let Some(alias) = self.routes.alias(&response.target) {
                response.target = alias.to_string();
            }

            let code = match self.file_status(&response.target) {
                FileStatus::Missing => {
                    debug!("{:?} not found", response.target);
                    STATUS_BAD_REQUEST
                }
                FileStatus::Forbidden => {
                    debug!("{:?} is not world-readable", response.target);
                    STATUS_FORBIDDEN
                }
                FileStatus::Readable => response.code.unwrap_or(STATUS_OK),
            };
            response.code = Some(code);
        }

        let mut code = response.code.unwrap_or(STATUS_BAD_REQUEST);
        let mut serve_file = code == STATUS_OK;

        if let Some(page) = error_page(code) {
            response.target = page.to_string();
            serve_file = true;
        }

        if reason_phrase(code).is_none() {
            code = STATUS_BAD_REQUEST;
            response.code = Some(code);
        }

        self.write_head(out, response);

        if !serve_file {
            write_error_body(out, code, "The request could not be completed.");
            return;
        }

        match self.map_file(&response.target) {
            Ok(mapping) => {
                let len = mapping.as_ref().map_or(0, |m| m.len());
                out.append_str(&format!("Content-Length: {}\r\n\r\n", len));
                response.mapping = mapping;
            }
            Err(e) => {
                debug!("Failed to map {:?}: {}", response.target, e);
                write_error_body(out, code, "File Not Found.");
            }
        }
    }

    /// Filesystem path for `target`, refusing anything that climbs out of
    /// the document root
    fn resolve(&self, target: &str) -> Option<PathBuf> {
        let relative = Path::new(target.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return None;
        }
        Some(self.document_root.join(relative))
    }

    fn file_status(&self, target: &str) -> FileStatus {
        let path = match self.resolve(target) {
            Some(path) => path,
            None => return FileStatus::Missing,
        };

        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => FileStatus::Missing,
            Ok(meta) if meta.permissions().mode() & (libc::S_IROTH as u32) == 0 => {
                FileStatus::Forbidden
            }
            Ok(_) => FileStatus::Readable,
            Err(_) => FileStatus::Missing,
        }
    }

    /// Map `target` read-only; empty files produce no mapping
    fn map_file(&self, target: &str) -> io::Result<Option<Mmap>> {
        let path = self
            .resolve(target)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path escapes document root"))?;

        let file = File::open(&path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }

        // The mapping is read-only and dropped before the file could be
        // served again through this response.
        let mapping = unsafe { Mmap::map(&file) }?;
        Ok(Some(mapping))
    }

    fn write_head(&self, out: &mut ByteBuffer, response: &Response) {
        let code = response.code.unwrap_or(STATUS_BAD_REQUEST);
        let reason = reason_phrase(code).unwrap_or("Bad Request");

        out.append_str(&format!("HTTP/1.1 {} {}\r\n", code, reason));
        if response.keep_alive {
            out.append_str("Connection: keep-alive\r\n");
            out.append_str("Keep-Alive: max=6, timeout=120\r\n");
        } else {
            out.append_str("Connection: close\r\n");
        }
        out.append_str(&format!("Content-Type: {}\r\n", content_type(&response.target)));
    }
}

/// Minimal generated HTML error page, used when no file can be served
fn write_error_body(out: &mut ByteBuffer, code: u16, message: &str) {
    let reason = reason_phrase(code).unwrap_or("Bad Request");
    let body = format!(
        "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>reactor-httpd</em></body></html>",
        code, reason, message
    );

    out.append_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    out.append_str(&body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(content_type("/index.html"), "text/html");
        assert_eq!(content_type("/img/logo.jpeg"), "image/jpeg");
        assert_eq!(content_type("/style.css"), "text/css");
        assert_eq!(content_type("/action/echo"), "text/plain");
        assert_eq!(content_type("/archive.unknown"), "text/plain");
    }

    #[test]
    fn test_parent_components_are_refused() {
        let builder = ResponseBuilder::new("/srv/www", Arc::new(RouteTable::new()));
        assert!(builder.resolve("/../etc/passwd").is_none());
        assert_eq!(
            builder.resolve("/docs/a.txt"),
            Some(PathBuf::from("/srv/www/docs/a.txt"))
        );
    }
}
