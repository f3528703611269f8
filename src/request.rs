use crate::buffer::ByteBuffer;
use log::{debug, error};
use serde_json::Value;
use std::collections::HashMap;
use std::str;

const CRLF: &[u8] = b"\r\n";

/// A parsed HTTP request.
///
/// Header names are stored exactly as received; lookups are case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub target: String,
    /// Version digits after `HTTP/`, e.g. `1.1`
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Decoded body when the request was sent as `application/json`
    pub json: Option<Value>,
}

impl Request {
    /// Create a new request
    pub fn new(method: &str, target: &str) -> Self {
        Self {
            method: method.to_string(),
            target: target.to_string(),
            version: "1.1".to_string(),
            ..Self::default()
        }
    }

    /// Set a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    /// Get a header by its exact name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Set the body
    pub fn set_body(&mut self, body: &[u8]) {
        self.body = body.to_vec();
    }

    /// The target without its query string
    pub fn path(&self) -> &str {
        match self.target.find('?') {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }

    pub fn is_post(&self) -> bool {
        self.method == "POST" || self.method == "post"
    }

    pub fn is_keep_alive(&self) -> bool {
        self.header("Connection") == Some("keep-alive")
    }

    /// Look a header up as `Content-Length` style, then all-lowercase
    fn header_either(&self, canonical: &str, lowercase: &str) -> Option<&str> {
        self.header(canonical).or_else(|| self.header(lowercase))
    }

    pub fn is_json(&self) -> bool {
        self.header("Content-Type") == Some("application/json")
            || self.header("content-type") == Some("application/json")
    }

    /// A top-level field of the JSON body
    pub fn json_field(&self, key: &str) -> Option<&Value> {
        self.json.as_ref().and_then(|value| value.get(key))
    }
}

/// Position of the parser within a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    StartLine,
    Headers,
    Body,
    Done,
    Failed,
}

/// Result of one `parse` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Success,
    /// More bytes are needed; all progress so far is kept
    Incomplete,
    Error,
}

/// Resumable HTTP/1.1 request parser
#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    request: Request,
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StartLine,
            request: Request::default(),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Whether the current request reached `Done` or `Failed`
    pub fn is_finished(&self) -> bool {
        matches!(self.state, ParseState::Done | ParseState::Failed)
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Forget the current request
    pub fn reset(&mut self) {
        self.state = ParseState::StartLine;
        self.request = Request::default();
    }

    /// Advance over the readable span of `buffer`.
    ///
    /// Complete lines are consumed from the buffer as they are parsed. A
    /// partial line, or a body that has not fully arrived, is left in place
    /// and reported as `Incomplete`; calling again after more bytes are
    /// appended continues from the same point. Body bytes are never
    /// consumed here.
    pub fn parse(&mut self, buffer: &mut ByteBuffer) -> ParseOutcome {
        loop {
            match self.state {
                ParseState::Done => return ParseOutcome::Success,
                ParseState::Failed => return ParseOutcome::Error,
                ParseState::Body => match self.parse_body(buffer.peek()) {
                    Some(next) => self.state = next,
                    None => return ParseOutcome::Incomplete,
                },
                ParseState::StartLine | ParseState::Headers => {
                    let line_end = match find_crlf(buffer.peek()) {
                        Some(pos) => pos,
                        None => return ParseOutcome::Incomplete,
                    };

                    let next = match str::from_utf8(&buffer.peek()[..line_end]) {
                        Ok(line) if self.state == ParseState::StartLine => self.parse_start_line(line),
                        Ok(line) => self.parse_header(line),
                        Err(_) => {
                            error!("Request line is not valid UTF-8");
                            ParseState::Failed
                        }
                    };

                    buffer.consume(line_end + CRLF.len());
                    self.state = next;
                }
            }
        }
    }

    fn parse_start_line(&mut self, line: &str) -> ParseState {
        let mut parts = line.split(' ');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(version), None) => match version.strip_prefix("HTTP/") {
                Some(version) => {
                    self.request.method = method.to_string();
                    self.request.target = target.to_string();
                    self.request.version = version.to_string();
                    ParseState::Headers
                }
                None => {
                    error!("Malformed request line: {:?}", line);
                    ParseState::Failed
                }
            },
            _ => {
                error!("Malformed request line: {:?}", line);
                ParseState::Failed
            }
        }
    }

    fn parse_header(&mut self, line: &str) -> ParseState {
        if line.is_empty() {
            return if self.request.is_post() {
                ParseState::Body
            } else {
                ParseState::Done
            };
        }

        match line.split_once(':') {
            Some((name, value)) => {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.request.headers.insert(name.to_string(), value.to_string());
                ParseState::Headers
            }
            None => {
                error!("Malformed header line: {:?}", line);
                ParseState::Failed
            }
        }
    }

    /// `None` while the body has not fully arrived
    fn parse_body(&mut self, available: &[u8]) -> Option<ParseState> {
        let content_length = match self.request.header_either("Content-Length", "content-length") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(length) => length,
                Err(_) => {
                    error!("Invalid Content-Length: {:?}", value);
                    return Some(ParseState::Failed);
                }
            },
            None => {
                error!("POST request without Content-Length");
                return Some(ParseState::Failed);
            }
        };

        // The body is followed by a CRLF
        let expected = content_length.saturating_add(CRLF.len());
        debug!("Body {}/{} bytes", available.len(), expected);

        if available.len() < expected {
            return None;
        }
        if available.len() > expected {
            error!(
                "Received {} bytes for a {} byte body",
                available.len(),
                content_length
            );
            return Some(ParseState::Failed);
        }

        self.request.body = available[..content_length].to_vec();

        if self.request.is_json() {
            match serde_json::from_slice::<Value>(&self.request.body) {
                Ok(value) => self.request.json = Some(value),
                Err(e) => {
                    error!("JSON body parse error: {}", e);
                    return Some(ParseState::Failed);
                }
            }
        }

        Some(ParseState::Done)
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(CRLF.len()).position(|window| window == CRLF)
}
