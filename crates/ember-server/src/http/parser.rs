//! Resumable HTTP/1.1 request parser.
//!
//! The parser never owns request bytes. Every call to
//! [`RequestParser::parse`] receives the whole read buffer so far; the parser
//! keeps only cursors and the fields already decoded. Bytes may arrive split
//! at any boundary and the final outcome is the same.

use std::ops::Range;

use tracing::debug;

/// Result of scanning for one `CRLF`-terminated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineStatus {
    /// A complete line. `line` excludes the terminator; `next` is where the
    /// following line starts.
    Ok { line: Range<usize>, next: usize },
    /// No terminator yet. Scanning may resume at `resume`.
    Open { resume: usize },
    /// A lone `CR` or `LF`.
    Bad,
}

/// Scans `buf` for a line that started at `start`, resuming at `checked`.
pub fn parse_line(buf: &[u8], start: usize, checked: usize) -> LineStatus {
    let mut index = checked;
    while index < buf.len() {
        match buf[index] {
            b'\r' => {
                return match buf.get(index + 1) {
                    // Resume on the CR once the next byte arrives.
                    None => LineStatus::Open { resume: index },
                    Some(b'\n') => LineStatus::Ok {
                        line: start..index,
                        next: index + 2,
                    },
                    Some(_) => LineStatus::Bad,
                };
            }
            b'\n' => {
                return if index > start && buf[index - 1] == b'\r' {
                    LineStatus::Ok {
                        line: start..index - 1,
                        next: index + 1,
                    }
                } else {
                    LineStatus::Bad
                };
            }
            _ => index += 1,
        }
    }
    LineStatus::Open { resume: index }
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path beginning with `/`, scheme and host removed, default document
    /// substituted for a bare `/`.
    pub target: String,
    pub keep_alive: bool,
    pub content_length: usize,
    pub host: Option<String>,
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Get,
            target: String::new(),
            keep_alive: false,
            content_length: 0,
            host: None,
            body: Vec::new(),
        }
    }
}

/// Parser position in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
}

/// Outcome of one [`RequestParser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// More bytes are needed.
    NoRequest,
    /// A complete request is available from [`RequestParser::request`].
    GetRequest,
    /// Malformed or oversized request.
    BadRequest,
    /// The parser reached a state it cannot continue from.
    InternalError,
}

/// Incremental request parser.
#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    /// Start of the line currently being scanned.
    line_start: usize,
    /// Scan cursor inside the current line.
    checked: usize,
    /// Offset of the first body byte once headers end.
    body_start: usize,
    /// Bytes the completed request occupied, or 0 while incomplete.
    consumed: usize,
    max_request: usize,
    default_document: String,
    request: Request,
}

impl RequestParser {
    /// Creates a parser that rejects requests larger than `max_request`
    /// bytes and serves `default_document` for `/`.
    pub fn new(max_request: usize, default_document: impl Into<String>) -> Self {
        Self {
            state: ParseState::RequestLine,
            line_start: 0,
            checked: 0,
            body_start: 0,
            consumed: 0,
            max_request,
            default_document: default_document.into(),
            request: Request::default(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Returns the request decoded so far.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns how many bytes of the buffer the completed request used.
    ///
    /// Anything past this offset belongs to the next pipelined request.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Forgets all progress so the parser can start on a fresh buffer.
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.line_start = 0;
        self.checked = 0;
        self.body_start = 0;
        self.consumed = 0;
        self.request = Request::default();
    }

    /// Advances over `buf`, which must extend the buffer passed to every
    /// earlier call since the last [`reset`](Self::reset).
    pub fn parse(&mut self, buf: &[u8]) -> RequestOutcome {
        if self.consumed > 0 {
            // Already complete; the caller must reset first.
            return RequestOutcome::InternalError;
        }

        loop {
            if self.state == ParseState::Body {
                return self.parse_body(buf);
            }

            match parse_line(buf, self.line_start, self.checked) {
                LineStatus::Open { resume } => {
                    self.checked = resume;
                    return if buf.len() >= self.max_request {
                        debug!(limit = self.max_request, "request exceeds read buffer");
                        RequestOutcome::BadRequest
                    } else {
                        RequestOutcome::NoRequest
                    };
                }
                LineStatus::Bad => return RequestOutcome::BadRequest,
                LineStatus::Ok { line, next } => {
                    self.line_start = next;
                    self.checked = next;

                    let Ok(text) = std::str::from_utf8(&buf[line]) else {
                        return RequestOutcome::BadRequest;
                    };

                    match self.state {
                        ParseState::RequestLine => {
                            if !self.parse_request_line(text) {
                                return RequestOutcome::BadRequest;
                            }
                            self.state = ParseState::Headers;
                        }
                        ParseState::Headers if text.is_empty() => {
                            if self.request.content_length == 0 {
                                self.consumed = next;
                                return RequestOutcome::GetRequest;
                            }
                            self.body_start = next;
                            self.state = ParseState::Body;
                        }
                        ParseState::Headers => {
                            if !self.parse_header(text) {
                                return RequestOutcome::BadRequest;
                            }
                        }
                        ParseState::Body => return RequestOutcome::InternalError,
                    }
                }
            }
        }
    }

    fn parse_request_line(&mut self, line: &str) -> bool {
        let mut parts = line.split([' ', '\t']).filter(|part| !part.is_empty());
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        self.request.method = if method.eq_ignore_ascii_case("GET") {
            Method::Get
        } else if method.eq_ignore_ascii_case("POST") {
            Method::Post
        } else {
            return false;
        };

        if version != "HTTP/1.1" {
            return false;
        }

        let Some(path) = strip_origin(target) else {
            return false;
        };
        self.request.target = if path == "/" {
            format!("/{}", self.default_document)
        } else {
            path.to_string()
        };
        true
    }

    fn parse_header(&mut self, line: &str) -> bool {
        let Some((name, value)) = line.split_once(':') else {
            debug!(header = line, "ignoring malformed header");
            return true;
        };
        let value = value.trim_matches([' ', '\t']);

        if name.eq_ignore_ascii_case("Connection") {
            self.request.keep_alive = value.eq_ignore_ascii_case("keep-alive");
        } else if name.eq_ignore_ascii_case("Content-Length") {
            match value.parse::<usize>() {
                Ok(length) => self.request.content_length = length,
                Err(_) => return false,
            }
        } else if name.eq_ignore_ascii_case("Host") {
            self.request.host = Some(value.to_string());
        } else {
            debug!(header = name, "ignoring unknown header");
        }
        true
    }

    fn parse_body(&mut self, buf: &[u8]) -> RequestOutcome {
        let Some(end) = self.body_start.checked_add(self.request.content_length) else {
            return RequestOutcome::BadRequest;
        };
        if end > self.max_request {
            debug!(
                content_length = self.request.content_length,
                limit = self.max_request,
                "request body exceeds read buffer"
            );
            return RequestOutcome::BadRequest;
        }
        if buf.len() < end {
            return RequestOutcome::NoRequest;
        }

        self.request.body = buf[self.body_start..end].to_vec();
        self.consumed = end;
        RequestOutcome::GetRequest
    }
}

/// Removes an `http://` or `https://` scheme and host, returning the path.
fn strip_origin(target: &str) -> Option<&str> {
    let mut rest = target;
    for scheme in ["http://", "https://"] {
        if rest
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        {
            rest = &rest[scheme.len()..];
            rest = &rest[rest.find('/')?..];
            break;
        }
    }
    rest.starts_with('/').then_some(rest)
}
