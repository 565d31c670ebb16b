//! Response status lines and the bounded header buffer.

use std::fmt::{self, Write as _};

use thiserror::Error;

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::InternalServerError => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Body sent when no resource applies.
    pub fn body(self) -> &'static str {
        match self {
            Self::Ok => EMPTY_PAGE,
            Self::BadRequest => {
                "Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            Self::Forbidden => "You do not have permission to get file from this server.\n",
            Self::NotFound => "The requested file was not found on this server.\n",
            Self::InternalServerError => {
                "There was an unusual problem serving the requested file.\n"
            }
            Self::ServiceUnavailable => BUSY_BODY,
        }
    }
}

/// Body for a `200 OK` on an empty file.
pub const EMPTY_PAGE: &str = "<html><body></body></html>";

const BUSY_BODY: &str = "Internal Server Busy!";

/// Complete reply written to a connection refused at the connection ceiling.
pub const BUSY_RESPONSE: &str = concat!(
    "HTTP/1.1 503 Service Unavailable\r\n",
    "Content-Length: 21\r\n",
    "Content-Type: text/html\r\n",
    "Connection: close\r\n",
    "\r\n",
    "Internal Server Busy!",
);

/// An append would not fit in the response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response buffer capacity of {capacity} bytes exceeded")]
pub struct CapacityExceeded {
    pub capacity: usize,
}

/// Fixed-capacity buffer for the status line, headers and small bodies.
///
/// Every append is all-or-nothing: a write that would overflow leaves the
/// buffer exactly as it was and reports [`CapacityExceeded`].
#[derive(Debug)]
pub struct ResponseWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl ResponseWriter {
    /// Creates an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends formatted text.
    pub fn append(&mut self, args: fmt::Arguments<'_>) -> Result<(), CapacityExceeded> {
        let mark = self.buf.len();
        if self.write_fmt(args).is_err() {
            self.buf.truncate(mark);
            return Err(CapacityExceeded {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn status_line(&mut self, status: Status) -> Result<(), CapacityExceeded> {
        self.append(format_args!("HTTP/1.1 {} {}\r\n", status.code(), status.title()))
    }

    /// Appends `Content-Length`, `Content-Type`, `Connection` and the blank
    /// line that ends the header block.
    pub fn headers(
        &mut self,
        content_length: usize,
        keep_alive: bool,
    ) -> Result<(), CapacityExceeded> {
        let connection = if keep_alive { "keep-alive" } else { "close" };
        self.append(format_args!(
            "Content-Length: {content_length}\r\nContent-Type: text/html\r\nConnection: {connection}\r\n\r\n"
        ))
    }

    pub fn content(&mut self, body: &str) -> Result<(), CapacityExceeded> {
        self.append(format_args!("{body}"))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl fmt::Write for ResponseWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.len() + s.len() > self.capacity {
            return Err(fmt::Error);
        }
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }
}
