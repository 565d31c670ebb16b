//! Per-socket HTTP connection state.
//!
//! A connection is touched by one thread at a time: the reactor while it is
//! armed for I/O, or a single worker while it is out for processing. The
//! mutex around it is never contended in steady state; `armed` records which
//! side currently owns it.

use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::{Buf, BytesMut};
use memmap2::Mmap;
use mio::net::TcpStream;
use mio::{Interest, Token};
use tracing::{debug, warn};

use crate::handler::{Next, Services};
use crate::http::{
    CapacityExceeded, EMPTY_PAGE, RequestOutcome, RequestParser, Resolution, ResponseWriter,
    Status, resolve, route,
};

/// A connection as stored in the connection table.
pub type SharedConn = Mutex<HttpConn>;

/// Buffer sizes and defaults applied to every accepted connection.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub default_document: String,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            read_buffer_size: 2048,
            write_buffer_size: 1024,
            default_document: "judge.html".to_string(),
        }
    }
}

/// Result of draining the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes are buffered (or the buffer is full); hand off for parsing.
    Received,
    /// Peer closed or the socket failed.
    Closed,
}

/// Result of flushing the pending response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The kernel buffer filled up; wait for writability.
    Pending,
    /// Every byte of the response has been sent.
    Done,
    /// The socket failed.
    Failed,
}

/// State of one client connection.
#[derive(Debug)]
pub struct HttpConn {
    token: Token,
    peer: SocketAddr,
    /// `None` once the connection has been closed.
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    read_capacity: usize,
    parser: RequestParser,
    /// Scatter segment 0: status line and headers.
    response: ResponseWriter,
    /// Scatter segment 1: the mapped file, if any.
    body: Option<Mmap>,
    bytes_to_send: usize,
    bytes_sent: usize,
    keep_alive: bool,
    status: Option<Status>,
    /// Readiness the reactor acts on. `None` while a worker owns the
    /// connection or after close.
    armed: Option<Interest>,
}

impl HttpConn {
    /// Creates a connection armed for reading.
    pub fn new(token: Token, stream: TcpStream, peer: SocketAddr, limits: &ConnLimits) -> Self {
        Self {
            token,
            peer,
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(limits.read_buffer_size),
            read_capacity: limits.read_buffer_size,
            parser: RequestParser::new(limits.read_buffer_size, limits.default_document.as_str()),
            response: ResponseWriter::new(limits.write_buffer_size),
            body: None,
            bytes_to_send: 0,
            bytes_sent: 0,
            keep_alive: false,
            status: None,
            armed: Some(Interest::READABLE),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn set_armed(&mut self, interest: Option<Interest>) {
        self.armed = interest;
    }

    /// Returns true if the reactor should act on `interest` readiness now.
    pub fn is_armed_for(&self, interest: Interest) -> bool {
        self.armed.is_some_and(|armed| {
            (interest.is_readable() && armed.is_readable())
                || (interest.is_writable() && armed.is_writable())
        })
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Status of the response most recently built.
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Returns the socket for registry calls while the connection is open.
    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    /// Detaches the socket. Dropping it closes the descriptor; the rest of
    /// the state stays readable until the connection is released.
    pub fn take_stream(&mut self) -> Option<TcpStream> {
        self.armed = None;
        self.stream.take()
    }

    /// Number of unparsed bytes buffered.
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Drains the socket into the read buffer until it would block or the
    /// buffer is full.
    pub fn read(&mut self) -> ReadStatus {
        let Some(stream) = self.stream.as_mut() else {
            return ReadStatus::Closed;
        };

        let mut chunk = [0u8; 4096];
        loop {
            let room = self.read_capacity - self.read_buf.len();
            if room == 0 {
                return ReadStatus::Received;
            }

            let len = room.min(chunk.len());
            match stream.read(&mut chunk[..len]) {
                Ok(0) => return ReadStatus::Closed,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return ReadStatus::Received;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(token = self.token.0, error = %e, "read failed");
                    return ReadStatus::Closed;
                }
            }
        }
    }

    /// Parses what has been read and, once a request is complete, builds
    /// its response. Runs on a worker thread.
    pub fn process(&mut self, services: &Services) -> Next {
        let outcome = self.parser.parse(&self.read_buf);
        if outcome == RequestOutcome::NoRequest {
            return Next::Read;
        }

        self.response.clear();
        self.body = None;
        self.keep_alive = self.parser.request().keep_alive;

        let built = match outcome {
            RequestOutcome::GetRequest => self.respond(services),
            RequestOutcome::BadRequest => self.fixed(Status::BadRequest),
            RequestOutcome::InternalError | RequestOutcome::NoRequest => {
                self.keep_alive = false;
                self.fixed(Status::InternalServerError)
            }
        };

        if let Err(e) = built {
            warn!(token = self.token.0, error = %e, "response did not fit, sending 500");
            self.keep_alive = false;
            self.response.clear();
            self.body = None;
            if self.fixed(Status::InternalServerError).is_err() {
                return Next::Close;
            }
        }

        self.bytes_sent = 0;
        self.bytes_to_send = self.response.len() + self.body.as_ref().map_or(0, |body| body.len());
        debug!(
            token = self.token.0,
            peer = %self.peer,
            target = %self.parser.request().target,
            status = self.status.map_or(0, Status::code),
            "response ready"
        );
        Next::Write
    }

    fn respond(&mut self, services: &Services) -> Result<(), CapacityExceeded> {
        let Some(target) = route(self.parser.request(), services.directory.as_ref()) else {
            return self.fixed(Status::BadRequest);
        };

        match resolve(&services.doc_root, &target) {
            Resolution::File(mmap) => {
                self.status = Some(Status::Ok);
                self.response.status_line(Status::Ok)?;
                self.response.headers(mmap.len(), self.keep_alive)?;
                self.body = Some(mmap);
                Ok(())
            }
            Resolution::EmptyFile => {
                self.status = Some(Status::Ok);
                self.response.status_line(Status::Ok)?;
                self.response.headers(EMPTY_PAGE.len(), self.keep_alive)?;
                self.response.content(EMPTY_PAGE)
            }
            Resolution::NotFound => self.fixed(Status::NotFound),
            Resolution::Forbidden => self.fixed(Status::Forbidden),
            Resolution::Directory => self.fixed(Status::BadRequest),
            Resolution::Unmappable => {
                self.keep_alive = false;
                self.fixed(Status::InternalServerError)
            }
        }
    }

    fn fixed(&mut self, status: Status) -> Result<(), CapacityExceeded> {
        let body = status.body();
        self.status = Some(status);
        self.response.status_line(status)?;
        self.response.headers(body.len(), self.keep_alive)?;
        self.response.content(body)
    }

    /// Sends as much of the pending response as the socket accepts, header
    /// and body segments together.
    pub fn write(&mut self) -> WriteStatus {
        let Some(stream) = self.stream.as_mut() else {
            return WriteStatus::Failed;
        };

        loop {
            if self.bytes_sent >= self.bytes_to_send {
                return WriteStatus::Done;
            }

            let header = self.response.as_bytes();
            let body: &[u8] = self.body.as_deref().unwrap_or(&[]);
            let segments = [
                IoSlice::new(&header[self.bytes_sent.min(header.len())..]),
                IoSlice::new(&body[self.bytes_sent.saturating_sub(header.len())..]),
            ];

            match stream.write_vectored(&segments) {
                Ok(0) => return WriteStatus::Failed,
                Ok(n) => self.bytes_sent += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return WriteStatus::Pending;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(token = self.token.0, error = %e, "write failed");
                    return WriteStatus::Failed;
                }
            }
        }
    }

    /// Readies a kept-alive connection for its next request.
    ///
    /// Bytes past the completed request stay buffered. Returns true if any
    /// remain, meaning the next request can be parsed without reading.
    pub fn finish_response(&mut self) -> bool {
        let consumed = match self.parser.consumed() {
            0 => self.read_buf.len(),
            n => n,
        };
        self.read_buf.advance(consumed);

        self.parser.reset();
        self.response.clear();
        self.body = None;
        self.bytes_to_send = 0;
        self.bytes_sent = 0;
        self.keep_alive = false;
        !self.read_buf.is_empty()
    }
}
