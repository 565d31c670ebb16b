//! The reactor: one thread that owns the poll, the listener, the connection
//! table and the timer queue.
//!
//! Per wake-up the reactor accepts, reads and writes, then re-arms whatever
//! workers finished, and only then runs a timer sweep if a tick arrived in
//! the batch. Workers never touch the registry, the table or the timers;
//! they report through the completion queue.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Instant;

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{HttpConn, ReadStatus, SharedConn, WriteStatus};
use crate::directory::UserDirectory;
use crate::error::{ServerError, ServerResult};
use crate::handler::{Completion, CompletionQueue, Next, RequestHandler, Services};
use crate::http::BUSY_RESPONSE;
use crate::signal::{self, ShutdownHandle, Signal, SignalChannel, SignalSender, Ticker};
use crate::table::{ConnHandle, ConnectionTable};
use crate::timer::{Expired, TimerQueue};
use crate::work_queue::Rejected;
use crate::worker_pool::WorkerPool;

const LISTENER_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);
const WAKER_TOKEN: Token = Token(2);
const FIRST_CONNECTION_TOKEN: usize = 3;

const LISTEN_BACKLOG: i32 = 1024;
const EVENTS_CAPACITY: usize = 1024;

/// HTTP server bound to a socket, ready to run.
pub struct Server {
    config: ServerConfig,
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    signals: SignalChannel,
    sender: SignalSender,
    completions: Arc<CompletionQueue>,
    pool: WorkerPool<RequestHandler>,
    table: ConnectionTable<SharedConn>,
    timers: TimerQueue<SharedConn>,
    next_token: usize,
    /// Connections with an open socket. Tombstoned ones do not count.
    open: usize,
    stopping: bool,
}

impl Server {
    /// Binds the listener and builds every service the event loop needs.
    ///
    /// Nothing runs until [`Server::run`].
    pub fn new(config: ServerConfig, directory: Arc<dyn UserDirectory>) -> ServerResult<Self> {
        config.validate()?;

        let poll = Poll::new()?;
        let mut listener = bind(config.bind_addr).map_err(|source| ServerError::BindFailed {
            addr: config.bind_addr,
            source,
        })?;
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let (sender, mut signals) = signal::channel()?;
        poll.registry()
            .register(signals.source(), SIGNAL_TOKEN, Interest::READABLE)?;

        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let completions = Arc::new(CompletionQueue::new(waker));

        let services = Arc::new(Services {
            directory,
            doc_root: config.doc_root.clone(),
        });
        let pool = WorkerPool::new(
            config.workers,
            RequestHandler::new(services, Arc::clone(&completions)),
        );
        let timers = TimerQueue::new(config.grace_period());

        Ok(Self {
            config,
            poll,
            listener,
            local_addr,
            signals,
            sender,
            completions,
            pool,
            table: ConnectionTable::new(),
            timers,
            next_token: FIRST_CONNECTION_TOKEN,
            open: 0,
            stopping: false,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a handle that stops [`Server::run`] from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.sender.clone())
    }

    /// Runs the event loop until a shutdown signal arrives.
    ///
    /// Workers and the ticker are started here and stopped before returning;
    /// every connection is dropped on the way out.
    pub fn run(mut self) -> ServerResult<()> {
        self.pool.start()?;
        let ticker = Ticker::spawn(self.config.tick_interval, self.sender.clone())?;
        info!(
            addr = %self.local_addr,
            threads = self.pool.threads(),
            doc_root = %self.config.doc_root.display(),
            "server listening"
        );

        let result = self.event_loop();

        ticker.stop();
        self.pool.shutdown();
        info!(connections = self.table.len(), "server stopped");
        result
    }

    fn event_loop(&mut self) -> ServerResult<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.stopping {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            let mut tick = false;
            for event in &events {
                match event.token() {
                    LISTENER_TOKEN => self.accept(),
                    SIGNAL_TOKEN => tick |= self.read_signals(),
                    WAKER_TOKEN => {}
                    token => self.connection_event(token, event),
                }
            }

            self.drain_completions();

            // Sweeps run after every I/O event in the batch.
            if tick {
                self.sweep(Instant::now());
            }
        }
        Ok(())
    }

    /// Returns true if a tick arrived.
    fn read_signals(&mut self) -> bool {
        let signals = match self.signals.drain() {
            Ok(signals) => signals,
            Err(e) => {
                error!(error = %e, "signal channel failed");
                return false;
            }
        };

        let mut tick = false;
        for signal in signals {
            match signal {
                Signal::Tick => tick = true,
                Signal::Shutdown => {
                    info!("shutdown requested");
                    self.stopping = true;
                }
            }
        }
        tick
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.open >= self.config.max_connections {
                        warn!(%peer, open = self.open, "connection ceiling reached, refusing");
                        if let Err(e) = stream.write(BUSY_RESPONSE.as_bytes()) {
                            debug!(%peer, error = %e, "busy reply failed");
                        }
                        continue;
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self
                        .poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!(%peer, error = %e, "failed to register connection");
                        continue;
                    }

                    let conn = HttpConn::new(token, stream, peer, &self.config.limits);
                    let handle = self.table.insert(token, Mutex::new(conn));
                    let timer = self
                        .timers
                        .add(handle, Instant::now(), self.config.idle_timeout());
                    self.table.set_timer(token, timer);
                    self.open += 1;

                    debug!(token = token.0, %peer, open = self.open, "connection accepted");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if is_transient_accept_error(e.kind()) => {}
                // Out of descriptors: retrying now would spin. Connections
                // still queued get picked up on the next listener event.
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn connection_event(&mut self, token: Token, event: &Event) {
        let Some(conn) = self.table.get(token) else {
            return;
        };
        let mut conn = match conn.try_lock() {
            Ok(guard) => guard,
            // A worker owns it; its completion re-arms and the event repeats.
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if !conn.is_open() {
            return;
        }

        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            self.close(&mut conn, "peer hung up");
            return;
        }

        if event.is_readable() && conn.is_armed_for(Interest::READABLE) {
            match conn.read() {
                ReadStatus::Closed => self.close(&mut conn, "peer closed"),
                ReadStatus::Received => {
                    self.touch(token);
                    conn.set_armed(None);
                    drop(conn);
                    self.submit(token);
                }
            }
        } else if event.is_writable() && conn.is_armed_for(Interest::WRITABLE) {
            self.flush(&mut conn);
        }
    }

    fn flush(&mut self, conn: &mut HttpConn) {
        match conn.write() {
            WriteStatus::Pending => self.arm(conn, Interest::WRITABLE),
            WriteStatus::Failed => self.close(conn, "write failed"),
            WriteStatus::Done => {
                let token = conn.token();
                self.touch(token);
                debug!(
                    token = token.0,
                    peer = %conn.peer(),
                    status = conn.status().map_or(0, |s| s.code()),
                    "response sent"
                );

                if !conn.keep_alive() {
                    self.close(conn, "response complete");
                } else if conn.finish_response() {
                    // Pipelined bytes: parse without waiting for a read.
                    conn.set_armed(None);
                    self.submit(token);
                } else {
                    self.arm(conn, Interest::READABLE);
                }
            }
        }
    }

    /// Hands a connection to the worker pool. The caller has disarmed it.
    fn submit(&mut self, token: Token) {
        let Some(handle) = self.table.handle(token) else {
            return;
        };
        if let Err(Rejected { item, pending }) = self.pool.submit(handle) {
            warn!(token = token.0, pending, "worker queue full, closing");
            self.close_handle(&item, "worker queue full");
        }
    }

    fn drain_completions(&mut self) {
        while let Some(Completion { token, next }) = self.completions.pop() {
            let Some(conn) = self.table.get(token) else {
                continue;
            };
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            if !conn.is_open() {
                continue;
            }

            match next {
                Next::Read => self.arm(&mut conn, Interest::READABLE),
                Next::Write => self.arm(&mut conn, Interest::WRITABLE),
                Next::Close => self.close(&mut conn, "response could not be built"),
            }
        }
    }

    /// Re-enables notification for one kind of readiness.
    fn arm(&mut self, conn: &mut HttpConn, interest: Interest) {
        let token = conn.token();
        let Some(stream) = conn.stream_mut() else {
            return;
        };
        match self.poll.registry().reregister(stream, token, interest) {
            Ok(()) => conn.set_armed(Some(interest)),
            Err(e) => {
                warn!(token = token.0, error = %e, "re-arm failed");
                self.close(conn, "re-arm failed");
            }
        }
    }

    fn touch(&mut self, token: Token) {
        if let Some(timer) = self.table.timer(token) {
            self.timers
                .extend(timer, Instant::now(), self.config.idle_timeout());
        }
    }

    /// Deregisters and closes the socket, then starts the grace period.
    ///
    /// The connection stays in the table until the timer queue releases it.
    fn close(&mut self, conn: &mut HttpConn, reason: &'static str) {
        let token = conn.token();
        if let Some(mut stream) = conn.take_stream() {
            if let Err(e) = self.poll.registry().deregister(&mut stream) {
                debug!(token = token.0, error = %e, "deregister failed");
            }
            self.open -= 1;
            debug!(token = token.0, peer = %conn.peer(), reason, "connection closed");
        }
        if let Some(timer) = self.table.timer(token) {
            self.timers.tombstone(timer, Instant::now());
        }
    }

    fn close_handle(&mut self, handle: &ConnHandle<SharedConn>, reason: &'static str) {
        if let Some(conn) = handle.upgrade() {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            self.close(&mut conn, reason);
        }
    }

    fn sweep(&mut self, now: Instant) {
        for expired in self.timers.tick(now) {
            match expired {
                Expired::Evict(handle) => {
                    debug!(token = handle.token().0, "evicting idle connection");
                    self.close_handle(&handle, "idle timeout");
                }
                Expired::Release(handle) => {
                    if self.table.release(&handle) {
                        debug!(token = handle.token().0, "connection released");
                    }
                }
            }
        }
        debug!(
            open = self.open,
            owned = self.table.len(),
            timers = self.timers.len(),
            "timer sweep"
        );
    }
}

/// Errors that concern only the one connection being accepted. The backlog
/// behind it must still be drained since no new edge will report it.
fn is_transient_accept_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Creates a non-blocking listener with `SO_REUSEADDR` and `SO_REUSEPORT`.
fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_handshakes_keep_the_accept_loop_draining() {
        assert!(is_transient_accept_error(io::ErrorKind::ConnectionAborted));
        assert!(is_transient_accept_error(io::ErrorKind::ConnectionReset));
        assert!(is_transient_accept_error(io::ErrorKind::Interrupted));
        assert!(!is_transient_accept_error(io::ErrorKind::OutOfMemory));
        assert!(!is_transient_accept_error(io::ErrorKind::PermissionDenied));
    }
}
