//! Worker-side request processing and the completion channel back to the
//! reactor.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use crossbeam_queue::SegQueue;
use mio::{Token, Waker};
use tracing::{debug, warn};

use crate::connection::SharedConn;
use crate::directory::UserDirectory;
use crate::table::ConnHandle;
use crate::worker_pool::Handler;

/// Services shared by every worker, constructed before the server runs and
/// dropped after it returns.
pub struct Services {
    pub directory: Arc<dyn UserDirectory>,
    pub doc_root: PathBuf,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("doc_root", &self.doc_root)
            .finish_non_exhaustive()
    }
}

/// What the reactor should arm a connection for after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// The request is incomplete.
    Read,
    /// A response is ready to flush.
    Write,
    /// No response could be built.
    Close,
}

/// A worker's report on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub token: Token,
    pub next: Next,
}

/// Completions posted by workers and drained by the reactor.
#[derive(Debug)]
pub struct CompletionQueue {
    queue: SegQueue<Completion>,
    waker: Waker,
}

impl CompletionQueue {
    pub fn new(waker: Waker) -> Self {
        Self {
            queue: SegQueue::new(),
            waker,
        }
    }

    /// Posts a completion and wakes the reactor.
    pub fn push(&self, completion: Completion) {
        self.queue.push(completion);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake reactor");
        }
    }

    pub fn pop(&self) -> Option<Completion> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Runs [`HttpConn::process`](crate::connection::HttpConn::process) for
/// each submitted connection.
#[derive(Debug)]
pub struct RequestHandler {
    services: Arc<Services>,
    completions: Arc<CompletionQueue>,
}

impl RequestHandler {
    pub fn new(services: Arc<Services>, completions: Arc<CompletionQueue>) -> Self {
        Self {
            services,
            completions,
        }
    }
}

impl Handler for RequestHandler {
    type Item = ConnHandle<SharedConn>;

    fn handle(&self, item: Self::Item) {
        let Some(conn) = item.upgrade() else {
            debug!(token = item.token().0, "connection released before processing");
            return;
        };

        let next = conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .process(&self.services);

        self.completions.push(Completion {
            token: item.token(),
            next,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnLimits, HttpConn};
    use crate::directory::InMemoryDirectory;
    use crate::table::ConnectionTable;
    use mio::{Events, Poll};
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::time::Duration;

    const WAKER: Token = Token(0);

    fn setup() -> (Poll, Arc<CompletionQueue>, RequestHandler, tempfile::TempDir) {
        let poll = Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), WAKER).unwrap();
        let completions = Arc::new(CompletionQueue::new(waker));
        let root = tempfile::tempdir().unwrap();
        let services = Arc::new(Services {
            directory: Arc::new(InMemoryDirectory::new()),
            doc_root: root.path().to_path_buf(),
        });
        let handler = RequestHandler::new(services, Arc::clone(&completions));
        (poll, completions, handler, root)
    }

    #[test]
    fn completion_wakes_reactor() {
        let (mut poll, completions, handler, _root) = setup();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut table = ConnectionTable::new();
        let token = Token(5);
        let handle = table.insert(
            token,
            Mutex::new(HttpConn::new(
                token,
                mio::net::TcpStream::from_std(server),
                peer,
                &ConnLimits::default(),
            )),
        );

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let conn = table.get(token).unwrap();
        for _ in 0..500 {
            conn.lock().unwrap().read();
            if conn.lock().unwrap().buffered() == 18 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        drop(conn);

        handler.handle(handle);

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|event| event.token() == WAKER));
        assert_eq!(
            completions.pop(),
            Some(Completion {
                token,
                next: Next::Write
            })
        );
        assert!(completions.is_empty());
    }

    #[test]
    fn released_connection_is_skipped() {
        let (_poll, completions, handler, _root) = setup();
        let mut table: ConnectionTable<SharedConn> = ConnectionTable::new();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        let handle = table.insert(
            Token(1),
            Mutex::new(HttpConn::new(
                Token(1),
                mio::net::TcpStream::from_std(server),
                peer,
                &ConnLimits::default(),
            )),
        );
        assert!(table.release(&handle));

        handler.handle(handle);
        assert_eq!(completions.len(), 0);
    }
}
