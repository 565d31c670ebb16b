//! End-to-end tests over loopback sockets.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::http::BUSY_RESPONSE;
use crate::{InMemoryDirectory, Server, ServerConfig, ServerResult, ShutdownHandle, UserDirectory};

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<ServerResult<()>>>,
}

impl Running {
    fn stop(mut self) -> ServerResult<()> {
        self.shutdown.shutdown();
        self.thread.take().unwrap().join().unwrap()
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.shutdown.shutdown();
            let _ = thread.join();
        }
    }
}

fn config(doc_root: &Path) -> ServerConfig {
    ServerConfig::new(([127, 0, 0, 1], 0))
        .with_threads(2)
        .with_doc_root(doc_root)
}

fn start(config: ServerConfig, directory: Arc<dyn UserDirectory>) -> Running {
    let server = Server::new(config, directory).unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let thread = thread::spawn(move || server.run());
    Running {
        addr,
        shutdown,
        thread: Some(thread),
    }
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

/// Reads exactly one response, using its `Content-Length`. Headers are read
/// a byte at a time so a following pipelined response stays in the socket.
fn read_response_bytes(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0, "connection closed mid-response: {:?}", String::from_utf8_lossy(&head));
        head.push(byte[0]);
    }

    let head = String::from_utf8(head).unwrap();
    let length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .and_then(|value| value.parse().ok())
        .unwrap();

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).unwrap();
    (head, body)
}

fn read_response(stream: &mut TcpStream) -> String {
    let (head, body) = read_response_bytes(stream);
    format!("{head}{}", String::from_utf8_lossy(&body))
}

fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("unexpected bytes after close: {:?}", &buf[..n]),
        // A reset also means the server closed.
        Err(e) => assert_ne!(e.kind(), std::io::ErrorKind::WouldBlock, "server kept socket open"),
    }
}

fn site() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    for (name, content) in [
        ("judge.html", "<h1>judge</h1>"),
        ("welcome.html", "<h1>welcome</h1>"),
        ("logError.html", "<h1>login failed</h1>"),
        ("register.html", "<h1>register</h1>"),
    ] {
        std::fs::write(root.path().join(name), content).unwrap();
    }
    root
}

#[test]
fn get_root_serves_default_document() {
    let root = site();
    let server = start(config(root.path()), Arc::new(InMemoryDirectory::new()));

    let mut client = connect(server.addr);
    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let response = read_response(&mut client);

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 14\r\n"));
    assert!(response.contains("Content-Type: text/html\r\n"));
    assert!(response.ends_with("<h1>judge</h1>"));
    assert_closed(&mut client);

    server.stop().unwrap();
}

#[test]
fn missing_file_is_not_found() {
    let root = site();
    let server = start(config(root.path()), Arc::new(InMemoryDirectory::new()));

    let mut client = connect(server.addr);
    client.write_all(b"GET /missing.html HTTP/1.1\r\n\r\n").unwrap();
    let response = read_response(&mut client);

    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(response.ends_with("\r\n\r\nThe requested file was not found on this server.\n"));
}

#[test]
fn malformed_request_is_bad_request() {
    let root = site();
    let server = start(config(root.path()), Arc::new(InMemoryDirectory::new()));

    let mut client = connect(server.addr);
    client.write_all(b"DELETE / HTTP/1.1\r\n\r\n").unwrap();
    let response = read_response(&mut client);

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert_closed(&mut client);
    drop(server);
}

#[test]
fn keep_alive_serves_sequential_and_pipelined_requests() {
    let root = site();
    let server = start(config(root.path()), Arc::new(InMemoryDirectory::new()));
    let mut client = connect(server.addr);

    for _ in 0..3 {
        client
            .write_all(b"GET /judge.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        let response = read_response(&mut client);
        assert!(response.contains("Connection: keep-alive\r\n"));
        assert!(response.ends_with("<h1>judge</h1>"));
    }

    client
        .write_all(
            b"GET /0 HTTP/1.1\r\nConnection: keep-alive\r\n\r\n\
              GET /judge.html HTTP/1.1\r\n\r\n",
        )
        .unwrap();
    assert!(read_response(&mut client).ends_with("<h1>register</h1>"));
    assert!(read_response(&mut client).ends_with("<h1>judge</h1>"));
    assert_closed(&mut client);
}

#[test]
fn login_routes_to_welcome_or_error_page() {
    let root = site();
    let directory = Arc::new(InMemoryDirectory::new());
    directory.register("a", "b");
    let server = start(config(root.path()), directory);

    for (password, page) in [("b", "<h1>welcome</h1>"), ("x", "<h1>login failed</h1>")] {
        let mut client = connect(server.addr);
        write!(
            client,
            "POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 17\r\n\r\nuser=a&password={password}"
        )
        .unwrap();
        assert!(read_response(&mut client).ends_with(page));
    }
}

#[test]
fn request_split_across_writes_is_reassembled() {
    let root = site();
    let server = start(config(root.path()), Arc::new(InMemoryDirectory::new()));
    let mut client = connect(server.addr);
    client.set_nodelay(true).unwrap();

    for chunk in [&b"GET /jud"[..], b"ge.html HTT", b"P/1.1\r", b"\n\r\n"] {
        client.write_all(chunk).unwrap();
        thread::sleep(Duration::from_millis(20));
    }
    assert!(read_response(&mut client).ends_with("<h1>judge</h1>"));
}

#[test]
fn connections_over_ceiling_get_busy_reply() {
    let root = site();
    let server = start(
        config(root.path()).with_max_connections(1),
        Arc::new(InMemoryDirectory::new()),
    );

    // Hold the only slot with a kept-alive connection.
    let mut first = connect(server.addr);
    first
        .write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    read_response(&mut first);

    let mut second = connect(server.addr);
    let mut reply = String::new();
    second.read_to_string(&mut reply).unwrap();
    assert_eq!(reply, BUSY_RESPONSE);
}

#[test]
fn idle_connection_is_evicted() {
    let root = site();
    let server = start(
        config(root.path())
            .with_tick_interval(Duration::from_millis(20))
            .with_idle_ticks(3)
            .with_grace_ticks(2),
        Arc::new(InMemoryDirectory::new()),
    );

    let mut idle = connect(server.addr);
    assert_closed(&mut idle);

    // The server keeps accepting after reaping.
    let mut client = connect(server.addr);
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    assert!(read_response(&mut client).starts_with("HTTP/1.1 200 OK\r\n"));
}

#[test]
fn shutdown_returns_from_run() {
    let root = site();
    let server = start(config(root.path()), Arc::new(InMemoryDirectory::new()));
    let _open = connect(server.addr);
    server.stop().unwrap();
}

/// Directory whose logins park the calling worker until released.
struct Gate {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl UserDirectory for Gate {
    fn authenticate(&self, _name: &str, _password: &str) -> bool {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        true
    }

    fn register(&self, _name: &str, _password: &str) -> bool {
        false
    }
}

#[test]
fn full_worker_queue_closes_the_connection() {
    let root = site();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let server = start(
        config(root.path()).with_threads(1).with_max_pending(1),
        gate,
    );

    // Occupies the only worker.
    let mut busy = connect(server.addr);
    busy.write_all(b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 17\r\n\r\nuser=a&password=b")
        .unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // Fills the single queue slot.
    let mut queued = connect(server.addr);
    queued.write_all(b"GET /judge.html HTTP/1.1\r\n\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));

    let mut rejected = connect(server.addr);
    rejected.write_all(b"GET /judge.html HTTP/1.1\r\n\r\n").unwrap();
    assert_closed(&mut rejected);

    release_tx.send(()).unwrap();
    assert!(read_response(&mut busy).ends_with("<h1>welcome</h1>"));
    assert!(read_response(&mut queued).ends_with("<h1>judge</h1>"));
}

/// Requests `GET /` on fresh connections until one is served, retrying while
/// the ceiling is still held by a connection the reactor has not reaped yet.
fn assert_slot_frees(addr: SocketAddr) {
    for _ in 0..100 {
        let mut client = connect(addr);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut reply = String::new();
        // A busy refusal may arrive as a reset.
        let _ = client.read_to_string(&mut reply);
        if reply.starts_with("HTTP/1.1 200 OK\r\n") {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("slot was never released");
}

#[test]
fn peer_hangup_frees_the_slot() {
    let root = site();
    let server = start(
        config(root.path()).with_max_connections(1),
        Arc::new(InMemoryDirectory::new()),
    );

    let mut client = connect(server.addr);
    client.write_all(b"GET /judge.html HT").unwrap();
    client.shutdown(std::net::Shutdown::Both).unwrap();
    drop(client);

    assert_slot_frees(server.addr);
}

#[test]
fn peer_reset_frees_the_slot() {
    let root = site();
    let server = start(
        config(root.path()).with_max_connections(1),
        Arc::new(InMemoryDirectory::new()),
    );

    let mut client = connect(server.addr);
    client.write_all(b"GET /judge.html HT").unwrap();
    thread::sleep(Duration::from_millis(20));
    // Zero linger turns the close into an RST.
    socket2::SockRef::from(&client)
        .set_linger(Some(Duration::ZERO))
        .unwrap();
    drop(client);

    assert_slot_frees(server.addr);
}

#[test]
fn response_larger_than_socket_buffer_resumes_on_writable() {
    let root = site();
    let content: Vec<u8> = (0..8_000_000u32)
        .map(|i| u8::try_from(i % 251).unwrap())
        .collect();
    std::fs::write(root.path().join("big.html"), &content).unwrap();
    let server = start(config(root.path()), Arc::new(InMemoryDirectory::new()));

    let mut client = connect(server.addr);
    client
        .write_all(b"GET /big.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    // Let the kernel buffers fill so the server has to wait for writability.
    thread::sleep(Duration::from_millis(100));

    let (head, body) = read_response_bytes(&mut client);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Length: 8000000\r\n"));
    assert!(body == content, "large body corrupted");

    // The connection is still usable afterwards.
    client.write_all(b"GET /judge.html HTTP/1.1\r\n\r\n").unwrap();
    assert!(read_response(&mut client).ends_with("<h1>judge</h1>"));
    assert_closed(&mut client);
}

#[test]
fn concurrent_pipelined_clients_get_ordered_responses() {
    const PAGES: usize = 10;
    const CLIENTS: usize = 8;
    const REQUESTS: usize = 12;

    let root = site();
    for page in 0..PAGES {
        let body = format!("<p>{}</p>", "x".repeat(page * 7 + 1));
        std::fs::write(root.path().join(format!("p{page}.html")), body).unwrap();
    }
    let server = start(
        config(root.path()).with_threads(4),
        Arc::new(InMemoryDirectory::new()),
    );

    let clients: Vec<_> = (0..CLIENTS)
        .map(|client| {
            let addr = server.addr;
            thread::spawn(move || {
                let mut stream = connect(addr);
                let mut batch = String::new();
                for i in 0..REQUESTS {
                    let page = (client + i) % PAGES;
                    let connection = if i + 1 == REQUESTS { "close" } else { "keep-alive" };
                    batch.push_str(&format!(
                        "GET /p{page}.html HTTP/1.1\r\nConnection: {connection}\r\n\r\n"
                    ));
                }
                stream.write_all(batch.as_bytes()).unwrap();

                for i in 0..REQUESTS {
                    let page = (client + i) % PAGES;
                    let expected = format!("<p>{}</p>", "x".repeat(page * 7 + 1));
                    let response = read_response(&mut stream);
                    assert!(
                        response.ends_with(&format!("\r\n\r\n{expected}")),
                        "client {client} request {i}: {response:?}"
                    );
                }
                assert_closed(&mut stream);
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }
}
