use reactor_httpd::connection::Connection;
use reactor_httpd::mux::{Interest, Poller};
use reactor_httpd::response::ResponseBuilder;
use reactor_httpd::routes::RouteTable;
use reactor_httpd::stats::ServerStats;
use std::fs;
use rand::Rng;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// A connected pair: the server side wrapped as a `Connection`, and the client
fn connected(stats: &Arc<ServerStats>, id: u64) -> (Arc<Connection>, TcpStream) {
    connected_with(stats, id, |_| {})
}

fn connected_with(
    stats: &Arc<ServerStats>,
    id: u64,
    tune: impl FnOnce(&TcpStream),
) -> (Arc<Connection>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (stream, peer) = listener.accept().unwrap();
    stream.set_nonblocking(true).unwrap();
    tune(&stream);

    (
        Arc::new(Connection::new(id, stream, peer, stats.clone(), 64)),
        client,
    )
}

#[test]
fn test_concurrent_close_happens_once() {
    let stats = Arc::new(ServerStats::new());
    let poller = Poller::new(8).unwrap();
    let registry = poller.registry();

    let (conn, _client) = connected(&stats, 1);
    registry
        .register(conn.fd(), Interest::READABLE | Interest::ONESHOT)
        .unwrap();
    assert_eq!(stats.live_connections.value(), 1);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let conn = conn.clone();
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                conn.close(&registry)
            })
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|&&closed| closed).count(), 1);
    assert_eq!(stats.live_connections.value(), 0);
    assert!(conn.is_closed());
    assert!(!conn.close(&registry));
}

#[test]
fn test_read_process_write_cycle() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("hello.txt"), "hello there").unwrap();
    let builder = ResponseBuilder::new(root.path(), Arc::new(RouteTable::new()));

    let stats = Arc::new(ServerStats::new());
    let (conn, mut client) = connected(&stats, 2);

    client
        .write_all(b"GET /hello.txt HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    let mut state = conn.lock();
    assert!(state.drive_read().unwrap() > 0);
    assert!(state.drive_process(&builder));
    assert!(state.is_keep_alive());
    assert_eq!(stats.requests.value(), 1);

    while state.pending_write_bytes() > 0 {
        state.drive_write().unwrap();
    }
    state.reset_for_next_request();
    assert!(!state.drive_process(&builder));
    drop(state);

    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    while !received.ends_with(b"hello there") {
        let n = client.read(&mut chunk).unwrap();
        assert!(n > 0);
        received.extend_from_slice(&chunk[..n]);
    }

    let text = String::from_utf8(received).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 11\r\n"));
}

#[test]
fn test_partial_request_waits() {
    let root = tempfile::tempdir().unwrap();
    let builder = ResponseBuilder::new(root.path(), Arc::new(RouteTable::new()));
    let stats = Arc::new(ServerStats::new());
    let (conn, mut client) = connected(&stats, 3);

    client.write_all(b"GET / HTTP/1.1\r\nHo").unwrap();
    thread::sleep(Duration::from_millis(50));

    let mut state = conn.lock();
    state.drive_read().unwrap();
    assert!(!state.drive_process(&builder));
    assert_eq!(state.pending_write_bytes(), 0);
}

#[test]
fn test_peer_close_is_unexpected_eof() {
    let stats = Arc::new(ServerStats::new());
    let (conn, client) = connected(&stats, 4);
    drop(client);
    thread::sleep(Duration::from_millis(50));

    let err = conn.lock().drive_read().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
}

#[test]
fn test_io_after_close_fails() {
    let stats = Arc::new(ServerStats::new());
    let poller = Poller::new(8).unwrap();
    let registry = poller.registry();
    let (conn, _client) = connected(&stats, 5);

    assert!(conn.close(&registry));
    let mut state = conn.lock();
    assert_eq!(state.drive_read().unwrap_err().kind(), ErrorKind::NotConnected);
    assert_eq!(stats.live_connections.value(), 0);
}

#[test]
fn test_large_file_written_across_many_calls() {
    let mut content = vec![0u8; 4 * 1024 * 1024];
    rand::thread_rng().fill(&mut content[..]);

    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("large.bin"), &content).unwrap();
    let builder = ResponseBuilder::new(root.path(), Arc::new(RouteTable::new()));

    let stats = Arc::new(ServerStats::new());
    let (conn, mut client) = connected_with(&stats, 6, |stream| {
        socket2::SockRef::from(stream).set_send_buffer_size(4096).unwrap();
    });

    client.write_all(b"GET /large.bin HTTP/1.1\r\n\r\n").unwrap();
    thread::sleep(Duration::from_millis(50));

    let reader = thread::spawn(move || {
        client.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 8192];
        let mut head_end = None;
        loop {
            if head_end.is_none() {
                head_end = received.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
            }
            if let Some(end) = head_end {
                if received.len() >= end + 4 * 1024 * 1024 {
                    return (received, end);
                }
            }
            let n = client.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed early");
            received.extend_from_slice(&chunk[..n]);
            thread::sleep(Duration::from_millis(1));
        }
    });

    let mut state = conn.lock();
    state.drive_read().unwrap();
    assert!(state.drive_process(&builder));
    assert!(state.response().is_mapped());

    let mut writes = 0;
    while state.pending_write_bytes() > 0 {
        match state.drive_write() {
            Ok(_) => writes += 1,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("write failed: {}", e),
        }
    }
    assert!(writes > 1);
    drop(state);

    let (received, head_end) = reader.join().unwrap();
    let head = String::from_utf8(received[..head_end].to_vec()).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains(&format!("Content-Length: {}\r\n", content.len())));
    assert_eq!(received.len(), head_end + content.len());
    assert!(received[head_end..] == content[..]);
}
