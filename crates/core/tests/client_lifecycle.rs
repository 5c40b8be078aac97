//! Integration tests for the client lifecycle: accept → loop → teardown,
//! connection accounting, and the shutdown broadcast.
//!
//! Each test starts a real server on an ephemeral port and talks to it
//! over localhost TCP with explicit timeouts.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use rivulet::{Server, ServerConfig};

/// Poll `condition` until it holds or `timeout` passes.
fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn start_server() -> (Server, std::net::SocketAddr) {
    let mut server = Server::with_config(
        "127.0.0.1:0",
        ServerConfig {
            worker_threads: 4,
            ..ServerConfig::default()
        },
    )
    .expect("server setup");
    server.start().expect("server start");
    let addr = server.local_addr().expect("bound address");
    (server, addr)
}

fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
        .set_write_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

fn read_response_head(stream: &mut TcpStream) -> String {
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => response.push(byte[0]),
            Err(e) => panic!("read failed: {e}"),
        }
    }
    String::from_utf8_lossy(&response).into_owned()
}

#[test]
fn connection_count_balances_across_lifetime() {
    let (mut server, addr) = start_server();

    assert_eq!(server.vhost().connection_count(), 0);

    let stream = connect(addr);
    assert!(
        wait_until(Duration::from_secs(2), || {
            server.vhost().connection_count() == 1 && server.registry().len() == 1
        }),
        "client accepted and registered"
    );

    drop(stream);
    assert!(
        wait_until(Duration::from_secs(2), || {
            server.vhost().connection_count() == 0 && server.registry().is_empty()
        }),
        "teardown releases count and registration"
    );

    server.shutdown();
}

#[test]
fn options_round_trip_over_queued_writes() {
    let (mut server, addr) = start_server();
    let mut stream = connect(addr);

    stream
        .write_all(b"OPTIONS rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n")
        .unwrap();
    stream.flush().unwrap();

    let response = read_response_head(&mut stream);
    assert!(
        response.starts_with("RTSP/1.0 200 OK\r\n"),
        "expected 200 OK, got: {}",
        response.lines().next().unwrap_or("")
    );
    assert!(response.contains("CSeq: 1\r\n"), "CSeq echoed");
    assert!(response.contains("Public:"), "Public header present");

    server.shutdown();
}

#[test]
fn malformed_request_drops_the_connection() {
    let (mut server, addr) = start_server();
    let mut stream = connect(addr);

    stream
        .write_all(b"NOT A VALID REQUEST LINE AT ALL\r\n\r\n")
        .unwrap();
    stream.flush().unwrap();

    // The server drops the client; the read side sees EOF (or a reset).
    let mut buf = [0u8; 64];
    assert!(
        wait_until(Duration::from_secs(2), || match stream.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
        }),
        "connection closed on protocol error"
    );

    server.shutdown();
}

#[test]
fn shutdown_broadcast_disconnects_every_client() {
    let (mut server, addr) = start_server();

    let mut streams: Vec<TcpStream> = (0..3).map(|_| connect(addr)).collect();
    assert!(
        wait_until(Duration::from_secs(2), || server.registry().len() == 3),
        "three clients registered"
    );

    // Returns only after the disconnect broadcast and the pool join, so
    // by now every client loop has exited and torn down.
    server.shutdown();

    assert!(server.registry().is_empty());
    assert_eq!(server.vhost().connection_count(), 0);

    // Every peer observes its connection closing.
    for stream in &mut streams {
        let mut buf = [0u8; 16];
        assert!(matches!(stream.read(&mut buf), Ok(0) | Err(_)));
    }
}
