//! Live TCP sessions against a spawned event loop.

use cinder::server::Config;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

fn start_server(port: u16) {
    std::thread::spawn(move || {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port,
            coerce_integers: false,
        };
        if let Err(e) = cinder::net::run(config) {
            eprintln!("server exited: {e}");
        }
    });
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not start on port {port}");
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream
}

fn roundtrip(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
    stream.write_all(request).expect("write request");
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).expect("read reply");
    assert_eq!(buf, expected);
}

#[test]
fn basic_session() {
    start_server(16391);
    let mut stream = connect(16391);

    roundtrip(
        &mut stream,
        b"*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n",
        b"+OK\r\n",
    );
    roundtrip(&mut stream, b"GET hello\r\n", b"$5\r\nworld\r\n");

    // pipelined requests come back in order
    roundtrip(
        &mut stream,
        b"*2\r\n$4\r\nINCR\r\n$1\r\nc\r\n*2\r\n$4\r\nINCR\r\n$1\r\nc\r\n",
        b":1\r\n:2\r\n",
    );

    // QUIT acknowledges and closes
    stream.write_all(b"QUIT\r\n").expect("write quit");
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).expect("read ok");
    assert_eq!(&buf, b"+OK\r\n");
    let mut rest = Vec::new();
    let n = stream.read_to_end(&mut rest).expect("read eof");
    assert_eq!(n, 0);
}

#[test]
fn protocol_error_closes_connection() {
    start_server(16392);
    let mut stream = connect(16392);

    stream.write_all(b"*1\r\nBAD\r\n").expect("write");
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).expect("read until close");
    assert_eq!(reply, b"-ERR Protocol error: expected '$', got 'B'\r\n");
}

#[test]
fn client_kill_disconnects_peer() {
    start_server(16393);
    let mut admin = connect(16393);
    let mut victim = connect(16393);
    let victim_addr = victim.local_addr().expect("local addr").to_string();

    roundtrip(&mut victim, b"SET shared 1\r\n", b"+OK\r\n");

    let list_req = b"*2\r\n$6\r\nCLIENT\r\n$4\r\nLIST\r\n";
    admin.write_all(list_req).expect("write list");
    let mut header = [0u8; 1];
    admin.read_exact(&mut header).expect("read list header");
    assert_eq!(header[0], b'$');

    // drain the remainder of the bulk reply
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        admin.read_exact(&mut byte).expect("read len");
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }
    let len: usize = String::from_utf8_lossy(&line).parse().expect("bulk len");
    let mut body = vec![0u8; len + 2];
    admin.read_exact(&mut body).expect("read list body");
    let listing = String::from_utf8_lossy(&body);
    assert!(listing.contains(&format!("addr={victim_addr}")));

    let kill = format!(
        "*3\r\n$6\r\nCLIENT\r\n$4\r\nKILL\r\n${}\r\n{}\r\n",
        victim_addr.len(),
        victim_addr
    );
    roundtrip(&mut admin, kill.as_bytes(), b"+OK\r\n");

    // the victim's loop observes the closed transport
    let mut rest = Vec::new();
    let n = victim.read_to_end(&mut rest).expect("victim eof");
    assert_eq!(n, 0);

    // the admin connection is unaffected
    roundtrip(&mut admin, b"GET shared\r\n", b"$1\r\n1\r\n");
}
