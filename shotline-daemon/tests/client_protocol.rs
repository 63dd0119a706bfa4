//! Client call discipline against scripted TCP peers.
//!
//! Each test binds an ephemeral port and runs a hand-written peer on a
//! thread, so frame boundaries and timing are fully controlled.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use shotline_core::{CacheSettings, Context, DaemonSettings};
use shotline_daemon::{
    DaemonClient, DaemonError, DaemonRequest, MetadataCache, Production, ResponseStatus,
    StubDatabase, StubHandle, StubOptions,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settings(port: u16, timeout_ms: u64) -> DaemonSettings {
    DaemonSettings {
        host: "127.0.0.1".to_string(),
        port,
        timeout_ms,
        connect_timeout_ms: 500,
    }
}

fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, port)
}

struct Peer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Peer {
    fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().expect("accept");
        let writer = stream.try_clone().expect("clone");
        Self {
            reader: BufReader::new(stream),
            writer,
        }
    }

    fn read_request(&mut self) -> Option<DaemonRequest> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(serde_json::from_str(line.trim()).expect("request json")),
        }
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).expect("write");
        self.writer.flush().expect("flush");
    }

    fn reply_ok(&mut self, seq: u64) {
        let line = format!("{{\"seq\":{seq},\"status\":\"ok\",\"payload\":{{\"pong\":true}}}}\n");
        self.send_raw(line.as_bytes());
    }
}

// ---------------------------------------------------------------------------
// 1. Sequencing
// ---------------------------------------------------------------------------

#[test]
fn late_reply_to_timed_out_call_is_discarded() {
    let (listener, port) = bind();
    let peer = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        let first = peer.read_request().expect("first request");
        thread::sleep(Duration::from_millis(400));
        peer.reply_ok(first.seq);
        let second = peer.read_request().expect("second request");
        peer.reply_ok(second.seq);
    });

    let client = DaemonClient::connect(&settings(port, 150)).expect("connect");
    let err = client.call("ping", Vec::new()).unwrap_err();
    assert!(matches!(err, DaemonError::Timeout { .. }), "got: {err}");
    assert!(client.is_connected(), "a timeout must keep the connection");

    thread::sleep(Duration::from_millis(350));
    let response = client
        .call_with_timeout("ping", Vec::new(), Duration::from_secs(2))
        .expect("second call");
    assert_eq!(response.seq, 2);
    assert_eq!(response.status, ResponseStatus::Ok);
    peer.join().unwrap();
}

#[test]
fn reply_split_across_reads_is_reassembled() {
    let (listener, port) = bind();
    let peer = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        let request = peer.read_request().expect("request");
        let line = format!("{{\"seq\":{},\"status\":\"ok\",\"payload\":{{\"pong\":true}}}}\n", request.seq);
        let (head, tail) = line.as_bytes().split_at(10);
        peer.send_raw(head);
        thread::sleep(Duration::from_millis(100));
        peer.send_raw(tail);
    });

    let client = DaemonClient::connect(&settings(port, 1_000)).expect("connect");
    let response = client.call("ping", Vec::new()).expect("split reply");
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.seq, 1);
    peer.join().unwrap();
}

#[test]
fn reply_with_future_seq_is_protocol_error() {
    let (listener, port) = bind();
    let peer = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        let request = peer.read_request().expect("request");
        peer.reply_ok(request.seq + 10);
    });

    let client = DaemonClient::connect(&settings(port, 1_000)).expect("connect");
    let err = client.call("ping", Vec::new()).unwrap_err();
    assert!(matches!(err, DaemonError::Protocol(_)), "got: {err}");
    peer.join().unwrap();
}

// ---------------------------------------------------------------------------
// 2. Malformed frames are call-scoped
// ---------------------------------------------------------------------------

#[test]
fn malformed_frame_fails_only_that_call() {
    let (listener, port) = bind();
    let peer = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.read_request().expect("first request");
        peer.send_raw(b"this is not json\n");
        let second = peer.read_request().expect("second request");
        peer.reply_ok(second.seq);
    });

    let client = DaemonClient::connect(&settings(port, 1_000)).expect("connect");
    let err = client.call("ping", Vec::new()).unwrap_err();
    assert!(matches!(err, DaemonError::Protocol(_)), "got: {err}");
    assert!(client.is_connected());

    let response = client.call("ping", Vec::new()).expect("second call");
    assert_eq!(response.status, ResponseStatus::Ok);
    peer.join().unwrap();
}

#[test]
fn oversized_frame_is_drained_and_connection_survives() {
    let (listener, port) = bind();
    let peer = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.read_request().expect("first request");
        let mut huge = vec![b'x'; shotline_daemon::protocol::MAX_FRAME_BYTES + 64];
        huge.push(b'\n');
        peer.send_raw(&huge);
        let second = peer.read_request().expect("second request");
        peer.reply_ok(second.seq);
    });

    let client = DaemonClient::connect(&settings(port, 3_000)).expect("connect");
    let err = client.call("ping", Vec::new()).unwrap_err();
    assert!(matches!(err, DaemonError::Protocol(_)), "got: {err}");

    let response = client.call("ping", Vec::new()).expect("second call");
    assert_eq!(response.status, ResponseStatus::Ok);
    peer.join().unwrap();
}

#[test]
fn undecodable_payload_is_not_cached() {
    let (listener, port) = bind();
    let peer = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        let first = peer.read_request().expect("first get_spec");
        let bad = format!("{{\"seq\":{},\"status\":\"ok\",\"payload\":{{\"width\":\"wide\"}}}}\n", first.seq);
        peer.send_raw(bad.as_bytes());

        let second = peer.read_request().expect("second get_spec");
        assert_eq!(second.cmd, "get_spec");
        let good = format!(
            "{{\"seq\":{},\"status\":\"ok\",\"payload\":{{\"width\":1920,\"height\":1080,\"fps\":24.0,\"start_frame\":1,\"end_frame\":120}}}}\n",
            second.seq
        );
        peer.send_raw(good.as_bytes());
    });

    let production = Production::new(
        Arc::new(DaemonClient::connect(&settings(port, 1_000)).expect("connect")),
        Arc::new(MetadataCache::from_settings(&CacheSettings::default())),
    );
    let ctx = Context::new("PROJ", "SH010", "COMP");

    let err = production.technical_spec(&ctx).unwrap_err();
    assert!(matches!(err, DaemonError::Json(_)), "got: {err}");
    assert!(production.cache().is_empty());

    let spec = production.technical_spec(&ctx).expect("fresh round trip");
    assert_eq!(spec.width, 1920);
    peer.join().unwrap();
}

// ---------------------------------------------------------------------------
// 3. Reconnect policy
// ---------------------------------------------------------------------------

#[test]
fn dropped_connection_reconnects_once_on_next_call() {
    let (listener, port) = bind();
    let peer = thread::spawn(move || {
        {
            let mut peer = Peer::accept(&listener);
            peer.read_request().expect("request before hang-up");
        }
        let mut peer = Peer::accept(&listener);
        let request = peer.read_request().expect("request after reconnect");
        peer.reply_ok(request.seq);
    });

    let client = DaemonClient::connect(&settings(port, 1_000)).expect("connect");
    let err = client.call("ping", Vec::new()).unwrap_err();
    assert!(matches!(err, DaemonError::Disconnected { .. }), "got: {err}");
    assert!(!client.is_connected());

    let response = client.call("ping", Vec::new()).expect("reconnected call");
    assert_eq!(response.status, ResponseStatus::Ok);
    assert!(client.is_connected());
    peer.join().unwrap();
}

#[test]
fn unreachable_daemon_fails_fast_after_one_attempt() {
    let (listener, port) = bind();
    let peer = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.read_request().expect("request");
        // listener and stream drop here: nothing is listening afterwards
    });

    let client = DaemonClient::connect(&settings(port, 1_000)).expect("connect");
    let _ = client.call("ping", Vec::new()).unwrap_err();
    peer.join().unwrap();

    let err = client.call("ping", Vec::new()).unwrap_err();
    assert!(matches!(err, DaemonError::Connection { .. }), "got: {err}");
    assert!(!client.is_connected());
}

// ---------------------------------------------------------------------------
// 4. Concurrent callers
// ---------------------------------------------------------------------------

#[test]
fn concurrent_callers_share_one_connection() {
    let stub = StubHandle::spawn(
        StubDatabase::default(),
        StubOptions::default().with_delay(Duration::from_millis(5)),
    )
    .expect("stub");
    let client = Arc::new(DaemonClient::new(&stub.settings()));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    let response = client.call("ping", Vec::new()).expect("ping");
                    assert_eq!(response.status, ResponseStatus::Ok);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(stub.count("ping"), 20);
}

#[test]
fn non_ok_status_is_typed() {
    let stub = StubHandle::spawn(StubDatabase::default(), StubOptions::default()).expect("stub");
    let client = DaemonClient::new(&stub.settings());

    let err = client.request("no_such_command", Vec::new()).unwrap_err();
    assert!(
        matches!(
            err,
            DaemonError::Status {
                status: ResponseStatus::InvalidArgument,
                ..
            }
        ),
        "got: {err}"
    );
    assert!(client.is_connected());
}
