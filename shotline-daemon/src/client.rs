//! Blocking, thread-safe client for the production daemon.
//!
//! Call discipline: mutex-guarded half-duplex. A call holds the connection
//! lock from the moment its request is written until its response (matched
//! by `seq`) has been read, so there is never more than one request
//! outstanding on the socket.
//!
//! Failure policy:
//! - timeout: the call fails, the connection is kept. A late reply carries a
//!   lower `seq` and is discarded by the next call.
//! - EOF / reset / broken pipe: the connection is dropped and the call fails
//!   with [`DaemonError::Disconnected`].
//! - no connection: the call makes exactly one connect attempt before failing
//!   with [`DaemonError::Connection`].

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use shotline_core::DaemonSettings;

use crate::error::DaemonError;
use crate::protocol::{encode_line, DaemonRequest, DaemonResponse, Frame, FrameBuffer};

const READ_CHUNK: usize = 8 * 1024;

pub struct DaemonClient {
    addr: String,
    timeout: Duration,
    connect_timeout: Duration,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    conn: Option<Connection>,
    next_seq: u64,
}

struct Connection {
    stream: TcpStream,
    frames: FrameBuffer,
}

impl DaemonClient {
    /// Client that connects lazily on its first call.
    pub fn new(settings: &DaemonSettings) -> Self {
        Self {
            addr: format!("{}:{}", settings.host, settings.port),
            timeout: settings.timeout(),
            connect_timeout: settings.connect_timeout(),
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Client with an established connection, or [`DaemonError::Connection`].
    pub fn connect(settings: &DaemonSettings) -> Result<Self, DaemonError> {
        let client = Self::new(settings);
        {
            let mut state = client.state.lock();
            state.conn = Some(Connection::open(&client.addr, client.connect_timeout)?);
        }
        tracing::info!(addr = %client.addr, "connected to daemon");
        Ok(client)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().conn.is_some()
    }

    /// Drop the connection. The next call reconnects.
    pub fn disconnect(&self) {
        if self.state.lock().conn.take().is_some() {
            tracing::info!(addr = %self.addr, "disconnected from daemon");
        }
    }

    /// Send `cmd` with the default timeout and return the raw response.
    pub fn call(&self, cmd: &str, args: Vec<Value>) -> Result<DaemonResponse, DaemonError> {
        self.call_with_timeout(cmd, args, self.timeout)
    }

    /// Send `cmd` and return the payload of an ok response.
    pub fn request(&self, cmd: &str, args: Vec<Value>) -> Result<Value, DaemonError> {
        self.call(cmd, args)?.into_payload(cmd)
    }

    pub fn call_with_timeout(
        &self,
        cmd: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<DaemonResponse, DaemonError> {
        let mut state = self.state.lock();

        if state.conn.is_none() {
            tracing::info!(addr = %self.addr, "reconnecting to daemon");
            match Connection::open(&self.addr, self.connect_timeout) {
                Ok(conn) => {
                    tracing::info!(addr = %self.addr, "connected to daemon");
                    state.conn = Some(conn);
                }
                Err(err) => {
                    tracing::warn!(addr = %self.addr, error = %err, "reconnect failed");
                    return Err(err);
                }
            }
        }

        state.next_seq += 1;
        let request = DaemonRequest {
            seq: state.next_seq,
            cmd: cmd.to_string(),
            args,
        };
        let deadline = Instant::now() + timeout;

        let result = match state.conn.as_mut() {
            Some(conn) => conn.exchange(&request, deadline, timeout),
            None => Err(DaemonError::Disconnected {
                reason: "no connection".to_string(),
            }),
        };

        if let Err(DaemonError::Disconnected { reason }) = &result {
            tracing::warn!(addr = %self.addr, cmd, reason = %reason, "daemon connection lost");
            state.conn = None;
        }
        result
    }
}

impl Connection {
    fn open(addr: &str, connect_timeout: Duration) -> Result<Self, DaemonError> {
        let connection_err = |source: std::io::Error| DaemonError::Connection {
            addr: addr.to_string(),
            source,
        };

        let mut last_err = None;
        for candidate in addr.to_socket_addrs().map_err(connection_err)? {
            match TcpStream::connect_timeout(&candidate, connect_timeout) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(Self {
                        stream,
                        frames: FrameBuffer::default(),
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(connection_err(last_err.unwrap_or_else(|| {
            std::io::Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing")
        })))
    }

    fn exchange(
        &mut self,
        request: &DaemonRequest,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<DaemonResponse, DaemonError> {
        let timed_out = || DaemonError::Timeout {
            cmd: request.cmd.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };

        let line = encode_line(request)?;
        let write_budget = remaining(deadline).ok_or_else(timed_out)?;
        self.stream
            .set_write_timeout(Some(write_budget))
            .map_err(disconnected)?;
        // A partially written frame cannot be recovered, so any write error drops the connection.
        self.stream.write_all(&line).map_err(disconnected)?;
        self.stream.flush().map_err(disconnected)?;

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            while let Some(frame) = self.frames.next_frame() {
                let bytes = match frame {
                    Frame::Oversized => {
                        return Err(DaemonError::Protocol(format!(
                            "response frame for '{}' exceeds the maximum frame size",
                            request.cmd
                        )))
                    }
                    Frame::Line(bytes) => bytes,
                };
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let response: DaemonResponse = serde_json::from_slice(&bytes).map_err(|err| {
                    DaemonError::Protocol(format!("malformed response frame: {err}"))
                })?;
                if response.seq < request.seq {
                    tracing::debug!(
                        stale_seq = response.seq,
                        awaited_seq = request.seq,
                        "discarding late daemon response"
                    );
                    continue;
                }
                if response.seq > request.seq {
                    return Err(DaemonError::Protocol(format!(
                        "response seq {} is ahead of request seq {}",
                        response.seq, request.seq
                    )));
                }
                return Ok(response);
            }

            let read_budget = remaining(deadline).ok_or_else(timed_out)?;
            self.stream
                .set_read_timeout(Some(read_budget))
                .map_err(disconnected)?;
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(DaemonError::Disconnected {
                        reason: "daemon closed the connection".to_string(),
                    })
                }
                Ok(n) => self.frames.push(&chunk[..n]),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(timed_out())
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(disconnected(err)),
            }
        }
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
}

fn disconnected(err: std::io::Error) -> DaemonError {
    DaemonError::Disconnected {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn settings_for(port: u16) -> DaemonSettings {
        DaemonSettings {
            host: "127.0.0.1".to_string(),
            port,
            timeout_ms: 500,
            connect_timeout_ms: 500,
        }
    }

    #[test]
    fn lazy_client_starts_disconnected() {
        let client = DaemonClient::new(&settings_for(1));
        assert!(!client.is_connected());
        assert_eq!(client.addr(), "127.0.0.1:1");
    }

    #[test]
    fn connect_to_closed_port_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = DaemonClient::connect(&settings_for(port)).err().unwrap();
        assert!(matches!(err, DaemonError::Connection { .. }), "got: {err}");
        assert!(err.is_connectivity());
    }

    #[test]
    fn remaining_is_none_after_deadline() {
        assert!(remaining(Instant::now() - Duration::from_millis(1)).is_none());
        assert!(remaining(Instant::now() + Duration::from_secs(1)).is_some());
    }
}
