//! Stand-in production daemon: a tokio JSON-lines TCP server over an
//! in-memory database seeded from YAML.
//!
//! Used by integration tests (ephemeral port, request counters, injected
//! delays and failures) and by `shotline daemon stub` for offline work.
//!
//! ```yaml
//! user: artist
//! states: [WIP, REV, OK]
//! specs:
//!   PROJ/SH010: { width: 1920, height: 1080, fps: 24.0, start_frame: 1, end_frame: 120 }
//! naming:
//!   PROJ/COMP: { client_suffix: vfx }
//! statuses:
//!   PROJ/SH010/COMP: { state: WIP, version: 2 }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use shotline_core::{DaemonSettings, NamingRules, StatusRecord, TechnicalSpec};

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse, ResponseStatus};

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StubDatabase {
    pub user: String,
    pub states: Vec<String>,
    /// Keyed by `PROJECT/SHOT`.
    pub specs: BTreeMap<String, TechnicalSpec>,
    /// Keyed by `PROJECT/STEP`.
    pub naming: BTreeMap<String, NamingRules>,
    /// Keyed by `PROJECT/SHOT/STEP`.
    pub statuses: BTreeMap<String, StatusRecord>,
}

impl StubDatabase {
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_yaml::from_str(&contents).map_err(|source| DaemonError::Seed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn with_states(mut self, states: &[&str]) -> Self {
        self.states = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_spec(mut self, project: &str, shot: &str, spec: TechnicalSpec) -> Self {
        self.specs.insert(format!("{project}/{shot}"), spec);
        self
    }

    pub fn with_naming(mut self, project: &str, step: &str, rules: NamingRules) -> Self {
        self.naming.insert(format!("{project}/{step}"), rules);
        self
    }

    pub fn with_status(
        mut self,
        project: &str,
        shot: &str,
        step: &str,
        record: StatusRecord,
    ) -> Self {
        self.statuses.insert(format!("{project}/{shot}/{step}"), record);
        self
    }
}

/// Test knobs applied to every request.
#[derive(Debug, Clone, Default)]
pub struct StubOptions {
    pub response_delay: Duration,
    /// Commands answered with `server_error`.
    pub failing: HashSet<String>,
}

impl StubOptions {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn failing(mut self, cmd: &str) -> Self {
        self.failing.insert(cmd.to_string());
        self
    }
}

struct StubState {
    db: RwLock<StubDatabase>,
    counters: Mutex<HashMap<String, usize>>,
    options: StubOptions,
}

impl StubState {
    fn new(db: StubDatabase, options: StubOptions) -> Self {
        Self {
            db: RwLock::new(db),
            counters: Mutex::new(HashMap::new()),
            options,
        }
    }
}

// ---------------------------------------------------------------------------
// Background handle (tests)
// ---------------------------------------------------------------------------

/// Stub running on its own thread and runtime. Stops when dropped.
pub struct StubHandle {
    addr: SocketAddr,
    state: Arc<StubState>,
    shutdown: broadcast::Sender<()>,
    thread: Option<std::thread::JoinHandle<Result<(), DaemonError>>>,
}

impl StubHandle {
    /// Bind `127.0.0.1:0` and serve `db` in the background.
    pub fn spawn(db: StubDatabase, options: StubOptions) -> Result<Self, DaemonError> {
        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| io_err("127.0.0.1:0", e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| io_err("127.0.0.1:0", e))?;
        let addr = listener.local_addr().map_err(|e| io_err("127.0.0.1:0", e))?;

        let state = Arc::new(StubState::new(db, options));
        let (shutdown, _) = broadcast::channel::<()>(4);
        let shutdown_rx = shutdown.subscribe();

        let thread = {
            let state = state.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("shotline-stub".to_string())
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_multi_thread()
                        .worker_threads(2)
                        .enable_all()
                        .build()
                        .map_err(|e| io_err("tokio-runtime", e))?;
                    runtime.block_on(async move {
                        let listener = TcpListener::from_std(listener)
                            .map_err(|e| io_err(addr.to_string(), e))?;
                        serve(listener, state, shutdown, shutdown_rx).await
                    })
                })
                .map_err(|e| io_err("shotline-stub thread", e))?
        };

        Ok(Self {
            addr,
            state,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client settings pointing at this stub, with a short timeout.
    pub fn settings(&self) -> DaemonSettings {
        DaemonSettings {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            timeout_ms: 2_000,
            connect_timeout_ms: 1_000,
        }
    }

    /// Requests received for `cmd` so far.
    pub fn count(&self, cmd: &str) -> usize {
        self.state.counters.lock().get(cmd).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.state.counters.lock().values().sum()
    }

    /// Current status record of `PROJECT/SHOT/STEP`.
    pub fn status(&self, step_key: &str) -> Option<StatusRecord> {
        self.state.db.read().statuses.get(step_key).cloned()
    }

    pub fn update_db(&self, f: impl FnOnce(&mut StubDatabase)) {
        f(&mut self.state.db.write());
    }

    pub fn shutdown(mut self) -> Result<(), DaemonError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), DaemonError> {
        let _ = self.shutdown.send(());
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| DaemonError::Protocol("stub thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for StubHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "stub daemon stopped with error");
        }
    }
}

// ---------------------------------------------------------------------------
// Foreground runtime (CLI)
// ---------------------------------------------------------------------------

/// Serve `db` on `addr` until ctrl-c or a `stop` request.
pub fn start_blocking(addr: &str, db: StubDatabase, options: StubOptions) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(addr, db, options))
}

pub async fn run(addr: &str, db: StubDatabase, options: StubOptions) -> Result<(), DaemonError> {
    let listener = TcpListener::bind(addr).await.map_err(|e| io_err(addr, e))?;
    let local = listener.local_addr().map_err(|e| io_err(addr, e))?;
    tracing::info!(addr = %local, "stub daemon listening");

    let state = Arc::new(StubState::new(db, options));
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let server_handle = {
        let shutdown = shutdown_tx.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = serve(listener, state, shutdown.clone(), rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down stub daemon");
                        let _ = shutdown.send(());
                        Ok(())
                    }
                    Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                },
            }
        })
    };

    let (server_result, signal_result) = tokio::join!(server_handle, signal_handle);
    handle_join("server", server_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

async fn serve(
    listener: TcpListener,
    state: Arc<StubState>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|e| io_err("stub accept", e))?;
                tracing::debug!(peer = %peer, "stub client connected");
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, state, shutdown_tx).await {
                        tracing::debug!(error = %err, "stub client error");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<StubState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("stub socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let response = DaemonResponse::error(
                    0,
                    ResponseStatus::InvalidArgument,
                    format!("invalid request JSON: {err}"),
                );
                write_response(&mut writer, &response).await?;
                continue;
            }
        };

        *state.counters.lock().entry(request.cmd.clone()).or_insert(0) += 1;

        if !state.options.response_delay.is_zero() {
            tokio::time::sleep(state.options.response_delay).await;
        }

        let response = if state.options.failing.contains(&request.cmd) {
            DaemonResponse::error(request.seq, ResponseStatus::ServerError, "injected failure")
        } else if request.cmd == "stop" {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(request.seq, json!({ "stopping": true }))
        } else {
            dispatch(&state.db, &request)
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

fn dispatch(db: &RwLock<StubDatabase>, request: &DaemonRequest) -> DaemonResponse {
    let seq = request.seq;
    let args = Args(&request.args);
    let outcome = match request.cmd.as_str() {
        "ping" => Ok(json!({ "pong": true })),
        "get_user" => Ok(json!({ "user": db.read().user })),
        "list_states" => Ok(json!({ "states": db.read().states })),
        "get_spec" => args.key(2).and_then(|key| lookup(&db.read().specs, &key)),
        "get_naming_rules" => args.key(2).and_then(|key| lookup(&db.read().naming, &key)),
        "get_status" => args.key(3).and_then(|key| lookup(&db.read().statuses, &key)),
        "set_status" => set_status(db, &args),
        other => Err((
            ResponseStatus::InvalidArgument,
            format!("unknown command '{other}'"),
        )),
    };
    match outcome {
        Ok(payload) => DaemonResponse::ok(seq, payload),
        Err((status, message)) => DaemonResponse::error(seq, status, message),
    }
}

type Outcome = Result<Value, (ResponseStatus, String)>;

fn lookup<T: Serialize>(map: &BTreeMap<String, T>, key: &str) -> Outcome {
    match map.get(key) {
        Some(value) => serde_json::to_value(value)
            .map_err(|err| (ResponseStatus::ServerError, err.to_string())),
        None => Err((ResponseStatus::NotFound, format!("no record for '{key}'"))),
    }
}

fn set_status(db: &RwLock<StubDatabase>, args: &Args<'_>) -> Outcome {
    let key = args.key(3)?;
    let state = args.string(3)?;
    let comment = args.string(4)?;
    let version = args.number(5)?;
    let completion = args.number(6)?;
    let published = args.0.get(7).and_then(Value::as_bool).unwrap_or(false);

    let mut db = db.write();
    if !db.states.is_empty() && !db.states.contains(&state) {
        return Err((
            ResponseStatus::InvalidArgument,
            format!("unknown state '{state}'"),
        ));
    }
    let user = (!db.user.is_empty()).then(|| db.user.clone());
    db.statuses.insert(
        key,
        StatusRecord {
            state,
            comment,
            version: u32::try_from(version).unwrap_or(u32::MAX),
            completion: completion.min(100) as u8,
            published,
            user,
        },
    );
    Ok(json!({ "updated": true }))
}

struct Args<'a>(&'a [Value]);

impl Args<'_> {
    fn string(&self, idx: usize) -> Result<String, (ResponseStatus, String)> {
        self.0
            .get(idx)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| invalid(idx, "string"))
    }

    fn number(&self, idx: usize) -> Result<u64, (ResponseStatus, String)> {
        self.0
            .get(idx)
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid(idx, "non-negative integer"))
    }

    /// First `n` string arguments joined with `/`.
    fn key(&self, n: usize) -> Result<String, (ResponseStatus, String)> {
        let parts = (0..n)
            .map(|idx| self.string(idx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join("/"))
    }
}

fn invalid(idx: usize, expected: &str) -> (ResponseStatus, String) {
    (
        ResponseStatus::InvalidArgument,
        format!("argument {idx} must be a {expected}"),
    )
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("stub socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("stub socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("stub socket write", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}
