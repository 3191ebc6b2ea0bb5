//! The supervisor process: owns every IRC connection and the worker's
//! lifecycle.
//!
//! Startup: construct the RPC bridge and connection table, spawn one
//! [`ServerSession`] per configured network, then enter the worker respawn
//! loop. The worker is this same executable invoked with the hidden
//! `worker` subcommand, its stdio wired as the RPC channel and its stderr
//! folded into our log. Every worker exit (crash, `!reincarnate`) is
//! followed by a 1 s pause and a respawn — unless we are shutting down, in
//! which case the worker gets KILL and the process exits.

use crate::config::{BotConfig, CONFIG_ENV};
use crate::session::{ConnectionTable, ServerSession};
use crate::rpc::bridge::{CallError, RpcBridge, WorkerLink};
use crate::rpc::{IrcCall, RpcFrame, ERR_METHOD_NOT_FOUND, METHOD_IRC_CALL, METHOD_REGISTER};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// Pause before a worker respawn — keeps startup crashes from hot-looping.
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

// ─── Worker link ──────────────────────────────────────────────────────────────

/// One spawned worker's half of the RPC channel: a frame writer into its
/// stdin plus the pending-call table completed by its stdout pump.
struct WorkerHandle {
    out_tx: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, CallError>>>>,
    next_id: AtomicU64,
}

impl WorkerHandle {
    fn new(mut stdin: ChildStdin) -> Arc<Self> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });
        Arc::new(Self {
            out_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn respond(&self, frame: RpcFrame) {
        let _ = self.out_tx.send(frame.to_line());
    }

    async fn complete(&self, frame: RpcFrame) {
        let Some(id) = frame.id else { return };
        let Some(tx) = self.pending.lock().await.remove(&id) else {
            warn!(id, "response for unknown call id");
            return;
        };
        let result = match frame.error {
            Some(e) => Err(CallError::Remote {
                code: e.code,
                message: e.message,
            }),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    }

    /// Fail every outstanding call — invoked when the worker exits.
    async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }
}

#[async_trait]
impl WorkerLink for WorkerHandle {
    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let frame = RpcFrame::request(id, method, params);
        if self.out_tx.send(frame.to_line()).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(CallError::Closed);
        }
        match rx.await {
            Ok(result) => result,
            // Dropped without an answer — worker died mid-call.
            Err(_) => Err(CallError::Closed),
        }
    }
}

// ─── Supervisor main ──────────────────────────────────────────────────────────

/// Run the supervisor until a shutdown signal arrives.
pub async fn run(config: BotConfig) -> Result<()> {
    let bridge = RpcBridge::new();
    let connections = ConnectionTable::new();
    let exiting = Arc::new(AtomicBool::new(false));
    let current_child: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));

    info!(networks = config.networks.len(), "setting up networks");
    for network in config.networks.clone() {
        let session = ServerSession::new(
            network,
            config.core.nickname.clone(),
            config.core.realname.clone(),
            Arc::clone(&bridge),
            Arc::clone(&connections),
        );
        tokio::spawn(session.run());
    }

    let respawn = tokio::spawn(respawn_loop(
        config,
        Arc::clone(&bridge),
        Arc::clone(&connections),
        Arc::clone(&exiting),
        Arc::clone(&current_child),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    info!("shutdown requested");
    exiting.store(true, Ordering::SeqCst);
    if let Some(child) = current_child.lock().await.as_mut() {
        let _ = child.start_kill();
    }
    respawn.abort();
    Ok(())
}

/// Spawn the worker, babysit it until exit, wait, repeat.
async fn respawn_loop(
    config: BotConfig,
    bridge: Arc<RpcBridge>,
    connections: Arc<ConnectionTable>,
    exiting: Arc<AtomicBool>,
    current_child: Arc<Mutex<Option<Child>>>,
) {
    loop {
        // The wait runs before every spawn, first included — it keeps
        // startup crashes from hot-looping.
        tokio::time::sleep(RESPAWN_DELAY).await;
        if exiting.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = run_worker_once(&config, &bridge, &connections, &current_child).await {
            warn!(err = %e, "worker spawn failed");
        }
        bridge.disconnect().await;
        if exiting.load(Ordering::SeqCst) {
            return;
        }
        info!(delay_s = RESPAWN_DELAY.as_secs(), "respawning worker");
    }
}

/// One worker generation: spawn, pump its stdio, reap the exit status.
async fn run_worker_once(
    config: &BotConfig,
    bridge: &Arc<RpcBridge>,
    connections: &Arc<ConnectionTable>,
    current_child: &Arc<Mutex<Option<Child>>>,
) -> Result<()> {
    let exe = std::env::current_exe().context("cannot determine chirpd executable path")?;
    let mut child = Command::new(exe)
        .arg("worker")
        .env(CONFIG_ENV, &config.path)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .context("failed to spawn worker process")?;

    let stdin = child.stdin.take().context("worker stdin not available")?;
    let stdout = child.stdout.take().context("worker stdout not available")?;
    let stderr = child.stderr.take().context("worker stderr not available")?;
    info!(pid = child.id(), "worker started");

    // Worker log lines arrive on stderr and are folded into our log.
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "worker", "{line}");
        }
    });

    let link = WorkerHandle::new(stdin);
    *current_child.lock().await = Some(child);

    // Stdout pump: worker-originated requests and responses to our calls.
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let frame: RpcFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(err = %e, "unparseable frame from worker");
                continue;
            }
        };
        if frame.is_request() {
            handle_worker_request(bridge, connections, &link, frame).await;
        } else {
            link.complete(frame).await;
        }
    }

    // Stdout closed — the worker is gone. Reap it and fail in-flight calls.
    link.fail_pending().await;
    if let Some(mut child) = current_child.lock().await.take() {
        match child.wait().await {
            Ok(status) => info!(%status, "worker exited"),
            Err(e) => warn!(err = %e, "failed to reap worker"),
        }
    }
    Ok(())
}

/// Serve one worker-originated request: registration or an IRC action.
async fn handle_worker_request(
    bridge: &Arc<RpcBridge>,
    connections: &Arc<ConnectionTable>,
    link: &Arc<WorkerHandle>,
    frame: RpcFrame,
) {
    let id = frame.id.unwrap_or(0);
    let method = frame.method.unwrap_or_default();
    match method.as_str() {
        METHOD_REGISTER => {
            bridge
                .register(Arc::clone(link) as Arc<dyn WorkerLink>)
                .await;
            link.respond(RpcFrame::response(id, Value::Null));
        }
        METHOD_IRC_CALL => {
            match serde_json::from_value::<IrcCall>(frame.params.unwrap_or(Value::Null)) {
                Ok(call) => {
                    // Stale connection ids drop silently — the worker still
                    // gets a clean response either way.
                    connections.dispatch(call.conn, call.action).await;
                }
                Err(e) => debug!(err = %e, "malformed irc call dropped"),
            }
            link.respond(RpcFrame::response(id, Value::Null));
        }
        other => {
            link.respond(RpcFrame::error_response(
                id,
                ERR_METHOD_NOT_FOUND,
                format!("unknown method {other}"),
            ));
        }
    }
}
