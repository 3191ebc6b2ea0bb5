// SPDX-License-Identifier: MIT
//! The worker process: all message-handling policy.
//!
//! Boots by opening the RPC channel on stdio, registering with the
//! supervisor, and then serving `handlePublicMessage` /
//! `handlePrivateMessage` calls by running the plugin handlers. IRC actions
//! flow back to the supervisor as `irc.call` requests carrying the
//! connection id of the originating message.
//!
//! stdout carries wire frames only — all logging goes to stderr, which the
//! supervisor folds into its own log.

use crate::config::BotConfig;
use crate::session::IrcActions;
use crate::plugins::{EventKind, MessageEvent, PluginRegistry};
use crate::rpc::{
    IrcAction, IrcCall, RoutedMessage, RpcFrame, ERR_INVALID_PARAMS, ERR_METHOD_NOT_FOUND,
    METHOD_IRC_CALL, METHOD_PRIVATE_MESSAGE, METHOD_PUBLIC_MESSAGE, METHOD_REGISTER,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn};

/// Messages older than this are dropped before any plugin runs — the
/// catch-up safeguard after long disconnects.
const STALE_AFTER_SECS: i64 = 24 * 60 * 60;

pub(crate) fn stale(enqueued_at: i64, now: i64) -> bool {
    now - enqueued_at > STALE_AFTER_SECS
}

// ─── Worker-side RPC plumbing ─────────────────────────────────────────────────

/// Frame writer + pending-call table for the worker's half of the channel.
pub struct WorkerRpc {
    out_tx: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>,
    next_id: AtomicU64,
}

impl WorkerRpc {
    /// Create the RPC handle and start the stdout writer task.
    pub fn new() -> Arc<Self> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = out_rx.recv().await {
                if stdout.write_all(line.as_bytes()).await.is_err()
                    || stdout.write_all(b"\n").await.is_err()
                    || stdout.flush().await.is_err()
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

    /// Call the supervisor and await its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let frame = RpcFrame::request(id, method, params);
        if self.out_tx.send(frame.to_line()).is_err() {
            self.pending.lock().await.remove(&id);
            bail!("supervisor channel closed");
        }
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => bail!("supervisor error: {message}"),
            Err(_) => bail!("supervisor channel closed"),
        }
    }

    /// Complete a pending call from an inbound response frame.
    pub async fn complete(&self, frame: RpcFrame) {
        let Some(id) = frame.id else { return };
        let Some(tx) = self.pending.lock().await.remove(&id) else {
            warn!(id, "response for unknown call id");
            return;
        };
        let result = match frame.error {
            Some(e) => Err(e.message),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    }

    /// Answer a supervisor-originated request.
    pub fn respond(&self, frame: RpcFrame) {
        let _ = self.out_tx.send(frame.to_line());
    }
}

// ─── Protocol ref ─────────────────────────────────────────────────────────────

/// Worker-side capability handle for one live IRC connection.
///
/// Calls against a connection that has since closed are dropped silently by
/// the supervisor, so every capability call here simply succeeds.
pub struct ProtocolRef {
    conn: u64,
    rpc: Arc<WorkerRpc>,
}

impl ProtocolRef {
    pub fn new(conn: u64, rpc: Arc<WorkerRpc>) -> Self {
        Self { conn, rpc }
    }

    async fn call(&self, action: IrcAction) -> Result<()> {
        let params = serde_json::to_value(IrcCall {
            conn: self.conn,
            action,
        })
        .context("irc call encoding failed")?;
        self.rpc.call(METHOD_IRC_CALL, params).await.map(drop)
    }
}

#[async_trait]
impl IrcActions for ProtocolRef {
    async fn msg(&self, target: &str, text: &str) -> Result<()> {
        self.call(IrcAction::Msg {
            target: target.into(),
            text: text.into(),
        })
        .await
    }

    async fn join(&self, channel: &str, key: Option<&str>) -> Result<()> {
        self.call(IrcAction::Join {
            channel: channel.into(),
            key: key.map(Into::into),
        })
        .await
    }

    async fn leave(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        self.call(IrcAction::Leave {
            channel: channel.into(),
            reason: reason.map(Into::into),
        })
        .await
    }

    async fn topic(&self, channel: &str, topic: &str) -> Result<()> {
        self.call(IrcAction::Topic {
            channel: channel.into(),
            topic: topic.into(),
        })
        .await
    }

    async fn mode(&self, target: &str, modes: &str) -> Result<()> {
        self.call(IrcAction::Mode {
            target: target.into(),
            modes: modes.into(),
        })
        .await
    }

    async fn kick(&self, channel: &str, nick: &str, reason: Option<&str>) -> Result<()> {
        self.call(IrcAction::Kick {
            channel: channel.into(),
            nick: nick.into(),
            reason: reason.map(Into::into),
        })
        .await
    }

    async fn invite(&self, nick: &str, channel: &str) -> Result<()> {
        self.call(IrcAction::Invite {
            nick: nick.into(),
            channel: channel.into(),
        })
        .await
    }

    async fn notice(&self, target: &str, text: &str) -> Result<()> {
        self.call(IrcAction::Notice {
            target: target.into(),
            text: text.into(),
        })
        .await
    }

    async fn describe(&self, target: &str, text: &str) -> Result<()> {
        self.call(IrcAction::Describe {
            target: target.into(),
            text: text.into(),
        })
        .await
    }

    async fn away(&self, message: &str) -> Result<()> {
        self.call(IrcAction::Away {
            message: message.into(),
        })
        .await
    }

    async fn back(&self) -> Result<()> {
        self.call(IrcAction::Back).await
    }

    async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.call(IrcAction::Quit {
            message: message.map(Into::into),
        })
        .await
    }
}

// ─── Message handling ─────────────────────────────────────────────────────────

/// The API surface the supervisor calls into.
pub struct WorkerApi {
    registry: PluginRegistry,
}

impl WorkerApi {
    pub fn new(registry: PluginRegistry) -> Self {
        Self { registry }
    }

    /// Run one routed message through the staleness gate and the plugin
    /// handlers. Private messages are re-targeted at the sender nick and
    /// then take the public path.
    pub async fn handle_message(
        &self,
        irc: &dyn IrcActions,
        msg: RoutedMessage,
        private: bool,
        now: i64,
    ) {
        if stale(msg.enqueued_at, now) {
            info!(
                channel = %msg.channel,
                age_s = now - msg.enqueued_at,
                "dropping stale message"
            );
            return;
        }
        let channel = if private {
            msg.user.split('!').next().unwrap_or(&msg.user).to_string()
        } else {
            msg.channel
        };
        let event = MessageEvent {
            user: msg.user,
            channel,
            message: msg.message,
            line_budget: msg.line_budget,
        };
        self.registry.dispatch(EventKind::Privmsg, irc, &event).await;
    }
}

// ─── Worker main ──────────────────────────────────────────────────────────────

/// Run the worker until the supervisor channel closes or an admin command
/// asks for reincarnation.
pub async fn run(config: BotConfig) -> Result<()> {
    let (reincarnate_tx, mut reincarnate_rx) = mpsc::unbounded_channel();
    let registry = PluginRegistry::load(&config.plugins, &config.core, reincarnate_tx).await;
    let api = Arc::new(WorkerApi::new(registry));
    let rpc = WorkerRpc::new();

    let reader = tokio::spawn(read_loop(api, Arc::clone(&rpc)));

    rpc.call(METHOD_REGISTER, serde_json::json!({}))
        .await
        .context("registration with supervisor failed")?;
    info!("registered with supervisor");

    tokio::select! {
        _ = reincarnate_rx.recv() => {
            info!("reincarnate requested — exiting");
        }
        _ = reader => {
            info!("supervisor channel closed — exiting");
        }
    }
    Ok(())
}

/// Pump frames from stdin: responses complete pending calls, requests are
/// dispatched on their own task so a slow handler never blocks the channel.
async fn read_loop(api: Arc<WorkerApi>, rpc: Arc<WorkerRpc>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return,
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame: RpcFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(err = %e, "unparseable frame from supervisor");
                continue;
            }
        };
        if frame.is_request() {
            tokio::spawn(handle_request(Arc::clone(&api), Arc::clone(&rpc), frame));
        } else {
            rpc.complete(frame).await;
        }
    }
}

/// Serve one supervisor request. Handler failures are logged here and never
/// travel back as errors — the supervisor only sees delivery problems.
async fn handle_request(api: Arc<WorkerApi>, rpc: Arc<WorkerRpc>, frame: RpcFrame) {
    let id = frame.id.unwrap_or(0);
    let method = frame.method.unwrap_or_default();
    let private = match method.as_str() {
        METHOD_PUBLIC_MESSAGE => false,
        METHOD_PRIVATE_MESSAGE => true,
        other => {
            rpc.respond(RpcFrame::error_response(
                id,
                ERR_METHOD_NOT_FOUND,
                format!("unknown method {other}"),
            ));
            return;
        }
    };
    let msg: RoutedMessage = match serde_json::from_value(frame.params.unwrap_or(Value::Null)) {
        Ok(msg) => msg,
        Err(e) => {
            error!(err = %e, method = %method, "malformed routed message");
            rpc.respond(RpcFrame::error_response(
                id,
                ERR_INVALID_PARAMS,
                e.to_string(),
            ));
            return;
        }
    };
    let conn = msg.conn;
    let now = chrono::Utc::now().timestamp();
    let protocol = ProtocolRef::new(conn, Arc::clone(&rpc));
    api.handle_message(&protocol, msg, private, now).await;
    rpc.respond(RpcFrame::response(id, Value::Null));
}
