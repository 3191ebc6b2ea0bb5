//! Per-network IRC sessions.
//!
//! Each [`ServerSession`] owns one reconnect loop: build a client, sign on,
//! join the configured channels, then pump inbound messages to the RPC
//! bridge and outbound [`IrcAction`]s to the wire. Reconnection uses bounded
//! exponential backoff (10 s start, ×1.5, capped at 120 s, no jitter); a
//! successful sign-on resets the delay.

use crate::config::NetworkConfig;
use crate::rpc::bridge::RpcBridge;
use crate::rpc::{IrcAction, METHOD_PRIVATE_MESSAGE, METHOD_PUBLIC_MESSAGE};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use irc::client::prelude::{Client, Command, Config, Message, Prefix, Response};
use irc::client::Sender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// RFC 1459 line limit, CRLF included.
const MAX_LINE_BYTES: usize = 512;
/// Subtracted from every budget to absorb server-side prefix expansion.
const SAFETY_MARGIN: usize = 50;

pub(crate) const RECONNECT_INITIAL: Duration = Duration::from_secs(10);
pub(crate) const RECONNECT_MAX: Duration = Duration::from_secs(120);
const RECONNECT_FACTOR: f64 = 1.5;

/// Conservative byte budget for one reply line to `reply_target`.
///
/// Starts from the protocol line limit and subtracts the `PRIVMSG <target> :`
/// header, the trailing CRLF, and the safety margin.
pub fn line_budget(reply_target: &str) -> usize {
    MAX_LINE_BYTES.saturating_sub(
        "PRIVMSG ".len() + reply_target.len() + " :".len() + "\r\n".len() + SAFETY_MARGIN,
    )
}

pub(crate) fn next_reconnect_delay(current: Duration) -> Duration {
    current.mul_f64(RECONNECT_FACTOR).min(RECONNECT_MAX)
}

// ─── Capability surface ───────────────────────────────────────────────────────

/// The operations a worker-held protocol ref can perform against one live
/// IRC connection. Implemented by the worker's remote ref and by test mocks.
#[async_trait]
pub trait IrcActions: Send + Sync {
    async fn msg(&self, target: &str, text: &str) -> Result<()>;
    async fn join(&self, channel: &str, key: Option<&str>) -> Result<()>;
    async fn leave(&self, channel: &str, reason: Option<&str>) -> Result<()>;
    async fn topic(&self, channel: &str, topic: &str) -> Result<()>;
    async fn mode(&self, target: &str, modes: &str) -> Result<()>;
    async fn kick(&self, channel: &str, nick: &str, reason: Option<&str>) -> Result<()>;
    async fn invite(&self, nick: &str, channel: &str) -> Result<()>;
    async fn notice(&self, target: &str, text: &str) -> Result<()>;
    async fn describe(&self, target: &str, text: &str) -> Result<()>;
    async fn away(&self, message: &str) -> Result<()>;
    async fn back(&self) -> Result<()>;
    async fn quit(&self, message: Option<&str>) -> Result<()>;
}

// ─── Connection table ─────────────────────────────────────────────────────────

/// Supervisor-side routing table from connection id to the live session's
/// action channel. A ref whose id has been revoked is dropped silently.
#[derive(Default)]
pub struct ConnectionTable {
    connections: Mutex<HashMap<u64, mpsc::UnboundedSender<IrcAction>>>,
    next_id: AtomicU64,
}

impl ConnectionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a live connection; returns its id.
    pub async fn register(&self, sender: mpsc::UnboundedSender<IrcAction>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections.lock().await.insert(id, sender);
        id
    }

    /// Remove a connection on loss. Calls against the id become no-ops.
    pub async fn revoke(&self, id: u64) {
        self.connections.lock().await.remove(&id);
    }

    /// Route an action to the connection, or drop it silently when stale.
    pub async fn dispatch(&self, id: u64, action: IrcAction) -> bool {
        let connections = self.connections.lock().await;
        match connections.get(&id) {
            Some(sender) if sender.send(action).is_ok() => true,
            _ => {
                debug!(conn = id, "action against stale connection dropped");
                false
            }
        }
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// Runtime peer for one configured network.
pub struct ServerSession {
    network: NetworkConfig,
    nickname: String,
    realname: Option<String>,
    bridge: Arc<RpcBridge>,
    connections: Arc<ConnectionTable>,
}

impl ServerSession {
    pub fn new(
        network: NetworkConfig,
        nickname: String,
        realname: Option<String>,
        bridge: Arc<RpcBridge>,
        connections: Arc<ConnectionTable>,
    ) -> Self {
        Self {
            network,
            nickname,
            realname,
            bridge,
            connections,
        }
    }

    /// Reconnect loop — runs for the supervisor's lifetime.
    pub async fn run(self) {
        let mut delay = RECONNECT_INITIAL;
        loop {
            match self.connect_once().await {
                Ok(signed_on) => {
                    info!(network = %self.network.name, "connection to {} lost", self.network.hostname);
                    if signed_on {
                        delay = RECONNECT_INITIAL;
                    }
                }
                Err(e) => {
                    warn!(network = %self.network.name, err = %e, "connection attempt failed");
                }
            }
            debug!(network = %self.network.name, delay_s = delay.as_secs_f64(), "reconnecting after backoff");
            tokio::time::sleep(delay).await;
            delay = next_reconnect_delay(delay);
        }
    }

    /// One connection attempt: connect, pump until the stream ends.
    /// Returns whether sign-on completed (used to reset the backoff).
    async fn connect_once(&self) -> Result<bool> {
        let config = Config {
            nickname: Some(self.nickname.clone()),
            realname: self.realname.clone(),
            server: Some(self.network.hostname.clone()),
            port: Some(self.network.port),
            use_tls: Some(self.network.tls),
            ..Config::default()
        };
        let mut client = Client::from_config(config).await?;
        client.identify()?;
        let mut stream = client.stream()?;
        info!(network = %self.network.name, "connected to {}", self.network.hostname);

        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        let conn_id = self.connections.register(action_tx).await;
        let sender = client.sender();
        let mut signed_on = false;

        let ended: Result<()> = async {
            loop {
                tokio::select! {
                    inbound = stream.next() => match inbound {
                        Some(Ok(message)) => {
                            self.handle_message(&client, &sender, conn_id, &message, &mut signed_on)
                                .await;
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    },
                    action = action_rx.recv() => {
                        // The table holds the only sender, so this arm
                        // never sees `None` before `revoke` below.
                        if let Some(action) = action {
                            if let Err(e) = apply_action(&sender, action) {
                                warn!(network = %self.network.name, err = %e, "failed to send IRC action");
                            }
                        }
                    }
                }
            }
        }
        .await;

        self.connections.revoke(conn_id).await;
        ended.map(|_| signed_on)
    }

    async fn handle_message(
        &self,
        client: &Client,
        sender: &Sender,
        conn_id: u64,
        message: &Message,
        signed_on: &mut bool,
    ) {
        match &message.command {
            Command::Response(Response::RPL_ENDOFMOTD, _)
            | Command::Response(Response::ERR_NOMOTD, _) => {
                *signed_on = true;
                info!(network = %self.network.name, nick = client.current_nickname(), "signed on");
                for channel in &self.network.channels {
                    let result = sender.send(Command::JOIN(
                        channel.name.clone(),
                        channel.key.clone(),
                        None,
                    ));
                    if let Err(e) = result {
                        warn!(network = %self.network.name, channel = %channel.name, err = %e, "join failed");
                    }
                }
            }
            Command::PRIVMSG(target, text) => {
                let mask = match &message.prefix {
                    Some(Prefix::Nickname(nick, user, host)) => format!("{nick}!{user}@{host}"),
                    _ => return,
                };
                let own_nick = client.current_nickname();
                let private = target == own_nick;
                let reply_target = if private {
                    mask.split('!').next().unwrap_or(target)
                } else {
                    target.as_str()
                };
                let method = if private {
                    METHOD_PRIVATE_MESSAGE
                } else {
                    METHOD_PUBLIC_MESSAGE
                };
                let params = serde_json::json!({
                    "conn": conn_id,
                    "user": mask,
                    "channel": target,
                    "message": text,
                    "line_budget": line_budget(reply_target),
                });
                self.bridge.enqueue(method, params).await;
            }
            _ => {}
        }
    }
}

/// Translate one capability action into a protocol command.
fn apply_action(sender: &Sender, action: IrcAction) -> Result<()> {
    let command = match action {
        IrcAction::Msg { target, text } => Command::PRIVMSG(target, text),
        IrcAction::Join { channel, key } => Command::JOIN(channel, key, None),
        IrcAction::Leave { channel, reason } => Command::PART(channel, reason),
        IrcAction::Topic { channel, topic } => Command::TOPIC(channel, Some(topic)),
        IrcAction::Mode { target, modes } => Command::Raw("MODE".into(), vec![target, modes]),
        IrcAction::Kick {
            channel,
            nick,
            reason,
        } => Command::KICK(channel, nick, reason),
        IrcAction::Invite { nick, channel } => Command::INVITE(nick, channel),
        IrcAction::Notice { target, text } => Command::NOTICE(target, text),
        IrcAction::Describe { target, text } => {
            Command::PRIVMSG(target, format!("\u{1}ACTION {text}\u{1}"))
        }
        IrcAction::Away { message } => Command::AWAY(Some(message)),
        IrcAction::Back => Command::AWAY(None),
        IrcAction::Quit { message } => Command::QUIT(message),
    };
    sender.send(command)?;
    Ok(())
}
