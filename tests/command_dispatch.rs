//! Integration tests for routed-message handling: the staleness gate, the
//! private-message rewrite, and the `!eval` command surface.
//! No network or subprocess needed — the IRC side is a recording mock.

use anyhow::Result;
use async_trait::async_trait;
use chirpd::config::{CoreConfig, PluginDescriptor};
use chirpd::session::IrcActions;
use chirpd::plugins::PluginRegistry;
use chirpd::rpc::RoutedMessage;
use chirpd::worker::WorkerApi;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const DAY_SECS: i64 = 24 * 60 * 60;

/// Records `msg` calls; every other capability is a stub.
#[derive(Default)]
struct MockIrc {
    sent: Mutex<Vec<(String, String)>>,
}

impl MockIrc {
    async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl IrcActions for MockIrc {
    async fn msg(&self, target: &str, text: &str) -> Result<()> {
        self.sent.lock().await.push((target.into(), text.into()));
        Ok(())
    }
    async fn join(&self, _channel: &str, _key: Option<&str>) -> Result<()> {
        Ok(())
    }
    async fn leave(&self, _channel: &str, _reason: Option<&str>) -> Result<()> {
        Ok(())
    }
    async fn topic(&self, _channel: &str, _topic: &str) -> Result<()> {
        Ok(())
    }
    async fn mode(&self, _target: &str, _modes: &str) -> Result<()> {
        Ok(())
    }
    async fn kick(&self, _channel: &str, _nick: &str, _reason: Option<&str>) -> Result<()> {
        Ok(())
    }
    async fn invite(&self, _nick: &str, _channel: &str) -> Result<()> {
        Ok(())
    }
    async fn notice(&self, _target: &str, _text: &str) -> Result<()> {
        Ok(())
    }
    async fn describe(&self, _target: &str, _text: &str) -> Result<()> {
        Ok(())
    }
    async fn away(&self, _message: &str) -> Result<()> {
        Ok(())
    }
    async fn back(&self) -> Result<()> {
        Ok(())
    }
    async fn quit(&self, _message: Option<&str>) -> Result<()> {
        Ok(())
    }
}

fn core() -> CoreConfig {
    CoreConfig {
        log_file: "/tmp/chirpd-test.log".into(),
        db: "/tmp/chirpd-test-roles.db".into(),
        nickname: "chirpd".into(),
        realname: None,
    }
}

async fn eval_api() -> WorkerApi {
    let descriptors = vec![PluginDescriptor {
        name: "eval".into(),
        module: "eval".into(),
        enabled: true,
        config: serde_json::Value::Null,
    }];
    let (tx, _rx) = mpsc::unbounded_channel();
    let registry = PluginRegistry::load(&descriptors, &core(), tx).await;
    WorkerApi::new(registry)
}

fn routed(channel: &str, message: &str, enqueued_at: i64) -> RoutedMessage {
    RoutedMessage {
        conn: 1,
        enqueued_at,
        user: "alice!ident@host.example".into(),
        channel: channel.into(),
        message: message.into(),
        line_budget: 430,
    }
}

#[tokio::test]
async fn eval_happy_path_replies_true() {
    let api = eval_api().await;
    let irc = Arc::new(MockIrc::default());
    let now = 1_700_000_000;
    api.handle_message(
        irc.as_ref(),
        routed("#chan", "!eval foo,bar:foo & bar", now),
        false,
        now,
    )
    .await;
    assert_eq!(
        irc.sent().await,
        vec![("#chan".to_string(), "Result: True".to_string())]
    );
}

#[tokio::test]
async fn eval_absent_identifier_replies_false() {
    let api = eval_api().await;
    let irc = Arc::new(MockIrc::default());
    let now = 1_700_000_000;
    api.handle_message(irc.as_ref(), routed("#chan", "!eval bar:foo", now), false, now)
        .await;
    assert_eq!(
        irc.sent().await,
        vec![("#chan".to_string(), "Result: False".to_string())]
    );
}

#[tokio::test]
async fn eval_syntax_error_reports_position() {
    let api = eval_api().await;
    let irc = Arc::new(MockIrc::default());
    let now = 1_700_000_000;
    api.handle_message(irc.as_ref(), routed("#chan", "!eval :a&&b", now), false, now)
        .await;
    let sent = irc.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("Invalid token & at position 2"));
}

#[tokio::test]
async fn private_eval_replies_to_sender_nick() {
    let api = eval_api().await;
    let irc = Arc::new(MockIrc::default());
    let now = 1_700_000_000;
    // Private messages arrive addressed to the bot's own nickname.
    api.handle_message(
        irc.as_ref(),
        routed("chirpd", "!eval x:x", now),
        true,
        now,
    )
    .await;
    assert_eq!(
        irc.sent().await,
        vec![("alice".to_string(), "Result: True".to_string())]
    );
}

#[tokio::test]
async fn stale_message_never_reaches_plugins() {
    let api = eval_api().await;
    let irc = Arc::new(MockIrc::default());
    let now = 1_700_000_000;
    api.handle_message(
        irc.as_ref(),
        routed("#chan", "!eval x:x", now - DAY_SECS - 5),
        false,
        now,
    )
    .await;
    assert!(irc.sent().await.is_empty());
}

#[tokio::test]
async fn day_old_message_is_still_processed() {
    // Exactly 24h is the boundary — not yet stale.
    let api = eval_api().await;
    let irc = Arc::new(MockIrc::default());
    let now = 1_700_000_000;
    api.handle_message(
        irc.as_ref(),
        routed("#chan", "!eval x:x", now - DAY_SECS),
        false,
        now,
    )
    .await;
    assert_eq!(irc.sent().await.len(), 1);
}
