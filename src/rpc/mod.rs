//! RPC wire types for the supervisor ↔ worker stdio channel.
//!
//! Frames are newline-delimited JSON-RPC 2.0 objects. The channel is
//! symmetric: the supervisor calls `handlePublicMessage` /
//! `handlePrivateMessage` on the worker, and the worker calls `register`
//! and `irc.call` back on the supervisor. A frame with a `method` is a
//! request; a frame with `result` or `error` answers the request with the
//! same `id`.

pub mod bridge;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Supervisor-side entry point the worker announces itself on.
pub const METHOD_REGISTER: &str = "register";
/// Routed message handlers exposed by the worker.
pub const METHOD_PUBLIC_MESSAGE: &str = "handlePublicMessage";
pub const METHOD_PRIVATE_MESSAGE: &str = "handlePrivateMessage";
/// IRC capability calls from the worker, routed by connection id.
pub const METHOD_IRC_CALL: &str = "irc.call";

pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;

/// One wire frame — request, notification, or response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFrame {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcFrame {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn response(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }

    /// Serialize to a single wire line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// ─── Call payloads ────────────────────────────────────────────────────────────

/// Params of `handlePublicMessage` / `handlePrivateMessage`.
///
/// `enqueued_at` is stamped by the bridge when the call enters the queue and
/// drives the worker-side staleness gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedMessage {
    /// Connection id of the originating IRC connection.
    pub conn: u64,
    /// Unix seconds at enqueue time.
    pub enqueued_at: i64,
    /// Full sender mask, `nick!user@host`.
    pub user: String,
    /// Destination channel, or the bot nickname for private messages.
    pub channel: String,
    pub message: String,
    /// Conservative per-reply byte budget computed by the session.
    pub line_budget: usize,
}

/// Params of `irc.call`: one capability invocation against a live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcCall {
    pub conn: u64,
    #[serde(flatten)]
    pub action: IrcAction,
}

/// The capability set of a protocol ref, mirrored on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IrcAction {
    Msg {
        target: String,
        text: String,
    },
    Join {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Leave {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Topic {
        channel: String,
        topic: String,
    },
    Mode {
        target: String,
        modes: String,
    },
    Kick {
        channel: String,
        nick: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Invite {
        nick: String,
        channel: String,
    },
    Notice {
        target: String,
        text: String,
    },
    Describe {
        target: String,
        text: String,
    },
    Away {
        message: String,
    },
    Back,
    Quit {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}
