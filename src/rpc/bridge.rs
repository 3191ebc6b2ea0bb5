// SPDX-License-Identifier: MIT
//! Outbound call queue between the IRC sessions and the worker process.
//!
//! Calls enter a FIFO via [`RpcBridge::enqueue`] and are drained into the
//! currently registered worker by a single cooperative task — one call
//! outstanding at a time, which is what backpressures the IRC side. The
//! queue survives worker restarts: calls enqueued while no worker is
//! registered sit until the next `register`. Delivery is at-most-once — a
//! call that fails mid-flight is logged and never re-queued.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Upper bound on queued calls; beyond it new calls are shed with a warning.
const MAX_QUEUED_CALLS: usize = 4096;

/// Failure of one remote call attempt.
#[derive(Debug, Error)]
pub enum CallError {
    /// The worker answered with an error — the link itself is fine.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
    /// The link died before an answer arrived (worker exited mid-call).
    #[error("worker link closed")]
    Closed,
}

/// One registered worker connection the bridge can deliver into.
#[async_trait]
pub trait WorkerLink: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError>;
}

/// A call waiting in the FIFO.
#[derive(Debug)]
pub struct QueuedCall {
    pub enqueued_at: i64,
    pub method: String,
    pub params: Value,
}

#[derive(Default)]
struct BridgeState {
    queue: VecDeque<QueuedCall>,
    link: Option<Arc<dyn WorkerLink>>,
    draining: bool,
}

/// Supervisor-side call queue. See the module docs for the state machine.
#[derive(Default)]
pub struct RpcBridge {
    state: Mutex<BridgeState>,
}

impl RpcBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a call for the worker, stamping the enqueue time into the
    /// params object. Starts the drain task if a worker is registered.
    pub async fn enqueue(self: &Arc<Self>, method: impl Into<String>, mut params: Value) {
        let method = method.into();
        let enqueued_at = Utc::now().timestamp();
        if let Value::Object(map) = &mut params {
            map.insert("enqueued_at".into(), Value::from(enqueued_at));
        }
        let mut state = self.state.lock().await;
        if state.queue.len() >= MAX_QUEUED_CALLS {
            warn!(%method, queued = state.queue.len(), "call queue full — shedding call");
            return;
        }
        state.queue.push_back(QueuedCall {
            enqueued_at,
            method,
            params,
        });
        self.maybe_drain(&mut state);
    }

    /// Register the current worker and drain anything that accumulated.
    pub async fn register(self: &Arc<Self>, link: Arc<dyn WorkerLink>) {
        let mut state = self.state.lock().await;
        debug!(queued = state.queue.len(), "worker registered");
        state.link = Some(link);
        self.maybe_drain(&mut state);
    }

    /// Drop the current worker (called on process exit). Queued calls stay.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.link = None;
        debug!(queued = state.queue.len(), "worker disconnected");
    }

    /// Number of calls currently waiting.
    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    fn maybe_drain(self: &Arc<Self>, state: &mut BridgeState) {
        if state.link.is_some() && !state.draining && !state.queue.is_empty() {
            state.draining = true;
            tokio::spawn(Arc::clone(self).drain());
        }
    }

    /// Serial drain loop: pop one call, await its result, repeat. Exactly
    /// one instance runs at a time (guarded by `draining`).
    async fn drain(self: Arc<Self>) {
        loop {
            let (call, link) = {
                let mut state = self.state.lock().await;
                let Some(link) = state.link.clone() else {
                    state.draining = false;
                    debug!("drain paused — no worker registered");
                    return;
                };
                let Some(call) = state.queue.pop_front() else {
                    state.draining = false;
                    return;
                };
                (call, link)
            };
            trace!(method = %call.method, "dispatching call");
            match link.call(&call.method, call.params).await {
                Ok(_) => {}
                Err(CallError::Remote { code, message }) => {
                    warn!(method = %call.method, code, %message, "remote call failed — not retried");
                }
                Err(CallError::Closed) => {
                    warn!(method = %call.method, "worker link closed mid-call — call dropped");
                    let mut state = self.state.lock().await;
                    // A new worker may already have registered; only clear
                    // the link we actually failed on.
                    if state
                        .link
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(current, &link))
                    {
                        state.link = None;
                    }
                    if state.link.is_some() {
                        // A replacement registered mid-call — keep draining.
                        continue;
                    }
                    state.draining = false;
                    return;
                }
            }
        }
    }
}
