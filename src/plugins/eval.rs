//! `!eval` — boolean expression evaluation over a user-supplied truth set.
//!
//! Syntax: `!eval t1,t2,…:expr`. The reply is `Result: True` /
//! `Result: False`, or the evaluator's error message verbatim.

use crate::expr;
use crate::session::IrcActions;
use crate::plugins::{MessageEvent, Plugin};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

const PREFIX: &str = "!eval ";

pub struct EvalPlugin {
    name: String,
}

impl EvalPlugin {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Plugin for EvalPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_privmsg(&self, irc: &dyn IrcActions, event: &MessageEvent) -> Result<()> {
        let Some(rest) = event.message.strip_prefix(PREFIX) else {
            return Ok(());
        };
        let (truths, input) = rest.split_once(':').unwrap_or((rest, ""));
        let truths: HashSet<String> = truths.split(',').map(|s| s.trim().to_string()).collect();
        let reply = match expr::eval_bool(input, &truths) {
            Ok(value) => format!("Result: {}", if value { "True" } else { "False" }),
            Err(e) => e.to_string(),
        };
        irc.msg(&event.channel, &reply).await
    }
}
