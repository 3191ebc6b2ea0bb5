//! Plugin registry and dispatch.
//!
//! Plugins are registered at process start from the `plugins` config array —
//! a closed enumeration, no dynamic loading. Handlers for an event kind run
//! in registration order; a failing handler is logged and never stops the
//! rest of the sequence.

pub mod admin;
pub mod eval;
pub mod title;

use crate::config::{CoreConfig, PluginDescriptor};
use crate::session::IrcActions;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Event kinds plugins can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Privmsg,
}

/// One routed chat message as seen by plugin handlers.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Full sender mask, `nick!user@host`.
    pub user: String,
    /// Reply destination — already rewritten to the sender nick for
    /// private messages.
    pub channel: String,
    pub message: String,
    /// Byte budget for one reply line.
    pub line_budget: usize,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::Privmsg]
    }

    async fn on_privmsg(&self, irc: &dyn IrcActions, event: &MessageEvent) -> Result<()>;

    /// Cleanup hook, called when the plugin is dropped from the registry.
    async fn unload(&self) {}
}

/// Maps plugin names to instances and event kinds to ordered handler lists.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    handlers: HashMap<EventKind, Vec<Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every enabled descriptor from the closed plugin set.
    ///
    /// Unknown modules and construction failures are logged and skipped —
    /// one bad plugin never prevents the rest from loading.
    pub async fn load(
        descriptors: &[PluginDescriptor],
        core: &CoreConfig,
        reincarnate: mpsc::UnboundedSender<()>,
    ) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            if !descriptor.enabled {
                info!(plugin = %descriptor.name, "plugin disabled, skipping");
                continue;
            }
            let plugin: Result<Arc<dyn Plugin>> = match descriptor.module.as_str() {
                "admin" => Ok(Arc::new(admin::AdminPlugin::new(
                    descriptor.name.clone(),
                    core.db.clone(),
                    reincarnate.clone(),
                ))),
                "eval" => Ok(Arc::new(eval::EvalPlugin::new(descriptor.name.clone()))),
                "title" => title::TitlePlugin::new(descriptor.name.clone(), &descriptor.config)
                    .await
                    .map(|p| Arc::new(p) as Arc<dyn Plugin>),
                other => {
                    error!(plugin = %descriptor.name, module = other, "unknown plugin module");
                    continue;
                }
            };
            match plugin {
                Ok(plugin) => registry.register_plugin(plugin),
                Err(e) => {
                    error!(plugin = %descriptor.name, err = %e, "failed to load plugin")
                }
            }
        }
        registry
    }

    /// Record the plugin and register it for its subscribed events.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            warn!(plugin = %name, "plugin already registered, replacing");
        }
        for kind in plugin.subscriptions() {
            self.handlers.entry(kind).or_default().push(plugin.clone());
        }
        info!(plugin = %name, "registered plugin");
        self.plugins.insert(name, plugin);
    }

    /// Drop one plugin: run its `unload` hook and remove its handlers.
    pub async fn unload(&mut self, name: &str) {
        match self.plugins.remove(name) {
            Some(plugin) => {
                plugin.unload().await;
                for handlers in self.handlers.values_mut() {
                    handlers.retain(|p| !Arc::ptr_eq(p, &plugin));
                }
                info!(plugin = name, "unloaded plugin");
            }
            None => warn!(plugin = name, "plugin not found"),
        }
    }

    /// Run all handlers for `kind` in registration order, logging and
    /// suppressing per-handler failures.
    pub async fn dispatch(&self, kind: EventKind, irc: &dyn IrcActions, event: &MessageEvent) {
        let Some(handlers) = self.handlers.get(&kind) else {
            debug!(?kind, "no handlers registered");
            return;
        };
        for plugin in handlers {
            if let Err(e) = plugin.on_privmsg(irc, event).await {
                warn!(plugin = plugin.name(), err = %e, "plugin handler failed");
            }
        }
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

// ─── Test support ─────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testsupport::{event, RecordingIrc};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct OrderedPlugin {
        name: String,
        order: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Plugin for OrderedPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_privmsg(&self, _irc: &dyn IrcActions, _event: &MessageEvent) -> Result<()> {
            self.order.lock().await.push(self.name.clone());
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    struct CountingPlugin {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_privmsg(&self, _irc: &dyn IrcActions, _event: &MessageEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn ordered(name: &str, order: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn Plugin> {
        Arc::new(OrderedPlugin {
            name: name.into(),
            order: order.clone(),
            fail,
        })
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register_plugin(ordered("first", &order, false));
        registry.register_plugin(ordered("second", &order, false));
        registry.register_plugin(ordered("third", &order, false));

        let irc = RecordingIrc::new();
        registry
            .dispatch(EventKind::Privmsg, &irc, &event("#c", "hi"))
            .await;
        assert_eq!(*order.lock().await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_rest() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register_plugin(ordered("first", &order, true));
        registry.register_plugin(ordered("second", &order, false));

        let irc = RecordingIrc::new();
        registry
            .dispatch(EventKind::Privmsg, &irc, &event("#c", "hi"))
            .await;
        assert_eq!(*order.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn unload_removes_plugin_and_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register_plugin(Arc::new(CountingPlugin {
            calls: calls.clone(),
        }));
        assert_eq!(registry.handler_count(EventKind::Privmsg), 1);

        registry.unload("counting").await;
        assert_eq!(registry.handler_count(EventKind::Privmsg), 0);
        assert!(registry.plugin_names().is_empty());

        let irc = RecordingIrc::new();
        registry
            .dispatch(EventKind::Privmsg, &irc, &event("#c", "hi"))
            .await;
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn load_skips_disabled_and_unknown_plugins() {
        let core = crate::config::CoreConfig {
            log_file: "/tmp/chirpd-test.log".into(),
            db: "/tmp/chirpd-test.db".into(),
            nickname: "chirpd".into(),
            realname: None,
        };
        let descriptors = vec![
            crate::config::PluginDescriptor {
                name: "eval".into(),
                module: "eval".into(),
                enabled: true,
                config: serde_json::Value::Null,
            },
            crate::config::PluginDescriptor {
                name: "title".into(),
                module: "title".into(),
                enabled: false,
                config: serde_json::Value::Null,
            },
            crate::config::PluginDescriptor {
                name: "mystery".into(),
                module: "mystery".into(),
                enabled: true,
                config: serde_json::Value::Null,
            },
        ];
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = PluginRegistry::load(&descriptors, &core, tx).await;
        assert_eq!(registry.plugin_names(), vec!["eval"]);
        assert_eq!(registry.handler_count(EventKind::Privmsg), 1);
    }
}
