//! Admin commands (`!reincarnate`, `!join`, `!leave`) with role-based
//! access control.
//!
//! Roles are resolved per command from the configured SQLite database —
//! a short-lived read-only connection, one parameterized query keyed by the
//! sender's full mask. `superadmin` grants every admin command; `ignored`
//! makes the handler a no-op for that sender.

use crate::session::IrcActions;
use crate::plugins::{MessageEvent, Plugin};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::ConnectOptions;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

const ROLE_QUERY: &str = "select roles.name from roles where roles.oid in \
    (select userroles.oid from (users natural join usermask) \
    natural join userroles where usermask.mask = ?)";

const SUPERADMIN: &str = "superadmin";
const IGNORED: &str = "ignored";

/// Roles held by `mask`, straight from the role store.
pub(crate) async fn resolve_roles(db: &Path, mask: &str) -> Result<Vec<String>> {
    let mut conn = SqliteConnectOptions::new()
        .filename(db)
        .read_only(true)
        .connect()
        .await
        .with_context(|| format!("cannot open role database {}", db.display()))?;
    let roles: Vec<String> = sqlx::query_scalar(ROLE_QUERY)
        .bind(mask)
        .fetch_all(&mut conn)
        .await
        .context("role query failed")?;
    Ok(roles)
}

pub struct AdminPlugin {
    name: String,
    db: PathBuf,
    /// Signals the worker main loop to exit; the supervisor respawns it.
    reincarnate: mpsc::UnboundedSender<()>,
}

impl AdminPlugin {
    pub fn new(name: String, db: PathBuf, reincarnate: mpsc::UnboundedSender<()>) -> Self {
        Self {
            name,
            db,
            reincarnate,
        }
    }
}

#[async_trait]
impl Plugin for AdminPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_privmsg(&self, irc: &dyn IrcActions, event: &MessageEvent) -> Result<()> {
        let Some(body) = event.message.strip_prefix('!') else {
            return Ok(());
        };
        let (command, suffix) = body.split_once(' ').unwrap_or((body, ""));
        if !matches!(command, "reincarnate" | "join" | "leave") {
            debug!(command, "unrecognized command");
            return Ok(());
        }

        // Role lookup happens only for recognized commands.
        let roles = resolve_roles(&self.db, &event.user).await?;
        if roles.iter().any(|r| r == IGNORED) {
            return Ok(());
        }
        let superadmin = roles.iter().any(|r| r == SUPERADMIN);

        match command {
            "reincarnate" => {
                if superadmin {
                    info!(user = %event.user, "restarting worker");
                    let _ = self.reincarnate.send(());
                } else {
                    info!(user = %event.user, "denied reincarnate for non-superadmin");
                }
            }
            "join" => {
                let (channel, key) = suffix.split_once(' ').unwrap_or((suffix, ""));
                let key = (!key.is_empty()).then_some(key);
                if superadmin && !channel.is_empty() {
                    info!(channel, has_key = key.is_some(), "joining channel");
                    irc.join(channel, key).await?;
                }
            }
            "leave" => {
                let (channel, reason) = suffix.split_once(' ').unwrap_or((suffix, ""));
                let reason = (!reason.is_empty()).then_some(reason);
                if superadmin && !channel.is_empty() {
                    info!(channel, "leaving channel");
                    irc.leave(channel, reason).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testsupport::{event, RecordingIrc};
    use crate::rpc::IrcAction;
    use sqlx::Connection;

    /// Build a role database with the external schema the query expects.
    async fn role_db(grants: &[(&str, &str)]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut conn = SqliteConnectOptions::new()
            .filename(file.path())
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        for ddl in [
            "create table users (uid integer primary key)",
            "create table usermask (uid integer, mask text)",
            "create table userroles (uid integer, oid integer)",
            "create table roles (oid integer primary key, name text)",
        ] {
            sqlx::query(ddl).execute(&mut conn).await.unwrap();
        }

        let mut next_uid = 1i64;
        let mut next_oid = 1i64;
        for (mask, role) in grants {
            let oid: Option<i64> = sqlx::query_scalar("select oid from roles where name = ?")
                .bind(role)
                .fetch_optional(&mut conn)
                .await
                .unwrap();
            let oid = match oid {
                Some(oid) => oid,
                None => {
                    sqlx::query("insert into roles (oid, name) values (?, ?)")
                        .bind(next_oid)
                        .bind(role)
                        .execute(&mut conn)
                        .await
                        .unwrap();
                    next_oid += 1;
                    next_oid - 1
                }
            };
            let uid: Option<i64> = sqlx::query_scalar("select uid from usermask where mask = ?")
                .bind(mask)
                .fetch_optional(&mut conn)
                .await
                .unwrap();
            let uid = match uid {
                Some(uid) => uid,
                None => {
                    sqlx::query("insert into users (uid) values (?)")
                        .bind(next_uid)
                        .execute(&mut conn)
                        .await
                        .unwrap();
                    sqlx::query("insert into usermask (uid, mask) values (?, ?)")
                        .bind(next_uid)
                        .bind(mask)
                        .execute(&mut conn)
                        .await
                        .unwrap();
                    next_uid += 1;
                    next_uid - 1
                }
            };
            sqlx::query("insert into userroles (uid, oid) values (?, ?)")
                .bind(uid)
                .bind(oid)
                .execute(&mut conn)
                .await
                .unwrap();
        }
        conn.close().await.unwrap();
        file
    }

    fn admin_event(message: &str) -> MessageEvent {
        let mut e = event("#chan", message);
        e.user = "boss!user@host".into();
        e
    }

    fn plugin(
        db: &tempfile::NamedTempFile,
    ) -> (AdminPlugin, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            AdminPlugin::new("admin".into(), db.path().to_path_buf(), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn resolves_roles_for_mask() {
        let db = role_db(&[
            ("boss!user@host", "superadmin"),
            ("boss!user@host", "oper"),
            ("peon!user@host", "oper"),
        ])
        .await;
        let mut roles = resolve_roles(db.path(), "boss!user@host").await.unwrap();
        roles.sort();
        assert_eq!(roles, vec!["oper", "superadmin"]);
        assert_eq!(
            resolve_roles(db.path(), "peon!user@host").await.unwrap(),
            vec!["oper"]
        );
        assert!(resolve_roles(db.path(), "ghost!x@y").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reincarnate_requires_superadmin() {
        let db = role_db(&[("boss!user@host", "oper")]).await;
        let (plugin, mut rx) = plugin(&db);
        let irc = RecordingIrc::new();
        plugin
            .on_privmsg(&irc, &admin_event("!reincarnate"))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reincarnate_signals_worker_shutdown() {
        let db = role_db(&[("boss!user@host", "superadmin")]).await;
        let (plugin, mut rx) = plugin(&db);
        let irc = RecordingIrc::new();
        plugin
            .on_privmsg(&irc, &admin_event("!reincarnate"))
            .await
            .unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn ignored_role_makes_handler_a_noop() {
        let db = role_db(&[
            ("boss!user@host", "superadmin"),
            ("boss!user@host", "ignored"),
        ])
        .await;
        let (plugin, mut rx) = plugin(&db);
        let irc = RecordingIrc::new();
        plugin
            .on_privmsg(&irc, &admin_event("!reincarnate"))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert!(irc.take().await.is_empty());
    }

    #[tokio::test]
    async fn join_with_optional_key() {
        let db = role_db(&[("boss!user@host", "superadmin")]).await;
        let (plugin, _rx) = plugin(&db);
        let irc = RecordingIrc::new();
        plugin
            .on_privmsg(&irc, &admin_event("!join #lounge"))
            .await
            .unwrap();
        plugin
            .on_privmsg(&irc, &admin_event("!join #vault hunter2"))
            .await
            .unwrap();
        assert_eq!(
            irc.take().await,
            vec![
                IrcAction::Join {
                    channel: "#lounge".into(),
                    key: None
                },
                IrcAction::Join {
                    channel: "#vault".into(),
                    key: Some("hunter2".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn leave_requires_superadmin() {
        let db = role_db(&[("boss!user@host", "oper")]).await;
        let (plugin, _rx) = plugin(&db);
        let irc = RecordingIrc::new();
        plugin
            .on_privmsg(&irc, &admin_event("!leave #lounge done here"))
            .await
            .unwrap();
        assert!(irc.take().await.is_empty());
    }

    #[tokio::test]
    async fn leave_passes_reason() {
        let db = role_db(&[("boss!user@host", "superadmin")]).await;
        let (plugin, _rx) = plugin(&db);
        let irc = RecordingIrc::new();
        plugin
            .on_privmsg(&irc, &admin_event("!leave #lounge bye for now"))
            .await
            .unwrap();
        assert_eq!(
            irc.take().await,
            vec![IrcAction::Leave {
                channel: "#lounge".into(),
                reason: Some("bye for now".into())
            }]
        );
    }

    #[tokio::test]
    async fn non_commands_skip_the_database_entirely() {
        // Nonexistent DB path: only recognized commands would touch it.
        let (tx, _rx) = mpsc::unbounded_channel();
        let plugin = AdminPlugin::new("admin".into(), "/nonexistent/roles.db".into(), tx);
        let irc = RecordingIrc::new();
        plugin
            .on_privmsg(&irc, &admin_event("just chatting"))
            .await
            .unwrap();
        plugin
            .on_privmsg(&irc, &admin_event("!weather tomorrow"))
            .await
            .unwrap();
    }
}
