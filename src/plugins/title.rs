// SPDX-License-Identifier: MIT
//! URL title announcements.
//!
//! Walks every URL in a message through: SSRF filter → negative cache →
//! positive cache → bounded fetch → similarity filter → announce. Failures
//! anywhere past the SSRF filter put the URL in the negative cache and the
//! walk moves on; the enclosing message is never aborted. A 2 s stall after
//! each announcement keeps the bot from flooding the channel.

use crate::cache::TtlCache;
use crate::fetch::similarity::{dynsearch, prepare_title, prepare_url};
use crate::fetch::ssrf::acceptable_netloc;
use crate::fetch::urlscan::find_urls;
use crate::fetch::{FetchError, UrlFetcher};
use crate::session::IrcActions;
use crate::plugins::{MessageEvent, Plugin};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Positive cache: successfully fetched titles.
const POSITIVE_TTL: Duration = Duration::from_secs(3600);
/// Negative cache: recently failed URLs.
const NEGATIVE_TTL: Duration = Duration::from_secs(60);
/// Pause between announcements from the same message.
const THROTTLE: Duration = Duration::from_secs(2);
/// Default cap on announced title length (plugin config `max_title_length`).
const DEFAULT_MAX_TITLE_LENGTH: usize = 200;

/// Seam for the actual HTTP fetch, so the pipeline is testable offline.
#[async_trait]
trait TitleSource: Send + Sync {
    async fn get_title(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl TitleSource for UrlFetcher {
    async fn get_title(&self, url: &str) -> Result<String, FetchError> {
        UrlFetcher::get_title(self, url).await
    }
}

pub struct TitlePlugin {
    name: String,
    source: Box<dyn TitleSource>,
    hits: TtlCache<String>,
    misses: TtlCache<()>,
    max_title_length: usize,
}

impl TitlePlugin {
    pub async fn new(name: String, config: &serde_json::Value) -> Result<Self> {
        let max_title_length = config
            .get("max_title_length")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_TITLE_LENGTH);
        Self::with_source(name, Box::new(UrlFetcher::new()?), max_title_length).await
    }

    async fn with_source(
        name: String,
        source: Box<dyn TitleSource>,
        max_title_length: usize,
    ) -> Result<Self> {
        let hits = TtlCache::new(POSITIVE_TTL);
        hits.enable().await;
        let misses = TtlCache::new(NEGATIVE_TTL);
        misses.enable().await;
        Ok(Self {
            name,
            source,
            hits,
            misses,
            max_title_length,
        })
    }

    /// Announce `title` unless it only repeats the URL path, then stall.
    async fn announce(&self, irc: &dyn IrcActions, channel: &str, title: &str, url: &Url) -> Result<()> {
        if !dynsearch(&prepare_url(url), &prepare_title(title)) {
            debug!(%url, "title too similar to URL — suppressed");
            return Ok(());
        }
        irc.msg(channel, &format!("title: {title}")).await?;
        tokio::time::sleep(THROTTLE).await;
        Ok(())
    }

    async fn fail(&self, url: &str, err: anyhow::Error) {
        self.misses.update(url, ()).await;
        warn!(url, err = %err, "adding URL to temporary block list");
    }

    /// Process one URL end to end. Any error is the caller's cue to
    /// negative-cache the URL.
    async fn process_url(
        &self,
        irc: &dyn IrcActions,
        channel: &str,
        line_budget: usize,
        raw: &str,
        url: &Url,
    ) -> Result<()> {
        if let Some(title) = self.hits.fetch(raw).await {
            debug!(url = raw, "title cache hit");
            return self.announce(irc, channel, &title, url).await;
        }
        debug!(url = raw, "title cache miss — fetching");
        let title = self.source.get_title(raw).await?;
        let title = truncate_chars(&title, self.max_title_length.min(line_budget));
        if title.is_empty() {
            return Ok(());
        }
        self.hits.update(raw, title.clone()).await;
        self.announce(irc, channel, &title, url).await
    }
}

#[async_trait]
impl Plugin for TitlePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_privmsg(&self, irc: &dyn IrcActions, event: &MessageEvent) -> Result<()> {
        for raw in find_urls(&event.message) {
            let url = match Url::parse(raw) {
                Ok(url) => url,
                Err(e) => {
                    debug!(url = raw, err = %e, "unparseable URL skipped");
                    continue;
                }
            };
            let Some(host) = url.host_str() else { continue };
            if !acceptable_netloc(host) {
                debug!(url = raw, "internal host rejected");
                continue;
            }
            if self.misses.fetch(raw).await.is_some() {
                info!(url = raw, "skipped title check because of previous failures");
                continue;
            }
            if let Err(e) = self
                .process_url(irc, &event.channel, event.line_budget, raw, &url)
                .await
            {
                self.fail(raw, e).await;
            }
        }
        Ok(())
    }

    async fn unload(&self) {
        self.hits.disable().await;
        self.misses.disable().await;
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => s[..i].to_string(),
        None => s.to_string(),
    }
}
