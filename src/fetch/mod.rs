// SPDX-License-Identifier: MIT
//! Bounded URL fetching and HTML title extraction.
//!
//! One GET per URL with a hard timeout, a `text/html` MIME gate, and a body
//! cap that truncates the stream at exactly [`MAX_BODY_BYTES`] before the
//! HTML parser sees it. Everything that deviates fails with a [`FetchError`]
//! and lands in the caller's negative cache.

pub mod similarity;
pub mod ssrf;
pub mod urlscan;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::StatusCode;
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Hard cap on how many body bytes reach the HTML parser.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
/// Whole-request timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// MIME types we are willing to parse.
const ACCEPTED_MIMES: &[&str] = &["text/html"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response status {0}")]
    Status(u16),
    #[error("missing or empty Content-Type")]
    NoContentType,
    #[error("unsupported mime {0}")]
    Mime(String),
}

/// Accumulates body chunks up to a fixed limit, truncating the chunk that
/// crosses it to the exact byte.
pub(crate) struct BodyCap {
    limit: usize,
    buf: Vec<u8>,
}

impl BodyCap {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: Vec::new(),
        }
    }

    /// Feed one chunk. Returns `false` once the cap is reached — the caller
    /// must stop reading (dropping the stream aborts the connection).
    pub(crate) fn push(&mut self, chunk: &[u8]) -> bool {
        let remaining = self.limit - self.buf.len();
        let take = remaining.min(chunk.len());
        self.buf.extend_from_slice(&chunk[..take]);
        self.buf.len() < self.limit
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// First `<title>` element of `html`, internal whitespace collapsed.
/// Missing title yields the empty string.
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").expect("title selector compiles");
    match document.select(&selector).next() {
        Some(element) => {
            let raw: String = element.text().collect();
            raw.split_whitespace().collect::<Vec<_>>().join(" ")
        }
        None => String::new(),
    }
}

/// HTTP client wrapper used by the title plugin.
pub struct UrlFetcher {
    client: reqwest::Client,
}

impl UrlFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!(
                "chirpd/",
                env!("CARGO_PKG_VERSION"),
                " title fetcher (+https://github.com/chirpd/chirpd)"
            ))
            .build()?;
        Ok(Self { client })
    }

    /// GET `url` and return its extracted, whitespace-collapsed title.
    ///
    /// Fails on non-200 status, missing/empty Content-Type, or a MIME type
    /// outside the accepted set. The body is streamed through the cap; the
    /// connection is dropped once the limit is hit.
    pub async fn get_title(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT_LANGUAGE, "en-US")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(FetchError::NoContentType)?;
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !ACCEPTED_MIMES.contains(&mime.as_str()) {
            return Err(FetchError::Mime(mime));
        }

        let mut cap = BodyCap::new(MAX_BODY_BYTES);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if !cap.push(&chunk?) {
                debug!(url, "body cap reached — aborting download");
                break;
            }
        }
        drop(stream);

        let body = cap.into_bytes();
        let text = String::from_utf8_lossy(&body);
        Ok(extract_title(&text))
    }
}
