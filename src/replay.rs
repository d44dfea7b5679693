//! Request log replay through a configured rate limiter.
//!
//! Input lines have the form `<client> <path> [token]`. Blank lines and lines
//! starting with `#` are ignored. Every request produces one JSON decision
//! line on the output.

use std::future::Future;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::{KeySource, TollgateConfig};
use crate::error::Result;
use crate::ratelimit::{LimiterId, RateLimiting, Verdict};

/// One replayed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRequest {
    /// Client address or host name
    pub client: String,
    /// Request path
    pub path: String,
    /// Optional API token
    pub token: Option<String>,
}

impl ReplayRequest {
    /// Parse one input line. Returns `None` for blank and comment lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut fields = line.split_whitespace();
        let client = fields.next()?.to_string();
        let path = fields.next().unwrap_or("/").to_string();
        let token = fields.next().map(str::to_string);

        Some(Self {
            client,
            path,
            token,
        })
    }

    /// The attribute a limit with this key source tracks.
    pub fn key(&self, source: KeySource) -> Option<String> {
        match source {
            KeySource::Client => Some(self.client.clone()),
            KeySource::Path => Some(self.path.clone()),
            KeySource::Token => self.token.clone(),
        }
    }
}

/// Build a rate limiter for replayed requests from configuration.
pub fn build_rate_limiting(config: &TollgateConfig) -> Result<RateLimiting<ReplayRequest>> {
    let mut builder = RateLimiting::builder();
    builder.settings(config.engine.store_settings());

    for rule in &config.limits {
        let source = rule.key;
        let extract = move |request: &ReplayRequest| request.key(source);
        match &rule.name {
            Some(name) => {
                builder.register_named_limit(name.clone(), rule.requests, rule.window(), extract)?
            }
            None => builder.register_limit(rule.requests, rule.window(), extract)?,
        };
    }

    if !config.exclude.path_suffixes.is_empty() {
        let exclude = config.exclude.clone();
        builder.exclude_request_when(move |request: &ReplayRequest| exclude.matches(&request.path));
    }

    builder.on_rate_limit_hit(|request: &ReplayRequest, key, retry_after| {
        debug!(
            client = %request.client,
            path = %request.path,
            key = key,
            retry_after = retry_after,
            "Request rejected"
        );
    });

    Ok(builder.build())
}

/// JSON line written for every replayed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionLine {
    /// 1-based input line number
    pub line: usize,
    /// Client of the request
    pub client: String,
    /// Path of the request
    pub path: String,
    /// `admit` or `reject`
    pub decision: &'static str,
    /// Limit that rejected the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limiter: Option<LimiterId>,
    /// Rejected key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Seconds until the rejected key may retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl DecisionLine {
    fn new(line: usize, request: &ReplayRequest, verdict: Verdict) -> Self {
        let (decision, limiter, key, retry_after_secs) = match verdict {
            Verdict::Admit => ("admit", None, None, None),
            Verdict::Reject {
                limiter,
                key,
                retry_after_secs,
            } => ("reject", Some(limiter), Some(key), Some(retry_after_secs)),
        };
        Self {
            line,
            client: request.client.clone(),
            path: request.path.clone(),
            decision,
            limiter,
            key,
            retry_after_secs,
        }
    }
}

/// Totals of a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Requests admitted
    pub admitted: usize,
    /// Requests rejected
    pub rejected: usize,
}

/// Replay every request from `input` and write one decision line per request.
pub async fn replay<R, W>(
    limiter: &RateLimiting<ReplayRequest>,
    input: R,
    output: &mut W,
) -> Result<ReplaySummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut summary = ReplaySummary::default();
    let mut number = 0;

    while let Some(line) = lines.next_line().await? {
        number += 1;
        let Some(request) = ReplayRequest::parse(&line) else {
            continue;
        };

        let verdict = limiter.check(&request)?;
        if verdict.is_admit() {
            summary.admitted += 1;
        } else {
            summary.rejected += 1;
        }

        let decision = DecisionLine::new(number, &request, verdict);
        match serde_json::to_string(&decision) {
            Ok(json) => {
                output.write_all(json.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
            Err(e) => warn!(error = %e, line = number, "Failed to serialize decision"),
        }
    }

    output.flush().await?;
    Ok(summary)
}

/// Replay until `input` ends or `shutdown` completes, flushing `output` either way.
///
/// Returns `None` when the replay was interrupted.
pub async fn replay_until<R, W, S>(
    limiter: &RateLimiting<ReplayRequest>,
    input: R,
    output: &mut W,
    shutdown: S,
) -> Result<Option<ReplaySummary>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let summary = tokio::select! {
        summary = replay(limiter, input, &mut *output) => Some(summary?),
        _ = shutdown => None,
    };

    output.flush().await?;
    Ok(summary)
}
