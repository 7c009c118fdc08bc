//! The update-able descriptor attached to feed and node-source-root nodes.

use serde::{Deserialize, Serialize};

/// How a subscription's `source_url` should be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    /// Fetch over HTTP(S).
    Http,
    /// Read from a local file path.
    File,
    /// Run as a local command, capturing stdout.
    Cmd,
}

impl SourceType {
    /// Derives a source type from a `source_url` string when none was
    /// explicitly recorded, per spec §4.3 ("source_type hint... derived
    /// from source if absent").
    #[must_use]
    pub fn derive(source_url: &str) -> Self {
        if let Some(stripped) = source_url.strip_prefix('|') {
            let _ = stripped;
            Self::Cmd
        } else if source_url.starts_with("http://") || source_url.starts_with("https://") {
            Self::Http
        } else {
            Self::File
        }
    }
}

/// Conditional-GET and polling bookkeeping carried between fetches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateState {
    /// `Last-Modified` value from the most recent 200 response.
    pub last_modified: Option<String>,
    /// `ETag` value from the most recent 200 response.
    pub etag: Option<String>,
    /// Unix timestamp of the last poll attempt (successful or not).
    pub last_poll_ts: i64,
    /// Unix timestamp of the last favicon poll.
    pub last_favicon_poll_ts: i64,
    /// Rolling count of items seen this calendar week, for TTL heuristics.
    pub max_weekly_count: u32,
    /// Cookie jar contents scoped to this subscription's host, serialized.
    pub cookies: Vec<(String, String)>,
}

/// User-configurable fetch options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// HTTP basic-auth username, if set directly (vs. via the auth plugin).
    pub username: Option<String>,
    /// HTTP basic-auth password. Never serialized to OPML exports for
    /// third parties (see `crate::opml`).
    pub password: Option<String>,
    /// Bypass the process-global proxy for this subscription.
    pub dont_use_proxy: bool,
    /// Opaque reference into the shared cookie jar, keyed by hostname.
    pub cookie_jar_ref: Option<String>,
}

/// The record attached to every feed and node-source-root node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// URL, file path, or `|command` string.
    pub source_url: String,
    /// Derived or explicit fetch mechanism.
    pub source_type: SourceType,
    /// Optional local post-processor piped the fetched body.
    pub filter_cmd: Option<String>,
    /// Conditional-GET / polling bookkeeping.
    pub update_state: UpdateState,
    /// User-configurable fetch options.
    pub update_options: UpdateOptions,
    /// Minutes; `-1` = use provider default, `0` = never auto-update,
    /// positive = explicit override.
    pub update_interval: i32,
    /// Derived from the feed's declared TTL/update period, when known.
    pub default_update_interval: Option<u32>,
    /// Last observed HTTP-layer error text.
    pub update_error: Option<String>,
    /// Last observed HTTP status code, when an error occurred.
    pub http_error_code: Option<u16>,
    /// Last observed filter-command error text.
    pub filter_error: Option<String>,
    /// Set once the feed has reported a permanent failure (410, or the
    /// consecutive-failure cap — see `crate::scheduler`).
    pub discontinued: bool,
    /// Discriminator selecting the prepare/process callback pair (plain
    /// feed vs. a specific node-source provider's subscription kind).
    pub subscription_type: SubscriptionType,
    /// Consecutive failed fetches, used for exponential backoff.
    pub consecutive_failures: u32,
    /// Unix timestamp this subscription next becomes due, or `None` if it
    /// has never been scheduled.
    pub next_due: Option<i64>,
    /// Whether a request for this subscription is currently in flight.
    #[serde(skip)]
    pub in_flight: bool,
}

/// Which prepare/process callback pair handles this subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionType {
    /// An ordinary syndication feed, handled by `crate::parser`.
    Feed,
    /// The root of a Google-Reader-API-compatible node source.
    NodeSource,
}

impl Subscription {
    /// Creates a new plain-feed subscription with default update state.
    #[must_use]
    pub fn new_feed(source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let source_type = SourceType::derive(&source_url);
        Self {
            source_url,
            source_type,
            filter_cmd: None,
            update_state: UpdateState::default(),
            update_options: UpdateOptions::default(),
            update_interval: -1,
            default_update_interval: None,
            update_error: None,
            http_error_code: None,
            filter_error: None,
            discontinued: false,
            subscription_type: SubscriptionType::Feed,
            consecutive_failures: 0,
            next_due: None,
            in_flight: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_http_source_type() {
        assert_eq!(SourceType::derive("https://example.test/feed.xml"), SourceType::Http);
    }

    #[test]
    fn derives_cmd_source_type() {
        assert_eq!(SourceType::derive("|/usr/bin/fetch-feed"), SourceType::Cmd);
    }

    #[test]
    fn derives_file_source_type() {
        assert_eq!(SourceType::derive("/home/user/feed.xml"), SourceType::File);
    }
}
