//! Error taxonomy shared across the node tree, request layer, parser
//! dispatch, merge engine and node-source runtime.
//!
//! Every fallible operation in this crate returns one of these categories so
//! callers can apply the propagation policy: network/backoff errors never
//! stop other subscriptions from updating, parse errors are confined to the
//! feed that produced them, and only store corruption or a failed OPML load
//! at startup is treated as fatal.

/// Error classification used throughout the update pipeline.
///
/// The variants mirror the categories a refresh cycle can end in: most are
/// recoverable and drive scheduler backoff rather than aborting anything.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// DNS failure, connection refused, timeout, or a 5xx response.
    /// Retried with backoff; does not surface aggressively to the user.
    #[error("transient network error for {url}: {message}")]
    NetworkTransient {
        /// The request URL that failed.
        url: String,
        /// Human-readable detail.
        message: String,
    },

    /// 410 Gone, or repeated 404s past the discontinued threshold.
    /// Sets the subscription's `discontinued` flag; future auto-updates
    /// are inhibited.
    #[error("permanent network error for {url}: {message}")]
    NetworkPermanent {
        /// The request URL that failed permanently.
        url: String,
        /// Human-readable detail.
        message: String,
    },

    /// 401 or 407 without usable credentials. One automatic retry is made
    /// after querying the auth plugin; if that also fails, this is
    /// surfaced with a prompt request.
    #[error("authentication required for {url}")]
    AuthRequired {
        /// The request URL that demanded credentials.
        url: String,
    },

    /// 301 Moved Permanently. Not really an error: the caller updates
    /// `source_url` and proceeds with the new URL.
    #[error("permanent redirect from {from} to {to}")]
    RedirectPermanent {
        /// Original URL.
        from: String,
        /// New URL to use going forward.
        to: String,
    },

    /// Body was received but no parser accepted it, or the accepting
    /// parser rejected the whole document. The item list is left
    /// unchanged; the node is marked "available but errored".
    #[error("parse error: {0}")]
    Parse(String),

    /// The subscription's filter command exited non-zero. The parser
    /// still runs on whatever body the filter produced.
    #[error("filter command failed: {0}")]
    Filter(String),

    /// An edit-action was rejected by the remote node source. Surfaced to
    /// the user; local state is not reverted automatically.
    #[error("remote rejected edit action: {0}")]
    Conflict(String),

    /// The request was cancelled before or during flight. Not counted as
    /// an error for scheduler backoff purposes.
    #[error("request cancelled")]
    Cancelled,

    /// Item store corruption or an OPML load failure at startup. Always
    /// terminal; must surface to the host with a clear reason.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Whether this error should count toward a subscription's
    /// consecutive-failure counter (see `scheduler::Due`).
    #[must_use]
    pub const fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::RedirectPermanent { .. })
    }

    /// Whether this error should set the subscription's `discontinued`
    /// flag immediately, independent of the consecutive-failure cap.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::NetworkPermanent { .. })
    }
}

/// Classifies a `reqwest::Error` into the transient/permanent split used by
/// the request layer and scheduler.
///
/// Grounded on the "is this our fault or theirs" heuristic: DNS, TLS and
/// connect-level failures are transient (infrastructure hiccups); the HTTP
/// status classification (410/404) happens separately once a response is
/// actually received, since `reqwest::Error` alone cannot see a 410.
#[must_use]
pub fn classify_transport_error(url: &str, err: &reqwest::Error) -> CoreError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    let is_infra = err.is_connect()
        || err.is_timeout()
        || lowered.contains("dns")
        || lowered.contains("ssl")
        || lowered.contains("tls")
        || lowered.contains("certificate")
        || lowered.contains("hostname")
        || lowered.contains("domain");
    if is_infra {
        CoreError::NetworkTransient {
            url: url.to_string(),
            message,
        }
    } else {
        CoreError::NetworkPermanent {
            url: url.to_string(),
            message,
        }
    }
}

impl From<crate::node::TreeError> for CoreError {
    fn from(err: crate::node::TreeError) -> Self {
        Self::Fatal(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_error_flags_discontinued() {
        let e = CoreError::NetworkPermanent {
            url: "http://example.test/feed.xml".into(),
            message: "410 gone".into(),
        };
        assert!(e.is_permanent());
        assert!(e.counts_as_failure());
    }

    #[test]
    fn cancelled_does_not_count_as_failure() {
        assert!(!CoreError::Cancelled.counts_as_failure());
    }
}
