//! Google Reader API wire types (spec §4.7), kept close to the shapes a
//! real FreshRSS/Miniflux/reference-GReader server returns.

use serde::{Deserialize, Serialize};

/// Authentication token from login.
#[derive(Debug, Clone)]
pub struct AuthToken {
    /// The auth token string, sent as `Authorization: GoogleLogin auth=...`.
    pub token: String,
}

/// A subscription (feed) as reported by `subscription_list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSubscription {
    /// Feed ID (format: `feed/{url}`).
    pub id: String,
    /// Feed title.
    pub title: String,
    /// Feed URL.
    pub url: String,
    /// Website URL.
    #[serde(default)]
    pub html_url: Option<String>,
    /// Categories/folders this subscription belongs to.
    #[serde(default)]
    pub categories: Vec<Category>,
}

/// A category/folder/tag.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Category {
    /// Category ID (format: `user/-/label/{name}`).
    pub id: String,
    /// Display label.
    pub label: String,
}

/// Response envelope from `subscription_list`.
#[derive(Debug, Deserialize)]
pub struct SubscriptionList {
    /// The subscriptions themselves.
    pub subscriptions: Vec<RemoteSubscription>,
}

/// Response envelope from `unread_count`.
#[derive(Debug, Deserialize)]
pub struct UnreadCount {
    /// Per-feed/category unread counts.
    #[serde(default)]
    pub unreadcounts: Vec<UnreadCountItem>,
}

/// A single feed or category's unread count entry.
#[derive(Debug, Deserialize)]
pub struct UnreadCountItem {
    /// Feed or category ID.
    pub id: String,
    /// Unread item count.
    pub count: i64,
    /// Newest item timestamp, microseconds since epoch — used to decide
    /// which feeds need an individual fetch on a quick-update sync (spec
    /// §4.7 "Subscription list sync").
    #[serde(rename = "newestItemTimestampUsec", default)]
    pub newest_item_timestamp_usec: Option<String>,
}

/// Response envelope from `stream_contents`/`items/contents`.
#[derive(Debug, Deserialize)]
pub struct StreamContents {
    /// Stream ID.
    pub id: String,
    /// Items in the stream.
    #[serde(default)]
    pub items: Vec<StreamItem>,
}

/// A single item from a stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamItem {
    /// Item ID, in one of three formats (see `parse_item_id`).
    pub id: String,
    /// Feed this item originated from.
    #[serde(default)]
    pub origin: Option<StreamItemOrigin>,
    /// Item title.
    #[serde(default)]
    pub title: Option<String>,
    /// Published timestamp (seconds since epoch).
    #[serde(default)]
    pub published: Option<i64>,
    /// Categories/tags applied to this item (carries read/starred state).
    #[serde(default)]
    pub categories: Vec<String>,
    /// Canonical URL(s).
    #[serde(default)]
    pub canonical: Option<Vec<StreamItemLink>>,
    /// Alternate URL(s), used when `canonical` is absent.
    #[serde(default)]
    pub alternate: Option<Vec<StreamItemLink>>,
    /// Full content, when present.
    #[serde(default)]
    pub content: Option<StreamItemContent>,
    /// Summary content, used when `content` is absent.
    #[serde(default)]
    pub summary: Option<StreamItemContent>,
}

impl StreamItem {
    /// Whether the remote reports this item as read.
    #[must_use]
    pub fn is_read(&self) -> bool {
        self.categories.iter().any(|c| c.ends_with("/state/com.google/read"))
    }

    /// Whether the remote reports this item as starred/flagged.
    #[must_use]
    pub fn is_starred(&self) -> bool {
        self.categories.iter().any(|c| c.ends_with("/state/com.google/starred"))
    }

    /// This item's link, preferring the canonical URL over alternates.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.canonical
            .as_ref()
            .and_then(|links| links.first())
            .or_else(|| self.alternate.as_ref().and_then(|links| links.first()))
            .map(|l| l.href.as_str())
    }

    /// Body content, preferring full content over the summary.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.content.as_ref().or(self.summary.as_ref()).map(|c| c.content.as_str())
    }

    /// This item's ID, normalized to decimal.
    #[must_use]
    pub fn id_decimal(&self) -> Option<i64> {
        parse_item_id(&self.id)
    }
}

/// Origin (feed) of a stream item.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItemOrigin {
    /// Feed ID (`feed/{url}`).
    pub stream_id: String,
    /// Feed title, as known to the remote.
    #[serde(default)]
    pub title: Option<String>,
}

/// A link in a stream item.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamItemLink {
    /// URL.
    pub href: String,
}

/// Content of a stream item.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamItemContent {
    /// Content HTML.
    pub content: String,
}

/// Which Google-Reader-compatible provider a node source targets;
/// determines the endpoint table (see `super::endpoints`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// FreshRSS's `greader.php` compatibility layer.
    FreshRss,
    /// Miniflux's GReader-compatible API.
    Miniflux,
    /// Generic/reference Google Reader API layout.
    Generic,
}

impl Provider {
    /// The stable identifier stored on a `NodeSourcePayload::provider_id`
    /// for this provider (spec §6 `NodeSourceActivatable::get_id`).
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::FreshRss => "freshrss",
            Self::Miniflux => "miniflux",
            Self::Generic => "greader",
        }
    }

    /// Resolves a persisted `provider_id` back to a `Provider`, for
    /// reconstructing a `NodeSourceRuntime` on load (the local/default
    /// provider has no remote runtime and is not recognized here).
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "freshrss" => Some(Self::FreshRss),
            "miniflux" => Some(Self::Miniflux),
            "greader" => Some(Self::Generic),
            _ => None,
        }
    }
}

/// Well-known stream IDs.
pub mod streams {
    /// All items (reading list).
    pub const READING_LIST: &str = "user/-/state/com.google/reading-list";
    /// Read items.
    pub const READ: &str = "user/-/state/com.google/read";
    /// Starred items.
    pub const STARRED: &str = "user/-/state/com.google/starred";
    /// Kept-unread marker, added alongside removing `READ` on a mark-unread
    /// (spec §4.7: "mark-unread requires two endpoint calls").
    pub const TRACKING_KEPT_UNREAD: &str = "user/-/state/com.google/tracking-kept-unread";
}

/// Parses an item ID from any of the three formats a GReader server may use.
#[must_use]
pub fn parse_item_id(id: &str) -> Option<i64> {
    const PREFIX: &str = "tag:google.com,2005:reader/item/";
    if let Some(hex) = id.strip_prefix(PREFIX) {
        i64::from_str_radix(hex, 16).ok()
    } else if id.len() == 16 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        i64::from_str_radix(id, 16).ok()
    } else {
        id.parse().ok()
    }
}

/// Formats an item ID in the long tag form used when addressing items in
/// edit-tag requests.
#[must_use]
pub fn format_item_id_long(id: i64) -> String {
    format!("tag:google.com,2005:reader/item/{:016x}", id as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_form_item_id() {
        let id = "tag:google.com,2005:reader/item/000000000000001f";
        assert_eq!(parse_item_id(id), Some(31));
    }

    #[test]
    fn parses_short_hex_item_id() {
        assert_eq!(parse_item_id("000000000000001f"), Some(31));
    }

    #[test]
    fn parses_decimal_item_id() {
        assert_eq!(parse_item_id("31"), Some(31));
    }

    #[test]
    fn round_trips_long_form_formatting() {
        assert_eq!(format_item_id_long(31), "tag:google.com,2005:reader/item/000000000000001f");
    }

    #[test]
    fn stream_item_reports_read_and_starred_state() {
        let item = StreamItem {
            id: "31".into(),
            origin: None,
            title: None,
            published: None,
            categories: vec![
                "user/-/state/com.google/read".into(),
                "user/-/state/com.google/starred".into(),
            ],
            canonical: None,
            alternate: None,
            content: None,
            summary: None,
        };
        assert!(item.is_read());
        assert!(item.is_starred());
    }
}
