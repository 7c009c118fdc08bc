//! Feed parser dispatch (spec §4.5).
//!
//! `parse` sniffs the document's format from its root element (or, for
//! non-XML bodies, its declared content type) and delegates to a
//! format-specific parser. Every parser returns the same
//! `(Option<FeedMeta>, Vec<RawItem>, Vec<String>)` shape so the merge engine
//! never has to know which format produced a batch.

pub mod cdf;
pub mod namespace;
pub mod rss_atom;

use std::hash::{Hash, Hasher};

/// Feed-level metadata a format parser was able to extract.
#[derive(Debug, Clone, Default)]
pub struct FeedMeta {
    /// Feed/channel title.
    pub title: Option<String>,
    /// The feed's associated website, as opposed to the feed URL itself.
    pub html_url: Option<String>,
    /// Feed-level description.
    pub description: Option<String>,
    /// Detected wire format, for diagnostics and `FeedPayload::format`.
    pub format: DetectedFormat,
}

/// A single parsed entry, prior to merge-engine matching against stored
/// items.
#[derive(Debug, Clone, Default)]
pub struct RawItem {
    /// Feed-supplied identifier, if unambiguous.
    pub guid: String,
    /// Whether `guid` was feed-supplied (`true`) or synthesized (`false`).
    pub valid_guid: bool,
    /// Item title.
    pub title: String,
    /// Item permalink, resolved against `base_url`.
    pub source_url: Option<String>,
    /// Item body (summary or full content, whichever the format prefers).
    pub description: Option<String>,
    /// MIME type of `description` (`text/html` or `text/plain`).
    pub content_type: Option<String>,
    /// Publish or update timestamp, epoch seconds UTC.
    pub time: i64,
    /// Namespace-handler and enclosure metadata, insertion order preserved.
    pub metadata: Vec<(String, String)>,
}

/// Wire format a parser identified, recorded on the owning
/// [`crate::node::NodeKind::Feed`] for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DetectedFormat {
    #[default]
    Unknown,
    Rss,
    Atom,
    Rdf,
    Cdf,
    JsonFeed,
}

/// Root-element sniff result, before a parser has actually run (spec §4.5
/// step 1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    RssAtom,
    Cdf,
    /// `opml`/`oml`/`outlineDocument` root: blogroll or remote-source
    /// subscription list ingestion, handled by `crate::opml`, not the item
    /// pipeline.
    Opml,
    JsonFeed,
    Unrecognized,
}

/// Sniffs `body`'s format from its XML root element, falling back to
/// `declared_content_type` for non-XML bodies (spec §4.5 "Sniffing
/// algorithm").
#[must_use]
pub fn sniff(body: &[u8], declared_content_type: Option<&str>) -> Dispatch {
    if let Some(root) = xml_root_local_name(body) {
        return match root.to_lowercase().as_str() {
            "rss" | "rdf" => Dispatch::RssAtom,
            "feed" => Dispatch::RssAtom,
            "channel" => Dispatch::Cdf,
            "opml" | "oml" | "outlinedocument" => Dispatch::Opml,
            _ => Dispatch::Unrecognized,
        };
    }
    if declared_content_type.is_some_and(|ct| ct.contains("json")) {
        return Dispatch::JsonFeed;
    }
    Dispatch::Unrecognized
}

/// Returns the lowercase local name (no namespace prefix) of the first
/// element in `body`, or `None` if `body` doesn't look like XML at all.
fn xml_root_local_name(body: &[u8]) -> Option<String> {
    let mut reader = quick_xml::Reader::from_reader(body);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                let name = e.name();
                let full = String::from_utf8_lossy(name.as_ref()).into_owned();
                let local = full.rsplit(':').next().unwrap_or(&full).to_string();
                return Some(local);
            }
            Ok(quick_xml::events::Event::Eof) => return None,
            Ok(_) => {}
            Err(_) => return None,
        }
        buf.clear();
    }
}

/// Runs format dispatch and parsing, per spec §4.5's interface:
/// `parse(body, declared_content_type?, base_url) -> (feed_metadata, items, parse_errors)`.
#[must_use]
pub fn parse(
    body: &[u8],
    declared_content_type: Option<&str>,
    base_url: &str,
) -> (Option<FeedMeta>, Vec<RawItem>, Vec<String>) {
    match sniff(body, declared_content_type) {
        Dispatch::RssAtom => rss_atom::parse(body, base_url),
        Dispatch::Cdf => cdf::parse(body, base_url),
        // feed-rs parses JSON Feed natively (spec §4.5 step 2: "attempt JSON
        // parsers"); it shares the same model as RSS/Atom so the same
        // entry point handles it.
        Dispatch::JsonFeed => rss_atom::parse(body, base_url),
        Dispatch::Opml => (
            None,
            Vec::new(),
            vec!["document requires a dedicated import path, not the item pipeline".to_string()],
        ),
        Dispatch::Unrecognized => (None, Vec::new(), vec!["unrecognized feed format".to_string()]),
    }
}

/// Resolves `maybe_relative` against `base_url`, returning the original
/// string unchanged if it is already absolute or `base_url` cannot be
/// decomposed into a scheme and authority (spec §4.5: "Resolves relative
/// URLs against `base_url`").
#[must_use]
pub fn resolve_url(base_url: &str, maybe_relative: &str) -> String {
    if maybe_relative.is_empty() || is_absolute(maybe_relative) {
        return maybe_relative.to_string();
    }
    let Some((scheme, rest)) = base_url.split_once("://") else {
        return maybe_relative.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    if let Some(stripped) = maybe_relative.strip_prefix("//") {
        return format!("{scheme}://{stripped}");
    }
    if maybe_relative.starts_with('/') {
        return format!("{scheme}://{authority}{maybe_relative}");
    }

    let base_path = &rest[authority_end..];
    let base_dir = base_path.rfind('/').map_or("/", |i| &base_path[..=i]);
    format!("{scheme}://{authority}{base_dir}{maybe_relative}")
}

fn is_absolute(candidate: &str) -> bool {
    candidate
        .split_once(':')
        .is_some_and(|(scheme, _)| scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'))
}

/// Synthesizes a stable GUID from `(title, source_url, body)` for items
/// that don't carry an unambiguous feed-supplied identifier (spec §4.5:
/// "synthesizes a GUID from (title ⊕ item-source-url ⊕ body hash)").
#[must_use]
pub fn synthesize_guid(title: &str, source_url: Option<&str>, body: Option<&str>) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    title.hash(&mut hasher);
    source_url.unwrap_or_default().hash(&mut hasher);
    body.unwrap_or_default().hash(&mut hasher);
    format!("synthetic:{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_rss_root() {
        let body = br#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        assert_eq!(sniff(body, None), Dispatch::RssAtom);
    }

    #[test]
    fn sniffs_atom_root() {
        let body = br#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;
        assert_eq!(sniff(body, None), Dispatch::RssAtom);
    }

    #[test]
    fn sniffs_cdf_channel_root() {
        let body = br#"<Channel><Item/></Channel>"#;
        assert_eq!(sniff(body, None), Dispatch::Cdf);
    }

    #[test]
    fn sniffs_opml_root() {
        let body = br#"<opml version="2.0"><body></body></opml>"#;
        assert_eq!(sniff(body, None), Dispatch::Opml);
    }

    #[test]
    fn non_xml_json_content_type_dispatches_to_json_feed() {
        assert_eq!(sniff(b"{}", Some("application/json")), Dispatch::JsonFeed);
    }

    #[test]
    fn json_feed_body_is_actually_parsed_into_items() {
        let body = br#"{
            "version": "https://jsonfeed.org/version/1.1",
            "title": "Example JSON Feed",
            "items": [
                {"id": "1", "title": "Hello", "content_text": "World", "url": "https://example.test/1"}
            ]
        }"#;
        let (meta, items, errors) = parse(body, Some("application/json"), "https://example.test/");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let meta = meta.expect("json feed metadata");
        assert_eq!(meta.format, DetectedFormat::JsonFeed);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Hello");
    }

    #[test]
    fn garbage_body_is_unrecognized() {
        assert_eq!(sniff(b"not xml at all", None), Dispatch::Unrecognized);
    }

    #[test]
    fn resolve_url_joins_relative_path() {
        assert_eq!(
            resolve_url("https://example.test/blog/", "post/1"),
            "https://example.test/blog/post/1"
        );
    }

    #[test]
    fn resolve_url_leaves_absolute_url_untouched() {
        assert_eq!(
            resolve_url("https://example.test/", "https://other.test/x"),
            "https://other.test/x"
        );
    }

    #[test]
    fn synthesize_guid_is_stable_for_same_inputs() {
        let a = synthesize_guid("Title", Some("https://x/"), Some("body"));
        let b = synthesize_guid("Title", Some("https://x/"), Some("body"));
        assert_eq!(a, b);
        assert!(a.starts_with("synthetic:"));
    }
}
