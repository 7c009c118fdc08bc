//! Items (headlines), their metadata, the GUID duplicate index, and
//! search-folder rule evaluation.

pub mod guid;
pub mod rules;

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// A single `(key, value)` metadata entry. Order is preserved and keys may
/// repeat (spec §4.2 guarantee); enclosures, categories and author lists
/// all live here rather than as dedicated columns.
pub type MetadataEntry = (String, String);

/// Metadata key under which enclosures are serialized, delimited by `\x1f`
/// in the form `url\x1fmime_type\x1fsize\x1fdownloaded`.
pub const ENCLOSURE_KEY: &str = "enclosure";

/// A downloadable attachment referenced by an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    /// Attachment URL.
    pub url: String,
    /// Declared MIME type, if any.
    pub mime_type: Option<String>,
    /// Declared size in bytes, if any.
    pub size: Option<u64>,
    /// Whether the enclosure has been downloaded locally (this crate does
    /// not perform the download itself — out of scope).
    pub downloaded: bool,
    /// Human-readable title, when a namespace extension (e.g. media:title)
    /// supplied one.
    pub title: Option<String>,
}

impl Enclosure {
    /// Serializes to the delimited metadata-value form.
    #[must_use]
    pub fn to_metadata_value(&self) -> String {
        format!(
            "{}\x1f{}\x1f{}\x1f{}\x1f{}",
            self.url,
            self.mime_type.as_deref().unwrap_or(""),
            self.size.map(|s| s.to_string()).unwrap_or_default(),
            u8::from(self.downloaded),
            self.title.as_deref().unwrap_or(""),
        )
    }

    /// Parses the delimited metadata-value form.
    #[must_use]
    pub fn from_metadata_value(value: &str) -> Option<Self> {
        let mut parts = value.split('\x1f');
        let url = parts.next()?.to_string();
        if url.is_empty() {
            return None;
        }
        let mime_type = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let size = parts.next().and_then(|s| s.parse().ok());
        let downloaded = parts.next().is_some_and(|s| s == "1");
        let title = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        Some(Self {
            url,
            mime_type,
            size,
            downloaded,
            title,
        })
    }
}

/// Status bits carried by an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFlags {
    /// Has been read.
    pub read: bool,
    /// Newly merged since the user last looked at this node.
    pub new: bool,
    /// Pending a desktop notification ("popup").
    pub popup: bool,
    /// Content changed on a re-fetch (non-trivially, per merge policy).
    pub updated: bool,
    /// User-flagged ("starred"/important). Never evicted by cache limits.
    pub flag: bool,
    /// At least one enclosure is attached.
    pub has_enclosure: bool,
}

impl ItemFlags {
    /// Flags for a brand-new merged item: unread, new, and pending popup.
    #[must_use]
    pub const fn new_item() -> Self {
        Self {
            read: false,
            new: true,
            popup: true,
            updated: false,
            flag: false,
            has_enclosure: false,
        }
    }
}

/// A single entry (headline) produced by parsing a feed, or copied into a
/// news bin, or computed as search-folder membership pointing at an
/// original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Integer id, unique within its owning node (assigned by the store on create).
    pub id: Option<i64>,
    /// The node this item belongs to.
    pub node_id: NodeId,
    /// Feed-supplied identifier when present; otherwise synthesized.
    pub guid: String,
    /// Whether `guid` is an unambiguous identifier supplied by the feed,
    /// as opposed to one synthesized from content.
    pub valid_guid: bool,
    /// Headline title.
    pub title: String,
    /// Permalink.
    pub source_url: Option<String>,
    /// For items inside search folders: original permalink, if different.
    pub real_source_url: Option<String>,
    /// For items inside search folders: original feed title.
    pub real_source_title: Option<String>,
    /// Rendered/escaped body text.
    pub description: Option<String>,
    /// MIME type of `description` (e.g. `text/html`).
    pub content_type: Option<String>,
    /// Item date, epoch seconds UTC (spec §4.5: "normalizes all dates to
    /// epoch seconds UTC").
    pub time: i64,
    /// Status bits.
    pub flags: ItemFlags,
    /// Ordered `(key, value)` pairs; duplicate keys permitted.
    pub metadata: Vec<MetadataEntry>,
    /// For items synthesized inside a search folder: the node holding the original.
    pub source_node_id: Option<NodeId>,
    /// For items synthesized inside a search folder: the original item's id.
    pub source_item_nr: Option<i64>,
}

impl Item {
    /// Title of the owning feed, denormalized for the rule engine's
    /// feed-title-substring rule kind (spec §3's rule kinds list, grounded
    /// on `original_source/src/rule.c`'s `rule_feed_title_match`, which the
    /// original left unimplemented — see DESIGN.md).
    #[must_use]
    pub fn feed_title<'a>(&'a self, owning_node_title: &'a str) -> &'a str {
        self.real_source_title.as_deref().unwrap_or(owning_node_title)
    }

    /// Enclosures attached via `metadata`.
    pub fn enclosures(&self) -> impl Iterator<Item = Enclosure> + '_ {
        self.metadata
            .iter()
            .filter(|(k, _)| k == ENCLOSURE_KEY)
            .filter_map(|(_, v)| Enclosure::from_metadata_value(v))
    }

    /// Appends an enclosure and sets `has_enclosure`.
    pub fn add_enclosure(&mut self, enclosure: &Enclosure) {
        self.metadata
            .push((ENCLOSURE_KEY.to_string(), enclosure.to_metadata_value()));
        self.flags.has_enclosure = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclosure_roundtrips_through_metadata_value() {
        let e = Enclosure {
            url: "http://example.test/a.mp3".into(),
            mime_type: Some("audio/mpeg".into()),
            size: Some(1024),
            downloaded: true,
            title: None,
        };
        let value = e.to_metadata_value();
        let parsed = Enclosure::from_metadata_value(&value).unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn new_item_flags_imply_unread_and_new() {
        let flags = ItemFlags::new_item();
        assert!(!flags.read);
        assert!(flags.new);
        assert!(flags.popup);
    }
}
