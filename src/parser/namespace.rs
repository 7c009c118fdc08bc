//! Namespace handler registry (spec §4.5: "delegates recognized namespaces
//! ... to registered namespace handlers; each handler contributes to
//! feed-level or item-level metadata").
//!
//! `feed-rs` already folds the core RSS/Atom/RDF element sets into
//! [`feed_rs::model::Feed`], so the registry here only has to cover the
//! extension namespaces the model doesn't surface as first-class fields:
//! Dublin Core, `content:encoded` (when not already picked up as
//! `entry.content`), `slash`, `trackback`, iTunes, OCS, and GeoRSS. Each
//! handler maps one namespaced local element name to a metadata key; the
//! dispatch table is keyed by namespace URI so a handler only ever sees
//! elements in its own namespace, mirroring the original implementation's
//! per-namespace callback table (`node_type.h`'s feed-handler dispatch
//! shape).

use std::collections::HashMap;

/// Implemented by one namespace's metadata extractor.
pub trait NamespaceHandler: Send + Sync {
    /// Maps a local element name (no prefix) within this handler's
    /// namespace to a metadata key, or `None` if the element is not one
    /// this handler contributes.
    fn metadata_key(&self, local_name: &str) -> Option<&'static str>;
}

macro_rules! element_map_handler {
    ($name:ident, { $($elem:literal => $key:literal),+ $(,)? }) => {
        pub struct $name;
        impl NamespaceHandler for $name {
            fn metadata_key(&self, local_name: &str) -> Option<&'static str> {
                match local_name {
                    $($elem => Some($key),)+
                    _ => None,
                }
            }
        }
    };
}

element_map_handler!(DublinCoreHandler, {
    "creator" => "dc:creator",
    "date" => "dc:date",
    "subject" => "dc:subject",
    "publisher" => "dc:publisher",
    "rights" => "dc:rights",
    "source" => "dc:source",
    "identifier" => "dc:identifier",
});

element_map_handler!(ContentHandler, {
    "encoded" => "content:encoded",
});

element_map_handler!(SlashHandler, {
    "comments" => "slash:comments",
    "department" => "slash:department",
    "section" => "slash:section",
    "hit_parade" => "slash:hit_parade",
});

element_map_handler!(TrackbackHandler, {
    "ping" => "trackback:ping",
    "about" => "trackback:about",
});

element_map_handler!(ItunesHandler, {
    "author" => "itunes:author",
    "subtitle" => "itunes:subtitle",
    "summary" => "itunes:summary",
    "duration" => "itunes:duration",
    "explicit" => "itunes:explicit",
    "keywords" => "itunes:keywords",
    "episode" => "itunes:episode",
    "season" => "itunes:season",
});

element_map_handler!(OcsHandler, {
    "directory" => "ocs:directory",
});

element_map_handler!(GeoHandler, {
    "point" => "geo:point",
    "lat" => "geo:lat",
    "long" => "geo:long",
});

element_map_handler!(SyndicationHandler, {
    "updatePeriod" => "sy:updatePeriod",
    "updateFrequency" => "sy:updateFrequency",
    "updateBase" => "sy:updateBase",
});

/// Namespace URI -> handler, the table `parser::rss_atom` walks while
/// visiting an item element's raw children.
pub struct NamespaceRegistry {
    handlers: HashMap<&'static str, Box<dyn NamespaceHandler>>,
}

impl NamespaceRegistry {
    /// Builds the registry with every handler spec §4.5 names: "Dublin
    /// Core, content, syndication, slash, trackback, iTunes, OCS, geo".
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn NamespaceHandler>> = HashMap::new();
        handlers.insert("http://purl.org/dc/elements/1.1/", Box::new(DublinCoreHandler));
        handlers.insert("http://purl.org/rss/1.0/modules/content/", Box::new(ContentHandler));
        handlers.insert("http://purl.org/rss/1.0/modules/slash/", Box::new(SlashHandler));
        handlers.insert("http://madskills.com/public/xml/rss/module/trackback/", Box::new(TrackbackHandler));
        handlers.insert("http://www.itunes.com/dtds/podcast-1.0.dtd", Box::new(ItunesHandler));
        handlers.insert("http://purl.org/rss/1.0/modules/subjects/", Box::new(OcsHandler));
        handlers.insert("http://www.w3.org/2003/01/geo/wgs84_pos#", Box::new(GeoHandler));
        handlers.insert("http://purl.org/rss/1.0/modules/syndication/", Box::new(SyndicationHandler));
        Self { handlers }
    }

    /// Resolves `(namespace_uri, local_name)` to a metadata key, or `None`
    /// if no registered handler claims it.
    #[must_use]
    pub fn resolve(&self, namespace_uri: &str, local_name: &str) -> Option<&'static str> {
        self.handlers.get(namespace_uri)?.metadata_key(local_name)
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_dublin_core_element() {
        let registry = NamespaceRegistry::with_defaults();
        assert_eq!(
            registry.resolve("http://purl.org/dc/elements/1.1/", "creator"),
            Some("dc:creator")
        );
    }

    #[test]
    fn unknown_namespace_resolves_to_none() {
        let registry = NamespaceRegistry::with_defaults();
        assert_eq!(registry.resolve("urn:unknown", "whatever"), None);
    }

    #[test]
    fn known_namespace_unknown_element_resolves_to_none() {
        let registry = NamespaceRegistry::with_defaults();
        assert_eq!(
            registry.resolve("http://purl.org/dc/elements/1.1/", "bogus"),
            None
        );
    }
}
