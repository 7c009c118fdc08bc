//! OPML feed-list persistence (spec §4.8): the on-disk layout of the node
//! tree, round-tripped losslessly via a Liferea-namespaced OPML extension.
//!
//! This is the tree's *layout* only — items live in `crate::store`, and
//! there is no user-facing "import wizard" here (out of scope per spec §1);
//! `import`/`export` are the two halves of loading/saving the one feed list
//! this process owns (`feedlist.opml`, see `crate::config::Config`).

use std::{fs, path::Path};

use color_eyre::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::item::rules::RuleSet;
use crate::node::{CacheLimit, FeedPayload, NodeArena, NodeId, NodeKind, NodeSourcePayload};
use crate::subscription::Subscription;

/// The namespace URI extension attributes are qualified with, matching
/// Liferea's own `feedlist.opml` so files this crate writes stay readable
/// by (and files it reads stay producible by) that ecosystem.
const LIFEREA_NS: &str = "http://liferea.sf.net/OPMLNS";

/// Loads a node tree from an OPML file at `path`, seeding the root with
/// `root_provider_id` (the default/local node-source provider).
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not well-formed XML.
pub fn import(path: &Path, root_provider_id: &str) -> Result<NodeArena> {
    let content = fs::read_to_string(path)?;
    import_str(&content, root_provider_id)
}

/// As [`import`], but reads from an in-memory string (used by tests and by
/// node sources that fetch a remote OPML subscription list).
///
/// # Errors
///
/// Returns an error if `content` is not well-formed XML.
pub fn import_str(content: &str, root_provider_id: &str) -> Result<NodeArena> {
    let outlines = parse_opml(content)?;
    let mut arena = NodeArena::new_with_root(root_provider_id);
    for outline in outlines {
        insert_outline(&mut arena, NodeId::ROOT, &outline)?;
    }
    Ok(arena)
}

/// Writes `arena` to an OPML file at `path`. Passwords are included only
/// when `export_secrets` is set (spec §4.8's "trusted" gate) — an untrusted
/// export round-trips every other field losslessly but omits
/// `liferea:password`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn export(arena: &NodeArena, path: &Path, export_secrets: bool) -> Result<()> {
    let xml = export_string(arena, export_secrets);
    fs::write(path, xml)?;
    Ok(())
}

/// As [`export`], but returns the OPML document as a string.
#[must_use]
pub fn export_string(arena: &NodeArena, export_secrets: bool) -> String {
    use std::fmt::Write;

    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<opml version=\"2.0\" xmlns:liferea=\"{LIFEREA_NS}\">\n  <head>\n    <title>Subscriptions</title>\n  </head>\n  <body>\n"
    );
    let root = arena.root();
    for &child in &root.children {
        write_outline(&mut xml, arena, child, 2, export_secrets);
    }
    let _ = writeln!(xml, "  </body>\n</opml>");
    xml
}

fn write_outline(xml: &mut String, arena: &NodeArena, id: NodeId, indent: usize, export_secrets: bool) {
    use std::fmt::Write;
    let Some(node) = arena.node(id) else { return };
    let pad = "  ".repeat(indent);
    let title = escape_xml(&node.title);

    let mut attrs = String::new();
    let _ = write!(attrs, r#" type="{}""#, node.kind.tag());

    if let Some(sub) = &node.subscription {
        let _ = write!(attrs, r#" xmlUrl="{}""#, escape_xml(&sub.source_url));
        let _ = write!(attrs, r#" liferea:updateInterval="{}""#, sub.update_interval);
        if sub.discontinued {
            attrs.push_str(r#" liferea:discontinued="true""#);
        }
        if let Some(cmd) = &sub.filter_cmd {
            let _ = write!(attrs, r#" liferea:filtercmd="{}""#, escape_xml(cmd));
        }
        if let Some(username) = &sub.update_options.username {
            let _ = write!(attrs, r#" liferea:username="{}""#, escape_xml(username));
        }
        if export_secrets {
            if let Some(password) = &sub.update_options.password {
                attrs.push_str(r#" liferea:trusted="true""#);
                let _ = write!(attrs, r#" liferea:password="{}""#, escape_xml(password));
            }
        }
    }

    if let NodeKind::Feed(payload) = &node.kind {
        let _ = write!(attrs, r#" liferea:cacheLimit="{}""#, cache_limit_to_str(&payload.cache_limit));
        if payload.merge_drop_old {
            attrs.push_str(r#" liferea:noIncremental="true""#);
        }
        if let Some(format) = &payload.format {
            let _ = write!(attrs, r#" liferea:format="{}""#, escape_xml(format));
        }
        if let Some(html_url) = &payload.html_url {
            let _ = write!(attrs, r#" htmlUrl="{}""#, escape_xml(html_url));
        }
    }

    if let NodeKind::SearchFolder(rules) = &node.kind
        && let Ok(json) = serde_json::to_string(rules)
    {
        let _ = write!(attrs, r#" liferea:ruleset="{}""#, escape_xml(&json));
    }

    if let NodeKind::NodeSourceRoot(payload) = &node.kind {
        let _ = write!(attrs, r#" liferea:provider="{}""#, escape_xml(&payload.provider_id));
    }

    if node.children.is_empty() {
        let _ = writeln!(xml, r#"{pad}<outline text="{title}" title="{title}"{attrs}/>"#);
    } else {
        let _ = writeln!(xml, r#"{pad}<outline text="{title}" title="{title}"{attrs}>"#);
        for &child in &node.children {
            write_outline(xml, arena, child, indent + 1, export_secrets);
        }
        let _ = writeln!(xml, "{pad}</outline>");
    }
}

fn cache_limit_to_str(limit: &CacheLimit) -> String {
    match limit {
        CacheLimit::Disable => "disable".to_string(),
        CacheLimit::Default => "default".to_string(),
        CacheLimit::Unlimited => "unlimited".to_string(),
        CacheLimit::Count(n) => n.to_string(),
    }
}

fn cache_limit_from_str(s: &str) -> CacheLimit {
    match s {
        "disable" => CacheLimit::Disable,
        "unlimited" => CacheLimit::Unlimited,
        other => other.parse::<u32>().map_or(CacheLimit::Default, CacheLimit::Count),
    }
}

/// Internal OPML outline structure, collected before being turned into
/// `NodeArena` nodes (keeps the XML walk and the tree-building step
/// separate, matching `crate::parser::rss_atom`'s scan-then-build shape).
#[derive(Debug, Clone, Default)]
struct OpmlOutline {
    title: String,
    kind_hint: Option<String>,
    xml_url: Option<String>,
    attrs: Vec<(String, String)>,
    children: Vec<Self>,
}

fn parse_opml(content: &str) -> Result<Vec<OpmlOutline>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut outlines = Vec::new();
    let mut stack: Vec<OpmlOutline> = Vec::new();
    let mut in_body = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = local_tag_name(e);
                if name.eq_ignore_ascii_case("body") {
                    in_body = true;
                } else if in_body && name.eq_ignore_ascii_case("outline") {
                    stack.push(parse_outline_attrs(e));
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = local_tag_name(e);
                if in_body && name.eq_ignore_ascii_case("outline") {
                    let outline = parse_outline_attrs(e);
                    push_outline(&mut stack, &mut outlines, outline);
                }
            }
            Ok(Event::End(ref e)) => {
                let name = local_tag_name_close(e);
                if name.eq_ignore_ascii_case("outline") {
                    if let Some(outline) = stack.pop() {
                        push_outline(&mut stack, &mut outlines, outline);
                    }
                } else if name.eq_ignore_ascii_case("body") {
                    in_body = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(color_eyre::eyre::eyre!("OPML XML parse error: {e}")),
            _ => {}
        }
    }

    Ok(outlines)
}

fn push_outline(stack: &mut [OpmlOutline], outlines: &mut Vec<OpmlOutline>, outline: OpmlOutline) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(outline);
    } else {
        outlines.push(outline);
    }
}

fn local_tag_name(e: &BytesStart) -> String {
    let name = e.name();
    let bytes = name.as_ref();
    let local = bytes.rsplit(|b| *b == b':').next().unwrap_or(bytes);
    String::from_utf8_lossy(local).into_owned()
}

fn local_tag_name_close(e: &quick_xml::events::BytesEnd) -> String {
    let name = e.name();
    let bytes = name.as_ref();
    let local = bytes.rsplit(|b| *b == b':').next().unwrap_or(bytes);
    String::from_utf8_lossy(local).into_owned()
}

fn parse_outline_attrs(e: &BytesStart) -> OpmlOutline {
    let mut outline = OpmlOutline::default();

    for attr in e.attributes().flatten() {
        let key_bytes = attr.key.as_ref();
        let key = String::from_utf8_lossy(key_bytes).into_owned();
        let value = attr.unescape_value().unwrap_or_default().to_string();
        let local = key.rsplit(':').next().unwrap_or(&key).to_string();

        match local.to_lowercase().as_str() {
            "title" if outline.title.is_empty() => outline.title = value,
            "text" if outline.title.is_empty() => outline.title = value,
            "xmlurl" => outline.xml_url = Some(value),
            "type" => outline.kind_hint = Some(value),
            _ => outline.attrs.push((local, value)),
        }
    }

    outline
}

fn insert_outline(arena: &mut NodeArena, parent: NodeId, outline: &OpmlOutline) -> Result<()> {
    let attr = |key: &str| -> Option<&str> { outline.attrs.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_str()) };

    let kind = match outline.kind_hint.as_deref() {
        Some("newsbin") => NodeKind::NewsBin,
        Some("searchfolder") | Some("vfolder") => {
            let ruleset = attr("ruleset")
                .and_then(|json| serde_json::from_str::<RuleSet>(json).ok())
                .unwrap_or(RuleSet {
                    rules: Vec::new(),
                    combinator: crate::item::rules::Combinator::All,
                });
            NodeKind::SearchFolder(ruleset)
        }
        Some("source") => NodeKind::NodeSourceRoot(NodeSourcePayload {
            provider_id: attr("provider").unwrap_or("default").to_string(),
        }),
        Some("feed") | Some("rss") => NodeKind::Feed(FeedPayload {
            format: attr("format").map(str::to_string),
            html_url: attr("htmlUrl").or_else(|| attr("htmlurl")).map(str::to_string),
            image_url: None,
            cache_limit: attr("cachelimit").map_or(CacheLimit::Default, cache_limit_from_str),
            merge_drop_old: attr("noincremental") == Some("true"),
            parse_errors: Vec::new(),
        }),
        _ if outline.xml_url.is_some() => NodeKind::Feed(FeedPayload::default()),
        _ => NodeKind::Folder,
    };

    let id = arena.add_child(parent, outline.title.clone(), kind, None)?;

    if let Some(url) = &outline.xml_url {
        let mut subscription = Subscription::new_feed(url.clone());
        if let Some(interval) = attr("updateinterval").and_then(|v| v.parse::<i32>().ok()) {
            subscription.update_interval = interval;
        }
        subscription.discontinued = attr("discontinued") == Some("true");
        subscription.filter_cmd = attr("filtercmd").map(str::to_string);
        subscription.update_options.username = attr("username").map(str::to_string);
        if attr("trusted") == Some("true") {
            subscription.update_options.password = attr("password").map(str::to_string);
        }
        if let Some(node) = arena.node_mut(id) {
            node.subscription = Some(subscription);
        }
    }

    for child in &outline.children {
        insert_outline(arena, id, child)?;
    }

    Ok(())
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    #[test]
    fn roundtrips_a_feed_inside_a_folder() {
        let mut arena = NodeArena::new_with_root("local");
        let folder = arena.add_child(NodeId::ROOT, "Tech", NodeKind::Folder, None).unwrap();
        let feed = arena
            .add_child(folder, "Blog", NodeKind::Feed(FeedPayload::default()), None)
            .unwrap();
        arena.node_mut(feed).unwrap().subscription = Some(Subscription::new_feed("https://example.test/feed.xml"));

        let xml = export_string(&arena, false);
        let reimported = import_str(&xml, "local").unwrap();

        let root = reimported.root();
        assert_eq!(root.children.len(), 1);
        let folder_node = reimported.node(root.children[0]).unwrap();
        assert_eq!(folder_node.title, "Tech");
        assert!(matches!(folder_node.kind, NodeKind::Folder));
        let feed_node = reimported.node(folder_node.children[0]).unwrap();
        assert_eq!(feed_node.title, "Blog");
        assert_eq!(feed_node.subscription.as_ref().unwrap().source_url, "https://example.test/feed.xml");
    }

    #[test]
    fn password_omitted_without_export_secrets() {
        let mut arena = NodeArena::new_with_root("local");
        let feed = arena
            .add_child(NodeId::ROOT, "Blog", NodeKind::Feed(FeedPayload::default()), None)
            .unwrap();
        let mut sub = Subscription::new_feed("https://example.test/feed.xml");
        sub.update_options.username = Some("alice".to_string());
        sub.update_options.password = Some("s3cret".to_string());
        arena.node_mut(feed).unwrap().subscription = Some(sub);

        let xml = export_string(&arena, false);
        assert!(!xml.contains("s3cret"));
        assert!(xml.contains("liferea:username=\"alice\""));

        let xml_trusted = export_string(&arena, true);
        assert!(xml_trusted.contains("s3cret"));
    }

    #[test]
    fn search_folder_ruleset_roundtrips() {
        use crate::item::rules::{Combinator, Rule, RuleKind};

        let mut arena = NodeArena::new_with_root("local");
        let ruleset = RuleSet {
            rules: vec![Rule {
                kind: RuleKind::TitleContains,
                value: "rust".to_string(),
                negate: false,
            }],
            combinator: Combinator::Any,
        };
        arena
            .add_child(NodeId::ROOT, "Rust items", NodeKind::SearchFolder(ruleset), None)
            .unwrap();

        let xml = export_string(&arena, false);
        let reimported = import_str(&xml, "local").unwrap();
        let node = reimported.node(reimported.root().children[0]).unwrap();
        match &node.kind {
            NodeKind::SearchFolder(rs) => {
                assert_eq!(rs.rules.len(), 1);
                assert_eq!(rs.combinator, Combinator::Any);
            }
            _ => panic!("expected search folder"),
        }
    }

    #[test]
    fn discontinued_and_cache_limit_roundtrip() {
        let mut arena = NodeArena::new_with_root("local");
        let feed = arena
            .add_child(
                NodeId::ROOT,
                "Blog",
                NodeKind::Feed(FeedPayload {
                    cache_limit: CacheLimit::Count(250),
                    ..FeedPayload::default()
                }),
                None,
            )
            .unwrap();
        let mut sub = Subscription::new_feed("https://example.test/feed.xml");
        sub.discontinued = true;
        arena.node_mut(feed).unwrap().subscription = Some(sub);

        let xml = export_string(&arena, false);
        let reimported = import_str(&xml, "local").unwrap();
        let node = reimported.node(reimported.root().children[0]).unwrap();
        assert!(node.subscription.as_ref().unwrap().discontinued);
        match &node.kind {
            NodeKind::Feed(payload) => assert_eq!(payload.cache_limit, CacheLimit::Count(250)),
            _ => panic!("expected feed"),
        }
    }
}
