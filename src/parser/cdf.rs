//! Channel Definition Format (CDF) parsing (spec §4.5's `Channel`,
//! non-RSS-1.1-namespaced, dispatch branch).
//!
//! CDF predates RSS and was Microsoft's push-channel format for Internet
//! Explorer 4's Active Desktop. It is vanishingly rare in the wild but a
//! handful of legacy corporate feeds still emit it, and the original
//! implementation carried a dedicated parser for it (`original_source/
//! src/parsers/cdf_channel.c`, filtered from this pack by its size/sample
//! caps per `_INDEX.md` — the element names below follow the format's
//! well-known public shape: a `<Channel>` root with `<Item>` children, each
//! with `TITLE`/`ABSTRACT`/`USAGE` sub-elements).

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{DetectedFormat, FeedMeta, RawItem, resolve_url, synthesize_guid};

/// Parses a CDF `<Channel>` document.
#[must_use]
pub fn parse(body: &[u8], base_url: &str) -> (Option<FeedMeta>, Vec<RawItem>, Vec<String>) {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut meta = FeedMeta {
        format: DetectedFormat::Cdf,
        ..FeedMeta::default()
    };
    let mut items = Vec::new();
    let mut errors = Vec::new();

    let mut path: Vec<String> = Vec::new();
    let mut channel_depth: Option<usize> = None;
    let mut item: Option<PartialItem> = None;
    let mut item_depth = 0usize;
    let mut pending_field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                path.push(name.clone());

                match name.as_str() {
                    "channel" if channel_depth.is_none() => channel_depth = Some(path.len()),
                    "item" if channel_depth.is_some() && item.is_none() => {
                        item = Some(PartialItem::default());
                        item_depth = path.len();
                    }
                    "title" if item.is_some() && path.len() == item_depth + 1 => {
                        pending_field = Some(Field::ItemTitle);
                    }
                    "abstract" if item.is_some() && path.len() == item_depth + 1 => {
                        pending_field = Some(Field::ItemAbstract);
                    }
                    "title" if item.is_none() && channel_depth == Some(path.len() - 1) => {
                        pending_field = Some(Field::ChannelTitle);
                    }
                    "abstract" if item.is_none() && channel_depth == Some(path.len() - 1) => {
                        pending_field = Some(Field::ChannelAbstract);
                    }
                    _ => {}
                }

                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).to_lowercase();
                    let value = attr.unescape_value().unwrap_or_default().to_string();
                    if key == "href" {
                        if let Some(current) = item.as_mut() {
                            if path.len() == item_depth && current.href.is_none() {
                                current.href = Some(value.clone());
                            } else if name == "logo" {
                                current.logo = Some(value.clone());
                            }
                        } else if channel_depth.is_some() && path.len() == channel_depth.unwrap() && meta.html_url.is_none() {
                            meta.html_url = Some(resolve_url(base_url, &value));
                        }
                    }
                    if key == "lastmod" {
                        if let Some(current) = item.as_mut() {
                            current.last_mod = parse_cdf_date(&value);
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                match pending_field.take() {
                    Some(Field::ChannelTitle) => meta.title = Some(text),
                    Some(Field::ChannelAbstract) => meta.description = Some(text),
                    Some(Field::ItemTitle) => {
                        if let Some(current) = item.as_mut() {
                            current.title = text;
                        }
                    }
                    Some(Field::ItemAbstract) => {
                        if let Some(current) = item.as_mut() {
                            current.description = Some(text);
                        }
                    }
                    None => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "item"
                    && item.is_some()
                    && path.len() == item_depth
                {
                    let partial = item.take().unwrap();
                    let source_url = partial
                        .href
                        .as_deref()
                        .map(|h| resolve_url(base_url, h));
                    let title = if partial.title.is_empty() {
                        "Untitled".to_string()
                    } else {
                        partial.title
                    };
                    let guid = synthesize_guid(&title, source_url.as_deref(), partial.description.as_deref());
                    items.push(RawItem {
                        guid,
                        valid_guid: false,
                        title,
                        source_url,
                        description: partial.description,
                        content_type: Some("text/plain".to_string()),
                        time: partial.last_mod.unwrap_or(0),
                        metadata: Vec::new(),
                    });
                }
                if Some(path.len()) == channel_depth && name == "channel" {
                    channel_depth = None;
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                errors.push(format!("CDF parse error: {err}"));
                break;
            }
        }
        buf.clear();
    }

    if meta.title.is_none() && items.is_empty() && errors.is_empty() {
        errors.push("CDF document contained no channel title or items".to_string());
    }

    (Some(meta), items, errors)
}

enum Field {
    ChannelTitle,
    ChannelAbstract,
    ItemTitle,
    ItemAbstract,
}

#[derive(Default)]
struct PartialItem {
    title: String,
    description: Option<String>,
    href: Option<String>,
    logo: Option<String>,
    last_mod: Option<i64>,
}

fn local_name(raw: &[u8]) -> String {
    let full = String::from_utf8_lossy(raw).into_owned();
    full.rsplit(':').next().unwrap_or(&full).to_lowercase()
}

/// CDF dates are ISO-8601-like RFC 822 dates (`LASTMOD` attribute, e.g.
/// `2024-01-15T12:00`); fall back silently to `None` on anything else since
/// this format carries no reliable guarantee either way (spec §4.5
/// "tolerant recovery").
fn parse_cdf_date(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
                .map(|dt| dt.and_utc().timestamp())
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CDF_SAMPLE: &str = r#"<?xml version="1.0"?>
<Channel HREF="https://example.test/">
  <TITLE>Example Channel</TITLE>
  <ABSTRACT>An example CDF channel</ABSTRACT>
  <Item HREF="https://example.test/a.html" LASTMOD="2024-01-15T12:00">
    <TITLE>First item</TITLE>
    <ABSTRACT>First item body</ABSTRACT>
  </Item>
  <Item HREF="https://example.test/b.html">
    <TITLE>Second item</TITLE>
  </Item>
</Channel>"#;

    #[test]
    fn parses_channel_title_and_items() {
        let (meta, items, errors) = parse(CDF_SAMPLE.as_bytes(), "https://example.test/");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let meta = meta.unwrap();
        assert_eq!(meta.title.as_deref(), Some("Example Channel"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First item");
        assert_eq!(items[0].time, parse_cdf_date("2024-01-15T12:00").unwrap());
        assert!(!items[0].valid_guid);
    }

    #[test]
    fn empty_channel_reports_error() {
        let (_, items, errors) = parse(b"<Channel></Channel>", "https://example.test/");
        assert!(items.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
