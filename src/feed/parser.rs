use html_escape::decode_html_entities;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// The body was fetched but is not a usable RSS document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// XML syntax error (unclosed or mismatched tags, bad encoding)
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Document ended with elements still open
    #[error("XML document ended inside <{0}>")]
    Truncated(String),

    /// Well-formed XML, but no `<channel>` under the root element
    #[error("document has no <channel> element")]
    MissingChannel,
}

/// An RSS 2.0 document: `<rss><channel>...</channel></rss>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssFeed {
    pub channel: RssChannel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssChannel {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Items in document order
    pub items: Vec<RssItem>,
}

/// One `<item>`; transient, turned into a post by the ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Free-text publish date, left for `parse_unknown_time`
    pub pub_date: String,
}

/// Which string an open element's text belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ChannelTitle,
    ChannelLink,
    ChannelDescription,
    ItemTitle,
    ItemLink,
    ItemDescription,
    ItemPubDate,
}

impl Field {
    /// Map an element path (root excluded) to a field.
    ///
    /// Names are compared with their prefix, so `<atom:link>` or
    /// `<media:title>` never shadow the plain RSS elements.
    fn at(path: &[Vec<u8>]) -> Option<Field> {
        match path {
            [channel, name] if channel == b"channel" => match name.as_slice() {
                b"title" => Some(Field::ChannelTitle),
                b"link" => Some(Field::ChannelLink),
                b"description" => Some(Field::ChannelDescription),
                _ => None,
            },
            [channel, item, name] if channel == b"channel" && item == b"item" => {
                match name.as_slice() {
                    b"title" => Some(Field::ItemTitle),
                    b"link" => Some(Field::ItemLink),
                    b"description" => Some(Field::ItemDescription),
                    b"pubDate" => Some(Field::ItemPubDate),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Decode an RSS document.
///
/// Only structure is checked; unknown elements are skipped. Titles and
/// descriptions of the channel and of every item are HTML-unescaped because
/// many sources double-encode entities (`&amp;amp;`, `&amp;#39;`). Links and
/// dates are passed through as written.
///
/// # Security
///
/// quick-xml never expands `<!ENTITY>` declarations, so DOCTYPE-based
/// entity attacks (XXE, billion laughs) have nothing to act on.
pub fn parse_rss(bytes: &[u8]) -> Result<RssFeed, ParseError> {
    // Segments are kept raw: text and CDATA inside one element are joined
    // first, then trimmed once per field.
    let mut reader = Reader::from_reader(bytes);

    let mut channel: Option<RssChannel> = None;
    let mut item: Option<RssItem> = None;
    // Open elements below the root, e.g. [channel, item, title]
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut depth: usize = 0;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if depth > 0 {
                    path.push(e.name().as_ref().to_vec());
                }
                depth += 1;
                match path.as_slice() {
                    [c] if c == b"channel" => {
                        channel.get_or_insert_with(RssChannel::default);
                    }
                    [c, i] if c == b"channel" && i == b"item" => item = Some(RssItem::default()),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                // <item/> still counts as an (empty) item
                if depth == 1 && e.name().as_ref() == b"channel" {
                    channel.get_or_insert_with(RssChannel::default);
                } else if depth == 2 && path.first().is_some_and(|c| c == b"channel") && e.name().as_ref() == b"item" {
                    if let Some(ch) = channel.as_mut() {
                        ch.items.push(RssItem::default());
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(field) = Field::at(&path) {
                    // Unknown HTML entities (&nbsp;) are not XML errors here:
                    // keep the raw text and let HTML unescaping resolve them.
                    let text = match t.unescape() {
                        Ok(s) => s.into_owned(),
                        Err(_) => reader
                            .decoder()
                            .decode(&t)
                            .map_err(|e| ParseError::Xml(e.to_string()))?
                            .into_owned(),
                    };
                    append(field, &text, channel.as_mut(), item.as_mut());
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(field) = Field::at(&path) {
                    let text = reader
                        .decoder()
                        .decode(&c)
                        .map_err(|e| ParseError::Xml(e.to_string()))?;
                    append(field, &text, channel.as_mut(), item.as_mut());
                }
            }
            Ok(Event::End(_)) => {
                let closing_item = matches!(
                    path.as_slice(),
                    [c, i] if c == b"channel" && i == b"item"
                );
                if closing_item {
                    if let (Some(ch), Some(done)) = (channel.as_mut(), item.take()) {
                        ch.items.push(done);
                    }
                }
                path.pop();
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = path.last() {
        return Err(ParseError::Truncated(
            String::from_utf8_lossy(open).into_owned(),
        ));
    }
    if depth > 0 {
        return Err(ParseError::Truncated("root".to_string()));
    }

    let mut channel = channel.ok_or(ParseError::MissingChannel)?;
    for s in [&mut channel.title, &mut channel.link, &mut channel.description] {
        trim_in_place(s);
    }
    unescape_in_place(&mut channel.title);
    unescape_in_place(&mut channel.description);
    for item in &mut channel.items {
        for s in [&mut item.title, &mut item.link, &mut item.description, &mut item.pub_date] {
            trim_in_place(s);
        }
        unescape_in_place(&mut item.title);
        unescape_in_place(&mut item.description);
    }

    Ok(RssFeed { channel })
}

fn append(field: Field, text: &str, channel: Option<&mut RssChannel>, item: Option<&mut RssItem>) {
    let target = match (field, channel, item) {
        (Field::ChannelTitle, Some(ch), _) => &mut ch.title,
        (Field::ChannelLink, Some(ch), _) => &mut ch.link,
        (Field::ChannelDescription, Some(ch), _) => &mut ch.description,
        (Field::ItemTitle, _, Some(it)) => &mut it.title,
        (Field::ItemLink, _, Some(it)) => &mut it.link,
        (Field::ItemDescription, _, Some(it)) => &mut it.description,
        (Field::ItemPubDate, _, Some(it)) => &mut it.pub_date,
        _ => return,
    };
    target.push_str(text);
}

fn trim_in_place(s: &mut String) {
    let trimmed = s.trim();
    if trimmed.len() != s.len() {
        *s = trimmed.to_string();
    }
}

fn unescape_in_place(s: &mut String) {
    if s.contains('&') {
        let decoded = decode_html_entities(s.as_str()).into_owned();
        *s = decoded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
<channel>
<title>Lane&amp;#39;s Blog</title>
<link>https://example.com/</link>
<atom:link href="https://example.com/index.xml" rel="self" type="application/rss+xml"/>
<description>Recent content &amp;amp; more</description>
<generator>Hugo</generator>
<item>
<title>First &amp;#39;post&amp;#39;</title>
<link>https://example.com/first/</link>
<pubDate>Mon, 15 Jan 2024 10:00:00 +0000</pubDate>
<guid>https://example.com/first/</guid>
<description><![CDATA[<p>Hello &amp; welcome</p>]]></description>
</item>
<item>
<title>Second</title>
<link>https://example.com/second/</link>
<pubDate>2024-01-16</pubDate>
<description>Plain</description>
</item>
</channel>
</rss>"#;

    #[test]
    fn test_parses_channel_and_items_in_order() {
        let feed = parse_rss(SAMPLE.as_bytes()).unwrap();
        assert_eq!(feed.channel.link, "https://example.com/");
        let links: Vec<&str> = feed.channel.items.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(
            links,
            vec!["https://example.com/first/", "https://example.com/second/"]
        );
        assert_eq!(feed.channel.items[0].pub_date, "Mon, 15 Jan 2024 10:00:00 +0000");
        assert_eq!(feed.channel.items[1].pub_date, "2024-01-16");
    }

    #[test]
    fn test_double_encoded_entities_unescaped() {
        let feed = parse_rss(SAMPLE.as_bytes()).unwrap();
        assert_eq!(feed.channel.title, "Lane's Blog");
        assert_eq!(feed.channel.description, "Recent content & more");
        assert_eq!(feed.channel.items[0].title, "First 'post'");
        assert_eq!(feed.channel.items[0].description, "<p>Hello & welcome</p>");
    }

    #[test]
    fn test_text_and_cdata_keep_whitespace_between_them() {
        let xml = r#"<rss><channel><item>
<description>Intro <![CDATA[<b>bold</b>]]> tail</description>
</item></channel></rss>"#;
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert_eq!(feed.channel.items[0].description, "Intro <b>bold</b> tail");
    }

    #[test]
    fn test_field_whitespace_trimmed_once() {
        let xml = "<rss><channel><item>\n<title>\n  Spaced  out \n</title>\n<link> https://example.com/x </link>\n</item></channel></rss>";
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert_eq!(feed.channel.items[0].title, "Spaced  out");
        assert_eq!(feed.channel.items[0].link, "https://example.com/x");
    }

    #[test]
    fn test_link_not_unescaped() {
        let xml = r#"<rss><channel><item>
<title>Q &amp;amp; A</title>
<link>https://example.com/?a=1&amp;amp;b=2</link>
</item></channel></rss>"#;
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert_eq!(feed.channel.items[0].title, "Q & A");
        assert_eq!(feed.channel.items[0].link, "https://example.com/?a=1&amp;b=2");
    }

    #[test]
    fn test_prefixed_elements_do_not_shadow_rss_fields() {
        let xml = r#"<rss><channel>
<item><title>Real</title><media:title>Media</media:title><link>https://example.com/x</link></item>
</channel></rss>"#;
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert_eq!(feed.channel.items[0].title, "Real");
    }

    #[test]
    fn test_html_entity_not_known_to_xml() {
        let xml = "<rss><channel><item><title>a&nbsp;b</title></item></channel></rss>";
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert_eq!(feed.channel.items[0].title, "a\u{a0}b");
    }

    #[test]
    fn test_missing_item_fields_default_to_empty() {
        let xml = r#"<rss><channel><item><link>https://example.com/x</link></item></channel></rss>"#;
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert_eq!(
            feed.channel.items,
            vec![RssItem {
                link: "https://example.com/x".to_string(),
                ..RssItem::default()
            }]
        );
    }

    #[test]
    fn test_empty_channel() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert!(feed.channel.items.is_empty());
    }

    #[test]
    fn test_nested_elements_inside_item_ignored() {
        let xml = r#"<rss><channel>
<image><title>Logo</title><link>https://example.com/logo.png</link></image>
<item><source><title>Elsewhere</title></source><title>Mine</title></item>
</channel></rss>"#;
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert_eq!(feed.channel.title, "");
        assert_eq!(feed.channel.link, "");
        assert_eq!(feed.channel.items[0].title, "Mine");
    }

    #[test]
    fn test_duplicate_links_are_not_filtered() {
        let xml = r#"<rss><channel>
<item><link>https://example.com/same</link></item>
<item><link>https://example.com/same</link></item>
</channel></rss>"#;
        let feed = parse_rss(xml.as_bytes()).unwrap();
        assert_eq!(feed.channel.items.len(), 2);
    }

    #[test]
    fn test_mismatched_tags_rejected() {
        let xml = "<rss><channel><item></channel></rss>";
        assert!(matches!(parse_rss(xml.as_bytes()), Err(ParseError::Xml(_))));
    }

    #[test]
    fn test_truncated_document_rejected() {
        let xml = "<rss><channel><item><title>cut off";
        assert!(parse_rss(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_not_rss_rejected() {
        let err = parse_rss(b"<html><body>nope</body></html>").unwrap_err();
        assert!(matches!(err, ParseError::MissingChannel));
    }

    #[test]
    fn test_plain_text_rejected() {
        assert!(parse_rss(b"this is not xml at all").is_err());
    }
}
