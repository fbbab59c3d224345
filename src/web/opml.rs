//! OPML rendering (§6): `<opml>` documents for the Simple API's `.opml`
//! format, shared by `simple_api::subscriptions`/`toplist`/`search`.
//!
//! Grounded on the host's `quick_xml::reader` usage elsewhere in this
//! crate's lineage (feed parsing) generalized to the write side --
//! `quick_xml::Writer` is the idiomatic counterpart the teacher never
//! needed, since it only ever consumed feeds rather than producing them.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

/// One `<outline>` entry: a podcast title and its feed URL.
pub struct OutlineEntry {
    pub title:    String,
    pub feed_url: String,
}

/// Renders `entries` as a full OPML 1.0 document per spec.md §6's exact
/// shape: `<opml version="1.0"><head><title>gPodder
/// Subscriptions</title></head><body><outline text="…" type="rss"
/// xmlUrl="…"/>…</body></opml>`.
pub fn render(entries: &[OutlineEntry]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("writing to an in-memory buffer never fails");

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "1.0"));
    writer.write_event(Event::Start(opml)).unwrap();

    writer.write_event(Event::Start(BytesStart::new("head"))).unwrap();
    writer.write_event(Event::Start(BytesStart::new("title"))).unwrap();
    writer
        .write_event(Event::Text(BytesText::new("gPodder Subscriptions")))
        .unwrap();
    writer.write_event(Event::End(BytesEnd::new("title"))).unwrap();
    writer.write_event(Event::End(BytesEnd::new("head"))).unwrap();

    writer.write_event(Event::Start(BytesStart::new("body"))).unwrap();
    for entry in entries {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("text", entry.title.as_str()));
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("xmlUrl", entry.feed_url.as_str()));
        writer.write_event(Event::Empty(outline)).unwrap();
    }
    writer.write_event(Event::End(BytesEnd::new("body"))).unwrap();

    writer.write_event(Event::End(BytesEnd::new("opml"))).unwrap();

    String::from_utf8(writer.into_inner().into_inner()).expect("quick_xml only ever writes UTF-8")
}
