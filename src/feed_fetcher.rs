//! Feed metadata enrichment: an external collaborator this core consults
//! best-effort when it needs to create a catalog row for a newly-added
//! subscription.
//!
//! Shaped after the host's `url_fetcher`/`http_requester` Factory pattern --
//! a `FeedFetcher` trait, a `Live` implementation doing a real HTTP GET with
//! a hard deadline, and a `PassThrough` fixture for tests -- generalized to
//! the gpodder core's actual need (title + a couple of optional metadata
//! fields) rather than raw bytes.

use std::time::Duration;

/// The hard deadline from §5: "The feed fetcher imposes a hard 15-second
/// deadline; on expiry it yields a placeholder record and the subscription
/// add succeeds anyway."
pub const FETCH_DEADLINE: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedMetadata {
    pub title:       String,
    pub description: Option<String>,
    pub link_url:    Option<String>,
    pub image_url:   Option<String>,
    pub language:    Option<String>,
}

impl FeedMetadata {
    /// The placeholder inserted when a fetch fails or times out: "feedURL
    /// as title" (§3).
    pub fn placeholder(feed_url: &str) -> FeedMetadata {
        FeedMetadata {
            title:       feed_url.to_owned(),
            description: None,
            link_url:    None,
            image_url:   None,
            language:    None,
        }
    }
}

pub trait FeedFetcher: Send + Sync {
    /// Never returns an error: a failed fetch degrades to a placeholder,
    /// per the "best-effort feed enrichment" design note. The bool signals
    /// whether the result is a genuine fetch (`true`) or a placeholder
    /// (`false`), useful for logging.
    fn fetch(&self, feed_url: &str) -> (FeedMetadata, bool);
}

pub struct LiveFeedFetcher {
    client: reqwest::blocking::Client,
}

impl LiveFeedFetcher {
    pub fn new() -> LiveFeedFetcher {
        LiveFeedFetcher {
            client: reqwest::blocking::Client::builder()
                .timeout(FETCH_DEADLINE)
                .gzip(true)
                .build()
                .expect("failed to build HTTP client"),
        }
    }
}

impl Default for LiveFeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedFetcher for LiveFeedFetcher {
    fn fetch(&self, feed_url: &str) -> (FeedMetadata, bool) {
        match self.client.get(feed_url).send().and_then(|r| r.text()) {
            Ok(body) => match parse_feed_title(&body) {
                Some(title) => (
                    FeedMetadata {
                        title,
                        description: None,
                        link_url: None,
                        image_url: None,
                        language: None,
                    },
                    true,
                ),
                None => (FeedMetadata::placeholder(feed_url), false),
            },
            Err(_) => (FeedMetadata::placeholder(feed_url), false),
        }
    }
}

/// A deliberately minimal extraction of `<title>...</title>` from an RSS/Atom
/// document's `<channel>`/`<feed>` header. Full feed parsing (item lists,
/// enclosures, etc.) is the host application's job; this core only needs
/// enough to avoid the placeholder title when a fetch does succeed.
fn parse_feed_title(body: &str) -> Option<String> {
    let start = body.find("<title")?;
    let tag_end = body[start..].find('>')? + start + 1;
    let end = body[tag_end..].find("</title>")? + tag_end;
    let raw = body[tag_end..end].trim();
    if raw.is_empty() {
        None
    } else {
        Some(
            raw.replace("<![CDATA[", "")
                .replace("]]>", "")
                .trim()
                .to_owned(),
        )
    }
}

/// Fixture implementation: returns a canned title derived from the URL, or
/// a configured failure, without touching the network.
pub struct PassThroughFeedFetcher {
    pub fail: bool,
}

impl PassThroughFeedFetcher {
    pub fn new() -> PassThroughFeedFetcher {
        PassThroughFeedFetcher { fail: false }
    }

    pub fn failing() -> PassThroughFeedFetcher {
        PassThroughFeedFetcher { fail: true }
    }
}

impl Default for PassThroughFeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedFetcher for PassThroughFeedFetcher {
    fn fetch(&self, feed_url: &str) -> (FeedMetadata, bool) {
        if self.fail {
            (FeedMetadata::placeholder(feed_url), false)
        } else {
            (
                FeedMetadata {
                    title:       format!("Test Podcast ({})", feed_url),
                    description: Some("A podcast used in tests.".to_owned()),
                    link_url:    None,
                    image_url:   None,
                    language:    Some("en".to_owned()),
                },
                true,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        let meta = FeedMetadata::placeholder("https://example.com/rss");
        assert_eq!("https://example.com/rss", meta.title);
    }

    #[test]
    fn test_pass_through_success() {
        let fetcher = PassThroughFeedFetcher::new();
        let (meta, ok) = fetcher.fetch("https://example.com/rss");
        assert!(ok);
        assert!(meta.title.contains("example.com"));
    }

    #[test]
    fn test_pass_through_failure_yields_placeholder() {
        let fetcher = PassThroughFeedFetcher::failing();
        let (meta, ok) = fetcher.fetch("https://example.com/rss");
        assert!(!ok);
        assert_eq!("https://example.com/rss", meta.title);
    }

    #[test]
    fn test_parse_feed_title() {
        let body = "<rss><channel><title>My Podcast</title></channel></rss>";
        assert_eq!(Some("My Podcast".to_owned()), parse_feed_title(body));
    }

    #[test]
    fn test_parse_feed_title_cdata() {
        let body = "<rss><channel><title><![CDATA[My Podcast]]></title></channel></rss>";
        assert_eq!(Some("My Podcast".to_owned()), parse_feed_title(body));
    }

    #[test]
    fn test_parse_feed_title_missing() {
        assert_eq!(None, parse_feed_title("<rss><channel></channel></rss>"));
    }
}
