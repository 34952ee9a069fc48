//! Core domain model for Plume: scraped content records and persisted articles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "plume-core";

/// Host every permalink is rewritten to.
pub const CANONICAL_HOST: &str = "x.com";

/// Display domains that serve the same posts as [`CANONICAL_HOST`].
const MIRROR_HOSTS: &[&str] = &[
    "twitter.com",
    "www.twitter.com",
    "mobile.twitter.com",
    "www.x.com",
    "mobile.x.com",
    "fxtwitter.com",
    "vxtwitter.com",
    "fixupx.com",
    "nitter.net",
];

/// A monitored feed source, e.g. a social-media account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub handle: String,
}

impl Identity {
    pub fn new(handle: impl AsRef<str>) -> Self {
        Self {
            handle: normalize_handle(handle.as_ref()),
        }
    }

    pub fn feed_url(&self) -> String {
        format!("https://{CANONICAL_HOST}/{}", self.handle)
    }

    pub fn source_label(&self) -> String {
        format!("X @{}", self.handle)
    }
}

pub fn normalize_handle(input: &str) -> String {
    input.trim().trim_start_matches('@').to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    EmbeddedVideo,
}

/// Media attached to a post. `locator` is a URL, or the external video id for
/// [`MediaKind::EmbeddedVideo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub locator: String,
}

impl MediaRef {
    pub fn image(locator: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            locator: locator.into(),
        }
    }

    pub fn video(locator: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Video,
            locator: locator.into(),
        }
    }

    pub fn embedded_video(video_id: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::EmbeddedVideo,
            locator: video_id.into(),
        }
    }
}

/// One post as produced by a feed extraction. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub identity: String,
    pub permalink: String,
    pub text: String,
    pub published_at: DateTime<Utc>,
    pub media: Vec<MediaRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationMethod {
    PlatformDirect,
    FeedSyndication,
    Manual,
}

impl CreationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationMethod::PlatformDirect => "platform_direct",
            CreationMethod::FeedSyndication => "feed_syndication",
            CreationMethod::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "platform_direct" => Some(CreationMethod::PlatformDirect),
            "feed_syndication" => Some(CreationMethod::FeedSyndication),
            "manual" => Some(CreationMethod::Manual),
            _ => None,
        }
    }
}

/// Structured output of the summarization service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub title: String,
    pub summary: String,
}

/// Persisted article. `permalink` is the unique key across the whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub permalink: String,
    pub source_label: String,
    pub creation_method: CreationMethod,
    pub published_at: DateTime<Utc>,
    pub media: Vec<MediaRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    /// Builds the article for `record`, carrying that record's own media list.
    pub fn from_record(record: &ContentRecord, summary: Summary, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: summary.title,
            summary: summary.summary,
            body: record.text.clone(),
            permalink: record.permalink.clone(),
            source_label: Identity::new(&record.identity).source_label(),
            creation_method: CreationMethod::PlatformDirect,
            published_at: record.published_at,
            media: record.media.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Normalizes a post link to its canonical form: `https`, canonical host, no query,
/// fragment or trailing slash. Relative links resolve against the canonical host.
pub fn canonical_permalink(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let base = Url::parse(&format!("https://{CANONICAL_HOST}/")).ok()?;
    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    if host == CANONICAL_HOST || MIRROR_HOSTS.contains(&host.as_str()) {
        url.set_host(Some(CANONICAL_HOST)).ok()?;
    }
    url.set_scheme("https").ok()?;
    url.set_query(None);
    url.set_fragment(None);
    let trimmed = url.path().trim_end_matches('/').to_string();
    if !trimmed.is_empty() {
        url.set_path(&trimmed);
    }
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> ContentRecord {
        ContentRecord {
            identity: "rustlang".into(),
            permalink: "https://x.com/rustlang/status/1".into(),
            text: "Rust 1.90 is out".into(),
            published_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).single().unwrap(),
            media: vec![MediaRef::image("https://pbs.twimg.com/media/a.jpg")],
        }
    }

    #[test]
    fn mirror_hosts_collapse_to_canonical_host() {
        let a = canonical_permalink("https://twitter.com/rustlang/status/123?s=20").unwrap();
        let b = canonical_permalink("https://x.com/rustlang/status/123/").unwrap();
        let c = canonical_permalink("http://mobile.twitter.com/rustlang/status/123#frag").unwrap();
        assert_eq!(a, "https://x.com/rustlang/status/123");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn relative_links_resolve_against_canonical_host() {
        assert_eq!(
            canonical_permalink("/rustlang/status/99").as_deref(),
            Some("https://x.com/rustlang/status/99")
        );
    }

    #[test]
    fn foreign_hosts_are_kept_and_junk_is_rejected() {
        assert_eq!(
            canonical_permalink("https://example.org/post/1").as_deref(),
            Some("https://example.org/post/1")
        );
        assert!(canonical_permalink("   ").is_none());
        assert!(canonical_permalink("mailto:someone@example.org").is_none());
    }

    #[test]
    fn identity_strips_at_sign() {
        let identity = Identity::new(" @rustlang ");
        assert_eq!(identity.handle, "rustlang");
        assert_eq!(identity.feed_url(), "https://x.com/rustlang");
        assert_eq!(identity.source_label(), "X @rustlang");
    }

    #[test]
    fn article_keeps_media_of_its_own_record() {
        let rec = record();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).single().unwrap();
        let article = Article::from_record(
            &rec,
            Summary {
                title: "Rust release".into(),
                summary: "A new release.".into(),
            },
            now,
        );
        assert_eq!(article.media, rec.media);
        assert_eq!(article.body, rec.text);
        assert_eq!(article.source_label, "X @rustlang");
        assert_eq!(article.creation_method, CreationMethod::PlatformDirect);
        assert_eq!(article.created_at, article.updated_at);
    }

    #[test]
    fn media_kinds_serialize_snake_case() {
        let json = serde_json::to_string(&MediaRef::embedded_video("dQw4w9WgXcQ")).unwrap();
        assert_eq!(json, r#"{"kind":"embedded_video","locator":"dQw4w9WgXcQ"}"#);
        assert_eq!(
            CreationMethod::parse(CreationMethod::FeedSyndication.as_str()),
            Some(CreationMethod::FeedSyndication)
        );
    }
}
