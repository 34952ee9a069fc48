//! Normalizes a rendered profile feed into [`ContentRecord`]s.
//!
//! Each feed item is located through a [`FeedMarkup`] selector set, its
//! permalink and timestamp come from the anchor wrapping its `time` element,
//! and its media is classified by an ordered list of strategies.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use plume_core::{canonical_permalink, ContentRecord, Identity, MediaRef};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::ExtractError;

static YOUTUBE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:youtube\.com/(?:watch\?(?:[^\s]*&)?v=|shorts/|embed/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .expect("youtube id pattern is valid")
});

/// Selectors describing the platform's feed markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMarkup {
    pub feed_container: String,
    pub item: String,
    pub text: String,
    pub timestamp: String,
    pub video_player: String,
    pub quoted_item: String,
    pub image: String,
}

impl Default for FeedMarkup {
    fn default() -> Self {
        Self {
            feed_container: r#"div[data-testid="primaryColumn"]"#.to_string(),
            item: r#"article[data-testid="tweet"]"#.to_string(),
            text: r#"div[data-testid="tweetText"]"#.to_string(),
            timestamp: "time[datetime]".to_string(),
            video_player: r#"div[data-testid="videoPlayer"]"#.to_string(),
            quoted_item: r#"div[role="link"]"#.to_string(),
            image: r#"div[data-testid="tweetPhoto"] img"#.to_string(),
        }
    }
}

struct CompiledMarkup {
    item: Selector,
    text: Selector,
    timestamp: Selector,
    video_player: Selector,
    quoted_item: Selector,
    image: Selector,
    status_link: Selector,
}

impl CompiledMarkup {
    fn compile(markup: &FeedMarkup) -> Result<Self, ExtractError> {
        Ok(Self {
            item: parse_selector(&markup.item)?,
            text: parse_selector(&markup.text)?,
            timestamp: parse_selector(&markup.timestamp)?,
            video_player: parse_selector(&markup.video_player)?,
            quoted_item: parse_selector(&markup.quoted_item)?,
            image: parse_selector(&markup.image)?,
            status_link: parse_selector(r#"a[href*="/status/"]"#)?,
        })
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|err| ExtractError::Selector {
        selector: selector.to_string(),
        message: err.to_string(),
    })
}

/// One feed item with the fields every media strategy needs.
struct ItemView<'a> {
    element: ElementRef<'a>,
    permalink: String,
    quote_permalink: Option<String>,
    text: String,
}

type MediaStrategy = fn(&ItemView<'_>, &CompiledMarkup) -> Option<Vec<MediaRef>>;

/// Attachment strategies in priority order; the first that applies wins.
const ATTACHMENT_STRATEGIES: [(&str, MediaStrategy); 3] = [
    ("video_with_quote_override", video_with_quote_override),
    ("video_direct", video_direct),
    ("image_collection", image_collection),
];

fn video_with_quote_override(item: &ItemView<'_>, markup: &CompiledMarkup) -> Option<Vec<MediaRef>> {
    has_match(item.element, &markup.video_player)?;
    let quote = item.quote_permalink.as_ref()?;
    Some(vec![MediaRef::video(quote.clone())])
}

fn video_direct(item: &ItemView<'_>, markup: &CompiledMarkup) -> Option<Vec<MediaRef>> {
    has_match(item.element, &markup.video_player)?;
    Some(vec![MediaRef::video(item.permalink.clone())])
}

fn image_collection(item: &ItemView<'_>, markup: &CompiledMarkup) -> Option<Vec<MediaRef>> {
    let mut images: Vec<MediaRef> = Vec::new();
    for src in item
        .element
        .select(&markup.image)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty())
    {
        if !images.iter().any(|m| m.locator == src) {
            images.push(MediaRef::image(src));
        }
    }
    (!images.is_empty()).then_some(images)
}

/// Embedded third-party videos referenced in the text, in order of appearance.
pub fn embedded_link_scan(text: &str) -> Vec<MediaRef> {
    let mut out: Vec<MediaRef> = Vec::new();
    for caps in YOUTUBE_ID.captures_iter(text) {
        let id = &caps[1];
        if !out.iter().any(|m| m.locator == id) {
            out.push(MediaRef::embedded_video(id));
        }
    }
    out
}

fn has_match(element: ElementRef<'_>, selector: &Selector) -> Option<()> {
    element.select(selector).next().map(|_| ())
}

fn classify_media(item: &ItemView<'_>, markup: &CompiledMarkup) -> Vec<MediaRef> {
    let attachments = ATTACHMENT_STRATEGIES
        .iter()
        .find_map(|(name, strategy)| {
            strategy(item, markup).map(|media| {
                debug!(strategy = %name, permalink = %item.permalink, "media classified");
                media
            })
        })
        .unwrap_or_default();

    let mut media = embedded_link_scan(&item.text);
    media.extend(attachments);
    media
}

fn is_within(element: ElementRef<'_>, container: Option<ElementRef<'_>>) -> bool {
    let Some(container) = container else {
        return false;
    };
    element.ancestors().any(|node| node.id() == container.id())
}

/// Permalink and timestamp taken from the `a[href]` wrapping a `time` element.
fn anchor_of(time: ElementRef<'_>, item: ElementRef<'_>) -> Option<(String, DateTime<Utc>)> {
    let published_at = DateTime::parse_from_rfc3339(time.value().attr("datetime")?.trim())
        .ok()?
        .with_timezone(&Utc);
    let href = time
        .ancestors()
        .take_while(|node| node.id() != item.id())
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "a")
        .and_then(|a| a.value().attr("href"))?;
    Some((canonical_permalink(href)?, published_at))
}

fn read_item<'a>(element: ElementRef<'a>, markup: &CompiledMarkup) -> Option<(ItemView<'a>, DateTime<Utc>)> {
    let quoted = element.select(&markup.quoted_item).next();

    let mut outer = None;
    let mut quote_anchor = None;
    for time in element.select(&markup.timestamp) {
        let Some(anchor) = anchor_of(time, element) else {
            continue;
        };
        if is_within(time, quoted) {
            quote_anchor.get_or_insert(anchor);
        } else if outer.is_none() {
            outer = Some(anchor);
        }
    }
    let (permalink, published_at) = outer?;

    let text = element
        .select(&markup.text)
        .find(|el| !is_within(*el, quoted))
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())?;

    let quote_permalink = quote_anchor.map(|(link, _)| link).or_else(|| {
        quoted?
            .select(&markup.status_link)
            .filter_map(|a| a.value().attr("href"))
            .find_map(canonical_permalink)
    });

    Some((
        ItemView {
            element,
            permalink,
            quote_permalink,
            text,
        },
        published_at,
    ))
}

/// Parses a feed snapshot into records, newest first. Items without a text
/// body or without a parseable permalink/timestamp anchor are dropped.
pub fn parse_feed(html: &str, identity: &Identity, markup: &FeedMarkup) -> Result<Vec<ContentRecord>, ExtractError> {
    let compiled = CompiledMarkup::compile(markup)?;
    let document = Html::parse_document(html);

    let mut records = Vec::new();
    let mut discarded = 0usize;
    for element in document.select(&compiled.item) {
        let Some((view, published_at)) = read_item(element, &compiled) else {
            discarded += 1;
            continue;
        };
        let media = classify_media(&view, &compiled);
        records.push(ContentRecord {
            identity: identity.handle.clone(),
            permalink: view.permalink,
            text: view.text,
            published_at,
            media,
        });
    }
    if discarded > 0 {
        debug!(handle = %identity.handle, discarded, "feed items without text or anchor");
    }

    records.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plume_core::MediaKind;

    fn item(body: &str) -> String {
        format!(r#"<article data-testid="tweet">{body}</article>"#)
    }

    fn anchor(href: &str, datetime: &str) -> String {
        format!(r#"<a href="{href}"><time datetime="{datetime}">1h</time></a>"#)
    }

    fn text(body: &str) -> String {
        format!(r#"<div data-testid="tweetText"><span>{body}</span></div>"#)
    }

    fn page(items: &[String]) -> String {
        format!(
            r#"<html><body><div data-testid="primaryColumn">{}</div></body></html>"#,
            items.concat()
        )
    }

    fn parse(html: &str) -> Vec<ContentRecord> {
        parse_feed(html, &Identity::new("rustlang"), &FeedMarkup::default()).unwrap()
    }

    #[test]
    fn items_without_text_or_anchor_are_discarded() {
        let html = page(&[
            item(&format!("{}{}", anchor("/rustlang/status/1", "2025-01-01T10:00:00.000Z"), text("kept"))),
            item(&anchor("/rustlang/status/2", "2025-01-01T11:00:00.000Z")),
            item(&text("no anchor at all")),
            item(&format!("{}{}", anchor("/rustlang/status/3", "not a date"), text("bad time"))),
        ]);
        let records = parse(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].permalink, "https://x.com/rustlang/status/1");
        assert_eq!(records[0].text, "kept");
        assert_eq!(records[0].identity, "rustlang");
        assert!(records[0].media.is_empty());
    }

    #[test]
    fn quoted_text_is_not_taken_as_the_item_body() {
        let quoted = format!(
            r#"<div role="link">{}{}</div>"#,
            anchor("/other/status/40", "2024-12-30T09:00:00.000Z"),
            text("quoted words")
        );
        let quote_only = item(&format!("{}{}", anchor("/rustlang/status/41", "2025-01-01T09:00:00.000Z"), quoted));
        let with_comment = item(&format!(
            "{}{}{}",
            anchor("/rustlang/status/42", "2025-01-01T10:00:00.000Z"),
            quoted,
            text("my comment")
        ));
        let records = parse(&page(&[quote_only, with_comment]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].permalink, "https://x.com/rustlang/status/42");
        assert_eq!(records[0].text, "my comment");
    }

    #[test]
    fn video_with_quote_uses_quoted_link() {
        let quoted = format!(
            r#"<div role="link">{}<div data-testid="videoPlayer"><video></video></div></div>"#,
            anchor("https://twitter.com/other/status/99?s=20", "2024-12-31T09:00:00.000Z")
        );
        let html = page(&[item(&format!(
            "{}{}{}",
            anchor("/rustlang/status/5", "2025-01-02T10:00:00.000Z"),
            text("look at this"),
            quoted
        ))]);
        let records = parse(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].permalink, "https://x.com/rustlang/status/5");
        assert_eq!(records[0].media, vec![MediaRef::video("https://x.com/other/status/99")]);
    }

    #[test]
    fn direct_video_uses_own_permalink() {
        let html = page(&[item(&format!(
            r#"{}{}<div data-testid="videoPlayer"></div>"#,
            anchor("/rustlang/status/6/", "2025-01-02T10:00:00Z"),
            text("clip")
        ))]);
        let records = parse(&html);
        assert_eq!(records[0].media, vec![MediaRef::video("https://x.com/rustlang/status/6")]);
    }

    #[test]
    fn images_are_collected_in_order_without_duplicates() {
        let html = page(&[item(&format!(
            r#"{}{}<div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/a.jpg"></div><div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/b.jpg"></div><div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/a.jpg"></div>"#,
            anchor("/rustlang/status/7", "2025-01-02T10:00:00Z"),
            text("pics")
        ))]);
        let media = &parse(&html)[0].media;
        assert_eq!(media.len(), 2);
        assert!(media.iter().all(|m| m.kind == MediaKind::Image));
        assert_eq!(media[1].locator, "https://pbs.twimg.com/b.jpg");
    }

    #[test]
    fn embedded_videos_are_prepended_to_attachments() {
        let html = page(&[item(&format!(
            r#"{}{}<div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/c.jpg"></div>"#,
            anchor("/rustlang/status/8", "2025-01-02T10:00:00Z"),
            text("watch https://www.youtube.com/watch?v=dQw4w9WgXcQ and youtu.be/abcdefghijk")
        ))]);
        let media = &parse(&html)[0].media;
        assert_eq!(
            media,
            &vec![
                MediaRef::embedded_video("dQw4w9WgXcQ"),
                MediaRef::embedded_video("abcdefghijk"),
                MediaRef::image("https://pbs.twimg.com/c.jpg"),
            ]
        );
    }

    #[test]
    fn embedded_scan_covers_link_shapes() {
        let found = embedded_link_scan(
            "youtube.com/shorts/AAAAAAAAAAA youtube.com/embed/BBBBBBBBBBB \
             youtube.com/watch?feature=share&v=CCCCCCCCCCC youtube.com/watch?v=AAAAAAAAAAA",
        );
        let ids: Vec<_> = found.iter().map(|m| m.locator.as_str()).collect();
        assert_eq!(ids, ["AAAAAAAAAAA", "BBBBBBBBBBB", "CCCCCCCCCCC"]);
        assert!(embedded_link_scan("no links here").is_empty());
    }

    #[test]
    fn records_are_sorted_newest_first_and_mirrors_normalized() {
        let html = page(&[
            item(&format!("{}{}", anchor("https://twitter.com/rustlang/status/1", "2025-01-01T00:00:00Z"), text("old"))),
            item(&format!("{}{}", anchor("https://mobile.x.com/rustlang/status/3#m", "2025-01-03T00:00:00Z"), text("new"))),
            item(&format!("{}{}", anchor("/rustlang/status/2", "2025-01-02T00:00:00+00:00"), text("mid"))),
        ]);
        let records = parse(&html);
        let links: Vec<_> = records.iter().map(|r| r.permalink.as_str()).collect();
        assert_eq!(
            links,
            [
                "https://x.com/rustlang/status/3",
                "https://x.com/rustlang/status/2",
                "https://x.com/rustlang/status/1",
            ]
        );
    }

    #[test]
    fn empty_feed_yields_no_records_and_bad_selector_errors() {
        assert!(parse(&page(&[])).is_empty());
        let markup = FeedMarkup {
            item: "[[[".to_string(),
            ..FeedMarkup::default()
        };
        assert!(matches!(
            parse_feed("<html></html>", &Identity::new("a"), &markup),
            Err(ExtractError::Selector { .. })
        ));
    }
}
