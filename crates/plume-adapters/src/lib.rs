//! Feed extraction contracts and the rendered-feed extractor.

use std::time::Duration;

use async_trait::async_trait;
use plume_core::{ContentRecord, Identity};
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

pub mod chromium;
pub mod markup;
pub mod scroll;

pub use chromium::{ChromiumConfig, ChromiumSessionProvider};
pub use markup::{embedded_link_scan, parse_feed, FeedMarkup};
pub use scroll::{stabilize, ScrollConfig, ScrollOutcome, ScrollPhase, ScrollStabilizer, StopReason};

pub const CRATE_NAME: &str = "plume-adapters";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no usable session for @{handle}: {reason}")]
    Session { handle: String, reason: String },
    #[error("feed for @{handle} did not render within {timeout:?}")]
    RenderTimeout { handle: String, timeout: Duration },
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
    #[error("browser error: {0}")]
    Browser(String),
}

/// An open, authenticated view of one identity's feed.
#[async_trait]
pub trait FeedSession: Send {
    /// Waits until `selector` is present, failing with
    /// [`ExtractError::RenderTimeout`] after `timeout`.
    async fn wait_for_feed(&mut self, selector: &str, timeout: Duration) -> Result<(), ExtractError>;
    async fn scroll_by(&mut self, pixels: u32) -> Result<(), ExtractError>;
    async fn count_items(&mut self, selector: &str) -> Result<usize, ExtractError>;
    async fn snapshot_html(&mut self) -> Result<String, ExtractError>;
    /// Releases the underlying browser resources.
    async fn close(self: Box<Self>) -> Result<(), ExtractError>;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self, identity: &Identity) -> Result<Box<dyn FeedSession>, ExtractError>;
}

/// Anything that can produce the most recent posts of an identity.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn extract(&self, identity: &Identity, target_count: usize) -> Result<Vec<ContentRecord>, ExtractError>;
}

pub struct FeedExtractor<P> {
    provider: P,
    markup: FeedMarkup,
    scroll: ScrollConfig,
}

impl<P: SessionProvider> FeedExtractor<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            markup: FeedMarkup::default(),
            scroll: ScrollConfig::default(),
        }
    }

    async fn render(&self, session: &mut dyn FeedSession, target_count: usize) -> Result<String, ExtractError> {
        session
            .wait_for_feed(&self.markup.feed_container, self.scroll.feed_timeout)
            .await?;
        let outcome = stabilize(session, &self.scroll, &self.markup.item, target_count).await?;
        debug!(
            iterations = outcome.iterations,
            count = outcome.count,
            reason = ?outcome.reason,
            "scrolling stopped"
        );
        session.snapshot_html().await
    }
}

#[async_trait]
impl<P: SessionProvider> FeedSource for FeedExtractor<P> {
    async fn extract(&self, identity: &Identity, target_count: usize) -> Result<Vec<ContentRecord>, ExtractError> {
        if target_count == 0 {
            return Ok(Vec::new());
        }
        let span = tracing::info_span!("extract", handle = %identity.handle, target_count);
        async {
            let mut session = self.provider.open(identity).await?;
            let rendered = self.render(session.as_mut(), target_count).await;
            if let Err(err) = session.close().await {
                warn!(error = %err, "closing feed session failed");
            }

            let mut records = parse_feed(&rendered?, identity, &self.markup)?;
            records.truncate(target_count);
            info!(records = records.len(), "feed extracted");
            Ok::<_, ExtractError>(records)
        }
        .instrument(span)
        .await
    }
}
