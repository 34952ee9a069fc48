//! Incremental scroll stabilization: scroll, let lazy content settle, count, and
//! stop once the feed reaches the target, stops growing, or the iteration budget
//! runs out.

use std::time::Duration;

use tracing::debug;

use crate::{ExtractError, FeedSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollConfig {
    pub max_iterations: usize,
    pub offset_px: u32,
    pub settle: Duration,
    pub feed_timeout: Duration,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            offset_px: 2000,
            settle: Duration::from_secs(2),
            feed_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    Stalled,
    IterationLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    Loading,
    Scrolling,
    Measuring,
    Done(StopReason),
}

/// Pure state machine behind the scroll loop; feed it one measurement per
/// scroll iteration.
#[derive(Debug, Clone)]
pub struct ScrollStabilizer {
    target: usize,
    max_iterations: usize,
    iterations: usize,
    last_count: Option<usize>,
    phase: ScrollPhase,
}

impl ScrollStabilizer {
    pub fn new(target: usize, max_iterations: usize) -> Self {
        Self {
            target,
            max_iterations: max_iterations.max(1),
            iterations: 0,
            last_count: None,
            phase: ScrollPhase::Loading,
        }
    }

    pub fn phase(&self) -> ScrollPhase {
        self.phase
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn last_count(&self) -> usize {
        self.last_count.unwrap_or_default()
    }

    pub fn begin_scroll(&mut self) {
        if !matches!(self.phase, ScrollPhase::Done(_)) {
            self.phase = ScrollPhase::Scrolling;
        }
    }

    /// Records the item count measured after a scroll; returns why the loop
    /// should stop, if it should.
    pub fn observe(&mut self, count: usize) -> Option<StopReason> {
        if let ScrollPhase::Done(reason) = self.phase {
            return Some(reason);
        }
        self.phase = ScrollPhase::Measuring;
        self.iterations += 1;
        let previous = self.last_count.replace(count);

        let reason = if count >= self.target {
            Some(StopReason::TargetReached)
        } else if previous == Some(count) {
            Some(StopReason::Stalled)
        } else if self.iterations >= self.max_iterations {
            Some(StopReason::IterationLimit)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.phase = ScrollPhase::Done(reason);
        }
        reason
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollOutcome {
    pub iterations: usize,
    pub count: usize,
    pub reason: StopReason,
}

/// Drives `session` through the stabilization loop.
pub async fn stabilize(
    session: &mut dyn FeedSession,
    config: &ScrollConfig,
    item_selector: &str,
    target: usize,
) -> Result<ScrollOutcome, ExtractError> {
    let mut state = ScrollStabilizer::new(target, config.max_iterations);
    loop {
        state.begin_scroll();
        session.scroll_by(config.offset_px).await?;
        tokio::time::sleep(config.settle).await;
        let count = session.count_items(item_selector).await?;
        debug!(iteration = state.iterations() + 1, count, "feed measured");
        if let Some(reason) = state.observe(count) {
            return Ok(ScrollOutcome {
                iterations: state.iterations(),
                count,
                reason,
            });
        }
    }
}
