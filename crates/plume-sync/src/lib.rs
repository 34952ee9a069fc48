//! Ingestion orchestration: extract, deduplicate, summarize and persist, one
//! identity and one record at a time, under a single-flight run guard.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use plume_adapters::{ChromiumConfig, ChromiumSessionProvider, ExtractError, FeedExtractor, FeedSource};
use plume_core::{Article, Identity};
use plume_storage::ArticleStore;
use plume_summarizer::{LlmClientConfig, OpenAiClient, Summarizer};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod dedup;
pub mod guard;

pub use config::{ConfigError, IdentityRegistry, SyncConfig, MAX_SCRAPE_COUNT};
pub use dedup::filter_new;
pub use guard::{RunGuard, RunPermit};

pub const CRATE_NAME: &str = "plume-sync";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("article store: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("an ingestion run is already in progress")]
    Busy,
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityReport {
    pub handle: String,
    /// Records produced by extraction.
    pub found: usize,
    /// Records not stored before this run.
    pub fresh: usize,
    pub inserted: usize,
    /// Summarization gave up, or the permalink was stored concurrently.
    pub skipped: usize,
    /// Store errors while persisting.
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub articles: Vec<Article>,
}

impl IdentityReport {
    fn empty(identity: &Identity) -> Self {
        Self {
            handle: identity.handle.clone(),
            found: 0,
            fresh: 0,
            inserted: 0,
            skipped: 0,
            failed: 0,
            error: None,
            articles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub identities: Vec<IdentityReport>,
    pub inserted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub target_count: usize,
    pub item_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            target_count: 10,
            item_delay: Duration::from_secs(3),
        }
    }
}

pub struct IngestionPipeline {
    source: Arc<dyn FeedSource>,
    summarizer: Summarizer,
    store: Arc<dyn ArticleStore>,
    guard: RunGuard,
    identities: Vec<Identity>,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn FeedSource>,
        summarizer: Summarizer,
        store: Arc<dyn ArticleStore>,
        identities: Vec<Identity>,
    ) -> Self {
        Self {
            source,
            summarizer,
            store,
            guard: RunGuard::new(),
            identities,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn guard(&self) -> &RunGuard {
        &self.guard
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    /// One pass over every configured identity. Returns `None` without doing
    /// any work when another run holds the guard.
    pub async fn run_once(&self) -> Option<RunSummary> {
        let Some(permit) = self.guard.try_acquire() else {
            info!("ingestion run already in progress; skipping");
            return None;
        };
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        async {
            info!(identities = self.identities.len(), "ingestion run started");
            let mut reports = Vec::with_capacity(self.identities.len());
            for identity in &self.identities {
                let report = match self.ingest_identity(&permit, identity, self.settings.target_count, None).await {
                    Ok(report) => report,
                    Err(err) => {
                        warn!(handle = %identity.handle, error = %err, "identity ingestion aborted");
                        IdentityReport {
                            error: Some(err.to_string()),
                            ..IdentityReport::empty(identity)
                        }
                    }
                };
                reports.push(report);
            }

            let inserted = reports.iter().map(|r| r.inserted).sum();
            let summary = RunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                identities: reports,
                inserted,
            };
            info!(inserted, "ingestion run finished");
            Some(summary)
        }
        .instrument(info_span!("run", %run_id))
        .await
    }

    /// On-demand ingestion of one identity, persisting at most `persist_limit`
    /// new records. Shares the run guard with [`run_once`](Self::run_once).
    pub async fn scrape_now(&self, identity: &Identity, persist_limit: usize) -> Result<IdentityReport, ScrapeError> {
        let Some(permit) = self.guard.try_acquire() else {
            return Err(ScrapeError::Busy);
        };
        Ok(self
            .ingest_identity(&permit, identity, self.settings.target_count, Some(persist_limit))
            .await?)
    }

    /// Extracts, deduplicates, summarizes and persists one identity. Only
    /// reachable with a permit taken from this pipeline's guard.
    async fn ingest_identity(
        &self,
        _permit: &RunPermit,
        identity: &Identity,
        target_count: usize,
        persist_limit: Option<usize>,
    ) -> Result<IdentityReport, IngestError> {
        async {
            let records = self.source.extract(identity, target_count).await?;
            let mut report = IdentityReport::empty(identity);
            report.found = records.len();

            let fresh = filter_new(records, self.store.as_ref())
                .await
                .map_err(IngestError::Store)?;
            report.fresh = fresh.len();
            let limit = persist_limit.unwrap_or(usize::MAX);
            if fresh.is_empty() {
                info!(found = report.found, "nothing new");
                return Ok(report);
            }

            for record in fresh.into_iter().take(limit) {
                match self.summarizer.summarize(&record.text).await {
                    Ok(summary) => {
                        let article = Article::from_record(&record, summary, Utc::now());
                        match self.store.insert_if_absent(&article).await {
                            Ok(true) => {
                                debug!(permalink = %article.permalink, "article stored");
                                report.inserted += 1;
                                report.articles.push(article);
                            }
                            Ok(false) => {
                                debug!(permalink = %article.permalink, "article already stored");
                                report.skipped += 1;
                            }
                            Err(err) => {
                                error!(permalink = %article.permalink, error = %format!("{err:#}"), "storing article failed");
                                report.failed += 1;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(permalink = %record.permalink, error = %err, "summarization failed; skipping record");
                        report.skipped += 1;
                    }
                }
                tokio::time::sleep(self.settings.item_delay).await;
            }

            info!(
                found = report.found,
                fresh = report.fresh,
                inserted = report.inserted,
                skipped = report.skipped,
                failed = report.failed,
                "identity ingested"
            );
            Ok::<_, IngestError>(report)
        }
        .instrument(info_span!("identity", handle = %identity.handle))
        .await
    }
}

/// Registers a cron job that triggers [`IngestionPipeline::run_once`]. The
/// scheduler is returned unstarted.
pub async fn build_scheduler(pipeline: Arc<IngestionPipeline>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            if pipeline.run_once().await.is_none() {
                debug!("scheduled run skipped");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

/// Wires the production pipeline: headless Chromium extraction and an
/// OpenAI-compatible summarizer over `store`.
pub fn pipeline_from_config(
    config: &SyncConfig,
    store: Arc<dyn ArticleStore>,
    identities: Vec<Identity>,
) -> Result<IngestionPipeline> {
    let mut llm = LlmClientConfig::new(config.openai_api_key.clone());
    if let Some(base_url) = &config.openai_base_url {
        llm = llm.with_base_url(base_url.clone());
    }
    if let Some(model) = &config.openai_model {
        llm = llm.with_model(model.clone());
    }
    let client = OpenAiClient::new(llm).context("building summarization client")?;
    let summarizer = Summarizer::new(Arc::new(client), config.summary_language.clone());

    let provider = ChromiumSessionProvider::new(ChromiumConfig {
        cookies_path: config.cookies_path.clone(),
        executable: config.chrome_executable.clone(),
        ..ChromiumConfig::default()
    });
    let source: Arc<dyn FeedSource> = Arc::new(FeedExtractor::new(provider));

    Ok(IngestionPipeline::new(source, summarizer, store, identities).with_settings(PipelineSettings {
        target_count: config.target_count,
        item_delay: config.item_delay,
    }))
}
