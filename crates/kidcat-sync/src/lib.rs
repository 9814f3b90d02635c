//! Run orchestration for kidcat: link discovery, the scrape worker pool,
//! attribute inference and embedding runs, run reports, and the nightly
//! scheduler.

mod config;
mod discover;
mod enrich;
mod report;
mod scrape;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use kidcat_storage::{CatalogueStore, HttpFetcher, PageFetcher, PgCatalogueStore};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use config::{SourceConfig, SourceRegistry, SyncConfig};
pub use discover::{discover_links, read_links};
pub use enrich::{
    inference_row, refresh_embeddings, EmbeddingRefresh, InferenceOutcome, InferenceRun,
    DEFAULT_INFERENCE_BATCH,
};
pub use report::{
    scrape_summary_markdown, write_failed_urls, write_scrape_reports, ParquetManifest,
    ParquetManifestFile, RunReport,
};
pub use scrape::{FailedUrl, FailureStage, ScrapeOutcome, ScrapeRun, ScrapedRecord};

pub const CRATE_NAME: &str = "kidcat-sync";

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub discovered_links: usize,
    pub attempted: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

/// Discover + scrape + report against one fetcher and one catalogue store.
pub struct SyncPipeline {
    config: SyncConfig,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn CatalogueStore>,
}

impl SyncPipeline {
    pub fn new(
        config: SyncConfig,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn CatalogueStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
        }
    }

    /// HTTP fetcher plus the Postgres catalogue named by `DATABASE_URL`.
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.http_client_config())?;
        let store = PgCatalogueStore::connect(&config.database_url)
            .await
            .context("connecting to catalogue database")?;
        store.ensure_schema().await.context("ensuring catalogue schema")?;
        Ok(Self::new(config, Arc::new(fetcher), Arc::new(store)))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn CatalogueStore> {
        self.store.clone()
    }

    pub async fn discover(&self) -> Result<Vec<String>> {
        let registry = SourceRegistry::load(&self.config.sources_path()).await?;
        discover_links(self.fetcher.as_ref(), &registry, &self.config.links_path()).await
    }

    /// Scrape the link file (optionally truncated), then record failures
    /// and write the run report.
    pub async fn scrape(&self, limit: Option<usize>) -> Result<(ScrapeOutcome, RunReport)> {
        let mut urls = read_links(&self.config.links_path()).await?;
        if let Some(limit) = limit.or(self.config.scrape_limit) {
            urls.truncate(limit);
        }

        let outcome = ScrapeRun::new(self.fetcher.clone(), self.store.clone())
            .with_workers(self.config.workers)
            .with_submit_delay(self.config.submit_delay())
            .run(urls)
            .await?;

        let failed_path = self.config.failed_urls_path(Utc::now().date_naive());
        write_failed_urls(&failed_path, &outcome.failed).await?;
        let report = write_scrape_reports(&self.config.reports_root(), &outcome).await?;
        Ok((outcome, report))
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let links = self.discover().await?;
        if links.is_empty() {
            warn!("discovery found no links; scraping the existing link file");
        }
        let (outcome, report) = self.scrape(None).await?;
        let summary = SyncRunSummary {
            run_id: outcome.run_id,
            discovered_links: links.len(),
            attempted: outcome.attempted,
            created: outcome.created(),
            updated: outcome.updated(),
            failed: outcome.failed.len(),
            reports_dir: report.reports_dir.display().to_string(),
            parquet_manifest: report.manifest_path.display().to_string(),
        };
        info!(run_id = %summary.run_id, created = summary.created, updated = summary.updated, failed = summary.failed, "sync run complete");
        Ok(summary)
    }

    /// A cron job running [`SyncPipeline::run_once`], or `None` when the
    /// scheduler is disabled.
    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.scrape_cron.clone();
        let pipeline = self.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                info!("scheduled sync triggered");
                if let Err(err) = pipeline.run_once().await {
                    error!(error = ?err, "scheduled sync failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}
