use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kidcat_core::CatalogueRecord;
use kidcat_extract::{extract_record, RawRecord};
use kidcat_storage::{CatalogueStore, PageFetcher, UpsertOutcome};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Fetch,
    Extract,
    Store,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedUrl {
    pub url: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// One page that made it into the catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapedRecord {
    pub id: Uuid,
    pub created: bool,
    pub raw: RawRecord,
    #[serde(skip)]
    pub record: CatalogueRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub deactivated: u64,
    pub attempted: usize,
    pub records: Vec<ScrapedRecord>,
    pub failed: Vec<FailedUrl>,
}

impl ScrapeOutcome {
    pub fn created(&self) -> usize {
        self.records.iter().filter(|r| r.created).count()
    }

    pub fn updated(&self) -> usize {
        self.records.len() - self.created()
    }
}

/// Bounded worker pool over a list of product URLs. Every record is
/// deactivated first; each page that scrapes cleanly is re-activated by its
/// upsert, so anything that disappeared from the store stays inactive.
pub struct ScrapeRun {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn CatalogueStore>,
    workers: usize,
    submit_delay: Duration,
}

impl ScrapeRun {
    pub fn new(fetcher: Arc<dyn PageFetcher>, store: Arc<dyn CatalogueStore>) -> Self {
        Self {
            fetcher,
            store,
            workers: 4,
            submit_delay: Duration::from_millis(1000),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    fn pause_between_submissions(&self) -> Duration {
        self.submit_delay / self.workers as u32
    }

    pub async fn run(&self, urls: Vec<String>) -> Result<ScrapeOutcome> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deactivated = self
            .store
            .deactivate_all()
            .await
            .context("deactivating catalogue before scrape")?;
        info!(%run_id, deactivated, urls = urls.len(), workers = self.workers, "scrape run started");

        let permits = Arc::new(Semaphore::new(self.workers));
        let failed = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = JoinSet::new();
        let attempted = urls.len();
        let pause = self.pause_between_submissions();

        for (idx, url) in urls.into_iter().enumerate() {
            if idx > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .context("scrape worker pool closed")?;
            let fetcher = self.fetcher.clone();
            let store = self.store.clone();
            let failed = failed.clone();
            let span = info_span!("scrape_page", %run_id, url = %url);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    match scrape_page(fetcher.as_ref(), store.as_ref(), &url).await {
                        Ok(scraped) => Some(scraped),
                        Err(failure) => {
                            warn!(url = %failure.url, stage = ?failure.stage, reason = %failure.reason, "page failed");
                            failed.lock().await.push(failure);
                            None
                        }
                    }
                }
                .instrument(span),
            );
        }

        let mut records = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(scraped)) => records.push(scraped),
                Ok(None) => {}
                Err(err) => error!(%run_id, error = %err, "scrape worker panicked"),
            }
        }

        let failed = std::mem::take(&mut *failed.lock().await);
        let outcome = ScrapeOutcome {
            run_id,
            started_at,
            finished_at: Utc::now(),
            deactivated,
            attempted,
            records,
            failed,
        };
        info!(
            %run_id,
            attempted,
            created = outcome.created(),
            updated = outcome.updated(),
            failed = outcome.failed.len(),
            "scrape run finished"
        );
        Ok(outcome)
    }
}

async fn scrape_page(
    fetcher: &dyn PageFetcher,
    store: &dyn CatalogueStore,
    url: &str,
) -> Result<ScrapedRecord, FailedUrl> {
    let failure = |stage, reason: String| FailedUrl {
        url: url.to_string(),
        stage,
        reason,
    };

    let html = fetcher
        .fetch(url)
        .await
        .map_err(|err| failure(FailureStage::Fetch, err.to_string()))?;
    let (raw, record) = extract_record(url, &html, Utc::now())
        .map_err(|err| failure(FailureStage::Extract, err.to_string()))?;
    let outcome = store
        .upsert(record.clone())
        .await
        .map_err(|err| failure(FailureStage::Store, err.to_string()))?;

    info!(url, name = %record.name, created = matches!(outcome, UpsertOutcome::Created(_)), "stored product");
    Ok(ScrapedRecord {
        id: outcome.id(),
        created: matches!(outcome, UpsertOutcome::Created(_)),
        raw,
        record,
    })
}
