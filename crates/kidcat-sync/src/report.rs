use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use kidcat_storage::{sha256_hex, write_file_atomic};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::scrape::{FailedUrl, ScrapeOutcome, ScrapedRecord};

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub reports_dir: PathBuf,
    pub manifest_path: PathBuf,
}

/// Append this run's failures to the day's failed-URL file, one per line.
pub async fn write_failed_urls(path: &Path, failed: &[FailedUrl]) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    let mut text = match fs::read_to_string(path).await {
        Ok(existing) if !existing.is_empty() => {
            let mut existing = existing;
            if !existing.ends_with('\n') {
                existing.push('\n');
            }
            existing
        }
        _ => String::new(),
    };
    for failure in failed {
        text.push_str(&failure.url);
        text.push('\n');
    }
    write_file_atomic(path, text.as_bytes())
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), failed = failed.len(), "recorded failed urls");
    Ok(())
}

pub fn scrape_summary_markdown(outcome: &ScrapeOutcome) -> String {
    let mut lines = vec![
        "# Kidcat Scrape Summary".to_string(),
        String::new(),
        format!("- Run ID: `{}`", outcome.run_id),
        format!("- Started: {}", outcome.started_at),
        format!("- Finished: {}", outcome.finished_at),
        format!("- URLs attempted: {}", outcome.attempted),
        format!("- Created: {}", outcome.created()),
        format!("- Updated: {}", outcome.updated()),
        format!("- Failed: {}", outcome.failed.len()),
        format!("- Deactivated before run: {}", outcome.deactivated),
    ];

    let mut by_specialization = std::collections::BTreeMap::<&str, usize>::new();
    for scraped in &outcome.records {
        *by_specialization
            .entry(scraped.record.specialization.as_str())
            .or_default() += 1;
    }
    lines.push(String::new());
    lines.push("## Specializations".to_string());
    lines.extend(by_specialization.iter().map(|(k, v)| format!("- {k}: {v}")));

    if !outcome.failed.is_empty() {
        lines.push(String::new());
        lines.push("## Failed URLs".to_string());
        lines.extend(
            outcome
                .failed
                .iter()
                .map(|f| format!("- {} ({:?}): {}", f.url, f.stage, f.reason)),
        );
    }
    lines.push(String::new());
    lines.join("\n")
}

/// `reports/<run_id>/` with a markdown summary, the raw records, and a
/// parquet snapshot plus checksum manifest.
pub async fn write_scrape_reports(reports_root: &Path, outcome: &ScrapeOutcome) -> Result<RunReport> {
    let reports_dir = reports_root.join(outcome.run_id.to_string());
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    fs::write(reports_dir.join("scrape_summary.md"), scrape_summary_markdown(outcome))
        .await
        .context("writing scrape_summary.md")?;

    let records_json = serde_json::to_vec_pretty(outcome).context("serializing scrape records")?;
    fs::write(reports_dir.join("records.json"), records_json)
        .await
        .context("writing records.json")?;

    let catalogue_path = snapshot_dir.join("catalogue.parquet");
    write_catalogue_parquet(&catalogue_path, &outcome.records)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![manifest_entry("catalogue", &reports_dir, &catalogue_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(run_id = %outcome.run_id, dir = %reports_dir.display(), "wrote scrape reports");
    Ok(RunReport {
        reports_dir,
        manifest_path,
    })
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_catalogue_parquet(path: &Path, scraped: &[ScrapedRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Utf8, false),
        ArrowField::new("name", DataType::Utf8, false),
        ArrowField::new("url", DataType::Utf8, false),
        ArrowField::new("brand", DataType::Utf8, false),
        ArrowField::new("specialization", DataType::Utf8, false),
        ArrowField::new("current_price", DataType::Float64, false),
        ArrowField::new("original_price", DataType::Float64, false),
        ArrowField::new("has_discount", DataType::Boolean, false),
        ArrowField::new("discount_percentage", DataType::Float64, false),
        ArrowField::new("in_stock", DataType::Boolean, false),
        ArrowField::new("image_count", DataType::UInt32, false),
        ArrowField::new("rating", DataType::Float64, true),
        ArrowField::new("review_count", DataType::UInt32, false),
        ArrowField::new("scraped_at", DataType::Utf8, false),
    ]));

    let records: Vec<_> = scraped.iter().map(|s| &s.record).collect();
    let ids = StringArray::from(scraped.iter().map(|s| Some(s.id.to_string())).collect::<Vec<_>>());
    let names = StringArray::from(records.iter().map(|r| Some(r.name.as_str())).collect::<Vec<_>>());
    let urls = StringArray::from(records.iter().map(|r| Some(r.url.as_str())).collect::<Vec<_>>());
    let brands = StringArray::from(records.iter().map(|r| Some(r.brand.as_str())).collect::<Vec<_>>());
    let specializations = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.specialization.as_str()))
            .collect::<Vec<_>>(),
    );
    let current = Float64Array::from(records.iter().map(|r| r.current_price).collect::<Vec<_>>());
    let original = Float64Array::from(records.iter().map(|r| r.original_price).collect::<Vec<_>>());
    let discounted = BooleanArray::from(records.iter().map(|r| r.has_discount).collect::<Vec<_>>());
    let discount_pct =
        Float64Array::from(records.iter().map(|r| r.discount_percentage).collect::<Vec<_>>());
    let in_stock = BooleanArray::from(records.iter().map(|r| r.in_stock).collect::<Vec<_>>());
    let image_counts = UInt32Array::from(records.iter().map(|r| r.image_count).collect::<Vec<_>>());
    let ratings = Float64Array::from(records.iter().map(|r| r.rating).collect::<Vec<_>>());
    let review_counts = UInt32Array::from(records.iter().map(|r| r.review_count).collect::<Vec<_>>());
    let scraped_at = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.updated_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(names),
            Arc::new(urls),
            Arc::new(brands),
            Arc::new(specializations),
            Arc::new(current),
            Arc::new(original),
            Arc::new(discounted),
            Arc::new(discount_pct),
            Arc::new(in_stock),
            Arc::new(image_counts),
            Arc::new(ratings),
            Arc::new(review_counts),
            Arc::new(scraped_at),
        ],
    )
    .context("building catalogue record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
