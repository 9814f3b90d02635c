use std::sync::Arc;

use anyhow::{Context, Result};
use kidcat_core::{AttributePatch, CatalogueRecord};
use kidcat_match::{digest, AttributeInference, Embedder};
use kidcat_storage::CatalogueStore;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

pub const DEFAULT_INFERENCE_BATCH: usize = 7;

/// The scraped facts the inference service reasons over.
pub fn inference_row(record: &CatalogueRecord) -> JsonValue {
    json!({
        "name": record.name,
        "url": record.url,
        "brand": record.brand,
        "categories": record.categories,
        "specialization": record.specialization.as_str(),
        "current_price": record.current_price,
        "original_price": record.original_price,
        "has_discount": record.has_discount,
        "discount_percentage": record.discount_percentage,
        "in_stock": record.in_stock,
        "color_options": record.color_options,
        "description": record.description,
        "specifications": record.specifications,
        "image_urls": record.image_urls,
        "rating": record.rating,
        "review_count": record.review_count,
        "category_details": record.category_details,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceOutcome {
    pub batches: usize,
    pub patches: usize,
    pub applied: usize,
    pub unmatched: Vec<String>,
    pub rejected: usize,
    pub embedding_failures: usize,
}

/// Batched attribute inference over the active catalogue. Patches are
/// matched back by product name; every updated record is re-embedded from
/// its attribute digest.
pub struct InferenceRun {
    inference: Arc<dyn AttributeInference>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn CatalogueStore>,
    batch_size: usize,
    with_images: bool,
}

impl InferenceRun {
    pub fn new(
        inference: Arc<dyn AttributeInference>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn CatalogueStore>,
    ) -> Self {
        Self {
            inference,
            embedder,
            store,
            batch_size: DEFAULT_INFERENCE_BATCH,
            with_images: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_images(mut self, with_images: bool) -> Self {
        self.with_images = with_images;
        self
    }

    pub async fn run(&self) -> Result<InferenceOutcome> {
        let records = self
            .store
            .active_records()
            .await
            .context("loading active records for inference")?;
        let mut outcome = InferenceOutcome::default();

        for batch in records.chunks(self.batch_size) {
            outcome.batches += 1;
            let rows: Vec<JsonValue> = batch.iter().map(inference_row).collect();
            let image = if self.with_images {
                batch.iter().find_map(CatalogueRecord::primary_image)
            } else {
                None
            };
            let patches = self
                .inference
                .infer(&rows, image)
                .await
                .with_context(|| format!("inferring attributes for batch {}", outcome.batches))?;
            info!(batch = outcome.batches, rows = rows.len(), patches = patches.len(), "inference batch done");
            outcome.patches += patches.len();

            for patch in patches {
                self.apply(patch, &mut outcome).await?;
            }
        }

        info!(
            batches = outcome.batches,
            applied = outcome.applied,
            unmatched = outcome.unmatched.len(),
            rejected = outcome.rejected,
            "inference run finished"
        );
        Ok(outcome)
    }

    async fn apply(&self, patch: AttributePatch, outcome: &mut InferenceOutcome) -> Result<()> {
        let Some(record) = self
            .store
            .find_by_name(&patch.name)
            .await
            .with_context(|| format!("looking up {:?}", patch.name))?
        else {
            warn!(name = %patch.name, "inferred attributes for unknown product");
            outcome.unmatched.push(patch.name);
            return Ok(());
        };

        let mut inferred = record.inferred.clone();
        inferred.merge(patch.attributes);
        if let Err(err) = inferred.validate() {
            warn!(name = %record.name, error = %err, "inferred attributes refused");
            outcome.rejected += 1;
            return Ok(());
        }

        let embedding = match self.embedder.embed(&digest(&inferred)).await {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                warn!(name = %record.name, error = %err, "embedding failed; saving attributes only");
                outcome.embedding_failures += 1;
                None
            }
        };

        match self
            .store
            .save_enrichment(&record.name, &inferred, embedding.as_deref())
            .await
        {
            Ok(true) => outcome.applied += 1,
            Ok(false) => outcome.unmatched.push(record.name.clone()),
            Err(err) => {
                warn!(name = %record.name, error = %err, "saving inferred attributes failed");
                outcome.rejected += 1;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingRefresh {
    pub embedded: usize,
    pub failed: usize,
}

/// Embed every active record that has attributes but no vector yet.
pub async fn refresh_embeddings(
    embedder: &dyn Embedder,
    store: &dyn CatalogueStore,
) -> Result<EmbeddingRefresh> {
    let records = store
        .active_records()
        .await
        .context("loading active records for embedding")?;
    let mut refresh = EmbeddingRefresh::default();

    for record in records
        .iter()
        .filter(|r| r.embedding.is_none() && !r.inferred.is_empty())
    {
        match embedder.embed(&digest(&record.inferred)).await {
            Ok(embedding) => {
                store
                    .save_enrichment(&record.name, &record.inferred, Some(&embedding))
                    .await
                    .with_context(|| format!("saving embedding for {:?}", record.name))?;
                refresh.embedded += 1;
            }
            Err(err) => {
                warn!(name = %record.name, error = %err, "embedding failed");
                refresh.failed += 1;
            }
        }
    }
    info!(embedded = refresh.embedded, failed = refresh.failed, "embedding refresh finished");
    Ok(refresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kidcat_core::{AgeSuitability, Gender, InferredAttributes, EMBEDDING_DIMENSIONS};
    use kidcat_match::stand_in::{FailingEmbedder, HashEmbedder, StaticInference};
    use kidcat_storage::MemoryCatalogueStore;

    fn product(name: &str, image: Option<&str>) -> CatalogueRecord {
        let mut record = CatalogueRecord::new(format!("https://kiddoz.lk/{}.html", name.to_lowercase().replace(' ', "-")), name, 25.0);
        record.image_urls = image.map(|i| vec![i.to_string()]).unwrap_or_default();
        record.image_count = record.image_urls.len() as u32;
        record
    }

    fn patch(name: &str, giftability: f64) -> AttributePatch {
        AttributePatch {
            name: name.to_string(),
            attributes: InferredAttributes {
                age_suitability: Some(AgeSuitability::Years3To5),
                gender: Some(Gender::Unisex),
                giftability: Some(giftability),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn patches_are_applied_by_name_and_embedded() {
        let store = Arc::new(
            MemoryCatalogueStore::with_records(vec![
                product("Stacking Cups", Some("https://kiddoz.lk/cups.jpg")),
                product("Wooden Puzzle", None),
            ])
            .await,
        );
        let inference = Arc::new(StaticInference::new(vec![
            patch("Stacking Cups", 7.0),
            patch("Ghost Product", 5.0),
        ]));

        let outcome = InferenceRun::new(inference.clone(), Arc::new(HashEmbedder), store.clone())
            .with_images(true)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.batches, 1);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.unmatched, vec!["Ghost Product"]);
        assert_eq!(inference.last_image().as_deref(), Some("https://kiddoz.lk/cups.jpg"));

        let cups = store.find_by_name("Stacking Cups").await.unwrap().unwrap();
        assert_eq!(cups.inferred.giftability, Some(7.0));
        assert_eq!(cups.embedding.map(|e| e.len()), Some(EMBEDDING_DIMENSIONS));
        let puzzle = store.find_by_name("Wooden Puzzle").await.unwrap().unwrap();
        assert!(puzzle.inferred.is_empty());
    }

    #[tokio::test]
    async fn active_records_are_sent_in_batches() {
        let records = (0..15).map(|i| product(&format!("Toy {i}"), None)).collect();
        let store = Arc::new(MemoryCatalogueStore::with_records(records).await);
        let inference = Arc::new(StaticInference::new(Vec::new()));

        let outcome = InferenceRun::new(inference.clone(), Arc::new(HashEmbedder), store)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.batches, 3);
        assert_eq!(inference.calls(), 3);
        assert_eq!(inference.last_image(), None);
    }

    #[tokio::test]
    async fn embedding_failure_still_saves_attributes() {
        let store = Arc::new(MemoryCatalogueStore::with_records(vec![product("Rain Boots", None)]).await);
        let inference = Arc::new(StaticInference::new(vec![patch("Rain Boots", 6.0)]));

        let outcome = InferenceRun::new(inference, Arc::new(FailingEmbedder), store.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.embedding_failures, 1);

        let boots = store.find_by_name("Rain Boots").await.unwrap().unwrap();
        assert_eq!(boots.inferred.giftability, Some(6.0));
        assert!(boots.embedding.is_none());

        let refresh = refresh_embeddings(&HashEmbedder, store.as_ref()).await.unwrap();
        assert_eq!(refresh.embedded, 1);
        let boots = store.find_by_name("Rain Boots").await.unwrap().unwrap();
        assert!(boots.embedding.is_some());
    }

    #[test]
    fn inference_row_carries_scraped_facts_only() {
        let row = inference_row(&product("Wooden Puzzle", None));
        assert_eq!(row["name"], "Wooden Puzzle");
        assert_eq!(row["current_price"], 25.0);
        assert!(row.get("giftability").is_none());
        assert!(row.get("embedding").is_none());
    }
}
