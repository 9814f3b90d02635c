use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use kidcat_core::{
    AgeSuitability, CatalogueRecord, Gender, InferredAttributes, ValidationError,
    EMBEDDING_DIMENSIONS,
};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record refused: {0}")]
    Validation(#[from] ValidationError),
    #[error("url {url} already belongs to product {owner:?}")]
    UrlConflict { url: String, owner: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(Uuid),
    Updated(Uuid),
}

impl UpsertOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

/// Filtered nearest-neighbour request against stored embeddings.
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    pub embedding: Vec<f32>,
    pub max_price: Option<f64>,
    pub age_suitability: AgeSuitability,
    pub gender: Gender,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueMatch {
    pub record: CatalogueRecord,
    pub distance: f64,
}

/// Persistent catalogue keyed by product name.
#[async_trait]
pub trait CatalogueStore: Send + Sync {
    /// Mark every record inactive; returns how many rows changed.
    async fn deactivate_all(&self) -> Result<u64, StoreError>;

    /// Insert or refresh a record by name. Identity, creation time, inferred
    /// attributes and embedding of an existing record are preserved.
    async fn upsert(&self, record: CatalogueRecord) -> Result<UpsertOutcome, StoreError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<CatalogueRecord>, StoreError>;

    async fn active_records(&self) -> Result<Vec<CatalogueRecord>, StoreError>;

    /// Store inferred attributes and (re)computed embedding for one product.
    /// Returns false when no product carries `name`.
    async fn save_enrichment(
        &self,
        name: &str,
        inferred: &InferredAttributes,
        embedding: Option<&[f32]>,
    ) -> Result<bool, StoreError>;

    async fn nearest(&self, query: &SimilarityQuery) -> Result<Vec<CatalogueMatch>, StoreError>;
}

pub(crate) fn validate_embedding(embedding: Option<&[f32]>) -> Result<(), ValidationError> {
    match embedding {
        Some(values) if values.len() != EMBEDDING_DIMENSIONS => {
            Err(ValidationError::EmbeddingDimensions {
                expected: EMBEDDING_DIMENSIONS,
                actual: values.len(),
            })
        }
        _ => Ok(()),
    }
}

/// Cosine distance in [0, 2]; zero-length vectors are maximally unrelated.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Keep the first (closest) occurrence of every record id.
pub fn dedup_matches(matches: Vec<CatalogueMatch>) -> Vec<CatalogueMatch> {
    let mut seen = HashSet::new();
    matches
        .into_iter()
        .filter(|m| seen.insert(m.record.id))
        .collect()
}

/// In-process store with the same contract as the Postgres one; used by
/// tests and by dry runs without a database.
#[derive(Debug, Default)]
pub struct MemoryCatalogueStore {
    records: RwLock<Vec<CatalogueRecord>>,
}

impl MemoryCatalogueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_records(records: Vec<CatalogueRecord>) -> Self {
        let store = Self::new();
        *store.records.write().await = records;
        store
    }

    pub async fn snapshot(&self) -> Vec<CatalogueRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl CatalogueStore for MemoryCatalogueStore {
    async fn deactivate_all(&self) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let mut changed = 0;
        for record in records.iter_mut().filter(|r| r.is_active) {
            record.is_active = false;
            changed += 1;
        }
        Ok(changed)
    }

    async fn upsert(&self, mut record: CatalogueRecord) -> Result<UpsertOutcome, StoreError> {
        record.prepare_for_write()?;
        record.is_active = true;

        let mut records = self.records.write().await;
        if let Some(owner) = records
            .iter()
            .find(|r| r.url == record.url && r.name != record.name)
        {
            return Err(StoreError::UrlConflict {
                url: record.url,
                owner: owner.name.clone(),
            });
        }

        match records.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => {
                existing.absorb_scrape(record);
                Ok(UpsertOutcome::Updated(existing.id))
            }
            None => {
                let id = record.id;
                records.push(record);
                Ok(UpsertOutcome::Created(id))
            }
        }
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<CatalogueRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn active_records(&self) -> Result<Vec<CatalogueRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn save_enrichment(
        &self,
        name: &str,
        inferred: &InferredAttributes,
        embedding: Option<&[f32]>,
    ) -> Result<bool, StoreError> {
        inferred.validate()?;
        validate_embedding(embedding)?;

        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|r| r.name == name) else {
            return Ok(false);
        };
        record.inferred = inferred.clone();
        record.embedding = embedding.map(<[f32]>::to_vec);
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn nearest(&self, query: &SimilarityQuery) -> Result<Vec<CatalogueMatch>, StoreError> {
        let records = self.records.read().await;
        let mut matches = records
            .iter()
            .filter(|r| r.is_active)
            .filter(|r| query.max_price.map_or(true, |max| r.current_price <= max))
            .filter(|r| r.inferred.age_suitability == Some(query.age_suitability))
            .filter(|r| r.inferred.gender.is_some_and(|g| query.gender.accepts(g)))
            .filter_map(|r| {
                r.embedding.as_ref().map(|embedding| CatalogueMatch {
                    record: r.clone(),
                    distance: cosine_distance(&query.embedding, embedding),
                })
            })
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        let mut matches = dedup_matches(matches);
        matches.truncate(query.limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use kidcat_core::{CategoryDetails, Specialization, Specifications};

    fn record(name: &str, price: f64) -> CatalogueRecord {
        let now = Utc::now();
        CatalogueRecord {
            id: Uuid::new_v4(),
            url: format!("https://shop.test/{}.html", name.to_lowercase().replace(' ', "-")),
            name: name.to_string(),
            brand: "Acme".into(),
            categories: vec!["Toys".into()],
            specialization: Specialization::Toy,
            current_price: price,
            original_price: price,
            has_discount: false,
            discount_percentage: 0.0,
            in_stock: true,
            color_options: vec![],
            color_availability: IndexMap::new(),
            description: vec![],
            specifications: Specifications::new(),
            image_urls: vec![],
            image_count: 0,
            rating: None,
            review_count: 0,
            category_details: CategoryDetails::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
            inferred: InferredAttributes::default(),
            embedding: None,
        }
    }

    fn axis(index: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIMENSIONS];
        v[index] = 1.0;
        v
    }

    fn enriched(name: &str, price: f64, gender: Gender, embedding: Vec<f32>) -> CatalogueRecord {
        let mut r = record(name, price);
        r.inferred.age_suitability = Some(AgeSuitability::Years3To5);
        r.inferred.gender = Some(gender);
        r.embedding = Some(embedding);
        r
    }

    fn query(max_price: f64, gender: Gender) -> SimilarityQuery {
        SimilarityQuery {
            embedding: axis(0),
            max_price: Some(max_price),
            age_suitability: AgeSuitability::Years3To5,
            gender,
            limit: 8,
        }
    }

    #[test]
    fn cosine_distance_orders_identical_before_orthogonal() {
        assert!(cosine_distance(&axis(0), &axis(0)).abs() < 1e-9);
        assert!((cosine_distance(&axis(0), &axis(1)) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[tokio::test]
    async fn upsert_preserves_identity_and_enrichment() {
        let store = MemoryCatalogueStore::new();
        let first = store.upsert(record("Teddy", 10.0)).await.unwrap();
        assert!(matches!(first, UpsertOutcome::Created(_)));

        let inferred = InferredAttributes {
            giftability: Some(8.0),
            ..Default::default()
        };
        assert!(store
            .save_enrichment("Teddy", &inferred, Some(axis(2).as_slice()))
            .await
            .unwrap());

        let second = store.upsert(record("Teddy", 12.0)).await.unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.id()));

        let stored = store.find_by_name("Teddy").await.unwrap().unwrap();
        assert_eq!(stored.current_price, 12.0);
        assert_eq!(stored.inferred.giftability, Some(8.0));
        assert!(stored.embedding.is_some());
    }

    #[tokio::test]
    async fn upsert_refuses_invalid_records() {
        let store = MemoryCatalogueStore::new();
        let mut bad = record("Broken", 5.0);
        bad.has_discount = true;
        bad.discount_percentage = 250.0;
        let err = store.upsert(bad).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn url_owned_by_another_name_is_a_conflict() {
        let store = MemoryCatalogueStore::new();
        store.upsert(record("Teddy", 10.0)).await.unwrap();
        let mut clash = record("Other", 10.0);
        clash.url = "https://shop.test/teddy.html".into();
        assert!(matches!(
            store.upsert(clash).await.unwrap_err(),
            StoreError::UrlConflict { .. }
        ));
    }

    #[tokio::test]
    async fn deactivate_then_upsert_reactivates_revisited_records() {
        let store = MemoryCatalogueStore::new();
        store.upsert(record("Seen", 10.0)).await.unwrap();
        store.upsert(record("Gone", 10.0)).await.unwrap();

        assert_eq!(store.deactivate_all().await.unwrap(), 2);
        store.upsert(record("Seen", 11.0)).await.unwrap();

        let active = store.active_records().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Seen");
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn nearest_applies_price_ceiling() {
        let store = MemoryCatalogueStore::with_records(vec![
            enriched("Cheap", 20.0, Gender::Unisex, axis(1)),
            enriched("Pricey", 80.0, Gender::Unisex, axis(0)),
        ])
        .await;

        let results = store.nearest(&query(50.0, Gender::Unisex)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|m| m.record.current_price <= 50.0));
    }

    #[tokio::test]
    async fn nearest_only_returns_compatible_genders_in_distance_order() {
        let store = MemoryCatalogueStore::with_records(vec![
            enriched("Dress", 20.0, Gender::Female, axis(1)),
            enriched("Truck", 20.0, Gender::Male, axis(0)),
            enriched("Ball", 20.0, Gender::Unisex, axis(0)),
        ])
        .await;

        let results = store.nearest(&query(100.0, Gender::Female)).await.unwrap();
        let names: Vec<_> = results.iter().map(|m| m.record.name.as_str()).collect();
        assert_eq!(names, vec!["Ball", "Dress"]);
    }

    #[tokio::test]
    async fn nearest_skips_records_without_embeddings_or_inactive() {
        let mut inactive = enriched("Old", 10.0, Gender::Unisex, axis(0));
        inactive.is_active = false;
        let mut bare = enriched("Bare", 10.0, Gender::Unisex, axis(0));
        bare.embedding = None;
        let store = MemoryCatalogueStore::with_records(vec![inactive, bare]).await;

        assert!(store.nearest(&query(100.0, Gender::Unisex)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enrichment_rejects_wrong_dimensions() {
        let store = MemoryCatalogueStore::new();
        store.upsert(record("Teddy", 10.0)).await.unwrap();
        let err = store
            .save_enrichment("Teddy", &InferredAttributes::default(), Some([0.1f32, 0.2].as_slice()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::EmbeddingDimensions { actual: 2, .. })
        ));
        assert!(!store
            .save_enrichment("Unknown", &InferredAttributes::default(), None)
            .await
            .unwrap());
    }
}
