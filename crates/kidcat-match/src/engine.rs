use std::sync::Arc;

use kidcat_core::{AgeSuitability, Gender, InferredAttributes, EMBEDDING_DIMENSIONS};
use kidcat_storage::{CatalogueMatch, CatalogueStore, SimilarityQuery, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::digest::digest;
use crate::service::{Embedder, ServiceError};

pub const DEFAULT_PAGE_SIZE: usize = 8;
pub const PLACEHOLDER_IMAGE: &str = "/static/images/placeholder.png";

/// A shopper's desired product: the inferred-attribute shape plus a price
/// ceiling. Age bracket and gender are required for matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_price: Option<f64>,
    #[serde(flatten)]
    pub attributes: InferredAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub name: String,
    pub url: String,
    pub brand: String,
    pub price: f64,
    pub in_stock: bool,
    pub image: String,
    pub distance: f64,
}

impl From<CatalogueMatch> for Recommendation {
    fn from(m: CatalogueMatch) -> Self {
        let image = m
            .record
            .primary_image()
            .unwrap_or(PLACEHOLDER_IMAGE)
            .to_string();
        Self {
            name: m.record.name,
            url: m.record.url,
            brand: m.record.brand,
            price: m.record.current_price,
            in_stock: m.record.in_stock,
            image,
            distance: m.distance,
        }
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("profile is missing {0}")]
    IncompleteProfile(&'static str),
    #[error("maximum_price must be non-negative, got {0}")]
    InvalidBudget(f64),
    #[error("embedding failed: {0}")]
    Embedding(#[from] ServiceError),
    #[error("catalogue query failed: {0}")]
    Store(#[from] StoreError),
}

impl MatchError {
    /// The single message shown to the shopper.
    pub fn user_message(&self) -> &'static str {
        match self {
            MatchError::IncompleteProfile(_) => {
                "Could you tell me the age group and gender you are shopping for?"
            }
            MatchError::InvalidBudget(_) => "Could you tell me your budget again?",
            MatchError::Embedding(_) | MatchError::Store(_) => {
                "Sorry, I couldn't process your request right now. Please try again."
            }
        }
    }
}

/// Profile -> digest -> embedding -> filtered nearest-neighbour query.
#[derive(Clone)]
pub struct MatchingEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn CatalogueStore>,
    page_size: usize,
}

impl MatchingEngine {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn CatalogueStore>) -> Self {
        Self {
            embedder,
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn filters(profile: &ProductProfile) -> Result<(AgeSuitability, Gender), MatchError> {
        let age = profile
            .attributes
            .age_suitability
            .ok_or(MatchError::IncompleteProfile("age_suitability"))?;
        let gender = profile
            .attributes
            .gender
            .ok_or(MatchError::IncompleteProfile("gender"))?;
        if let Some(budget) = profile.maximum_price {
            if budget < 0.0 || budget.is_nan() {
                return Err(MatchError::InvalidBudget(budget));
            }
        }
        Ok((age, gender))
    }

    pub async fn recommend(&self, profile: &ProductProfile) -> Result<Vec<Recommendation>, MatchError> {
        let (age_suitability, gender) = Self::filters(profile)?;
        let text = digest(&profile.attributes);

        let embedding = self.embedder.embed(&text).await.map_err(|err| {
            warn!(error = %err, "profile embedding failed");
            MatchError::Embedding(err)
        })?;
        if embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(MatchError::Embedding(ServiceError::Dimensions {
                expected: EMBEDDING_DIMENSIONS,
                actual: embedding.len(),
            }));
        }

        let query = SimilarityQuery {
            embedding,
            max_price: profile.maximum_price,
            age_suitability,
            gender,
            limit: self.page_size,
        };
        let matches = self.store.nearest(&query).await?;
        info!(
            age = age_suitability.label(),
            gender = gender.as_str(),
            max_price = ?profile.maximum_price,
            results = matches.len(),
            "matched profile"
        );
        Ok(matches.into_iter().map(Recommendation::from).collect())
    }
}
