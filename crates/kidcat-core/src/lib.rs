//! Core catalogue model, attribute enums and write-time invariants for kidcat.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "kidcat-core";

/// Sentinel used by extractors and the record normalizer for missing text.
pub const NOT_FOUND: &str = "Not found";

/// Sentinel used by specializations when a category field is not detectable.
pub const NOT_SPECIFIED: &str = "Not specified";

/// Length of every stored and query embedding vector.
pub const EMBEDDING_DIMENSIONS: usize = 1536;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

/// Insertion-ordered free-text specification table.
pub type Specifications = IndexMap<String, String>;

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockStatus {
    #[serde(rename = "In stock")]
    InStock,
    #[serde(rename = "Out of stock")]
    OutOfStock,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "In stock",
            StockStatus::OutOfStock => "Out of stock",
            StockStatus::Unknown => "Unknown",
        }
    }

    /// Lenient label parsing; anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "in stock" => StockStatus::InStock,
            "out of stock" => StockStatus::OutOfStock,
            _ => StockStatus::Unknown,
        }
    }

    pub fn from_disabled(disabled: bool) -> Self {
        if disabled {
            StockStatus::OutOfStock
        } else {
            StockStatus::InStock
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-specific extraction variant chosen from the breadcrumb trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    Generic,
    Apparel,
    Toy,
    Diaper,
}

impl Specialization {
    pub const ALL: [Specialization; 4] = [
        Specialization::Generic,
        Specialization::Apparel,
        Specialization::Toy,
        Specialization::Diaper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Specialization::Generic => "generic",
            Specialization::Apparel => "apparel",
            Specialization::Toy => "toy",
            Specialization::Diaper => "diaper",
        }
    }
}

/// Free-text fields only populated when a specialization detects them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub size_options: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub size_availability: IndexMap<String, StockStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Fixed age brackets used both for inference output and hard query filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgeSuitability {
    Months0To5,
    Months6To11,
    Years1To1_5,
    Years1_6To2,
    Years3To5,
    Years6To8,
    Years9To12,
    Mothers,
    AllAges,
}

impl AgeSuitability {
    pub const ALL: [AgeSuitability; 9] = [
        AgeSuitability::Months0To5,
        AgeSuitability::Months6To11,
        AgeSuitability::Years1To1_5,
        AgeSuitability::Years1_6To2,
        AgeSuitability::Years3To5,
        AgeSuitability::Years6To8,
        AgeSuitability::Years9To12,
        AgeSuitability::Mothers,
        AgeSuitability::AllAges,
    ];

    /// Canonical label; ranges use an en-dash.
    pub fn label(&self) -> &'static str {
        match self {
            AgeSuitability::Months0To5 => "0–5 months",
            AgeSuitability::Months6To11 => "6–11 months",
            AgeSuitability::Years1To1_5 => "1–1.5 years",
            AgeSuitability::Years1_6To2 => "1.6–2 years",
            AgeSuitability::Years3To5 => "3–5 years",
            AgeSuitability::Years6To8 => "6–8 years",
            AgeSuitability::Years9To12 => "9–12 years",
            AgeSuitability::Mothers => "mothers",
            AgeSuitability::AllAges => "all ages",
        }
    }
}

fn normalize_dashes(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .replace(['-', '—', '‒', '−'], "–")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" – ", "–")
}

impl FromStr for AgeSuitability {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_dashes(s);
        AgeSuitability::ALL
            .into_iter()
            .find(|bucket| bucket.label() == wanted)
            .ok_or_else(|| ParseEnumError {
                kind: "age_suitability",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for AgeSuitability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for AgeSuitability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for AgeSuitability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unisex,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unisex => "unisex",
        }
    }

    /// Genders a product may carry to be shown for this requested gender.
    pub fn compatible_labels(&self) -> Vec<&'static str> {
        match self {
            Gender::Unisex => vec![Gender::Unisex.as_str()],
            other => vec![Gender::Unisex.as_str(), other.as_str()],
        }
    }

    pub fn accepts(&self, product: Gender) -> bool {
        product == Gender::Unisex || product == *self
    }
}

impl FromStr for Gender {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "unisex" => Ok(Gender::Unisex),
            _ => Err(ParseEnumError {
                kind: "gender",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes filled in by the external inference service.
///
/// Every field is optional so the same shape doubles as a partial patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferredAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_suitability: Option<AgeSuitability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub giftability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub educational_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_for_money: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_perception: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasonal_use: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waterproof: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chemical_safety: Option<String>,
}

impl InferredAttributes {
    /// Named 0–10 scores in digest order.
    pub fn scores(&self) -> [(&'static str, Option<f64>); 7] {
        [
            ("giftability", self.giftability),
            ("educational_value", self.educational_value),
            ("durability", self.durability),
            ("value_for_money", self.value_for_money),
            ("safety_perception", self.safety_perception),
            ("sensitivity_level", self.sensitivity_level),
            ("portability", self.portability),
        ]
    }

    pub fn is_empty(&self) -> bool {
        *self == InferredAttributes::default()
    }

    /// Apply a partial patch field by field; absent patch fields keep the old value.
    /// Scores are clamped to [0, 10].
    pub fn merge(&mut self, patch: InferredAttributes) {
        fn set<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        let clamp = |v: Option<f64>| v.map(clamp_score);

        set(&mut self.age_suitability, patch.age_suitability);
        set(&mut self.gender, patch.gender);
        set(&mut self.giftability, clamp(patch.giftability));
        set(&mut self.educational_value, clamp(patch.educational_value));
        set(&mut self.durability, clamp(patch.durability));
        set(&mut self.value_for_money, clamp(patch.value_for_money));
        set(&mut self.safety_perception, clamp(patch.safety_perception));
        set(&mut self.sensitivity_level, clamp(patch.sensitivity_level));
        set(&mut self.portability, clamp(patch.portability));
        set(&mut self.seasonal_use, patch.seasonal_use);
        set(&mut self.waterproof, patch.waterproof);
        set(&mut self.design_features, patch.design_features);
        set(&mut self.package_quantity, patch.package_quantity);
        set(&mut self.usage_type, patch.usage_type);
        set(&mut self.material_origin, patch.material_origin);
        set(&mut self.chemical_safety, patch.chemical_safety);
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, score) in self.scores() {
            if let Some(value) = score {
                if !(SCORE_MIN..=SCORE_MAX).contains(&value) || value.is_nan() {
                    return Err(ValidationError::ScoreOutOfRange { field, value });
                }
            }
        }
        if let Some(months) = &self.seasonal_use {
            if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
                return Err(ValidationError::InvalidSeasonalMonth(*bad));
            }
        }
        if self.package_quantity == Some(0) {
            return Err(ValidationError::InvalidPackageQuantity);
        }
        Ok(())
    }
}

pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return SCORE_MIN;
    }
    value.clamp(SCORE_MIN, SCORE_MAX)
}

/// One inference result: a partial attribute object addressed by product name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePatch {
    pub name: String,
    #[serde(flatten)]
    pub attributes: InferredAttributes,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("product name is empty")]
    EmptyName,
    #[error("{field} must be non-negative, got {value}")]
    NegativePrice { field: &'static str, value: f64 },
    #[error("discount_percentage {0} is out of range")]
    DiscountOutOfRange(f64),
    #[error("discounted record needs original_price above current_price, got {original} <= {current}")]
    DiscountWithoutMarkdown { current: f64, original: f64 },
    #[error("discount_percentage {stated} disagrees with the prices ({expected})")]
    DiscountMismatch { stated: f64, expected: f64 },
    #[error("rating must lie in [0, 5], got {0}")]
    RatingOutOfRange(f64),
    #[error("{field} must lie in [0, 10], got {value}")]
    ScoreOutOfRange { field: &'static str, value: f64 },
    #[error("seasonal_use month {0} is outside 1..=12")]
    InvalidSeasonalMonth(u8),
    #[error("package_quantity must be positive")]
    InvalidPackageQuantity,
    #[error("embedding must have {expected} dimensions, got {actual}")]
    EmbeddingDimensions { expected: usize, actual: usize },
}

/// Canonical stored representation of one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueRecord {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub brand: String,
    pub categories: Vec<String>,
    pub specialization: Specialization,
    pub current_price: f64,
    pub original_price: f64,
    pub has_discount: bool,
    pub discount_percentage: f64,
    pub in_stock: bool,
    pub color_options: Vec<String>,
    pub color_availability: IndexMap<String, StockStatus>,
    pub description: Vec<String>,
    pub specifications: Specifications,
    pub image_urls: Vec<String>,
    pub image_count: u32,
    pub rating: Option<f64>,
    pub review_count: u32,
    pub category_details: CategoryDetails,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub inferred: InferredAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl CatalogueRecord {
    /// An active, undiscounted record with every optional field empty.
    pub fn new(url: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            name: name.into(),
            brand: NOT_FOUND.to_string(),
            categories: Vec::new(),
            specialization: Specialization::Generic,
            current_price: price,
            original_price: price,
            has_discount: false,
            discount_percentage: 0.0,
            in_stock: true,
            color_options: Vec::new(),
            color_availability: IndexMap::new(),
            description: Vec::new(),
            specifications: Specifications::new(),
            image_urls: Vec::new(),
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

    /// `round((original - current) / original * 100, 2)`, or `None` when the
    /// prices carry no markdown.
    pub fn markdown_percentage(&self) -> Option<f64> {
        let (current, original) = (self.current_price, self.original_price);
        (original > 0.0 && original > current)
            .then(|| round_to(((original - current) / original) * 100.0, 2))
    }

    /// Enforce write-time invariants. Values that are merely redundant are
    /// coerced (no discount => 0%, a discount is re-derived from the
    /// prices); values that are wrong refuse the save.
    pub fn prepare_for_write(&mut self) -> Result<(), ValidationError> {
        if self.has_discount {
            if let Some(expected) = self.markdown_percentage() {
                self.discount_percentage = expected;
            }
        } else {
            self.discount_percentage = 0.0;
        }
        self.image_count = self.image_urls.len() as u32;
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        for (field, value) in [
            ("current_price", self.current_price),
            ("original_price", self.original_price),
        ] {
            if value < 0.0 || value.is_nan() {
                return Err(ValidationError::NegativePrice { field, value });
            }
        }
        if self.has_discount {
            self.validate_discount()?;
        } else if !(0.0..=100.0).contains(&self.discount_percentage) {
            return Err(ValidationError::DiscountOutOfRange(self.discount_percentage));
        }
        if let Some(rating) = self.rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(ValidationError::RatingOutOfRange(rating));
            }
        }
        if let Some(embedding) = &self.embedding {
            if embedding.len() != EMBEDDING_DIMENSIONS {
                return Err(ValidationError::EmbeddingDimensions {
                    expected: EMBEDDING_DIMENSIONS,
                    actual: embedding.len(),
                });
            }
        }
        self.inferred.validate()
    }

    /// A discounted record must be marked down from a positive price, with a
    /// percentage strictly inside (0, 100) that matches its prices.
    fn validate_discount(&self) -> Result<(), ValidationError> {
        let stated = self.discount_percentage;
        if stated.is_nan() || stated <= 0.0 || stated >= 100.0 {
            return Err(ValidationError::DiscountOutOfRange(stated));
        }
        let expected = self
            .markdown_percentage()
            .ok_or(ValidationError::DiscountWithoutMarkdown {
                current: self.current_price,
                original: self.original_price,
            })?;
        if (expected - stated).abs() > 0.005 {
            return Err(ValidationError::DiscountMismatch { stated, expected });
        }
        Ok(())
    }

    /// Upsert merge: fresh scrape data replaces the scraped columns while
    /// identity, creation time, inferred attributes and embedding survive.
    pub fn absorb_scrape(&mut self, fresh: CatalogueRecord) {
        let CatalogueRecord {
            id,
            created_at,
            inferred,
            embedding,
            ..
        } = std::mem::replace(self, fresh);
        self.id = id;
        self.created_at = created_at;
        self.inferred = inferred;
        self.embedding = embedding;
        self.is_active = true;
    }

    pub fn primary_image(&self) -> Option<&str> {
        self.image_urls.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_record(name: &str) -> CatalogueRecord {
        let now = Utc::now();
        CatalogueRecord {
            id: Uuid::new_v4(),
            url: format!("https://shop.test/{name}.html"),
            name: name.to_string(),
            brand: "Acme".into(),
            categories: vec!["Toys".into()],
            specialization: Specialization::Toy,
            current_price: 45.0,
            original_price: 60.0,
            has_discount: true,
            discount_percentage: 25.0,
            in_stock: true,
            color_options: vec![],
            color_availability: IndexMap::new(),
            description: vec!["Soft plush".into()],
            specifications: Specifications::new(),
            image_urls: vec!["https://shop.test/a.jpg".into()],
            image_count: 1,
            rating: Some(4.5),
            review_count: 3,
            category_details: CategoryDetails::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
            inferred: InferredAttributes::default(),
            embedding: None,
        }
    }

    #[test]
    fn age_suitability_accepts_every_dash_spelling() {
        for raw in ["0-5 months", "0–5 months", "0—5 Months", " 0 - 5 months"] {
            assert_eq!(
                raw.parse::<AgeSuitability>().unwrap(),
                AgeSuitability::Months0To5,
                "{raw}"
            );
        }
        assert_eq!("1.6-2 years".parse::<AgeSuitability>().unwrap(), AgeSuitability::Years1_6To2);
        assert_eq!("All Ages".parse::<AgeSuitability>().unwrap(), AgeSuitability::AllAges);
        assert!("teenagers".parse::<AgeSuitability>().is_err());
    }

    #[test]
    fn age_suitability_serializes_with_en_dash() {
        let json = serde_json::to_string(&AgeSuitability::Years3To5).unwrap();
        assert_eq!(json, "\"3–5 years\"");
        let back: AgeSuitability = serde_json::from_str("\"3-5 years\"").unwrap();
        assert_eq!(back, AgeSuitability::Years3To5);
    }

    #[test]
    fn gender_compatibility_includes_unisex() {
        assert!(Gender::Female.accepts(Gender::Unisex));
        assert!(Gender::Female.accepts(Gender::Female));
        assert!(!Gender::Female.accepts(Gender::Male));
        assert_eq!(Gender::Unisex.compatible_labels(), vec!["unisex"]);
        assert_eq!(Gender::Male.compatible_labels(), vec!["unisex", "male"]);
    }

    #[test]
    fn merge_only_overwrites_present_fields_and_clamps_scores() {
        let mut attrs = InferredAttributes {
            giftability: Some(4.0),
            usage_type: Some("feeding".into()),
            ..Default::default()
        };
        attrs.merge(InferredAttributes {
            giftability: Some(14.0),
            durability: Some(-3.0),
            waterproof: Some(true),
            ..Default::default()
        });
        assert_eq!(attrs.giftability, Some(10.0));
        assert_eq!(attrs.durability, Some(0.0));
        assert_eq!(attrs.waterproof, Some(true));
        assert_eq!(attrs.usage_type.as_deref(), Some("feeding"));
    }

    #[test]
    fn patch_deserializes_flattened_attributes() {
        let patch: AttributePatch = serde_json::from_str(
            r#"{"name":"Teddy","age_suitability":"6-11 months","gender":"unisex","seasonal_use":[11,12]}"#,
        )
        .unwrap();
        assert_eq!(patch.name, "Teddy");
        assert_eq!(patch.attributes.age_suitability, Some(AgeSuitability::Months6To11));
        assert_eq!(patch.attributes.seasonal_use, Some(vec![11, 12]));
    }

    #[test]
    fn invalid_seasonal_month_is_rejected() {
        let attrs = InferredAttributes {
            seasonal_use: Some(vec![1, 13]),
            ..Default::default()
        };
        assert_eq!(attrs.validate(), Err(ValidationError::InvalidSeasonalMonth(13)));
    }

    #[test]
    fn prepare_for_write_zeroes_discount_without_flag() {
        let mut record = sample_record("Bear");
        record.has_discount = false;
        record.discount_percentage = 30.0;
        record.prepare_for_write().unwrap();
        assert_eq!(record.discount_percentage, 0.0);
    }

    #[test]
    fn prepare_for_write_rederives_discount_from_prices() {
        let mut record = sample_record("Bear");
        record.discount_percentage = 10.0;
        record.prepare_for_write().unwrap();
        assert_eq!(record.discount_percentage, 25.0);
    }

    #[test]
    fn prepare_for_write_refuses_discount_without_markdown() {
        let mut record = sample_record("Bear");
        record.current_price = 50.0;
        record.original_price = 50.0;
        record.discount_percentage = 100.0;
        assert_eq!(
            record.prepare_for_write(),
            Err(ValidationError::DiscountOutOfRange(100.0))
        );

        record.discount_percentage = 20.0;
        assert_eq!(
            record.prepare_for_write(),
            Err(ValidationError::DiscountWithoutMarkdown {
                current: 50.0,
                original: 50.0
            })
        );
    }

    #[test]
    fn prepare_for_write_refuses_free_items_marked_as_discounted() {
        let mut record = sample_record("Bear");
        record.current_price = 0.0;
        assert_eq!(
            record.prepare_for_write(),
            Err(ValidationError::DiscountOutOfRange(100.0))
        );
    }

    #[test]
    fn validate_refuses_percentage_that_disagrees_with_prices() {
        let mut record = sample_record("Bear");
        record.discount_percentage = 10.0;
        assert_eq!(
            record.validate(),
            Err(ValidationError::DiscountMismatch {
                stated: 10.0,
                expected: 25.0
            })
        );
        record.discount_percentage = 140.0;
        assert_eq!(
            record.validate(),
            Err(ValidationError::DiscountOutOfRange(140.0))
        );
    }

    #[test]
    fn absorb_scrape_keeps_identity_and_enrichment() {
        let mut stored = sample_record("Bear");
        stored.is_active = false;
        stored.inferred.gender = Some(Gender::Unisex);
        stored.embedding = Some(vec![0.0; EMBEDDING_DIMENSIONS]);
        let original_id = stored.id;

        let mut fresh = sample_record("Bear");
        fresh.current_price = 40.0;
        stored.absorb_scrape(fresh);

        assert_eq!(stored.id, original_id);
        assert_eq!(stored.current_price, 40.0);
        assert!(stored.is_active);
        assert_eq!(stored.inferred.gender, Some(Gender::Unisex));
        assert!(stored.embedding.is_some());
    }

    #[test]
    fn rounding_matches_two_decimal_percentages() {
        assert_eq!(round_to(((60.0 - 45.0) / 60.0) * 100.0, 2), 25.0);
        assert_eq!(round_to(((3.0 - 1.0) / 3.0) * 100.0, 2), 66.67);
        assert_eq!(round_to(0.84 * 5.0, 1), 4.2);
    }
}
