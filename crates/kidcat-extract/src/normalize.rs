//! Loosely typed record map, its normalizer, and coercion into the stored
//! catalogue shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use kidcat_core::{
    CatalogueRecord, CategoryDetails, InferredAttributes, Specialization, Specifications,
    StockStatus, NOT_FOUND, NOT_SPECIFIED,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::ScrapedProduct;

/// Field name -> string value, with structured fields JSON-encoded.
pub type RawRecord = BTreeMap<String, String>;

pub const REQUIRED_FIELDS: &[&str] = &[
    "url",
    "scrape_date",
    "name",
    "brand",
    "current_price",
    "original_price",
    "has_discount",
    "description",
    "availability",
    "image_urls",
    "image_count",
];

pub const STRUCTURED_FIELDS: &[&str] = &[
    "categories",
    "description",
    "specifications",
    "image_urls",
    "color_options",
    "color_availability",
    "size_options",
    "size_availability",
];

pub const SCRAPE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record has no usable {0}")]
    Missing(&'static str),
    #[error("{field} is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

fn json_text<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

fn text_or_sentinel(value: Option<&str>, sentinel: &str) -> String {
    value.map(str::to_string).unwrap_or_else(|| sentinel.to_string())
}

fn price_text(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

impl ScrapedProduct {
    /// Flatten into the string map the normalizer and reports work with.
    pub fn to_raw(&self, scraped_at: DateTime<Utc>) -> RawRecord {
        let mut raw = RawRecord::new();
        let mut put = |key: &str, value: String| {
            raw.insert(key.to_string(), value);
        };

        put("url", self.url.clone());
        put("scrape_date", scraped_at.format(SCRAPE_DATE_FORMAT).to_string());
        put("name", self.name.clone());
        put("brand", self.brand.clone());
        put("sku", self.sku.clone());
        put("specialization", self.specialization.as_str().to_string());
        if self.categories.is_empty() {
            put("categories", NOT_FOUND.to_string());
        } else {
            put("categories", json_text(&self.categories));
        }
        put("current_price", price_text(self.prices.current_price));
        put("original_price", price_text(self.prices.original_price));
        put(
            "has_discount",
            if self.prices.has_discount { "Yes" } else { "No" }.to_string(),
        );
        put(
            "discount_percentage",
            self.prices.discount_percentage.to_string(),
        );
        put("availability", self.availability.as_str().to_string());
        put("color_options", json_text(&self.colours.options));
        put("color_availability", json_text(&self.colours.availability));
        put("description", json_text(&self.description));
        put("specifications", json_text(&self.specifications));
        put("image_urls", json_text(&self.image_urls));
        put("image_count", self.image_urls.len().to_string());
        put(
            "rating",
            self.ratings
                .rating
                .map(|r| r.to_string())
                .unwrap_or_else(|| NOT_FOUND.to_string()),
        );
        put("review_count", self.ratings.review_count.to_string());

        let details = &self.details;
        match self.specialization {
            Specialization::Generic => {}
            Specialization::Apparel => {
                put("size_options", json_text(&details.size_options));
                put("size_availability", json_text(&details.size_availability));
                put(
                    "age_group",
                    text_or_sentinel(details.age_group.as_deref(), NOT_SPECIFIED),
                );
                put(
                    "gender",
                    text_or_sentinel(details.gender.as_deref(), NOT_SPECIFIED),
                );
            }
            Specialization::Toy => {
                put(
                    "age_recommendation",
                    text_or_sentinel(details.age_recommendation.as_deref(), NOT_SPECIFIED),
                );
                put(
                    "material",
                    text_or_sentinel(details.material.as_deref(), NOT_SPECIFIED),
                );
            }
            Specialization::Diaper => {
                put("size", text_or_sentinel(details.size.as_deref(), NOT_SPECIFIED));
                put(
                    "weight_range",
                    text_or_sentinel(details.weight_range.as_deref(), NOT_SPECIFIED),
                );
                put(
                    "count",
                    details
                        .count
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
                );
            }
        }
        raw
    }
}

/// Fill missing required fields with "Not found" and make every structured
/// field valid JSON, wrapping stray text in a one-element list. Applying it
/// twice changes nothing.
pub fn normalize(mut raw: RawRecord) -> RawRecord {
    for field in REQUIRED_FIELDS {
        raw.entry((*field).to_string())
            .or_insert_with(|| NOT_FOUND.to_string());
    }
    for field in STRUCTURED_FIELDS {
        if let Some(value) = raw.get_mut(*field) {
            if serde_json::from_str::<JsonValue>(value).is_err() {
                *value = json_text(&[value.as_str()]);
            }
        }
    }
    raw
}

fn is_sentinel(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == NOT_FOUND || value == NOT_SPECIFIED
}

fn optional_text(raw: &RawRecord, key: &str) -> Option<String> {
    raw.get(key)
        .filter(|v| !is_sentinel(v))
        .map(|v| v.trim().to_string())
}

fn required_text(raw: &RawRecord, key: &'static str) -> Result<String, RecordError> {
    optional_text(raw, key).ok_or(RecordError::Missing(key))
}

fn required_number(raw: &RawRecord, key: &'static str) -> Result<f64, RecordError> {
    let text = required_text(raw, key)?;
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(RecordError::InvalidNumber { field: key, value: text })
}

fn parse_json(raw: &RawRecord, key: &str) -> Option<JsonValue> {
    serde_json::from_str(raw.get(key)?).ok()
}

fn json_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Lenient list coercion: arrays keep their items, scalars become one item,
/// sentinel entries are dropped.
fn json_list(raw: &RawRecord, key: &str) -> Vec<String> {
    let items = match parse_json(raw, key) {
        Some(JsonValue::Array(items)) => items.iter().map(json_to_text).collect(),
        Some(JsonValue::Null) | None => Vec::new(),
        Some(other) => vec![json_to_text(&other)],
    };
    items.into_iter().filter(|item| !is_sentinel(item)).collect()
}

fn json_object(raw: &RawRecord, key: &str) -> IndexMap<String, String> {
    match parse_json(raw, key) {
        Some(JsonValue::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), json_to_text(v)))
            .collect(),
        Some(JsonValue::Array(items)) if items.iter().all(|i| is_sentinel(&json_to_text(i))) => {
            IndexMap::new()
        }
        Some(other) => {
            warn!(field = key, value = %other, "expected a json object, dropping value");
            IndexMap::new()
        }
        None => IndexMap::new(),
    }
}

fn stock_map(raw: &RawRecord, key: &str) -> IndexMap<String, StockStatus> {
    json_object(raw, key)
        .into_iter()
        .map(|(label, status)| (label, StockStatus::from_label(&status)))
        .collect()
}

fn specialization_of(raw: &RawRecord) -> Specialization {
    let tag = raw.get("specialization").map(String::as_str).unwrap_or("");
    Specialization::ALL
        .into_iter()
        .find(|s| s.as_str() == tag)
        .unwrap_or(Specialization::Generic)
}

/// Coerce a normalized raw record into a storable catalogue record.
pub fn record_from_raw(raw: &RawRecord, now: DateTime<Utc>) -> Result<CatalogueRecord, RecordError> {
    let url = required_text(raw, "url")?;
    let name = required_text(raw, "name")?;
    let current_price = required_number(raw, "current_price")?;
    let original_price = required_number(raw, "original_price")?;

    let has_discount = raw
        .get("has_discount")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("yes"));
    let discount_percentage = optional_text(raw, "discount_percentage")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    let in_stock = raw
        .get("availability")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("in stock"));
    let rating = optional_text(raw, "rating").and_then(|v| v.parse::<f64>().ok());
    let review_count = optional_text(raw, "review_count")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let image_urls = json_list(raw, "image_urls");

    let category_details = CategoryDetails {
        size: optional_text(raw, "size"),
        weight_range: optional_text(raw, "weight_range"),
        count: optional_text(raw, "count").and_then(|v| v.parse::<u32>().ok()),
        size_options: json_list(raw, "size_options"),
        size_availability: stock_map(raw, "size_availability"),
        age_group: optional_text(raw, "age_group"),
        gender: optional_text(raw, "gender"),
        age_recommendation: optional_text(raw, "age_recommendation"),
        material: optional_text(raw, "material"),
    };

    let specifications: Specifications = json_object(raw, "specifications");

    Ok(CatalogueRecord {
        id: Uuid::new_v4(),
        url,
        brand: optional_text(raw, "brand").unwrap_or_else(|| NOT_FOUND.to_string()),
        name,
        categories: json_list(raw, "categories"),
        specialization: specialization_of(raw),
        current_price: kidcat_core::round_to(current_price, 2),
        original_price: kidcat_core::round_to(original_price, 2),
        has_discount,
        discount_percentage,
        in_stock,
        color_options: json_list(raw, "color_options"),
        color_availability: stock_map(raw, "color_availability"),
        description: json_list(raw, "description"),
        specifications,
        image_count: image_urls.len() as u32,
        image_urls,
        rating,
        review_count,
        category_details,
        is_active: true,
        created_at: now,
        updated_at: now,
        inferred: InferredAttributes::default(),
        embedding: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn normalize_fills_required_fields() {
        let out = normalize(raw(&[("url", "https://kiddoz.lk/a.html")]));
        for field in REQUIRED_FIELDS {
            assert!(out.contains_key(*field), "{field}");
        }
        assert_eq!(out["brand"], NOT_FOUND);
    }

    #[test]
    fn normalize_wraps_invalid_structured_fields() {
        let out = normalize(raw(&[
            ("categories", "Toys"),
            ("specifications", r#"{"Material":"Wood"}"#),
        ]));
        assert_eq!(out["categories"], r#"["Toys"]"#);
        assert_eq!(out["specifications"], r#"{"Material":"Wood"}"#);
        assert_eq!(out["description"], r#"["Not found"]"#);
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            raw(&[]),
            raw(&[("categories", "Toys"), ("color_options", "[\"Red\"")]),
            raw(&[("name", "Bear"), ("image_urls", "not json"), ("size_availability", "{}")]),
        ];
        for input in inputs {
            let once = normalize(input);
            let twice = normalize(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn coercion_maps_flags_and_sentinels() {
        let input = normalize(raw(&[
            ("url", "https://kiddoz.lk/a.html"),
            ("name", "Bear"),
            ("current_price", "45.00"),
            ("original_price", "60.00"),
            ("has_discount", "Yes"),
            ("discount_percentage", "25"),
            ("availability", "In stock"),
            ("rating", NOT_FOUND),
            ("count", NOT_SPECIFIED),
            ("color_availability", r#"{"Red":"In stock","Blue":"Out of stock"}"#),
        ]));
        let record = record_from_raw(&input, Utc::now()).unwrap();
        assert!(record.has_discount);
        assert!(record.in_stock);
        assert_eq!(record.rating, None);
        assert_eq!(record.category_details.count, None);
        assert_eq!(record.brand, NOT_FOUND);
        assert!(record.description.is_empty());
        assert_eq!(record.color_availability["Blue"], StockStatus::OutOfStock);
    }

    #[test]
    fn coercion_refuses_missing_name_or_price() {
        let input = normalize(raw(&[("url", "https://kiddoz.lk/a.html")]));
        assert_eq!(
            record_from_raw(&input, Utc::now()).unwrap_err(),
            RecordError::Missing("name")
        );

        let input = normalize(raw(&[
            ("url", "https://kiddoz.lk/a.html"),
            ("name", "Bear"),
            ("current_price", "free"),
        ]));
        assert!(matches!(
            record_from_raw(&input, Utc::now()).unwrap_err(),
            RecordError::InvalidNumber { field: "current_price", .. }
        ));
    }
}
