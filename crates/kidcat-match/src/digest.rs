//! Bucketed textual digest of inferred attributes. Catalogue records and
//! shopper profiles go through the same function so their embeddings land in
//! comparable regions.

use kidcat_core::{clamp_score, InferredAttributes};

/// Five ordinal buckets over the 0–10 score range.
pub fn bucket(score: f64) -> &'static str {
    let score = clamp_score(score);
    if score <= 2.0 {
        "very low"
    } else if score <= 4.0 {
        "low"
    } else if score <= 6.0 {
        "medium"
    } else if score <= 8.0 {
        "high"
    } else {
        "very high"
    }
}

fn list<T: ToString>(items: &[T]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `key: value` pairs in a fixed order joined with `"; "`. Scores are
/// replaced by their bucket; absent attributes are left out.
pub fn digest(attributes: &InferredAttributes) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(age) = attributes.age_suitability {
        parts.push(format!("age_suitability: {}", age.label()));
    }
    if let Some(gender) = attributes.gender {
        parts.push(format!("gender: {}", gender.as_str()));
    }
    for (name, score) in attributes.scores() {
        if let Some(score) = score {
            parts.push(format!("{name}: {}", bucket(score)));
        }
    }
    if let Some(months) = &attributes.seasonal_use {
        parts.push(format!("seasonal_use: {}", list(months)));
    }
    if let Some(waterproof) = attributes.waterproof {
        parts.push(format!("waterproof: {waterproof}"));
    }
    if let Some(features) = &attributes.design_features {
        parts.push(format!("design_features: {}", list(features)));
    }
    if let Some(quantity) = attributes.package_quantity {
        parts.push(format!("package_quantity: {quantity}"));
    }
    for (name, value) in [
        ("usage_type", &attributes.usage_type),
        ("material_origin", &attributes.material_origin),
        ("chemical_safety", &attributes.chemical_safety),
    ] {
        if let Some(value) = value {
            parts.push(format!("{name}: {}", value.trim()));
        }
    }
    parts.join("; ")
}
