use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use kidcat_core::{
    CatalogueRecord, CategoryDetails, InferredAttributes, Specialization, Specifications,
    StockStatus, EMBEDDING_DIMENSIONS,
};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::catalogue::{
    dedup_matches, validate_embedding, CatalogueMatch, CatalogueStore, SimilarityQuery,
    StoreError, UpsertOutcome,
};

const RECORD_COLUMNS: &str = "id, url, name, brand, categories, specialization, current_price, \
     original_price, has_discount, discount_percentage, in_stock, color_options, \
     color_availability, description, specifications, image_urls, image_count, rating, \
     review_count, category_details, is_active, created_at, updated_at, inferred, embedding";

/// Postgres + pgvector catalogue.
#[derive(Debug, Clone)]
pub struct PgCatalogueStore {
    pool: PgPool,
}

impl PgCatalogueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(PgPool::connect(database_url).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the vector extension and products table when missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id UUID PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL UNIQUE,
                brand TEXT NOT NULL,
                categories JSONB NOT NULL DEFAULT '[]',
                specialization TEXT NOT NULL DEFAULT 'generic',
                current_price DOUBLE PRECISION NOT NULL CHECK (current_price >= 0),
                original_price DOUBLE PRECISION NOT NULL CHECK (original_price >= 0),
                has_discount BOOLEAN NOT NULL DEFAULT FALSE,
                discount_percentage DOUBLE PRECISION NOT NULL DEFAULT 0
                    CHECK (discount_percentage >= 0 AND discount_percentage <= 100),
                in_stock BOOLEAN NOT NULL DEFAULT FALSE,
                color_options JSONB NOT NULL DEFAULT '[]',
                color_availability JSONB NOT NULL DEFAULT '{{}}',
                description JSONB NOT NULL DEFAULT '[]',
                specifications JSONB NOT NULL DEFAULT '{{}}',
                image_urls JSONB NOT NULL DEFAULT '[]',
                image_count INTEGER NOT NULL DEFAULT 0,
                rating DOUBLE PRECISION CHECK (rating >= 0 AND rating <= 5),
                review_count INTEGER NOT NULL DEFAULT 0,
                category_details JSONB NOT NULL DEFAULT '{{}}',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                inferred JSONB NOT NULL DEFAULT '{{}}',
                age_suitability TEXT,
                gender TEXT,
                embedding VECTOR({EMBEDDING_DIMENSIONS})
            )
            "#
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS products_match_filter_idx \
             ON products (is_active, age_suitability, gender, current_price)",
        )
        .execute(&self.pool)
        .await?;
        info!("catalogue schema ready");
        Ok(())
    }
}

fn specialization_from_text(raw: &str) -> Specialization {
    Specialization::ALL
        .into_iter()
        .find(|s| s.as_str() == raw)
        .unwrap_or(Specialization::Generic)
}

fn record_from_row(row: &PgRow) -> Result<CatalogueRecord, sqlx::Error> {
    let specialization: String = row.try_get("specialization")?;
    let image_count: i32 = row.try_get("image_count")?;
    let review_count: i32 = row.try_get("review_count")?;
    let embedding: Option<Vector> = row.try_get("embedding")?;
    let categories: Json<Vec<String>> = row.try_get("categories")?;
    let color_options: Json<Vec<String>> = row.try_get("color_options")?;
    let color_availability: Json<IndexMap<String, StockStatus>> =
        row.try_get("color_availability")?;
    let description: Json<Vec<String>> = row.try_get("description")?;
    let specifications: Json<Specifications> = row.try_get("specifications")?;
    let image_urls: Json<Vec<String>> = row.try_get("image_urls")?;
    let category_details: Json<CategoryDetails> = row.try_get("category_details")?;
    let inferred: Json<InferredAttributes> = row.try_get("inferred")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(CatalogueRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        brand: row.try_get("brand")?,
        categories: categories.0,
        specialization: specialization_from_text(&specialization),
        current_price: row.try_get("current_price")?,
        original_price: row.try_get("original_price")?,
        has_discount: row.try_get("has_discount")?,
        discount_percentage: row.try_get("discount_percentage")?,
        in_stock: row.try_get("in_stock")?,
        color_options: color_options.0,
        color_availability: color_availability.0,
        description: description.0,
        specifications: specifications.0,
        image_urls: image_urls.0,
        image_count: image_count.max(0) as u32,
        rating: row.try_get("rating")?,
        review_count: review_count.max(0) as u32,
        category_details: category_details.0,
        is_active: row.try_get("is_active")?,
        created_at,
        updated_at,
        inferred: inferred.0,
        embedding: embedding.map(|v| v.to_vec()),
    })
}

#[async_trait]
impl CatalogueStore for PgCatalogueStore {
    async fn deactivate_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE products SET is_active = FALSE WHERE is_active")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert(&self, mut record: CatalogueRecord) -> Result<UpsertOutcome, StoreError> {
        record.prepare_for_write()?;

        let row = sqlx::query(
            r#"
            INSERT INTO products (
                id, url, name, brand, categories, specialization, current_price,
                original_price, has_discount, discount_percentage, in_stock, color_options,
                color_availability, description, specifications, image_urls, image_count,
                rating, review_count, category_details, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, TRUE, $21, $22)
            ON CONFLICT (name) DO UPDATE SET
                url = EXCLUDED.url,
                brand = EXCLUDED.brand,
                categories = EXCLUDED.categories,
                specialization = EXCLUDED.specialization,
                current_price = EXCLUDED.current_price,
                original_price = EXCLUDED.original_price,
                has_discount = EXCLUDED.has_discount,
                discount_percentage = EXCLUDED.discount_percentage,
                in_stock = EXCLUDED.in_stock,
                color_options = EXCLUDED.color_options,
                color_availability = EXCLUDED.color_availability,
                description = EXCLUDED.description,
                specifications = EXCLUDED.specifications,
                image_urls = EXCLUDED.image_urls,
                image_count = EXCLUDED.image_count,
                rating = EXCLUDED.rating,
                review_count = EXCLUDED.review_count,
                category_details = EXCLUDED.category_details,
                is_active = TRUE,
                updated_at = EXCLUDED.updated_at
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(record.id)
        .bind(&record.url)
        .bind(&record.name)
        .bind(&record.brand)
        .bind(Json(&record.categories))
        .bind(record.specialization.as_str())
        .bind(record.current_price)
        .bind(record.original_price)
        .bind(record.has_discount)
        .bind(record.discount_percentage)
        .bind(record.in_stock)
        .bind(Json(&record.color_options))
        .bind(Json(&record.color_availability))
        .bind(Json(&record.description))
        .bind(Json(&record.specifications))
        .bind(Json(&record.image_urls))
        .bind(record.image_count as i32)
        .bind(record.rating)
        .bind(record.review_count as i32)
        .bind(Json(&record.category_details))
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;

        let id: Uuid = row.try_get("id")?;
        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Created(id)
        } else {
            UpsertOutcome::Updated(id)
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<CatalogueRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM products WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row).transpose()?)
    }

    async fn active_records(&self) -> Result<Vec<CatalogueRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM products WHERE is_active ORDER BY name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(record_from_row(&row)?);
        }
        Ok(out)
    }

    async fn save_enrichment(
        &self,
        name: &str,
        inferred: &InferredAttributes,
        embedding: Option<&[f32]>,
    ) -> Result<bool, StoreError> {
        inferred.validate()?;
        validate_embedding(embedding)?;

        let result = sqlx::query(
            r#"
            UPDATE products
               SET inferred = $2,
                   age_suitability = $3,
                   gender = $4,
                   embedding = $5,
                   updated_at = NOW()
             WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(Json(inferred))
        .bind(inferred.age_suitability.map(|a| a.label()))
        .bind(inferred.gender.map(|g| g.as_str()))
        .bind(embedding.map(|e| Vector::from(e.to_vec())))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn nearest(&self, query: &SimilarityQuery) -> Result<Vec<CatalogueMatch>, StoreError> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}, (embedding <=> $1)::float8 AS distance
              FROM products
             WHERE is_active
               AND embedding IS NOT NULL
               AND ($2::float8 IS NULL OR current_price <= $2)
               AND age_suitability = $3
               AND gender = ANY($4)
             ORDER BY embedding <=> $1
             LIMIT $5
            "#
        );
        let genders: Vec<String> = query
            .gender
            .compatible_labels()
            .into_iter()
            .map(str::to_string)
            .collect();
        let rows = sqlx::query(&sql)
            .bind(Vector::from(query.embedding.clone()))
            .bind(query.max_price)
            .bind(query.age_suitability.label())
            .bind(genders)
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            matches.push(CatalogueMatch {
                distance: row.try_get("distance")?,
                record: record_from_row(&row)?,
            });
        }
        Ok(dedup_matches(matches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_specialization_text_falls_back_to_generic() {
        assert_eq!(specialization_from_text("diaper"), Specialization::Diaper);
        assert_eq!(specialization_from_text("gadget"), Specialization::Generic);
    }

    #[test]
    fn record_columns_cover_every_persisted_field() {
        for column in ["inferred", "embedding", "category_details", "specifications"] {
            assert!(RECORD_COLUMNS.contains(column), "{column}");
        }
    }
}
