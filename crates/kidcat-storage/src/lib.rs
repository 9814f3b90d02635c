//! Page fetching, atomic file output and catalogue persistence for kidcat.

mod catalogue;
mod fetch;
mod files;
mod postgres;

pub use catalogue::{
    cosine_distance, dedup_matches, CatalogueMatch, CatalogueStore, MemoryCatalogueStore,
    SimilarityQuery, StoreError, UpsertOutcome,
};
pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, PageFetcher, RetryDisposition,
};
pub use files::{sha256_hex, write_file_atomic};
pub use postgres::PgCatalogueStore;

pub const CRATE_NAME: &str = "kidcat-storage";
