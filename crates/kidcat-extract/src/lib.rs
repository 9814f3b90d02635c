//! Product-page extraction for Magento-style storefronts: field cascades,
//! category classification and specializations, and record normalization.

mod dom;
mod fields;
mod links;
mod normalize;
mod specialize;

use chrono::{DateTime, Utc};
use kidcat_core::{CatalogueRecord, CategoryDetails, Specialization, Specifications, StockStatus};
use tracing::debug;

pub use dom::{first_present, ProductPage, Stage};
pub use fields::{
    brand, breadcrumb_labels, categories, clean_price, colour_variants, colours_in_name,
    description, image_urls, prices, product_name, ratings, sku, specifications, split_spec_line,
    stock_status, PriceInfo, RatingInfo, VariantOptions, KNOWN_COLOURS,
};
pub use links::discover_product_links;
pub use normalize::{
    normalize, record_from_raw, RawRecord, RecordError, REQUIRED_FIELDS, SCRAPE_DATE_FORMAT,
    STRUCTURED_FIELDS,
};
pub use specialize::{
    classify, extend, gender_from_name, APPAREL_LABELS, DIAPER_LABELS, TOY_LABELS,
};

pub const CRATE_NAME: &str = "kidcat-extract";

/// Everything read from one product page before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedProduct {
    pub url: String,
    pub name: String,
    pub brand: String,
    pub sku: String,
    pub categories: Vec<String>,
    pub specialization: Specialization,
    pub prices: PriceInfo,
    pub availability: StockStatus,
    pub colours: VariantOptions,
    pub description: Vec<String>,
    pub specifications: Specifications,
    pub image_urls: Vec<String>,
    pub ratings: RatingInfo,
    pub details: CategoryDetails,
}

impl ScrapedProduct {
    pub fn empty(url: &str) -> Self {
        Self {
            url: url.to_string(),
            name: kidcat_core::NOT_FOUND.to_string(),
            brand: kidcat_core::NOT_FOUND.to_string(),
            sku: kidcat_core::NOT_FOUND.to_string(),
            categories: Vec::new(),
            specialization: Specialization::Generic,
            prices: PriceInfo::default(),
            availability: StockStatus::Unknown,
            colours: VariantOptions::default(),
            description: Vec::new(),
            specifications: Specifications::new(),
            image_urls: Vec::new(),
            ratings: RatingInfo::default(),
            details: CategoryDetails::default(),
        }
    }
}

/// Run the generic extractors, classify, then layer the specialization.
pub fn extract_product(url: &str, html: &str) -> ScrapedProduct {
    let page = ProductPage::parse(url, html);

    let name = product_name(&page);
    let availability = stock_status(&page);
    let mut product = ScrapedProduct {
        url: url.to_string(),
        brand: brand(&page),
        sku: sku(&page),
        categories: categories(&page),
        specialization: classify(&breadcrumb_labels(&page)),
        prices: prices(&page),
        availability,
        colours: colour_variants(&page, &name, availability),
        description: description(&page),
        specifications: specifications(&page),
        image_urls: image_urls(&page),
        ratings: ratings(&page),
        details: CategoryDetails::default(),
        name,
    };
    extend(product.specialization, &page, &mut product);
    debug!(
        url,
        name = %product.name,
        specialization = product.specialization.as_str(),
        images = product.image_urls.len(),
        "extracted product page"
    );
    product
}

/// Page markup to a storable record: extract, flatten, normalize, coerce.
pub fn extract_record(
    url: &str,
    html: &str,
    scraped_at: DateTime<Utc>,
) -> Result<(RawRecord, CatalogueRecord), RecordError> {
    let raw = normalize(extract_product(url, html).to_raw(scraped_at));
    let record = record_from_raw(&raw, scraped_at)?;
    Ok((raw, record))
}
