use std::fs;
use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use kidcat_core::{Specialization, StockStatus, NOT_FOUND};
use kidcat_extract::{
    discover_product_links, extract_product, extract_record, RecordError, REQUIRED_FIELDS,
};

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/kiddoz")
        .join(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

#[test]
fn discounted_toy_page_extracts_every_field() {
    let url = "https://kiddoz.lk/cuddly-teddy-bear-k-4821.html";
    let product = extract_product(url, &fixture("toy_discounted.html"));

    assert_eq!(product.name, "Cuddly Teddy Bear Brown");
    assert_eq!(product.brand, "Snuggles");
    assert_eq!(product.sku, "TB-4821");
    assert_eq!(product.categories, vec!["Toys & Gaming", "Soft Toys"]);
    assert_eq!(product.specialization, Specialization::Toy);

    assert_eq!(product.prices.current_price, Some(45.0));
    assert_eq!(product.prices.original_price, Some(60.0));
    assert!(product.prices.has_discount);
    assert_eq!(product.prices.discount_percentage, 25.0);
    assert_eq!(product.availability, StockStatus::InStock);

    assert_eq!(product.colours.options, vec!["Brown", "Cream"]);
    assert_eq!(product.colours.availability["Cream"], StockStatus::OutOfStock);
    assert_eq!(
        product.description,
        vec!["Ultra soft plush fabric", "Safe for ages 3+"]
    );
    assert_eq!(
        product.specifications.get("Material").map(String::as_str),
        Some("Polyester plush")
    );
    assert_eq!(
        product.image_urls,
        vec![
            "https://kiddoz.lk/media/catalog/product/t/e/teddy_1.jpg",
            "https://kiddoz.lk/media/catalog/product/t/e/teddy_2.jpg",
        ]
    );
    assert_eq!(product.ratings.rating, Some(4.6));
    assert_eq!(product.ratings.review_count, 7);

    assert_eq!(product.details.age_recommendation.as_deref(), Some("3+"));
    assert_eq!(product.details.material.as_deref(), Some("Polyester plush"));
}

#[test]
fn apparel_page_reads_sizes_labelled_colours_and_gender() {
    let url = "https://kiddoz.lk/boys-denim-dungaree-2-3-years-k-7310.html";
    let product = extract_product(url, &fixture("apparel_swatches.html"));

    assert_eq!(product.name, "Boys Denim Dungaree 2-3 Years Navy");
    assert_eq!(product.brand, "Little Denim Co");
    assert_eq!(product.sku, "DD-7310");
    assert_eq!(product.specialization, Specialization::Apparel);

    assert_eq!(product.prices.current_price, Some(3200.0));
    assert_eq!(product.prices.original_price, Some(3555.56));
    assert!(product.prices.has_discount);
    assert_eq!(product.prices.discount_percentage, 10.0);
    assert_eq!(product.availability, StockStatus::InStock);

    assert_eq!(product.colours.options, vec!["Navy", "Indigo Wash"]);
    assert_eq!(product.details.size_options, vec!["2Y", "3Y"]);
    assert_eq!(product.details.size_availability["3Y"], StockStatus::OutOfStock);
    assert_eq!(product.details.age_group.as_deref(), Some("2-3 Years"));
    assert_eq!(product.details.gender.as_deref(), Some("male"));

    assert_eq!(
        product.description,
        vec!["Classic denim dungaree with adjustable straps."]
    );
    assert_eq!(
        product.specifications.get("Fabric").map(String::as_str),
        Some("100% Cotton Denim")
    );
    assert_eq!(
        product.specifications.get("Care").map(String::as_str),
        Some("Machine wash cold")
    );
    assert_eq!(
        product.image_urls,
        vec![
            "https://kiddoz.lk/media/catalog/product/d/u/dungaree_front.jpg",
            "https://kiddoz.lk/media/catalog/product/d/u/dungaree_back.jpg",
            "https://kiddoz.lk/media/wysiwyg/size-chart.png",
        ]
    );
    assert_eq!(product.ratings.rating, None);
    assert_eq!(product.ratings.review_count, 0);
}

#[test]
fn diaper_page_is_out_of_stock_with_name_derived_details() {
    let url = "https://kiddoz.lk/huggies-dry-pants-medium-k-9001.html";
    let product = extract_product(url, &fixture("diaper_out_of_stock.html"));

    assert_eq!(product.brand, "Huggies");
    assert_eq!(product.sku, "9001");
    assert_eq!(product.specialization, Specialization::Diaper);
    assert_eq!(product.prices.current_price, Some(4150.0));
    assert!(!product.prices.has_discount);
    assert_eq!(product.availability, StockStatus::OutOfStock);
    assert!(product.colours.options.is_empty());

    assert_eq!(product.details.size.as_deref(), Some("MEDIUM"));
    assert_eq!(product.details.weight_range.as_deref(), Some("7-12 kg"));
    assert_eq!(product.details.count, Some(42));
    assert_eq!(
        product.specifications.get("Pack Size").map(String::as_str),
        Some("42")
    );
    assert_eq!(
        product.specifications.get("Suitable Weight").map(String::as_str),
        Some("7-12 kg")
    );
    assert_eq!(
        product.image_urls,
        vec!["https://kiddoz.lk/media/catalog/product/h/u/huggies_m.jpg"]
    );
}

#[test]
fn extracted_records_are_normalized_and_coerced() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    let (raw, record) = extract_record(
        "https://kiddoz.lk/cuddly-teddy-bear-k-4821.html",
        &fixture("toy_discounted.html"),
        at,
    )
    .unwrap();

    for field in REQUIRED_FIELDS {
        assert!(raw.contains_key(*field), "{field}");
    }
    assert_eq!(raw["scrape_date"], "2024-03-01 09:30:00");
    assert_eq!(raw["has_discount"], "Yes");
    assert_eq!(raw["current_price"], "45.00");
    assert_eq!(raw["image_count"], "2");

    assert_eq!(record.name, "Cuddly Teddy Bear Brown");
    assert!(record.in_stock);
    assert!(record.has_discount);
    assert_eq!(record.discount_percentage, 25.0);
    assert_eq!(record.image_count, 2);
    assert_eq!(record.rating, Some(4.6));
    assert_eq!(record.category_details.material.as_deref(), Some("Polyester plush"));
    assert!(record.is_active);
    assert_eq!(record.created_at, at);
    assert!(record.inferred.is_empty());
}

#[test]
fn out_of_stock_record_keeps_sentinel_free_lists() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    let (raw, record) = extract_record(
        "https://kiddoz.lk/huggies-dry-pants-medium-k-9001.html",
        &fixture("diaper_out_of_stock.html"),
        at,
    )
    .unwrap();

    assert_eq!(raw["availability"], "Out of stock");
    assert_eq!(raw["rating"], NOT_FOUND);
    assert!(!record.in_stock);
    assert_eq!(record.rating, None);
    assert_eq!(record.category_details.count, Some(42));
    assert_eq!(record.categories, vec!["Diapering", "Diapers"]);
}

#[test]
fn page_without_name_or_price_is_refused() {
    let html = fixture("generic_minimal.html");
    let url = "https://kiddoz.lk/mystery-item.html";

    let product = extract_product(url, &html);
    assert_eq!(product.name, NOT_FOUND);
    assert_eq!(product.sku, NOT_FOUND);
    assert_eq!(product.specialization, Specialization::Generic);
    assert_eq!(product.availability, StockStatus::Unknown);
    assert_eq!(product.description, vec![NOT_FOUND]);

    let err = extract_record(url, &html, Utc::now()).unwrap_err();
    assert_eq!(err, RecordError::Missing("name"));
}

#[test]
fn sitemap_links_are_unique_and_absolute() {
    let links = discover_product_links("https://kiddoz.lk/sitemap", &fixture("sitemap.html"));
    assert_eq!(
        links,
        vec![
            "https://kiddoz.lk/cuddly-teddy-bear-k-4821.html",
            "https://kiddoz.lk/boys-denim-dungaree-2-3-years-k-7310.html",
            "https://kiddoz.lk/huggies-dry-pants-medium-k-9001.html",
        ]
    );
}
