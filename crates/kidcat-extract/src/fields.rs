//! Independent field extractors. Each one is a pure function of the page and
//! degrades to a sentinel instead of failing.

use std::collections::HashSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use kidcat_core::{round_to, Specifications, StockStatus, NOT_FOUND};
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::dom::{after_colon, element_text, first_present, has_class, is_disabled, ProductPage};

static DISCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+\.?\d*)%").expect("discount pattern"));
static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)%").expect("percent pattern"));
static WIDTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"width:\s*(\d+)%").expect("width pattern"));
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").expect("digits pattern"));
static SKU_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"k-(\d+)\.html$").expect("sku url pattern"));
static SPEC_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[:=–—-]\s*").expect("spec split pattern"));

const DROPDOWN_PLACEHOLDER: &str = "Choose an Option...";
const GALLERY_KEY: &str = "[data-gallery-role=gallery-placeholder]";
const GALLERY_WIDGET: &str = "mage/gallery/gallery";

pub const KNOWN_COLOURS: &[&str] = &[
    "black", "white", "blue", "red", "green", "yellow", "pink", "purple", "orange", "brown",
    "grey", "gray", "beige", "navy", "maroon", "cyan", "magenta", "gold", "silver", "teal", "lime",
    "peach", "cream", "off white", "burgundy", "charcoal", "indigo", "violet", "lavender", "mint",
    "coral", "turquoise", "khaki", "mustard", "plum", "fuchsia", "aqua", "emerald", "rainbow",
    "pastel", "neon", "electric", "sapphire", "ruby", "amber",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceInfo {
    pub current_price: Option<f64>,
    pub original_price: Option<f64>,
    pub has_discount: bool,
    pub discount_percentage: f64,
}

/// Labelled variants (colours or sizes) with per-label stock state.
/// Labels are unique; the first sighting of a label wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantOptions {
    pub options: Vec<String>,
    pub availability: IndexMap<String, StockStatus>,
}

impl VariantOptions {
    pub fn push(&mut self, label: &str, status: StockStatus) {
        let label = label.trim();
        if label.is_empty() || self.availability.contains_key(label) {
            return;
        }
        self.options.push(label.to_string());
        self.availability.insert(label.to_string(), status);
    }

    pub fn contains(&self, label: &str) -> bool {
        self.availability.contains_key(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatingInfo {
    pub rating: Option<f64>,
    pub review_count: u32,
}

pub fn clean_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    // "Rs. 45.00" leaves a stray leading dot behind.
    cleaned
        .trim_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub(crate) fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// name

fn name_from_heading(page: &ProductPage) -> Option<String> {
    page.select_first_text("h2.page-title span")
}

fn name_from_title(page: &ProductPage) -> Option<String> {
    let title = page.select_first_text("title")?;
    let site = page.host().map(|h| h.trim_start_matches("www."));
    if let (Some(site), Some((head, tail))) = (site, title.rsplit_once(" - ")) {
        if tail.trim().eq_ignore_ascii_case(site) {
            return Some(head.trim().to_string());
        }
    }
    Some(title)
}

pub fn product_name(page: &ProductPage) -> String {
    first_present(page, &[name_from_heading, name_from_title]).unwrap_or_else(|| {
        debug!(url = page.url(), "no product name found");
        NOT_FOUND.to_string()
    })
}

// brand

fn brand_from_link(page: &ProductPage) -> Option<String> {
    page.select_first_text("#brand_link")
}

fn brand_from_info(page: &ProductPage) -> Option<String> {
    page.select_first_text(".product-info-main .product-info-brand a")
}

fn brand_from_description_table(page: &ProductPage) -> Option<String> {
    page.label_value_rows(
        ".product.attribute.description table tbody tr",
        "td:first-child",
        "td:last-child",
    )
    .into_iter()
    .find(|(label, _)| label.to_lowercase().contains("brand"))
    .map(|(_, value)| value)
}

fn brand_from_stock_sku(page: &ProductPage) -> Option<String> {
    page.select_first_text(".product-info-main .product-info-stock-sku .brand")
        .map(|text| after_colon(&text))
        .filter(|text| !text.is_empty())
}

pub fn brand(page: &ProductPage) -> String {
    first_present(
        page,
        &[
            brand_from_link,
            brand_from_info,
            brand_from_description_table,
            brand_from_stock_sku,
        ],
    )
    .unwrap_or_else(|| NOT_FOUND.to_string())
}

// sku

fn sku_from_attribute(page: &ProductPage) -> Option<String> {
    page.select_first_text(".product.attribute.sku .value")
}

fn sku_from_stock_block(page: &ProductPage) -> Option<String> {
    page.select_first_text(".product-info-stock-sku .sku")
        .map(|text| after_colon(&text))
        .filter(|text| !text.is_empty())
}

fn sku_from_url(page: &ProductPage) -> Option<String> {
    SKU_URL_RE
        .captures(page.url())
        .map(|caps| caps[1].to_string())
}

pub fn sku(page: &ProductPage) -> String {
    first_present(page, &[sku_from_attribute, sku_from_stock_block, sku_from_url])
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

// prices

/// Special price with an optional old price, else the regular price with an
/// optional explicit discount badge. A discount is only reported when the old
/// price is strictly higher than the current one; a badge implies the old
/// price and is ignored at 100% or more.
pub fn prices(page: &ProductPage) -> PriceInfo {
    let mut info = PriceInfo::default();

    if let Some(special) = page.select_first_text(".product-info-price .special-price .price") {
        info.current_price = clean_price(&special);
        match page.select_first_text(".product-info-price .old-price .price") {
            Some(old) => {
                info.original_price = clean_price(&old);
                if let (Some(current), Some(original)) = (info.current_price, info.original_price) {
                    if current > 0.0 && original > current {
                        info.has_discount = true;
                        info.discount_percentage =
                            round_to(((original - current) / original) * 100.0, 2);
                    }
                }
            }
            None => info.original_price = info.current_price,
        }
        return info;
    }

    if let Some(regular) = page.select_first_text(".product-info-price .price") {
        info.current_price = clean_price(&regular);
        info.original_price = info.current_price;
    }
    if let Some(badge) = page.select_first_text(".product-info-price .discount-percent") {
        if let Some(pct) = DISCOUNT_RE
            .captures(&badge)
            .and_then(|caps| caps[1].parse::<f64>().ok())
        {
            let pct = pct.abs();
            if let Some(current) = info.current_price.filter(|c| *c > 0.0) {
                if pct > 0.0 && pct < 100.0 {
                    let original = round_to(current / (1.0 - pct / 100.0), 2);
                    info.original_price = Some(original);
                    info.has_discount = original > current;
                    if info.has_discount {
                        info.discount_percentage =
                            round_to(((original - current) / original) * 100.0, 2);
                    }
                }
            }
        }
    }
    info
}

// stock

fn stock_from_label(page: &ProductPage) -> Option<StockStatus> {
    let text = page.select_first_text(".stock")?.to_lowercase();
    if text.contains("out of stock") {
        Some(StockStatus::OutOfStock)
    } else if text.contains("in stock") {
        Some(StockStatus::InStock)
    } else {
        None
    }
}

fn stock_from_page_text(page: &ProductPage) -> Option<StockStatus> {
    page.all_text()
        .any(|text| text.to_lowercase().contains("out of stock"))
        .then_some(StockStatus::OutOfStock)
}

fn stock_from_cart_button(page: &ProductPage) -> Option<StockStatus> {
    page.select_first("button.action.tocart")
        .filter(|button| button.value().attr("disabled").is_none())
        .map(|_| StockStatus::InStock)
}

fn stock_from_quantity_input(page: &ProductPage) -> Option<StockStatus> {
    page.select_first("input.qty")
        .filter(|input| input.value().attr("disabled").is_none())
        .map(|_| StockStatus::InStock)
}

pub fn stock_status(page: &ProductPage) -> StockStatus {
    first_present(
        page,
        &[
            stock_from_label,
            stock_from_page_text,
            stock_from_cart_button,
            stock_from_quantity_input,
        ],
    )
    .unwrap_or(StockStatus::Unknown)
}

// variants

pub(crate) fn swatch_variants(page: &ProductPage, css: &str, label_attr: &str, into: &mut VariantOptions) {
    for swatch in page.select_all(css) {
        if let Some(label) = swatch.value().attr(label_attr) {
            into.push(label, StockStatus::from_disabled(has_class(swatch, "disabled")));
        }
    }
}

pub(crate) fn dropdown_variants(page: &ProductPage, into: &mut VariantOptions) {
    let Some(select) = page.select_first("select.super-attribute-select") else {
        return;
    };
    let Some(option_sel) = crate::dom::selector("option") else {
        return;
    };
    for option in select.select(&option_sel) {
        let Some(label) = element_text(option) else {
            continue;
        };
        if label == DROPDOWN_PLACEHOLDER {
            continue;
        }
        into.push(&label, StockStatus::from_disabled(is_disabled(option)));
    }
}

/// Known colour words contained in the lower-cased name, title-cased and
/// joined with `" & "`.
pub fn colours_in_name(name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    let found: Vec<String> = KNOWN_COLOURS
        .iter()
        .filter(|colour| lower.contains(*colour))
        .map(|colour| title_case(colour))
        .collect();
    (!found.is_empty()).then(|| found.join(" & "))
}

pub fn colour_variants(page: &ProductPage, name: &str, stock: StockStatus) -> VariantOptions {
    let mut colours = VariantOptions::default();
    swatch_variants(
        page,
        ".swatch-attribute.color .swatch-option",
        "data-option-label",
        &mut colours,
    );
    dropdown_variants(page, &mut colours);
    if let Some(combination) = colours_in_name(name) {
        colours.push(&combination, stock);
    }
    colours
}

// images

fn gallery_urls(value: &JsonValue) -> Option<Vec<String>> {
    let items = value
        .get(GALLERY_KEY)?
        .get(GALLERY_WIDGET)?
        .get("data")?
        .as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.get("full").and_then(JsonValue::as_str))
            .map(ToString::to_string)
            .collect(),
    )
}

fn images_from_gallery_json(page: &ProductPage) -> Option<Vec<String>> {
    for script in page.select_all(r#"script[type="text/x-magento-init"]"#) {
        let body = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<JsonValue>(&body) else {
            continue;
        };
        if let Some(urls) = gallery_urls(&value) {
            return Some(urls).filter(|u| !u.is_empty());
        }
    }
    None
}

fn non_empty(urls: Vec<String>) -> Option<Vec<String>> {
    (!urls.is_empty()).then_some(urls)
}

fn images_from_placeholder(page: &ProductPage) -> Option<Vec<String>> {
    non_empty(page.select_all_attrs(".gallery-placeholder img", "src"))
}

fn images_from_product_photo(page: &ProductPage) -> Option<Vec<String>> {
    non_empty(page.select_all_attrs("img.product-image-photo", "src"))
}

fn images_from_lazy_sources(page: &ProductPage) -> Option<Vec<String>> {
    non_empty(page.select_all_attrs("img[data-src]", "data-src"))
}

/// Gallery images first, then detail-panel figures; absolute and unique.
pub fn image_urls(page: &ProductPage) -> Vec<String> {
    let mut raw = first_present(
        page,
        &[
            images_from_gallery_json,
            images_from_placeholder,
            images_from_product_photo,
            images_from_lazy_sources,
        ],
    )
    .unwrap_or_default();
    raw.extend(page.select_all_attrs("div.basic_details div.value figure img", "src"));

    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|src| page.resolve(src))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

// categories

/// Breadcrumb labels between the root crumb and the product crumb.
pub fn categories(page: &ProductPage) -> Vec<String> {
    let crumbs = page.select_all(".breadcrumbs .items li");
    if crumbs.len() <= 2 {
        return Vec::new();
    }
    crumbs[1..crumbs.len() - 1]
        .iter()
        .filter_map(|crumb| element_text(*crumb))
        .collect()
}

/// Lower-cased breadcrumb link labels, used for classification.
pub fn breadcrumb_labels(page: &ProductPage) -> Vec<String> {
    page.select_all_texts(".breadcrumbs .items li a")
        .into_iter()
        .map(|label| label.to_lowercase())
        .collect()
}

// ratings

fn percent_to_stars(percent: u32) -> f64 {
    round_to((percent as f64 / 100.0) * 5.0, 1).min(5.0)
}

fn rating_from_widget(page: &ProductPage) -> Option<f64> {
    let text = page.select_first_text(".star_avg_tr1.star_avg_td1")?;
    let percent = PERCENT_RE.captures(&text)?[1].parse::<u32>().ok()?;
    Some(percent_to_stars(percent))
}

fn rating_from_style(page: &ProductPage) -> Option<f64> {
    let style = page.select_first_attr(".rating-result", "style")?;
    let percent = WIDTH_RE.captures(&style)?[1].parse::<u32>().ok()?;
    Some(percent_to_stars(percent))
}

fn first_count(text: &str) -> Option<u32> {
    DIGITS_RE.captures(text)?[1].parse::<u32>().ok().filter(|n| *n > 0)
}

fn reviews_from_link(page: &ProductPage) -> Option<u32> {
    first_count(&page.select_first_text(".reviews-actions .action.view")?)
}

fn reviews_from_summary(page: &ProductPage) -> Option<u32> {
    first_count(&page.select_first_text(".product-reviews-summary .reviews-actions")?)
}

pub fn ratings(page: &ProductPage) -> RatingInfo {
    RatingInfo {
        rating: first_present(page, &[rating_from_widget, rating_from_style]),
        review_count: first_present(page, &[reviews_from_link, reviews_from_summary])
            .unwrap_or(0),
    }
}

// description

fn details_value_blocks(page: &ProductPage) -> Vec<String> {
    let nested = page.select_all_texts("div.product.attribute.overview div.basic_details div.value");
    if nested.is_empty() {
        page.select_all_texts("div.product.attribute.overview div.value")
    } else {
        nested
    }
}

/// Paragraphs from every description source, de-duplicated in discovery
/// order, falling back to the description panel's full text.
pub fn description(page: &ProductPage) -> Vec<String> {
    let mut lines = Vec::new();
    for css in [
        "div.product.attribute.overview ul li",
        "div.basic_details div.product.attribute p",
        "div.product-highlights ul li",
        "div.product-details p",
    ] {
        lines.extend(page.select_all_texts(css));
    }
    lines.extend(details_value_blocks(page));

    if lines.is_empty() {
        if let Some(panel) = page.select_first("div.product.attribute.description") {
            let text = panel
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if !text.is_empty() {
                lines.push(text);
            }
        }
    }

    let mut seen = HashSet::new();
    lines.retain(|line| seen.insert(line.clone()));
    if lines.is_empty() {
        lines.push(NOT_FOUND.to_string());
    }
    lines
}

// specifications

pub fn split_spec_line(line: &str) -> Option<(String, String)> {
    let mut parts = SPEC_SPLIT_RE.splitn(line, 2);
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();
    Some((key.to_string(), value.to_string()))
}

/// Three label/value tables, then two `key: value` bullet lists.
/// The first source to define a key keeps it.
pub fn specifications(page: &ProductPage) -> Specifications {
    let mut specs = Specifications::new();
    let mut insert = |key: String, value: String| {
        specs.entry(key).or_insert(value);
    };

    for (row, label, value) in [
        (
            ".product.attribute.description table tbody tr",
            "td:first-child",
            "td:last-child",
        ),
        (".specifications-of-product tr", "td:first-child", "td:last-child"),
        (".additional-attributes-wrapper table tbody tr", "th", "td"),
    ] {
        for (k, v) in page.label_value_rows(row, label, value) {
            insert(k, v);
        }
    }

    for css in [
        "#overview_details_div div.value ul li",
        "div.basic_details div.value ul li",
    ] {
        for line in page.select_all_texts(css) {
            match split_spec_line(&line) {
                Some((k, v)) => insert(k, v),
                None => warn!(url = page.url(), line = %line, "could not split specification line"),
            }
        }
    }
    specs
}
