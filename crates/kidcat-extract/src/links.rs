use std::collections::HashSet;

use crate::dom::{selector, ProductPage};

/// Product links from a listing/sitemap page: the first `href` inside every
/// `li.product`, absolute and unique, in page order.
pub fn discover_product_links(page_url: &str, html: &str) -> Vec<String> {
    let page = ProductPage::parse(page_url, html);
    let Some(anchor) = selector("a[href]") else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    page.select_all("li.product")
        .into_iter()
        .filter_map(|item| item.select(&anchor).next())
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page.resolve(href))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
