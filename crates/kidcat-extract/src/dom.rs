use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

/// A parsed product page plus the URL it was fetched from.
pub struct ProductPage {
    document: Html,
    url: String,
    base: Option<Url>,
}

/// One step of a field cascade; `None` means "try the next stage".
pub type Stage<T> = fn(&ProductPage) -> Option<T>;

/// Run stages in order and keep the first value produced.
pub fn first_present<T>(page: &ProductPage, stages: &[Stage<T>]) -> Option<T> {
    stages.iter().find_map(|stage| stage(page))
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn element_text(element: ElementRef<'_>) -> Option<String> {
    text_or_none(element.text().collect::<String>())
}

pub(crate) fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

pub(crate) fn is_disabled(element: ElementRef<'_>) -> bool {
    element.value().attr("disabled").is_some() || has_class(element, "disabled")
}

pub(crate) fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(err) => {
            warn!(selector = css, error = %err, "invalid css selector");
            None
        }
    }
}

/// Text after the first `:`, so `"SKU: 123"` becomes `"123"`.
pub(crate) fn after_colon(text: &str) -> String {
    match text.split_once(':') {
        Some((_, value)) => value.trim().to_string(),
        None => text.trim().to_string(),
    }
}

impl ProductPage {
    pub fn parse(url: &str, html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
            url: url.to_string(),
            base: Url::parse(url).ok(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> Option<&str> {
        self.base.as_ref().and_then(Url::host_str)
    }

    pub(crate) fn select_all(&self, css: &str) -> Vec<ElementRef<'_>> {
        match selector(css) {
            Some(sel) => self.document.select(&sel).collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn select_first(&self, css: &str) -> Option<ElementRef<'_>> {
        let sel = selector(css)?;
        self.document.select(&sel).next()
    }

    pub(crate) fn select_first_text(&self, css: &str) -> Option<String> {
        self.select_first(css).and_then(element_text)
    }

    pub(crate) fn select_all_texts(&self, css: &str) -> Vec<String> {
        self.select_all(css).into_iter().filter_map(element_text).collect()
    }

    pub(crate) fn select_first_attr(&self, css: &str, attr: &str) -> Option<String> {
        self.select_first(css)
            .and_then(|n| n.value().attr(attr))
            .and_then(|s| text_or_none(s.to_string()))
    }

    pub(crate) fn select_all_attrs(&self, css: &str, attr: &str) -> Vec<String> {
        self.select_all(css)
            .into_iter()
            .filter_map(|n| n.value().attr(attr))
            .filter_map(|s| text_or_none(s.to_string()))
            .collect()
    }

    /// Label/value pairs from table-like rows; both cells must carry text.
    pub(crate) fn label_value_rows(
        &self,
        row_css: &str,
        label_css: &str,
        value_css: &str,
    ) -> Vec<(String, String)> {
        let (Some(label_sel), Some(value_sel)) = (selector(label_css), selector(value_css)) else {
            return Vec::new();
        };
        self.select_all(row_css)
            .into_iter()
            .filter_map(|row| {
                let label = row.select(&label_sel).next().and_then(element_text)?;
                let value = row.select(&value_sel).next().and_then(element_text)?;
                Some((label, value))
            })
            .collect()
    }

    /// Every text node of the document, scripts included.
    pub(crate) fn all_text(&self) -> impl Iterator<Item = &str> + '_ {
        self.document.root_element().text()
    }

    /// Resolve a possibly relative reference against the page URL.
    pub(crate) fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        match &self.base {
            Some(base) => base.join(href).ok().map(String::from),
            None => Url::parse(href).ok().map(String::from),
        }
    }
}
