use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use kidcat_extract::discover_product_links;
use kidcat_storage::{write_file_atomic, PageFetcher};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};

use crate::config::SourceRegistry;

/// Fetch every enabled sitemap and write the union of product links to
/// `out`, one per line. Nothing is written when no links were found so a
/// previous list survives a broken sitemap.
pub async fn discover_links(
    fetcher: &dyn PageFetcher,
    registry: &SourceRegistry,
    out: &Path,
) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for source in registry.enabled() {
        for sitemap in &source.sitemap_urls {
            let span = info_span!("sitemap", source = %source.source_id, url = %sitemap);
            let html = match fetcher.fetch(sitemap).instrument(span).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(source = %source.source_id, url = %sitemap, error = %err, "sitemap fetch failed");
                    continue;
                }
            };
            let found = discover_product_links(sitemap, &html);
            info!(source = %source.source_id, url = %sitemap, links = found.len(), "read sitemap");
            links.extend(found.into_iter().filter(|l| seen.insert(l.clone())));
        }
    }

    if links.is_empty() {
        warn!(path = %out.display(), "no product links found; keeping existing link file");
        return Ok(links);
    }

    write_file_atomic(out, links.join("\n").as_bytes())
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    info!(path = %out.display(), links = links.len(), "wrote product links");
    Ok(links)
}

/// Non-empty, de-duplicated lines of a link file in file order.
pub async fn read_links(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut seen = HashSet::new();
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticFetcher;

    fn registry(urls: &[&str]) -> SourceRegistry {
        SourceRegistry::from_yaml(&format!(
            "sources:\n  - source_id: kiddoz\n    display_name: Kiddoz.lk\n    enabled: true\n    sitemap_urls: [{}]\n",
            urls.iter()
                .map(|u| format!("\"{u}\""))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn writes_unique_links_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scraped").join("product_links.txt");
        let fetcher = StaticFetcher::default().page(
            "https://kiddoz.lk/sitemap",
            r#"<ul><li class="product"><a href="/a.html">A</a></li>
                   <li class="product"><a href="/b.html">B</a></li>
                   <li class="product"><a href="/a.html">A again</a></li></ul>"#,
        );

        let links = discover_links(&fetcher, &registry(&["https://kiddoz.lk/sitemap"]), &out)
            .await
            .unwrap();
        assert_eq!(links.len(), 2);
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "https://kiddoz.lk/a.html\nhttps://kiddoz.lk/b.html");
        assert_eq!(read_links(&out).await.unwrap(), links);
    }

    #[tokio::test]
    async fn empty_sitemap_leaves_previous_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("product_links.txt");
        std::fs::write(&out, "https://kiddoz.lk/old.html").unwrap();
        let fetcher = StaticFetcher::default().page("https://kiddoz.lk/sitemap", "<ul></ul>");

        let links = discover_links(
            &fetcher,
            &registry(&["https://kiddoz.lk/sitemap", "https://kiddoz.lk/missing"]),
            &out,
        )
        .await
        .unwrap();
        assert!(links.is_empty());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "https://kiddoz.lk/old.html");
    }

    #[tokio::test]
    async fn read_links_skips_blank_and_repeated_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.txt");
        std::fs::write(&path, "a\n\n b \na\n").unwrap();
        assert_eq!(read_links(&path).await.unwrap(), vec!["a", "b"]);
    }
}
