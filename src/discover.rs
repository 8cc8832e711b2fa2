//! Scans the rendered DOM for chapter page images across the lazy-load
//! conventions comic readers actually use, then filters, deduplicates and
//! orders the survivors into the canonical page sequence.

use crate::config::DiscoveryConfig;
use crate::models::{ChapterTarget, DownloadTask, ImageCandidate};
use crate::pageurl;
use crate::session::RenderedPage;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Attribute names tried in priority order on `img` nodes. Sites defer the
/// real source to different attributes until the element nears the viewport.
const SRC_ATTRIBUTES: &[&str] = &["src", "data-src", "data-lazy-src", "data-original"];

/// One way of pulling candidate URLs out of the document. New site
/// conventions are added by adding a strategy, not by branching.
trait SourceStrategy {
    fn name(&self) -> &'static str;
    fn collect(&self, doc: &Html) -> Vec<String>;
}

/// `img` nodes carrying the source in `src` or a lazy-load attribute.
struct ImgAttributeStrategy {
    selector: Selector,
}

impl ImgAttributeStrategy {
    fn new() -> Self {
        Self {
            selector: Selector::parse("img").unwrap(),
        }
    }
}

impl SourceStrategy for ImgAttributeStrategy {
    fn name(&self) -> &'static str {
        "img-attributes"
    }

    fn collect(&self, doc: &Html) -> Vec<String> {
        let mut urls = Vec::new();
        for element in doc.select(&self.selector) {
            let src = SRC_ATTRIBUTES
                .iter()
                .filter_map(|attr| element.value().attr(attr))
                .find(|value| !value.is_empty());
            match src {
                Some(value) if !value.starts_with("data:") => urls.push(value.to_string()),
                _ => {}
            }
        }
        urls
    }
}

/// Nodes whose inline style declares a background-image; some readers render
/// pages this way instead of `img` tags.
struct BackgroundImageStrategy {
    selector: Selector,
    url_re: Regex,
}

impl BackgroundImageStrategy {
    fn new() -> Self {
        Self {
            selector: Selector::parse("[style*='background-image']").unwrap(),
            url_re: Regex::new(r#"url\(["']?([^"')\s]+)["']?\)"#).unwrap(),
        }
    }
}

impl SourceStrategy for BackgroundImageStrategy {
    fn name(&self) -> &'static str {
        "background-image"
    }

    fn collect(&self, doc: &Html) -> Vec<String> {
        let mut urls = Vec::new();
        for element in doc.select(&self.selector) {
            let style = element.value().attr("style").unwrap_or("");
            if let Some(caps) = self.url_re.captures(style) {
                let url = &caps[1];
                if !url.starts_with("data:") {
                    urls.push(url.to_string());
                }
            }
        }
        urls
    }
}

pub struct ImageDiscoverer {
    config: DiscoveryConfig,
}

impl ImageDiscoverer {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Extract the ordered download tasks for one chapter out of the rendered
    /// DOM. Pure and synchronous; tolerates a partially-loaded document.
    pub fn discover(
        &self,
        page: &RenderedPage,
        target: &ChapterTarget,
        chapter_dir: &Path,
    ) -> Vec<DownloadTask> {
        debug!("Scanning rendered page: {} ({})", page.title, page.final_url);
        let doc = Html::parse_document(&page.html);
        let strategies: Vec<Box<dyn SourceStrategy>> = vec![
            Box::new(ImgAttributeStrategy::new()),
            Box::new(BackgroundImageStrategy::new()),
        ];

        let mut raw_urls = Vec::new();
        for strategy in &strategies {
            let found = strategy.collect(&doc);
            debug!("Strategy {} found {} URL(s)", strategy.name(), found.len());
            raw_urls.extend(found);
        }
        info!("Raw images found: {}", raw_urls.len());

        let candidates = self.filter_candidates(raw_urls, target, &page.final_url);
        info!("Found {} candidate image(s)", candidates.len());

        let tasks = self.build_tasks(candidates, target, chapter_dir);
        if tasks.is_empty() {
            warn!("No chapter images survived filtering for {}", target.chapter_page_url());
        }
        tasks
    }

    /// Denylist, allowlist, normalization and dedup. Recall-oriented: the
    /// allowlist over-accepts and page-number inference corrects downstream.
    fn filter_candidates(
        &self,
        raw_urls: Vec<String>,
        target: &ChapterTarget,
        base_url: &str,
    ) -> Vec<ImageCandidate> {
        let slug = target.series_slug.to_lowercase();
        let chapter = target.chapter_id.to_lowercase();
        let base = url::Url::parse(base_url).ok();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for raw in raw_urls {
            let lower = raw.to_lowercase();

            if let Some(hit) = self
                .config
                .deny_substrings
                .iter()
                .find(|deny| lower.contains(deny.as_str()))
            {
                debug!("Excluded by denylist ({}): {}", hit, raw);
                continue;
            }

            let allowed = lower.contains(&slug)
                || lower.contains(&chapter)
                || self
                    .config
                    .allow_markers
                    .iter()
                    .any(|marker| lower.contains(marker.as_str()));
            if !allowed {
                debug!("Excluded, no content marker: {}", raw);
                continue;
            }

            let resolved = resolve_url(&raw, base.as_ref());
            let normalized = pageurl::strip_query(&resolved).to_string();
            if !seen.insert(normalized.clone()) {
                continue;
            }

            let filename = pageurl::filename_of(&normalized);
            candidates.push(ImageCandidate {
                page_number: pageurl::page_number(filename),
                extension: pageurl::extension_of(filename),
                raw_url: raw,
                normalized_url: normalized,
            });
        }
        candidates
    }

    /// Page-number inference, range/extension filtering and the final sort.
    /// The sort order, not DOM order, defines the chapter sequence.
    fn build_tasks(
        &self,
        candidates: Vec<ImageCandidate>,
        target: &ChapterTarget,
        chapter_dir: &Path,
    ) -> Vec<DownloadTask> {
        let ext_filter = target
            .extension_filter
            .as_ref()
            .map(|ext| ext.trim_start_matches('.').to_lowercase());

        let mut tasks = Vec::new();
        for candidate in candidates {
            let page = match candidate.page_number {
                Some(page) => page,
                None => {
                    debug!("Dropped, no page number: {}", candidate.raw_url);
                    continue;
                }
            };
            if let Some(ext) = &ext_filter {
                if candidate.extension.as_deref() != Some(ext.as_str()) {
                    continue;
                }
            }
            if let Some(range) = &target.page_range {
                if !range.contains(page) {
                    continue;
                }
            }
            let filename = pageurl::filename_of(&candidate.normalized_url).to_string();
            tasks.push(DownloadTask {
                page_number: page,
                source_url: candidate.normalized_url,
                destination: chapter_dir.join(filename),
            });
        }

        // Stable: two candidates with the same inferred page stay in
        // discovery order. Flagged, not resolved; the idempotent writer makes
        // the second an overwrite rather than a duplicate file.
        tasks.sort_by_key(|task| task.page_number);
        for pair in tasks.windows(2) {
            if pair[0].page_number == pair[1].page_number {
                warn!(
                    "Two candidates infer page {}: {} and {}",
                    pair[0].page_number, pair[0].source_url, pair[1].source_url
                );
            } else if pair[1].page_number > pair[0].page_number + 1 {
                // Gaps are reported, never invented.
                info!(
                    "Gap in page sequence: {} jumps to {}",
                    pair[0].page_number, pair[1].page_number
                );
            }
        }
        tasks
    }
}

/// Resolve a possibly-relative candidate against the page it was found on.
fn resolve_url(raw: &str, base: Option<&url::Url>) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    match base.and_then(|b| b.join(raw).ok()) {
        Some(joined) => joined.to_string(),
        None => raw.to_string(),
    }
}

/// Direct-URL-construction path for sites with a fixed naming convention:
/// tasks are synthesized from the page range instead of discovered.
pub fn synthesize_tasks(
    target: &ChapterTarget,
    image_base: &str,
    pad: usize,
    ext: &str,
    chapter_dir: &Path,
) -> Vec<DownloadTask> {
    let range = match &target.page_range {
        Some(range) => *range,
        None => {
            warn!("Direct URL construction needs an explicit page range");
            return Vec::new();
        }
    };

    (range.start..=range.end)
        .map(|page| {
            let filename = pageurl::padded_filename(page, pad, ext);
            DownloadTask {
                page_number: page,
                source_url: pageurl::build_page_url(
                    image_base,
                    &target.series_slug,
                    &target.chapter_id,
                    page,
                    pad,
                    ext,
                ),
                destination: chapter_dir.join(filename),
            }
        })
        .collect()
}
