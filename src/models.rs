use crate::error::{MangaRipError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What to fetch: one chapter of one series on one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterTarget {
    pub site_base_url: String,
    pub series_slug: String,
    pub chapter_id: String,
    pub page_range: Option<PageRange>,
    pub extension_filter: Option<String>,
}

/// Inclusive page-number bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn contains(&self, page: u32) -> bool {
        page >= self.start && page <= self.end
    }
}

impl ChapterTarget {
    pub fn new(
        site_base_url: impl Into<String>,
        series_slug: impl Into<String>,
        chapter_id: impl Into<String>,
    ) -> Self {
        Self {
            site_base_url: site_base_url.into(),
            series_slug: series_slug.into(),
            chapter_id: chapter_id.into(),
            page_range: None,
            extension_filter: None,
        }
    }

    pub fn with_page_range(mut self, range: Option<PageRange>) -> Self {
        self.page_range = range;
        self
    }

    pub fn with_extension_filter(mut self, ext: Option<String>) -> Self {
        self.extension_filter = ext;
        self
    }

    /// Must hold before any network activity.
    pub fn validate(&self) -> Result<()> {
        if self.series_slug.trim().is_empty() {
            return Err(MangaRipError::invalid_target("series slug is empty"));
        }
        if self.chapter_id.trim().is_empty() {
            return Err(MangaRipError::invalid_target("chapter id is empty"));
        }
        url::Url::parse(&self.site_base_url)?;
        Ok(())
    }

    /// Chapter page URL, trailing slash normalized.
    pub fn chapter_page_url(&self) -> String {
        format!(
            "{}/{}/{}/",
            self.site_base_url.trim_end_matches('/'),
            self.series_slug,
            self.chapter_id
        )
    }
}

/// A URL pulled out of the rendered DOM that may or may not be a chapter page
/// image. Ephemeral; not persisted beyond the run.
#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub raw_url: String,
    pub normalized_url: String,
    pub page_number: Option<u32>,
    pub extension: Option<String>,
}

/// A filtered, ordered, page-numbered candidate scheduled for download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub page_number: u32,
    pub source_url: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Saved,
    SkippedExisting,
    Failed(String),
}

impl DownloadStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadStatus::Saved | DownloadStatus::SkippedExisting)
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadStatus::Saved => write!(f, "saved"),
            DownloadStatus::SkippedExisting => write!(f, "skipped (exists)"),
            DownloadStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One per task, in task order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub page_number: u32,
    pub source_url: String,
    pub status: DownloadStatus,
    pub attempts: u32,
}

/// The pipeline's return value; the only observed artifact besides the files
/// on disk. `succeeded == 0` is a distinguishable failure for the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub output_dir: PathBuf,
    pub outcomes: Vec<DownloadOutcome>,
    pub finished_at: DateTime<Utc>,
}

impl ChapterResult {
    pub fn empty(output_dir: PathBuf) -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            output_dir,
            outcomes: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn from_outcomes(output_dir: PathBuf, outcomes: Vec<DownloadOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.status.is_success()).count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            output_dir,
            outcomes,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_page_url_normalizes_trailing_slash() {
        let with_slash = ChapterTarget::new("https://example.com/manga/", "demo-series", "chapter-1");
        let without = ChapterTarget::new("https://example.com/manga", "demo-series", "chapter-1");
        assert_eq!(
            with_slash.chapter_page_url(),
            "https://example.com/manga/demo-series/chapter-1/"
        );
        assert_eq!(with_slash.chapter_page_url(), without.chapter_page_url());
    }

    #[test]
    fn validate_rejects_empty_fields() {
        assert!(ChapterTarget::new("https://example.com", "", "chapter-1")
            .validate()
            .is_err());
        assert!(ChapterTarget::new("https://example.com", "demo", " ")
            .validate()
            .is_err());
        assert!(ChapterTarget::new("https://example.com", "demo", "chapter-1")
            .validate()
            .is_ok());
        assert!(ChapterTarget::new("not a url", "demo", "chapter-1")
            .validate()
            .is_err());
    }

    #[test]
    fn page_range_is_inclusive() {
        let range = PageRange { start: 5, end: 10 };
        assert!(range.contains(5));
        assert!(range.contains(10));
        assert!(!range.contains(4));
        assert!(!range.contains(11));
    }

    #[test]
    fn result_counts_follow_outcomes() {
        let outcomes = vec![
            DownloadOutcome {
                page_number: 1,
                source_url: "https://cdn.example.com/001.jpg".into(),
                status: DownloadStatus::Saved,
                attempts: 1,
            },
            DownloadOutcome {
                page_number: 2,
                source_url: "https://cdn.example.com/002.jpg".into(),
                status: DownloadStatus::SkippedExisting,
                attempts: 0,
            },
            DownloadOutcome {
                page_number: 3,
                source_url: "https://cdn.example.com/003.jpg".into(),
                status: DownloadStatus::Failed("HTTP 403".into()),
                attempts: 3,
            },
        ];
        let result = ChapterResult::from_outcomes(PathBuf::from("images/demo/ch-1"), outcomes);
        assert_eq!(result.total, 3);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 1);
    }
}
