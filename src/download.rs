//! Sequential, idempotent chapter downloader. Tasks are processed in page
//! order; one bad page never loses the rest of the chapter.

use crate::config::DownloadConfig;
use crate::models::{ChapterResult, DownloadOutcome, DownloadStatus, DownloadTask};
use crate::session::SessionFetch;
use crate::storage;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Named retry discipline: up to `max_attempts` fetches, the delay before
/// attempt n+1 growing by `step` each time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            step: Duration::from_millis(config.retry_step_ms),
        }
    }

    /// Delay after `failed_attempts` attempts have failed.
    pub fn delay_before_retry(&self, failed_attempts: u32) -> Duration {
        self.base_delay + self.step * failed_attempts.saturating_sub(1)
    }
}

pub struct Downloader {
    policy: RetryPolicy,
    request_delay: Duration,
}

impl Downloader {
    pub fn new(policy: RetryPolicy, request_delay: Duration) -> Self {
        Self {
            policy,
            request_delay,
        }
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(
            RetryPolicy::from_config(config),
            Duration::from_millis(config.request_delay_ms),
        )
    }

    /// Run every task in sequence through the session's fetch capability.
    pub async fn run(
        &self,
        tasks: &[DownloadTask],
        session: &dyn SessionFetch,
        referer: &str,
        output_dir: PathBuf,
    ) -> ChapterResult {
        let pb = ProgressBar::new(tasks.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.iter().enumerate() {
            pb.set_message(format!("page {}", task.page_number));
            let outcome = self.download_task(task, session, referer).await;
            debug!(
                "[{}] {} -> {}",
                task.page_number, task.source_url, outcome.status
            );
            outcomes.push(outcome);
            pb.inc(1);

            // Fixed inter-request delay regardless of outcome, bounding the
            // request rate against the origin.
            if index + 1 < tasks.len() && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
        }
        pb.finish_with_message("done");

        let result = ChapterResult::from_outcomes(output_dir, outcomes);
        info!(
            "Downloaded {}/{} page(s), {} failed",
            result.succeeded, result.total, result.failed
        );
        result
    }

    async fn download_task(
        &self,
        task: &DownloadTask,
        session: &dyn SessionFetch,
        referer: &str,
    ) -> DownloadOutcome {
        // Completed pages from an interrupted run are skipped without a
        // network call, making reruns resumable at zero cost.
        if tokio::fs::try_exists(&task.destination).await.unwrap_or(false) {
            info!("[{}] Skipping (exists): {:?}", task.page_number, task.destination);
            return DownloadOutcome {
                page_number: task.page_number,
                source_url: task.source_url.clone(),
                status: DownloadStatus::SkippedExisting,
                attempts: 0,
            };
        }

        let mut last_reason = String::new();
        for attempt in 1..=self.policy.max_attempts {
            match session.fetch(&task.source_url, referer).await {
                Ok(response) if response.is_usable() => {
                    if let Err(e) = storage::write_atomic(&task.destination, &response.bytes).await {
                        warn!("[{}] Write failed for {:?}: {}", task.page_number, task.destination, e);
                        return DownloadOutcome {
                            page_number: task.page_number,
                            source_url: task.source_url.clone(),
                            status: DownloadStatus::Failed(format!("write failed: {}", e)),
                            attempts: attempt,
                        };
                    }
                    return DownloadOutcome {
                        page_number: task.page_number,
                        source_url: task.source_url.clone(),
                        status: DownloadStatus::Saved,
                        attempts: attempt,
                    };
                }
                Ok(response) => {
                    last_reason = if response.bytes.is_empty() && response.status == 200 {
                        "empty body".to_string()
                    } else {
                        format!("HTTP {}", response.status)
                    };
                }
                Err(e) => {
                    last_reason = e.to_string();
                }
            }

            warn!(
                "[{}] Attempt {}/{} failed for {}: {}",
                task.page_number, attempt, self.policy.max_attempts, task.source_url, last_reason
            );
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay_before_retry(attempt)).await;
            }
        }

        DownloadOutcome {
            page_number: task.page_number,
            source_url: task.source_url.clone(),
            status: DownloadStatus::Failed(last_reason),
            attempts: self.policy.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MangaRipError, Result};
    use crate::session::{FetchResponse, SessionFetch};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of fetch results.
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<FetchResponse>>>,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<FetchResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionFetch for ScriptedFetcher {
        async fn fetch(&self, url: &str, _referer: &str) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(MangaRipError::fetch(url, "script exhausted")))
        }
    }

    fn ok(status: u16, body: &[u8]) -> Result<FetchResponse> {
        Ok(FetchResponse {
            status,
            bytes: body.to_vec(),
        })
    }

    fn transport_err() -> Result<FetchResponse> {
        Err(MangaRipError::fetch("https://cdn.example.com/001.jpg", "connection reset"))
    }

    fn fast_downloader() -> Downloader {
        Downloader::new(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
                step: Duration::ZERO,
            },
            Duration::ZERO,
        )
    }

    fn task_in(dir: &std::path::Path, page: u32, name: &str) -> DownloadTask {
        DownloadTask {
            page_number: page,
            source_url: format!("https://cdn.example.com/{}", name),
            destination: dir.join(name),
        }
    }

    #[tokio::test]
    async fn saves_on_third_attempt_with_attempt_count() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_in(dir.path(), 1, "001.jpg");
        let fetcher = ScriptedFetcher::new(vec![
            transport_err(),
            ok(500, b"nope"),
            ok(200, b"image-bytes"),
        ]);

        let result = fast_downloader()
            .run(&[task.clone()], &fetcher, "https://example.com/ch/", dir.path().to_path_buf())
            .await;

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.outcomes[0].status, DownloadStatus::Saved);
        assert_eq!(result.outcomes[0].attempts, 3);
        assert_eq!(std::fs::read(&task.destination).unwrap(), b"image-bytes");
    }

    #[tokio::test]
    async fn exhausted_attempts_record_failure() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_in(dir.path(), 1, "001.jpg");
        let fetcher = ScriptedFetcher::new(vec![ok(403, b""), ok(403, b""), ok(403, b"")]);

        let result = fast_downloader()
            .run(&[task.clone()], &fetcher, "https://example.com/ch/", dir.path().to_path_buf())
            .await;

        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 1);
        assert_eq!(
            result.outcomes[0].status,
            DownloadStatus::Failed("HTTP 403".to_string())
        );
        assert_eq!(result.outcomes[0].attempts, 3);
        assert_eq!(fetcher.calls(), 3);
        assert!(!task.destination.exists());
    }

    #[tokio::test]
    async fn empty_body_is_not_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_in(dir.path(), 1, "001.jpg");
        let fetcher = ScriptedFetcher::new(vec![ok(200, b""), ok(200, b""), ok(200, b"")]);

        let result = fast_downloader()
            .run(&[task], &fetcher, "https://example.com/ch/", dir.path().to_path_buf())
            .await;

        assert_eq!(
            result.outcomes[0].status,
            DownloadStatus::Failed("empty body".to_string())
        );
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            task_in(dir.path(), 1, "001.jpg"),
            task_in(dir.path(), 2, "002.jpg"),
        ];
        let fetcher = ScriptedFetcher::new(vec![
            ok(500, b""),
            ok(500, b""),
            ok(500, b""),
            ok(200, b"page-two"),
        ]);

        let result = fast_downloader()
            .run(&tasks, &fetcher, "https://example.com/ch/", dir.path().to_path_buf())
            .await;

        assert_eq!(result.total, 2);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.outcomes[1].status, DownloadStatus::Saved);
        assert_eq!(std::fs::read(&tasks[1].destination).unwrap(), b"page-two");
    }

    #[tokio::test]
    async fn second_run_skips_existing_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            task_in(dir.path(), 1, "001.jpg"),
            task_in(dir.path(), 2, "002.jpg"),
        ];

        let first = ScriptedFetcher::new(vec![ok(200, b"one"), ok(200, b"two")]);
        let first_run = fast_downloader()
            .run(&tasks, &first, "https://example.com/ch/", dir.path().to_path_buf())
            .await;
        assert_eq!(first_run.succeeded, 2);

        let second = ScriptedFetcher::new(Vec::new());
        let second_run = fast_downloader()
            .run(&tasks, &second, "https://example.com/ch/", dir.path().to_path_buf())
            .await;

        assert_eq!(second_run.succeeded, first_run.succeeded);
        assert_eq!(second.calls(), 0);
        assert!(second_run
            .outcomes
            .iter()
            .all(|o| o.status == DownloadStatus::SkippedExisting));
    }

    #[test]
    fn retry_delays_grow_by_step() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            step: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_before_retry(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_before_retry(2), Duration::from_millis(1500));
        assert_eq!(policy.delay_before_retry(3), Duration::from_millis(2000));
    }

    /// Plain reqwest-backed fetcher, mirroring the session's HTTP side, so
    /// the wire format (referer header, bytes) is exercised for real.
    struct HttpFetcher {
        client: reqwest::Client,
    }

    #[async_trait]
    impl SessionFetch for HttpFetcher {
        async fn fetch(&self, url: &str, referer: &str) -> Result<FetchResponse> {
            let response = self
                .client
                .get(url)
                .header(reqwest::header::REFERER, referer)
                .send()
                .await?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            Ok(FetchResponse {
                status,
                bytes: bytes.to_vec(),
            })
        }
    }

    #[tokio::test]
    async fn fetches_over_http_with_referer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/demo-series/chapter-1/001.jpg")
            .match_header("referer", "https://example.com/manga/demo-series/chapter-1/")
            .with_status(200)
            .with_body("real-image-bytes")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let task = DownloadTask {
            page_number: 1,
            source_url: format!("{}/demo-series/chapter-1/001.jpg", server.url()),
            destination: dir.path().join("001.jpg"),
        };
        let fetcher = HttpFetcher {
            client: reqwest::Client::new(),
        };

        let result = fast_downloader()
            .run(
                &[task.clone()],
                &fetcher,
                "https://example.com/manga/demo-series/chapter-1/",
                dir.path().to_path_buf(),
            )
            .await;

        mock.assert_async().await;
        assert_eq!(result.succeeded, 1);
        assert_eq!(std::fs::read(&task.destination).unwrap(), b"real-image-bytes");
    }
}
