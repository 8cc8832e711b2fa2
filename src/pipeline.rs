//! Composes session, discovery and download into the end-to-end chapter
//! scrape. The browser session is released on every exit path.

use crate::config::Config;
use crate::discover::{synthesize_tasks, ImageDiscoverer};
use crate::download::Downloader;
use crate::error::Result;
use crate::models::{ChapterResult, ChapterTarget};
use crate::session::BrowsingSession;
use crate::storage::StorageManager;
use std::path::Path;
use tracing::{info, warn};

/// Parameters for the direct-URL-construction path, used when the site's
/// image naming is fixed and predictable instead of discovered.
#[derive(Debug, Clone)]
pub struct DirectFetch {
    pub image_base: String,
    pub pad: usize,
    pub ext: String,
}

pub struct ScrapePipeline {
    config: Config,
    direct: Option<DirectFetch>,
}

impl ScrapePipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            direct: None,
        }
    }

    pub fn with_direct(mut self, direct: Option<DirectFetch>) -> Self {
        self.direct = direct;
        self
    }

    /// Scrape one chapter end to end and report per-page outcomes. A result
    /// with zero successes is the caller's failure signal.
    pub async fn scrape_chapter(&self, target: &ChapterTarget) -> Result<ChapterResult> {
        target.validate()?;

        let storage = StorageManager::new(&self.config.storage);
        let chapter_dir = storage
            .chapter_dir(&target.series_slug, &target.chapter_id)
            .await?;
        info!("Saving to: {:?}", chapter_dir);

        let session = BrowsingSession::launch(&self.config.session).await?;
        let result = self.run_with_session(&session, target, &chapter_dir).await;
        // Release the browser on success, discovery failure and download
        // failure alike; a leaked session outlives the run.
        session.close().await;
        result
    }

    async fn run_with_session(
        &self,
        session: &BrowsingSession,
        target: &ChapterTarget,
        chapter_dir: &Path,
    ) -> Result<ChapterResult> {
        let rendered = session.open(target).await?;

        let tasks = match &self.direct {
            Some(direct) => {
                info!(
                    "Constructing page URLs directly from {} (pad={}, ext={})",
                    direct.image_base, direct.pad, direct.ext
                );
                synthesize_tasks(target, &direct.image_base, direct.pad, &direct.ext, chapter_dir)
            }
            None => {
                let discoverer = ImageDiscoverer::new(&self.config.discovery);
                discoverer.discover(&rendered, target, chapter_dir)
            }
        };

        if tasks.is_empty() {
            warn!("Nothing to download for {}", target.chapter_page_url());
            return Ok(ChapterResult::empty(chapter_dir.to_path_buf()));
        }
        info!("Scheduled {} download task(s)", tasks.len());

        let downloader = Downloader::from_config(&self.config.download);
        let referer = target.chapter_page_url();
        Ok(downloader
            .run(&tasks, session, &referer, chapter_dir.to_path_buf())
            .await)
    }
}
