use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub session: SessionConfig,
    pub discovery: DiscoveryConfig,
    pub download: DownloadConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub headless: bool,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    /// Hard bound on the DOM-ready wait; expiry is a navigation error.
    pub nav_timeout_secs: u64,
    /// Pause after the challenge resolves, before scanning the DOM.
    pub content_settle_ms: u64,
    pub challenge_poll_interval_ms: u64,
    pub challenge_max_attempts: u32,
    /// Scroll-to-bottom passes that force lazy-load attributes to populate.
    pub scroll_passes: u32,
    pub scroll_pause_ms: u64,
    pub scroll_settle_ms: u64,
    pub chrome_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Filename substrings that mark non-content images (avatars, logos,
    /// tracking pixels). Matched against the lowercased raw URL.
    pub deny_substrings: Vec<String>,
    /// Recall-oriented markers accepted in addition to the slug and chapter
    /// id: image hosts, uploads paths, recognized extensions.
    pub allow_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_step_ms: u64,
    /// Fixed delay between tasks regardless of outcome.
    pub request_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub output_root: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session: SessionConfig {
                headless: true,
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string(),
                viewport_width: 1920,
                viewport_height: 1080,
                locale: "en-US".to_string(),
                nav_timeout_secs: 30,
                content_settle_ms: 3000,
                challenge_poll_interval_ms: 1000,
                challenge_max_attempts: 30,
                scroll_passes: 10,
                scroll_pause_ms: 500,
                scroll_settle_ms: 1000,
                chrome_args: Vec::new(),
            },
            discovery: DiscoveryConfig {
                deny_substrings: vec![
                    "avatar".to_string(),
                    "logo".to_string(),
                    "icon".to_string(),
                    "thumb".to_string(),
                    "gravatar".to_string(),
                    "wp-content/plugins".to_string(),
                ],
                allow_markers: vec![
                    "img.".to_string(),
                    "/uploads/".to_string(),
                    "chapter".to_string(),
                    ".jpg".to_string(),
                    ".png".to_string(),
                    ".webp".to_string(),
                ],
            },
            download: DownloadConfig {
                max_attempts: 3,
                retry_base_delay_ms: 1000,
                retry_step_ms: 1000,
                request_delay_ms: 250,
            },
            storage: StorageConfig {
                output_root: "images".to_string(),
            },
        }
    }
}
