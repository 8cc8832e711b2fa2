use crate::config::StorageConfig;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct StorageManager {
    config: StorageConfig,
}

impl StorageManager {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// `{output_root}/{slug}/{chapter}/`, created if missing.
    pub async fn chapter_dir(&self, slug: &str, chapter: &str) -> Result<PathBuf> {
        let path = Path::new(&self.config.output_root)
            .join(sanitize_filename(slug))
            .join(sanitize_filename(chapter));
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }
}

/// Write bytes to `dest` atomically: a sibling temp file is renamed into
/// place so an interrupted run never leaves a truncated page on disk.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = dest.with_extension("part");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, dest).await?;
    debug!("Wrote {} bytes to {:?}", bytes.len(), dest);
    Ok(())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .trim_matches(' ')
        .to_string()
}
