use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::TsuzukiError;
use crate::models::DownloadRequest;
use crate::selector::DownloadClient;

/// Hands downloads to an external torrent client by writing one JSON
/// request file per download into a watched directory.
#[derive(Debug, Clone)]
pub struct WatchDirDownloader {
    dir: PathBuf,
}

impl WatchDirDownloader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First free `<name>.json`, `<name> (2).json`, ... in the watch dir.
    fn request_path(&self, display_title: &str) -> PathBuf {
        let stem = file_stem(display_title);
        let mut path = self.dir.join(format!("{stem}.json"));
        let mut n = 2;
        while path.exists() {
            path = self.dir.join(format!("{stem} ({n}).json"));
            n += 1;
        }
        path
    }
}

impl DownloadClient for WatchDirDownloader {
    fn submit(&self, request: &DownloadRequest) -> Result<(), TsuzukiError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| TsuzukiError::Download(format!("{}: {e}", self.dir.display())))?;

        let path = self.request_path(&request.display_title);
        let json = serde_json::to_string_pretty(request)?;
        std::fs::write(&path, json)
            .map_err(|e| TsuzukiError::Download(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), "Wrote download request");
        Ok(())
    }
}

/// File-system safe version of a display title.
fn file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let stem = stem.trim().trim_matches('.');
    if stem.is_empty() {
        "download".into()
    } else {
        stem.to_string()
    }
}
