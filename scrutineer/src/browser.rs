//! Browser automation collaborator.
//!
//! A [`BrowserSession`] is one independent automation context with its own
//! page state and download directory. Sessions are never shared between
//! concurrent fetches; a [`SessionFactory`] opens one per fetch worker.

pub mod chromium;

pub use chromium::ChromiumSessionFactory;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;

#[async_trait]
pub trait BrowserSession: Send {
    /// Load a URL in the session's page
    async fn navigate(&mut self, url: &str) -> Result<(), FetchError>;

    /// Wait until an element with the given id is present
    async fn wait_for_element(
        &mut self,
        element_id: &str,
        timeout: Duration,
    ) -> Result<(), FetchError>;

    /// PNG screenshot of a single element
    async fn screenshot_element(&mut self, element_id: &str) -> Result<Vec<u8>, FetchError>;

    async fn send_keys(&mut self, element_id: &str, text: &str) -> Result<(), FetchError>;

    async fn click(&mut self, element_id: &str) -> Result<(), FetchError>;

    /// Dismiss an open alert/confirm dialog, returning its message if one was open
    async fn dismiss_dialog(&mut self) -> Result<Option<String>, FetchError>;

    /// Every `href` on the current page, as written in the markup
    async fn collect_links(&mut self) -> Result<Vec<String>, FetchError>;

    /// Directory this session's downloads land in
    fn download_dir(&self) -> &Path;

    /// Shut the session down. Further calls on the session fail.
    async fn close(&mut self) -> Result<(), FetchError>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserSession + 'static;

    async fn open(&self) -> Result<Self::Session, FetchError>;
}

/// Completed payload files in `dir` with the given extension (case-insensitive).
///
/// In-progress downloads carry a different extension and are ignored.
pub fn list_downloaded_files(dir: &Path, extension: &str) -> std::io::Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() && has_extension(&path, extension) {
            files.insert(path);
        }
    }
    Ok(files)
}

pub(crate) fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_downloaded_files_filters_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("roll_1.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("roll_2.PDF"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("roll_3.pdf.crdownload"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let files = list_downloaded_files(dir.path(), "pdf").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["roll_1.pdf", "roll_2.PDF"]);
    }
}
