//! Producer/consumer extraction pipeline.
//!
//! Documents arrive on a [`DocumentQueue`] (from the gated fetcher or the
//! startup scan) and a fixed pool of [`ExtractionWorker`]s rasterizes them
//! and searches every page for the configured terms.

pub mod evidence;
pub mod queue;
pub mod rasterize;
pub mod worker;

pub use queue::{DocumentHandle, DocumentQueue, DocumentReceiver, document_queue};
pub use rasterize::{PdfiumRasterizer, Rasterizer};
pub use worker::{ExtractionSettings, ExtractionWorker};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::browser::chromium::SESSIONS_DIR;
use crate::browser::has_extension;
use crate::recognition::Recognizer;
use crate::stats::PipelineStats;

/// A running set of extraction workers sharing one queue
pub struct ExtractionPool {
    queue: DocumentQueue,
    receiver: DocumentReceiver,
    workers: Vec<JoinHandle<()>>,
}

impl ExtractionPool {
    /// Spawn `count` workers consuming from `receiver`
    pub fn start<R, Z>(
        count: usize,
        settings: Arc<ExtractionSettings>,
        recognizer: Arc<R>,
        rasterizer: Arc<Z>,
        stats: Arc<PipelineStats>,
        queue: DocumentQueue,
        receiver: DocumentReceiver,
    ) -> Self
    where
        R: Recognizer + 'static,
        Z: Rasterizer + 'static,
    {
        let workers = (0..count)
            .map(|id| {
                let worker = Arc::new(ExtractionWorker::new(
                    id,
                    settings.clone(),
                    recognizer.clone(),
                    rasterizer.clone(),
                    stats.clone(),
                ));
                tokio::spawn(worker.run(receiver.clone()))
            })
            .collect();

        info!(workers = count, "Extraction pool started");
        Self {
            queue,
            receiver,
            workers,
        }
    }

    /// Producer handle for this pool
    pub fn queue(&self) -> &DocumentQueue {
        &self.queue
    }

    /// Signal that no more documents will arrive and wait for every worker to
    /// drain its share of the queue
    pub async fn shutdown(self) {
        self.queue.shutdown(self.workers.len()).await;
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Extraction worker task failed");
            }
        }
        info!(
            documents = self.receiver.processed_count(),
            "Extraction pool drained"
        );
    }
}

/// Collect payload files already present in the downloads area, sorted by path.
///
/// Per-session staging directories hold in-flight downloads and are skipped.
pub fn scan_downloads(dir: &Path, extension: &str) -> std::io::Result<Vec<DocumentHandle>> {
    let mut files = Vec::new();
    collect_files_recursive(dir, dir, extension, &mut files)?;
    files.sort();
    Ok(files.into_iter().map(DocumentHandle::new).collect())
}

fn collect_files_recursive(
    dir: &Path,
    base_dir: &Path,
    extension: &str,
    files: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && path.parent() == Some(base_dir)
                && name == SESSIONS_DIR
            {
                continue;
            }
            collect_files_recursive(&path, base_dir, extension, files)?;
        } else if path.is_file() && has_extension(&path, extension) {
            files.push(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::worker::tests::{FakeRasterizer, PageRecognizer, settings};

    #[test]
    fn test_scan_downloads_skips_session_staging() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(SESSIONS_DIR).join("abc")).unwrap();
        std::fs::create_dir_all(root.join("2019")).unwrap();
        std::fs::write(root.join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(root.join("2019/a.pdf"), b"%PDF").unwrap();
        std::fs::write(root.join("notes.txt"), b"").unwrap();
        std::fs::write(root.join(SESSIONS_DIR).join("abc/partial.pdf"), b"%PDF").unwrap();

        let handles = scan_downloads(root, "pdf").unwrap();
        let names: Vec<_> = handles.iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failing_document_does_not_stop_pool() {
        let dir = tempfile::tempdir().unwrap();
        let stats = Arc::new(PipelineStats::new());
        let (queue, receiver) = document_queue(4);
        let pool = ExtractionPool::start(
            2,
            settings(&dir, &["X"]),
            Arc::new(PageRecognizer::new(&["X"])),
            Arc::new(FakeRasterizer { pages: 1 }),
            stats.clone(),
            queue,
            receiver.clone(),
        );

        for name in ["broken_1", "good_1", "broken_2", "good_2", "good_1"] {
            pool.queue()
                .enqueue(DocumentHandle::new(format!("/rolls/{}.pdf", name)))
                .await;
        }
        pool.shutdown().await;

        let summary = stats.summary();
        assert_eq!(summary.documents_failed, 2);
        assert_eq!(summary.documents_processed, 2);
        assert_eq!(summary.matches, 2);
        assert_eq!(receiver.processed_count(), 4);
    }
}
