//! Hand-off channel between document arrival and the extraction workers.
//!
//! The channel is bounded, so a fast producer waits for the workers. A
//! handle is admitted at most once for the lifetime of the queue; repeated
//! enqueues of the same document (a re-scanned directory, a second fetch of
//! the same file) are dropped before they reach a worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Identity of one retrieved document: its canonical path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentHandle {
    path: PathBuf,
}

impl DocumentHandle {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            path: std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without extension, used to name artifacts
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string()
    }
}

impl std::fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[derive(Debug)]
enum QueueItem {
    Document(DocumentHandle),
    /// Tells exactly one worker to stop
    Shutdown,
}

/// Create a bounded queue and its consuming end
pub fn document_queue(capacity: usize) -> (DocumentQueue, DocumentReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let processed = Arc::new(DashSet::new());
    let queue = DocumentQueue {
        tx,
        admitted: Arc::new(DashSet::new()),
    };
    let receiver = DocumentReceiver {
        rx: Arc::new(Mutex::new(rx)),
        processed,
    };
    (queue, receiver)
}

/// Producer side. Cheap to clone; every clone shares the admitted set.
#[derive(Clone)]
pub struct DocumentQueue {
    tx: mpsc::Sender<QueueItem>,
    admitted: Arc<DashSet<DocumentHandle>>,
}

impl DocumentQueue {
    /// Offer a document to the workers. Returns false when the document was
    /// already admitted or the workers are gone.
    pub async fn enqueue(&self, handle: DocumentHandle) -> bool {
        if !self.admitted.insert(handle.clone()) {
            debug!(document = %handle, "Document already queued, skipping");
            return false;
        }

        let label = handle.to_string();
        if self.tx.send(QueueItem::Document(handle)).await.is_err() {
            warn!(document = %label, "Extraction queue closed, document dropped");
            return false;
        }
        true
    }

    /// Send one shutdown sentinel per worker. Documents already queued are
    /// still delivered first.
    pub async fn shutdown(&self, workers: usize) {
        for _ in 0..workers {
            if self.tx.send(QueueItem::Shutdown).await.is_err() {
                break;
            }
        }
    }
}

/// Consumer side, shared by all workers of a pool
#[derive(Clone)]
pub struct DocumentReceiver {
    rx: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
    processed: Arc<DashSet<DocumentHandle>>,
}

impl DocumentReceiver {
    /// Next document, or None once this worker received its shutdown sentinel
    /// (or every producer is gone)
    pub async fn recv(&self) -> Option<DocumentHandle> {
        loop {
            let item = self.rx.lock().await.recv().await;
            match item {
                Some(QueueItem::Document(handle)) => {
                    if self.processed.contains(&handle) {
                        debug!(document = %handle, "Document already processed, skipping");
                        continue;
                    }
                    return Some(handle);
                }
                Some(QueueItem::Shutdown) | None => return None,
            }
        }
    }

    /// Record that extraction finished (successfully or not) for a document
    pub fn mark_processed(&self, handle: &DocumentHandle) -> bool {
        self.processed.insert(handle.clone())
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_enqueue_is_dropped() {
        let (queue, receiver) = document_queue(8);
        let handle = DocumentHandle::new("/rolls/ac31_part1.pdf");

        assert!(queue.enqueue(handle.clone()).await);
        assert!(!queue.enqueue(handle.clone()).await);
        queue.shutdown(1).await;

        assert_eq!(receiver.recv().await, Some(handle));
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_one_sentinel_stops_one_worker() {
        let (queue, receiver) = document_queue(8);
        queue.enqueue(DocumentHandle::new("/rolls/a.pdf")).await;
        queue.shutdown(2).await;

        assert!(receiver.recv().await.is_some());
        assert_eq!(receiver.recv().await, None);
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_receiver() {
        let (queue, receiver) = document_queue(1);
        drop(queue);
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped() {
        let (queue, receiver) = document_queue(1);
        drop(receiver);
        assert!(!queue.enqueue(DocumentHandle::new("/rolls/b.pdf")).await);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_processed_once() {
        let (queue, receiver) = document_queue(4);
        let handles: Vec<_> = (0..4)
            .map(|i| DocumentHandle::new(format!("/rolls/doc_{}.pdf", i)))
            .collect();

        let producers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                let handles = handles.clone();
                tokio::spawn(async move {
                    for handle in handles {
                        queue.enqueue(handle).await;
                    }
                })
            })
            .collect();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let receiver = receiver.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    while let Some(handle) = receiver.recv().await {
                        seen.lock().unwrap().push(handle.clone());
                        receiver.mark_processed(&handle);
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap();
        }
        queue.shutdown(2).await;
        for worker in workers {
            worker.await.unwrap();
        }

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        let mut expected = handles.clone();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(receiver.processed_count(), 4);
    }

    #[test]
    fn test_handle_name_strips_extension() {
        assert_eq!(DocumentHandle::new("/x/AC031_PART_12.pdf").name(), "AC031_PART_12");
    }
}
