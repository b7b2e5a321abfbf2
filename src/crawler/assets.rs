//! Auxiliary asset downloads
//!
//! Images found on chapter pages are downloaded by a fixed pool of workers
//! sharing one queue. Each task reports [`FeedEvent::AssetStarted`] into its
//! chapter's feed when a worker picks it up and [`FeedEvent::AssetDone`] when
//! it settles, so the chapter is not written before its assets are settled. A failed asset is recorded and logged but never fails the
//! chapter.

use crate::crawler::accumulator::FeedSender;
use crate::crawler::fetcher::{FetchRequest, Fetcher};
use crate::crawler::gate::IdempotencyGate;
use crate::crawler::retry::fetch_with_retry;
use crate::crawler::task::FeedEvent;
use crate::output::writer::{asset_file_name, write_asset};
use crate::storage::{with_storage, ChapterRecord, SharedStorage, Storage};
use crate::url::canonical_url;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One asset download, owned by the chapter that found it
#[derive(Debug)]
pub struct AssetTask {
    /// Request for the asset; carries the book's headers and host limit
    pub request: FetchRequest,
    /// `image_dir/<book>`
    pub dir: PathBuf,
    pub book: String,
    pub volume: String,
    pub retry_budget: u32,
    pub ignore_failed: bool,
    /// The owning chapter's feed
    pub feed: FeedSender,
}

/// Submission handle for the asset worker pool
#[derive(Debug, Clone)]
pub struct AssetQueue {
    tx: mpsc::UnboundedSender<AssetTask>,
}

impl AssetQueue {
    /// Hands a task to the pool
    ///
    /// Returns the task back if the pool has shut down.
    pub fn submit(&self, task: AssetTask) -> Result<(), AssetTask> {
        self.tx.send(task).map_err(|e| e.0)
    }
}

/// Running worker pool; dropping every [`AssetQueue`] lets it drain and stop
pub struct AssetWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl AssetWorkerPool {
    /// Starts `workers` workers and returns the queue feeding them
    pub fn spawn(
        workers: u32,
        fetcher: Arc<dyn Fetcher>,
        storage: SharedStorage,
        cancel: CancellationToken,
    ) -> (AssetQueue, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|id| {
                let worker = AssetWorker {
                    id,
                    fetcher: Arc::clone(&fetcher),
                    storage: Arc::clone(&storage),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run(Arc::clone(&rx)))
            })
            .collect();

        (AssetQueue { tx }, Self { handles })
    }

    /// Waits for every worker to exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Asset worker panicked: {}", e);
            }
        }
    }
}

struct AssetWorker {
    id: u32,
    fetcher: Arc<dyn Fetcher>,
    storage: SharedStorage,
    cancel: CancellationToken,
}

impl AssetWorker {
    async fn run(self, queue: Arc<Mutex<mpsc::UnboundedReceiver<AssetTask>>>) {
        tracing::trace!("Asset worker {} started", self.id);

        loop {
            let task = {
                let mut rx = queue.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    task = rx.recv() => task,
                }
            };

            let Some(task) = task else { break };

            let _ = task.feed.send(FeedEvent::AssetStarted);
            let ok = self.download(&task).await;
            let _ = task.feed.send(FeedEvent::AssetDone {
                url: task.request.url.clone(),
                ok,
            });
        }

        tracing::trace!("Asset worker {} stopped", self.id);
    }

    /// Gate, fetch, write, record; returns whether the asset is now on disk
    async fn download(&self, task: &AssetTask) -> bool {
        let url = &task.request.url;
        let key = canonical_url(url.as_str())
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string());
        let file_name = asset_file_name(url);

        let gate = IdempotencyGate::new(Arc::clone(&self.storage), task.ignore_failed);
        match gate.check_asset(&key, &task.dir) {
            Ok(decision) if decision.is_skip() => {
                tracing::debug!("Asset {} already saved", url);
                return true;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Asset gate unavailable for {}: {}", url, e),
        }

        let result = match fetch_with_retry(
            self.fetcher.as_ref(),
            &task.request,
            task.retry_budget,
            &self.cancel,
        )
        .await
        {
            Ok(response) => write_asset(&task.dir, &file_name, &response.body)
                .map_err(|e| format!("write failed: {}", e)),
            Err(e) if e.is_cancelled() => return false,
            Err(e) => Err(e.to_string()),
        };

        let ok = match &result {
            Ok(path) => {
                tracing::debug!("Saved asset {} -> {}", url, path.display());
                true
            }
            Err(message) => {
                tracing::warn!("Asset {} failed: {}", url, message);
                false
            }
        };

        let record = ChapterRecord::asset(key, file_name, &task.book, &task.volume, !ok);
        if let Err(e) = with_storage(&self.storage, |s| s.upsert_record(&record)) {
            tracing::error!("Failed to record asset {}: {}", url, e);
        }

        ok
    }
}
