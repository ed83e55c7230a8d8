use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DownloadError, DownloadStatus, DownloadTask, RetryPolicy};
use crate::cache_store::{CacheStore, CommitOutcome};
use crate::catalog_store::{CatalogStore, RemoteReference};
use crate::notifications::{ProgressEvent, ProgressPublisher};
use crate::remote_fetch::{FetchOutcome, RemoteFetchAdapter};
use crate::server::metrics;

/// Latest state of a movie's task plus the handle used to cancel its worker.
struct TaskSlot {
    state: watch::Sender<DownloadTask>,
    cancel: CancellationToken,
}

enum Finished {
    Completed(u64),
    Cancelled,
}

struct Inner {
    tasks: Mutex<HashMap<String, TaskSlot>>,
    cache: Arc<CacheStore>,
    fetcher: RemoteFetchAdapter,
    catalog: Arc<dyn CatalogStore>,
    publisher: Arc<ProgressPublisher>,
    workers: Arc<Semaphore>,
    retry_policy: RetryPolicy,
}

/// Single-flight download coordinator.
///
/// Each movie has at most one active task. Requests for a movie with an
/// active task join it; otherwise a new task is queued and a worker is
/// spawned that waits for one of `worker_concurrency` slots.
///
/// Every state change is applied and published while holding the task table
/// lock, so all readers and subscribers observe a movie's transitions in the
/// same order.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

impl DownloadOrchestrator {
    pub fn new(
        cache: Arc<CacheStore>,
        fetcher: RemoteFetchAdapter,
        catalog: Arc<dyn CatalogStore>,
        publisher: Arc<ProgressPublisher>,
        worker_concurrency: usize,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                cache,
                fetcher,
                catalog,
                publisher,
                workers: Arc::new(Semaphore::new(worker_concurrency.max(1))),
                retry_policy,
            }),
        }
    }

    /// Starts or joins the download of a movie. Never waits on the transfer.
    ///
    /// A movie that is already resident in the cache gets a `Completed` task
    /// without contacting the remote store. Its event is still published.
    pub fn request_download(&self, movie_id: &str) -> DownloadTask {
        let mut tasks = self.inner.tasks.lock().unwrap();

        let previous = tasks.get(movie_id).map(|slot| slot.state.borrow().clone());
        if let Some(current) = &previous {
            if current.is_active() {
                debug!("Joining active download {} for {}", current.id, movie_id);
                return current.clone();
            }
        }

        if let Some(entry) = self.inner.cache.entry(movie_id) {
            if let Some(current) = previous.filter(|t| t.status == DownloadStatus::Completed) {
                return current;
            }
            let mut task = DownloadTask::new(movie_id);
            task.status = DownloadStatus::Completed;
            task.bytes_downloaded = entry.size_bytes;
            task.total_bytes = Some(entry.size_bytes);
            task.completed_at = Some(task.started_at);
            let (state, _) = watch::channel(task.clone());
            tasks.insert(
                movie_id.to_string(),
                TaskSlot {
                    state,
                    cancel: CancellationToken::new(),
                },
            );
            self.inner.publisher.publish(&ProgressEvent::from_task(&task));
            return task;
        }

        let task = DownloadTask::new(movie_id);
        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(task.clone());
        tasks.insert(
            movie_id.to_string(),
            TaskSlot {
                state,
                cancel: cancel.clone(),
            },
        );
        self.inner.publisher.publish(&ProgressEvent::from_task(&task));
        metrics::set_active_downloads(count_active(&tasks));
        drop(tasks);

        info!("Queued download {} for movie {}", task.id, movie_id);
        let inner = self.inner.clone();
        let movie_id = movie_id.to_string();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            inner.run(movie_id, task_id, cancel).await;
        });

        task
    }

    /// Cancels a movie's active task.
    ///
    /// A queued task becomes `Cancelled` immediately. A downloading task is
    /// signalled and becomes `Cancelled` once its transfer unwinds, so the
    /// returned snapshot may still read `Downloading`. Terminal tasks are
    /// returned unchanged.
    pub fn cancel(&self, movie_id: &str) -> Option<DownloadTask> {
        let tasks = self.inner.tasks.lock().unwrap();
        let slot = tasks.get(movie_id)?;
        let current = slot.state.borrow().clone();

        match current.status {
            DownloadStatus::Queued => {
                slot.cancel.cancel();
                info!("Cancelled queued download {} for {}", current.id, movie_id);
                self.inner
                    .update_locked(&tasks, movie_id, &current.id, |t| {
                        t.status = DownloadStatus::Cancelled;
                        t.completed_at = Some(chrono::Utc::now().timestamp());
                        true
                    })
                    .or(Some(current))
            }
            DownloadStatus::Downloading => {
                info!("Cancelling download {} for {}", current.id, movie_id);
                slot.cancel.cancel();
                Some(current)
            }
            _ => Some(current),
        }
    }

    /// Signals every active task to stop.
    pub fn cancel_all(&self) {
        let active: Vec<String> = self
            .list_active()
            .into_iter()
            .map(|t| t.movie_id)
            .collect();
        for movie_id in active {
            self.cancel(&movie_id);
        }
    }

    /// Last-known task for a movie, terminal ones included.
    pub fn get_progress(&self, movie_id: &str) -> Option<DownloadTask> {
        let tasks = self.inner.tasks.lock().unwrap();
        tasks.get(movie_id).map(|slot| slot.state.borrow().clone())
    }

    /// All queued or downloading tasks, oldest first.
    pub fn list_active(&self) -> Vec<DownloadTask> {
        let tasks = self.inner.tasks.lock().unwrap();
        let mut active: Vec<DownloadTask> = tasks
            .values()
            .map(|slot| slot.state.borrow().clone())
            .filter(|t| t.is_active())
            .collect();
        active.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.movie_id.cmp(&b.movie_id))
        });
        active
    }

    pub fn is_active(&self, movie_id: &str) -> bool {
        self.get_progress(movie_id).is_some_and(|t| t.is_active())
    }

    /// Waits until the movie's current task reaches a terminal state.
    ///
    /// Returns `None` if the movie was never requested.
    pub async fn wait_for_terminal(&self, movie_id: &str) -> Option<DownloadTask> {
        let mut rx = {
            let tasks = self.inner.tasks.lock().unwrap();
            tasks.get(movie_id)?.state.subscribe()
        };
        let task = rx
            .wait_for(|t| t.status.is_terminal())
            .await
            .ok()
            .map(|t| (*t).clone());
        task
    }
}

impl Inner {
    /// Applies `f` to the task if it is still the movie's current, active
    /// task, then stores and publishes the result. `f` returns false to
    /// leave the task untouched.
    fn update(
        &self,
        movie_id: &str,
        task_id: &str,
        f: impl FnOnce(&mut DownloadTask) -> bool,
    ) -> Option<DownloadTask> {
        let tasks = self.tasks.lock().unwrap();
        self.update_locked(&tasks, movie_id, task_id, f)
    }

    fn update_locked(
        &self,
        tasks: &HashMap<String, TaskSlot>,
        movie_id: &str,
        task_id: &str,
        f: impl FnOnce(&mut DownloadTask) -> bool,
    ) -> Option<DownloadTask> {
        let slot = tasks.get(movie_id)?;
        let mut task = slot.state.borrow().clone();
        if task.id != task_id || task.status.is_terminal() {
            return None;
        }

        let previous_status = task.status;
        if !f(&mut task) {
            return None;
        }

        slot.state.send_replace(task.clone());
        self.publisher.publish(&ProgressEvent::from_task(&task));

        if task.status != previous_status {
            metrics::set_active_downloads(count_active(tasks));
            if task.status.is_terminal() {
                let bytes = if task.status == DownloadStatus::Completed {
                    task.bytes_downloaded
                } else {
                    0
                };
                metrics::record_download_finished(&task.status.as_str().to_lowercase(), bytes);
            }
        }
        Some(task)
    }

    async fn run(self: Arc<Self>, movie_id: String, task_id: String, cancel: CancellationToken) {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.finish_cancelled(&movie_id, &task_id);
                return;
            }
            permit = self.workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finish_failed(&movie_id, &task_id, "worker pool closed".to_string());
                    return;
                }
            },
        };

        match self.download(&movie_id, &task_id, &cancel).await {
            Ok(Finished::Completed(size)) => {
                self.update(&movie_id, &task_id, |t| {
                    t.status = DownloadStatus::Completed;
                    t.bytes_downloaded = size;
                    t.total_bytes = Some(size);
                    t.completed_at = Some(chrono::Utc::now().timestamp());
                    true
                });
                info!("Download {} for {} completed ({} bytes)", task_id, movie_id, size);
            }
            Ok(Finished::Cancelled) => self.finish_cancelled(&movie_id, &task_id),
            Err(e) => {
                error!("Download {} for {} failed: {}", task_id, movie_id, e);
                self.finish_failed(&movie_id, &task_id, e.to_string());
            }
        }
    }

    async fn download(
        &self,
        movie_id: &str,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Finished, DownloadError> {
        let reference = self
            .catalog
            .get_movie_remote_reference(movie_id)
            .map_err(DownloadError::Catalog)?;

        let started = self.update(movie_id, task_id, |t| {
            if t.status != DownloadStatus::Queued {
                return false;
            }
            t.status = DownloadStatus::Downloading;
            t.total_bytes = reference.size_hint;
            true
        });
        if started.is_none() {
            // Cancelled while waiting for a worker slot.
            return Ok(Finished::Cancelled);
        }

        let mut retries = 0;
        loop {
            self.update(movie_id, task_id, |t| {
                t.attempts += 1;
                true
            });

            match self.attempt(movie_id, task_id, &reference, cancel).await {
                Ok(finished) => return Ok(finished),
                Err(e) if self.retry_policy.should_retry(&e, retries) => {
                    let backoff = self.retry_policy.backoff(retries);
                    retries += 1;
                    warn!(
                        "Download of {} failed: {}. Retry {}/{} in {:?}",
                        movie_id, e, retries, self.retry_policy.max_retries, backoff
                    );
                    metrics::record_download_retry();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(Finished::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        movie_id: &str,
        task_id: &str,
        reference: &RemoteReference,
        cancel: &CancellationToken,
    ) -> Result<Finished, DownloadError> {
        let mut staging = self
            .cache
            .reserve(movie_id, reference.size_hint.unwrap_or(0))
            .await?;
        self.mark_uncached(staging.evicted());

        let mut on_progress = |bytes: u64, total: Option<u64>| {
            self.update(movie_id, task_id, |t| {
                if t.status != DownloadStatus::Downloading {
                    return false;
                }
                let mut changed = false;
                if bytes > t.bytes_downloaded {
                    t.bytes_downloaded = bytes;
                    changed = true;
                }
                if total.is_some() && t.total_bytes != total {
                    t.total_bytes = total;
                    changed = true;
                }
                changed
            });
        };

        let fetched = self
            .fetcher
            .fetch(reference, staging.writer(), cancel, &mut on_progress)
            .await;

        match fetched {
            Ok(FetchOutcome::Completed { total_bytes }) => {
                let outcome = self.cache.commit(staging, total_bytes).await?;
                self.mark_cached(movie_id, &outcome);
                Ok(Finished::Completed(total_bytes))
            }
            Ok(FetchOutcome::Cancelled) => {
                self.cache.abort(staging).await;
                Ok(Finished::Cancelled)
            }
            Err(e) => {
                self.cache.abort(staging).await;
                Err(e.into())
            }
        }
    }

    fn mark_cached(&self, movie_id: &str, outcome: &CommitOutcome) {
        if let Err(e) = self
            .catalog
            .set_movie_cached(movie_id, outcome.entry.size_bytes)
        {
            error!("Failed to mark {} as cached in catalog: {:#}", movie_id, e);
        }
        self.mark_uncached(&outcome.evicted);
    }

    fn mark_uncached(&self, movie_ids: &[String]) {
        for evicted in movie_ids {
            if let Err(e) = self.catalog.set_movie_uncached(evicted) {
                error!("Failed to mark {} as uncached in catalog: {:#}", evicted, e);
            }
        }
    }

    fn finish_cancelled(&self, movie_id: &str, task_id: &str) {
        let cancelled = self.update(movie_id, task_id, |t| {
            t.status = DownloadStatus::Cancelled;
            t.completed_at = Some(chrono::Utc::now().timestamp());
            true
        });
        if cancelled.is_some() {
            info!("Download {} for {} cancelled", task_id, movie_id);
        }
    }

    fn finish_failed(&self, movie_id: &str, task_id: &str, reason: String) {
        self.update(movie_id, task_id, |t| {
            t.status = DownloadStatus::Failed;
            t.last_error = Some(reason);
            t.completed_at = Some(chrono::Utc::now().timestamp());
            true
        });
    }
}

fn count_active(tasks: &HashMap<String, TaskSlot>) -> usize {
    tasks
        .values()
        .filter(|slot| slot.state.borrow().is_active())
        .count()
}
