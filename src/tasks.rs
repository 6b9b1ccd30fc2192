//! Background work for the presentation layer.
//!
//! Every user action that touches the network or the player runs here, off
//! the foreground task. At most `max_concurrent_tasks` run at once, and each
//! task carries a key: spawning with a key that is still running aborts the
//! older task, so the latest request wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::AbortHandle;
use crate::errors::Result;
use crate::utils::generate_task_id;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent<T> {
    Started { id: String, key: String },
    Progress { id: String, key: String, done: usize, total: usize },
    Finished { id: String, key: String, result: std::result::Result<T, String> },
    /// Aborted, either explicitly or by a newer task with the same key.
    Cancelled { id: String, key: String },
}

impl<T> TaskEvent<T> {
    pub fn id(&self) -> &str {
        match self {
            TaskEvent::Started { id, .. }
            | TaskEvent::Progress { id, .. }
            | TaskEvent::Finished { id, .. }
            | TaskEvent::Cancelled { id, .. } => id,
        }
    }
}

/// Lets a running task publish `(done, total)` progress.
pub struct ProgressHandle<T> {
    id: String,
    key: String,
    events: mpsc::UnboundedSender<TaskEvent<T>>,
}

impl<T> ProgressHandle<T> {
    pub fn report(&self, done: usize, total: usize) {
        let _ = self.events.send(TaskEvent::Progress {
            id: self.id.clone(),
            key: self.key.clone(),
            done,
            total,
        });
    }
}

struct RunningTask {
    id: String,
    abort: AbortHandle,
}

pub struct TaskPool<T> {
    semaphore: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<String, RunningTask>>>,
    events: mpsc::UnboundedSender<TaskEvent<T>>,
}

impl<T: Send + 'static> TaskPool<T> {
    pub fn new(max_concurrent: usize) -> (Self, mpsc::UnboundedReceiver<TaskEvent<T>>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let pool = Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            running: Arc::new(Mutex::new(HashMap::new())),
            events,
        };
        (pool, receiver)
    }

    /// Starts `task` under `key` and returns its id. A task already running
    /// under the same key is aborted first.
    pub fn spawn<F, Fut>(&self, key: &str, task: F) -> String
    where
        F: FnOnce(ProgressHandle<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = generate_task_id();
        let key = key.to_string();

        let progress = ProgressHandle {
            id: id.clone(),
            key: key.clone(),
            events: self.events.clone(),
        };
        let semaphore = self.semaphore.clone();
        let running = self.running.clone();
        let events = self.events.clone();
        let (task_id, task_key) = (id.clone(), key.clone());

        // Held until the new entry is registered, so a task that finishes
        // immediately cannot remove its entry before it exists.
        let mut registry = lock(&self.running);
        if let Some(previous) = registry.remove(&key) {
            log::debug!("[TASKS] {} superseded by newer '{}' task", previous.id, key);
            previous.abort.abort();
            let _ = self.events.send(TaskEvent::Cancelled {
                id: previous.id,
                key: key.clone(),
            });
        }

        let handle = tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            let _ = events.send(TaskEvent::Started {
                id: task_id.clone(),
                key: task_key.clone(),
            });

            let result = match permit {
                Ok(_permit) => task(progress).await.map_err(|e| e.to_string()),
                Err(_) => Err("task pool closed".to_string()),
            };

            {
                let mut registry = lock(&running);
                if registry.get(&task_key).map(|t| t.id == task_id).unwrap_or(false) {
                    registry.remove(&task_key);
                }
            }

            if let Err(e) = &result {
                log::warn!("[TASKS] '{}' ({}) failed: {}", task_key, task_id, e);
            }
            let _ = events.send(TaskEvent::Finished {
                id: task_id,
                key: task_key,
                result,
            });
        });

        registry.insert(
            key.clone(),
            RunningTask {
                id: id.clone(),
                abort: handle.abort_handle(),
            },
        );
        log::debug!("[TASKS] Spawned '{}' ({})", key, id);
        id
    }

    /// Aborts the task running under `key`. `false` if there is none.
    pub fn cancel(&self, key: &str) -> bool {
        let Some(task) = lock(&self.running).remove(key) else {
            return false;
        };
        task.abort.abort();
        let _ = self.events.send(TaskEvent::Cancelled {
            id: task.id,
            key: key.to_string(),
        });
        true
    }

    pub fn is_running(&self, key: &str) -> bool {
        lock(&self.running).contains_key(key)
    }

    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }
}

impl<T> Drop for TaskPool<T> {
    fn drop(&mut self) {
        for (_, task) in lock(&self.running).drain() {
            task.abort.abort();
        }
    }
}

fn lock(running: &Mutex<HashMap<String, RunningTask>>) -> std::sync::MutexGuard<'_, HashMap<String, RunningTask>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
