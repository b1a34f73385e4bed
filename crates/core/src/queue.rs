//! In-process background task queue with bounded concurrency and per-task
//! time limits. Task state is kept in memory and can be polled by id.

use crate::ingest::{ProgressSink, ProgressStage};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Progress {
        current: u8,
        total: u8,
        status: String,
    },
    Success {
        result: Value,
    },
    Failure {
        error: String,
    },
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Success { .. } | TaskState::Failure { .. })
    }
}

type TaskTable = Arc<RwLock<HashMap<Uuid, TaskState>>>;

fn set_state(tasks: &TaskTable, id: Uuid, state: TaskState) {
    match tasks.write() {
        Ok(mut table) => {
            table.insert(id, state);
        }
        Err(_) => error!(task_id = %id, "task table lock poisoned"),
    }
}

/// Progress handle given to a running task; checkpoints become
/// [`TaskState::Progress`].
#[derive(Clone)]
pub struct TaskProgress {
    id: Uuid,
    tasks: TaskTable,
}

impl TaskProgress {
    pub fn task_id(&self) -> Uuid {
        self.id
    }
}

impl ProgressSink for TaskProgress {
    fn report(&self, stage: ProgressStage) {
        set_state(
            &self.tasks,
            self.id,
            TaskState::Progress {
                current: stage.checkpoint(),
                total: ProgressStage::TOTAL,
                status: stage.status().to_string(),
            },
        );
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    tasks: TaskTable,
    workers: Arc<Semaphore>,
    soft_limit: Duration,
    hard_limit: Duration,
}

impl TaskQueue {
    pub fn new(workers: usize, soft_limit: Duration, hard_limit: Duration) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            soft_limit,
            hard_limit,
        }
    }

    /// Queues `work` and returns its task id immediately. At most `workers`
    /// tasks run at once; the rest stay `Pending`.
    pub fn submit<F, Fut, T, E>(&self, name: &'static str, work: F) -> Uuid
    where
        F: FnOnce(TaskProgress) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = Uuid::new_v4();
        set_state(&self.tasks, id, TaskState::Pending);

        let tasks = Arc::clone(&self.tasks);
        let workers = Arc::clone(&self.workers);
        let soft_limit = self.soft_limit;
        let hard_limit = self.hard_limit;

        tokio::spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    set_state(
                        &tasks,
                        id,
                        TaskState::Failure {
                            error: "task queue is shut down".to_string(),
                        },
                    );
                    return;
                }
            };

            set_state(&tasks, id, TaskState::Started);
            info!(task = name, task_id = %id, "task started");

            let progress = TaskProgress {
                id,
                tasks: Arc::clone(&tasks),
            };
            let run = async move {
                let mut work = std::pin::pin!(work(progress));
                if let Ok(outcome) = tokio::time::timeout(soft_limit, &mut work).await {
                    return outcome;
                }
                warn!(task = name, task_id = %id, "task passed its soft time limit");
                work.await
            };

            let state = match tokio::time::timeout(hard_limit, run).await {
                Ok(Ok(result)) => match serde_json::to_value(result) {
                    Ok(result) => TaskState::Success { result },
                    Err(error) => TaskState::Failure {
                        error: format!("task result is not serializable: {error}"),
                    },
                },
                Ok(Err(error)) => TaskState::Failure {
                    error: error.to_string(),
                },
                Err(_) => TaskState::Failure {
                    error: format!("task exceeded time limit of {}s", hard_limit.as_secs()),
                },
            };

            match &state {
                TaskState::Failure { error } => {
                    error!(task = name, task_id = %id, %error, "task failed")
                }
                _ => info!(task = name, task_id = %id, "task succeeded"),
            }
            set_state(&tasks, id, state);
        });

        id
    }

    pub fn state(&self, id: Uuid) -> Option<TaskState> {
        self.tasks
            .read()
            .ok()
            .and_then(|table| table.get(&id).cloned())
    }

    /// Drops a finished task's state and returns it. Running or pending tasks
    /// are kept and yield `None`.
    pub fn forget(&self, id: Uuid) -> Option<TaskState> {
        let mut table = self.tasks.write().ok()?;
        if !table.get(&id)?.is_finished() {
            return None;
        }
        table.remove(&id)
    }

    /// Polls until the task finishes. Returns `None` for unknown ids.
    pub async fn wait_for(&self, id: Uuid, poll: Duration) -> Option<TaskState> {
        loop {
            let state = self.state(id)?;
            if state.is_finished() {
                return Some(state);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue(workers: usize) -> TaskQueue {
        TaskQueue::new(workers, Duration::from_secs(5), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn successful_task_reports_result() {
        let queue = queue(2);
        let id = queue.submit("sum", |_progress| async { Ok::<_, String>(json!({ "total": 3 })) });

        let state = queue.wait_for(id, Duration::from_millis(5)).await;

        assert_eq!(
            state,
            Some(TaskState::Success {
                result: json!({ "total": 3 })
            })
        );
    }

    #[tokio::test]
    async fn failing_task_reports_error() {
        let queue = queue(1);
        let id = queue.submit("fail", |_progress| async { Err::<(), _>("pdf parse error: broken") });

        let state = queue.wait_for(id, Duration::from_millis(5)).await;

        assert_eq!(
            state,
            Some(TaskState::Failure {
                error: "pdf parse error: broken".to_string()
            })
        );
    }

    #[tokio::test]
    async fn progress_checkpoints_are_visible() {
        let queue = queue(1);
        let (reached_tx, reached_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let id = queue.submit("staged", move |progress| async move {
            progress.report(ProgressStage::Embedded);
            let _ = reached_tx.send(());
            let _ = release_rx.await;
            Ok::<_, String>(())
        });

        let _ = reached_rx.await;
        assert_eq!(
            queue.state(id),
            Some(TaskState::Progress {
                current: 2,
                total: 4,
                status: "Storing in vector database...".to_string()
            })
        );

        let _ = release_tx.send(());
        let state = queue.wait_for(id, Duration::from_millis(5)).await;
        assert!(matches!(state, Some(TaskState::Success { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn hard_limit_fails_the_task() {
        let queue = TaskQueue::new(1, Duration::from_secs(1), Duration::from_secs(2));
        let id = queue.submit("slow", |_progress| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(())
        });

        let state = queue.wait_for(id, Duration::from_millis(100)).await;

        assert!(matches!(state, Some(TaskState::Failure { error }) if error.contains("time limit")));
    }

    #[tokio::test]
    async fn finished_tasks_can_be_forgotten() {
        let queue = queue(1);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let id = queue.submit("held", move |_progress| async move {
            let _ = release_rx.await;
            Ok::<_, String>(())
        });

        assert!(queue.forget(id).is_none());
        assert!(queue.state(id).is_some());

        let _ = release_tx.send(());
        let finished = queue.wait_for(id, Duration::from_millis(5)).await;
        assert_eq!(queue.forget(id), finished);
        assert!(queue.state(id).is_none());
        assert!(queue.forget(id).is_none());
    }

    #[tokio::test]
    async fn unknown_task_has_no_state() {
        let queue = queue(1);
        assert!(queue.state(Uuid::new_v4()).is_none());
        assert!(queue.wait_for(Uuid::new_v4(), Duration::from_millis(1)).await.is_none());
    }
}
