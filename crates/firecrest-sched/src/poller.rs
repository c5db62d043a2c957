//! Polling a task until it reaches a final status.

use serde_json::Value;
use tracing::{error, info};

use crate::classify::classify_task_status;
use crate::error::{ResponseHistory, SchedError, SchedResult};
use crate::schedule::PollingSchedule;
use crate::scheduler::RequestScheduler;
use crate::task::{Task, TaskStatus};

/// A task that reached its final status.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// The task's `data` payload.
    pub data: Value,
    /// System the task ran on, when the service reports one.
    pub system: Option<String>,
    /// The full task record of the last fetch.
    pub task: Task,
    /// Number of task fetches.
    pub fetches: usize,
    /// Schedule elements consumed.
    pub waits: usize,
    /// Every response seen, including those recorded before polling started.
    pub history: ResponseHistory,
}

/// Fetch loop over one task.
///
/// Each iteration fetches the task through the scheduler (and so through
/// coalescing when enabled), raises on failure codes, returns once the
/// status reaches `final_status` and otherwise sleeps for the next element
/// of the schedule.
pub struct TaskPoller<'a> {
    scheduler: &'a RequestScheduler,
    task_id: String,
    final_status: TaskStatus,
    schedule: PollingSchedule,
    history: ResponseHistory,
}

impl<'a> TaskPoller<'a> {
    pub fn new(
        scheduler: &'a RequestScheduler,
        task_id: impl Into<String>,
        final_status: TaskStatus,
        schedule: PollingSchedule,
    ) -> Self {
        Self {
            scheduler,
            task_id: task_id.into(),
            final_status,
            schedule,
            history: ResponseHistory::new(),
        }
    }

    /// Carry responses observed before polling, such as the submission.
    pub fn with_history(mut self, history: ResponseHistory) -> Self {
        self.history = history;
        self
    }

    pub async fn run(mut self) -> SchedResult<TaskOutcome> {
        info!(
            "Polling task {} until status is {}",
            self.task_id, self.final_status
        );
        let mut fetches = 0;
        loop {
            let task = self
                .scheduler
                .task(&self.task_id, &mut self.history)
                .await?;
            fetches += 1;
            classify_task_status(&task, &self.history)?;

            if task.status >= self.final_status {
                info!("Task {} reached status {}", self.task_id, task.status);
                return Ok(TaskOutcome {
                    data: task.data.clone(),
                    system: task.system.clone(),
                    task,
                    fetches,
                    waits: self.schedule.consumed(),
                    history: self.history,
                });
            }

            let Some(wait) = self.schedule.next_wait() else {
                let err = SchedError::PollingExhausted {
                    task_id: self.task_id,
                    history: self.history,
                };
                error!("{err}");
                return Err(err);
            };
            info!(
                "Status of {} is {}, sleeping for {:?}",
                self.task_id, task.status, wait
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::error::ErrorKind;
    use crate::http::HttpResponse;
    use crate::scheduler::SchedulerConfig;
    use crate::testing::{MockTransport, task_response, tasks_body};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scheduler(transport: &Arc<MockTransport>) -> RequestScheduler {
        RequestScheduler::new(
            SchedulerConfig::default(),
            transport.clone(),
            Arc::new(StaticToken::new("t")),
        )
    }

    fn push_statuses(transport: &MockTransport, statuses: &[&str]) {
        for status in statuses {
            transport.push_json(200, tasks_body(&[("abc", status)]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_final_status() {
        let transport = Arc::new(MockTransport::new());
        push_statuses(&transport, &["100", "100", "200"]);
        let scheduler = scheduler(&transport);

        let outcome = TaskPoller::new(
            &scheduler,
            "abc",
            TaskStatus::SUCCESS,
            PollingSchedule::immediate(2),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(outcome.fetches, 3);
        assert_eq!(outcome.waits, 2);
        assert_eq!(outcome.task.status, TaskStatus::SUCCESS);
        assert_eq!(outcome.history.len(), 3);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_schedule_exhausted() {
        let transport = Arc::new(MockTransport::new());
        push_statuses(&transport, &["100", "100"]);
        let scheduler = scheduler(&transport);

        let err = TaskPoller::new(
            &scheduler,
            "abc",
            TaskStatus::SUCCESS,
            PollingSchedule::immediate(1),
        )
        .run()
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PollingExhausted);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_upload_failure_stops_immediately() {
        let transport = Arc::new(MockTransport::new());
        push_statuses(&transport, &["100", "115"]);
        let scheduler = scheduler(&transport);

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let schedule = PollingSchedule::new(
            std::iter::from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(Duration::ZERO)
            })
            .take(5),
        );
        let err = scheduler
            .poll_task("abc", TaskStatus::SUCCESS, schedule, ResponseHistory::new())
            .await
            .unwrap_err();
        match &err {
            SchedError::UploadFailed { task_id, history } => {
                assert_eq!(task_id, "abc");
                assert_eq!(history.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.call_count(), 2);
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_sleeps_between_fetches() {
        let transport = Arc::new(MockTransport::new());
        push_statuses(&transport, &["100", "101", "200"]);
        let scheduler = scheduler(&transport);

        let start = tokio::time::Instant::now();
        let schedule =
            PollingSchedule::new(vec![Duration::from_secs(1), Duration::from_secs(5)]);
        TaskPoller::new(&scheduler, "abc", TaskStatus::SUCCESS, schedule)
            .run()
            .await
            .unwrap();
        assert_eq!(tokio::time::Instant::now() - start, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_system_and_keeps_history() {
        let transport = Arc::new(MockTransport::new());
        transport.push(task_response(
            "abc",
            "200",
            json!({"jobid": 42}),
            Some("daint"),
        ));
        let scheduler = scheduler(&transport);

        let submission = HttpResponse::json(201, &json!({"task_id": "abc"}));
        let outcome = scheduler
            .poll_task(
                "abc",
                TaskStatus::SUCCESS,
                PollingSchedule::immediate(0),
                submission.into(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.data, json!({"jobid": 42}));
        assert_eq!(outcome.system.as_deref(), Some("daint"));
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.waits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_service_failure() {
        let transport = Arc::new(MockTransport::new());
        push_statuses(&transport, &["400"]);
        let scheduler = scheduler(&transport);

        let schedule = PollingSchedule::immediate(3);
        let err = TaskPoller::new(&scheduler, "abc", TaskStatus::SUCCESS, schedule)
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Service);
    }
}
