//! The request scheduler shared by every call of a client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::auth::TokenProvider;
use crate::category::ServiceCategory;
use crate::classify::{classify_optional, classify_response};
use crate::coalesce::{CoalescingKey, IdSet, RequestCoalescer};
use crate::error::{ResponseHistory, SchedError, SchedResult};
use crate::http::{HttpRequest, HttpResponse};
use crate::poller::{TaskOutcome, TaskPoller};
use crate::retry::RetryPolicy;
use crate::schedule::PollingSchedule;
use crate::stage::{Dispatch, RetryStage, SendStage, ThrottleStage};
use crate::task::{Task, TaskStatus, tasks_from_payload};
use crate::throttle::RateLimiter;
use crate::transport::Transport;

/// Polls allowed by the default schedule.
pub const DEFAULT_POLLING_ATTEMPTS: usize = 250;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum spacing per category. Missing categories use their default.
    pub time_between_calls: FxHashMap<ServiceCategory, Duration>,
    /// Rate-limit retry budget.
    pub retry: RetryPolicy,
    /// Fold concurrent listing calls into shared rounds.
    pub merge_get_requests: bool,
    /// Waits between task polls when the caller gives no schedule.
    pub polling_sleep_times: Vec<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            time_between_calls: ServiceCategory::ALL
                .into_iter()
                .map(|c| (c, c.default_interval()))
                .collect(),
            retry: RetryPolicy::unbounded(),
            merge_get_requests: false,
            polling_sleep_times: vec![Duration::ZERO; DEFAULT_POLLING_ATTEMPTS],
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, category: ServiceCategory, interval: Duration) -> Self {
        self.time_between_calls.insert(category, interval);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_merge_get_requests(mut self, merge: bool) -> Self {
        self.merge_get_requests = merge;
        self
    }

    pub fn with_polling_sleep_times(mut self, waits: Vec<Duration>) -> Self {
        self.polling_sleep_times = waits;
        self
    }
}

/// Owns all shared scheduling state: throttle clocks, the dispatch
/// pipeline and the coalescing rounds.
pub struct RequestScheduler {
    config: SchedulerConfig,
    limiter: Arc<RateLimiter>,
    pipeline: Arc<dyn Dispatch>,
    coalescer: RequestCoalescer,
}

impl RequestScheduler {
    pub fn new(
        config: SchedulerConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.time_between_calls));
        let send = SendStage::new(transport, tokens);
        let throttle = ThrottleStage::new(send, Arc::clone(&limiter));
        let pipeline: Arc<dyn Dispatch> =
            Arc::new(RetryStage::new(throttle, Arc::clone(&limiter), config.retry));
        let coalescer = RequestCoalescer::new(Arc::clone(&pipeline), Arc::clone(&limiter));
        Self {
            config,
            limiter,
            pipeline,
            coalescer,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Physical calls made by coalesced rounds.
    pub fn coalesced_rounds(&self) -> u64 {
        self.coalescer.rounds()
    }

    /// Key under which `request` would be coalesced, if merging applies.
    pub fn coalescing_key(&self, request: &HttpRequest) -> Option<CoalescingKey> {
        if !self.config.merge_get_requests {
            return None;
        }
        let key = CoalescingKey::for_request(request)?;
        (self.limiter.interval(key.endpoint.category()) > Duration::ZERO).then_some(key)
    }

    /// Send one logical request and return the raw response.
    ///
    /// Listing requests share a coalesced round when merging applies; the
    /// response may then list more identifiers than `request` asked for.
    pub async fn send(&self, request: &HttpRequest) -> SchedResult<HttpResponse> {
        match self.coalescing_key(request) {
            Some(key) => {
                let wanted = IdSet::from_param(request.query_value(key.endpoint.id_param()));
                let outcome = self.coalescer.request(key, wanted, request).await?;
                outcome.result.clone()
            }
            None => self.pipeline.dispatch(request).await,
        }
    }

    /// Send, record the response in `history` and classify it.
    pub async fn call(
        &self,
        request: &HttpRequest,
        expected_status: u16,
        history: &mut ResponseHistory,
    ) -> SchedResult<Value> {
        history.push(self.send(request).await?);
        classify_response(history, expected_status)
    }

    /// Like [`RequestScheduler::call`], accepting an empty or non-JSON body.
    pub async fn call_optional(
        &self,
        request: &HttpRequest,
        expected_status: u16,
        history: &mut ResponseHistory,
    ) -> SchedResult<Option<Value>> {
        history.push(self.send(request).await?);
        classify_optional(history, expected_status)
    }

    /// Fetch tasks by id; an empty slice lists every task.
    ///
    /// Unknown ids are left out of the result.
    pub async fn tasks<S: AsRef<str> + Sync>(
        &self,
        ids: &[S],
        history: &mut ResponseHistory,
    ) -> SchedResult<BTreeMap<String, Task>> {
        let wanted = IdSet::wanted(ids.iter().map(|id| id.as_ref().to_string()));
        let request = HttpRequest::get("/tasks").with_optional_query("tasks", wanted.to_param());
        let payload = self.call(&request, 200, history).await?;
        let mut tasks = tasks_from_payload(&payload)?;
        tasks.retain(|id, _| wanted.contains(id));
        Ok(tasks)
    }

    /// Fetch one task; a missing id is [`SchedError::NotFound`].
    pub async fn task(&self, task_id: &str, history: &mut ResponseHistory) -> SchedResult<Task> {
        let mut tasks = self.tasks(&[task_id], history).await?;
        tasks.remove(task_id).ok_or_else(|| SchedError::NotFound {
            history: history.clone(),
        })
    }

    /// Schedule built from the configured polling waits.
    pub fn default_schedule(&self) -> PollingSchedule {
        PollingSchedule::new(self.config.polling_sleep_times.clone())
    }

    /// Poll `task_id` until it reaches `final_status`.
    pub async fn poll_task(
        &self,
        task_id: &str,
        final_status: TaskStatus,
        schedule: PollingSchedule,
        history: ResponseHistory,
    ) -> SchedResult<TaskOutcome> {
        TaskPoller::new(self, task_id, final_status, schedule)
            .with_history(history)
            .run()
            .await
    }
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("coalescer", &self.coalescer)
            .finish_non_exhaustive()
    }
}
