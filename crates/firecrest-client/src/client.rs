//! The FirecREST client.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use firecrest_sched::{
    EnvTokenProvider, HttpRequest, PollingSchedule, RequestScheduler, ResponseHistory, SchedError,
    SchedulerConfig, Task, TaskOutcome, TaskStatus, TokenProvider, Transport,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::ClientCredentialsAuth;
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::transport::ReqwestTransport;

/// Async client for the FirecREST v1 API.
///
/// Every call goes through one [`RequestScheduler`], so concurrent callers
/// sharing a client share its rate limits and coalesced polling rounds.
/// Wrap the client in an `Arc` to use it from several tasks.
pub struct Firecrest {
    scheduler: RequestScheduler,
    /// Client for staging-area links, which live outside the API.
    http: Option<reqwest::Client>,
}

impl fmt::Debug for Firecrest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Firecrest")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Firecrest {
    /// Build a client from validated configuration.
    ///
    /// Uses client-credentials authorization when `auth` is configured and
    /// falls back to a token in `FIRECREST_TOKEN` otherwise.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        config.validate()?;

        let http = ReqwestTransport::http_client(config)?;
        let transport = ReqwestTransport::new(http.clone(), &config.firecrest_url);
        let tokens: Arc<dyn TokenProvider> = match config.auth.credentials() {
            Some((client_id, client_secret, token_uri)) => Arc::new(ClientCredentialsAuth::new(
                http.clone(),
                client_id,
                client_secret,
                token_uri,
            )),
            None => {
                debug!("No client credentials configured, reading FIRECREST_TOKEN");
                Arc::new(EnvTokenProvider::firecrest())
            }
        };

        info!("FireCrest client for {}", transport.base_url());
        let mut client = Self::with_parts(config.scheduler_config(), Arc::new(transport), tokens);
        client.http = Some(http);
        Ok(client)
    }

    /// Build a client from explicit collaborators.
    pub fn with_parts(
        config: SchedulerConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            scheduler: RequestScheduler::new(config, transport, tokens),
            http: None,
        }
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    /// HTTP client for staging-area links; a default one when the client was
    /// built from explicit parts.
    pub(crate) fn staging_http(&self) -> ClientResult<reqwest::Client> {
        match &self.http {
            Some(http) => Ok(http.clone()),
            None => Ok(reqwest::Client::builder().build()?),
        }
    }

    pub(crate) async fn call(&self, request: HttpRequest, expected_status: u16) -> ClientResult<Value> {
        let mut history = ResponseHistory::new();
        Ok(self
            .scheduler
            .call(&request, expected_status, &mut history)
            .await?)
    }

    pub(crate) async fn call_optional(
        &self,
        request: HttpRequest,
        expected_status: u16,
    ) -> ClientResult<Option<Value>> {
        let mut history = ResponseHistory::new();
        Ok(self
            .scheduler
            .call_optional(&request, expected_status, &mut history)
            .await?)
    }

    /// Send a task-creating request and poll the task to success.
    pub(crate) async fn submit_task(
        &self,
        request: HttpRequest,
        expected_status: u16,
    ) -> ClientResult<(String, TaskOutcome)> {
        let mut history = ResponseHistory::new();
        let payload = self
            .scheduler
            .call(&request, expected_status, &mut history)
            .await?;
        let Some(task_id) = payload.get("task_id").and_then(Value::as_str) else {
            return Err(SchedError::Payload(format!(
                "{} {} returned no task_id",
                request.method, request.path
            ))
            .into());
        };
        let task_id = task_id.to_string();
        info!("{} task: {task_id}", request.path);

        let outcome = self
            .scheduler
            .poll_task(
                &task_id,
                TaskStatus::SUCCESS,
                self.scheduler.default_schedule(),
                history,
            )
            .await?;
        Ok((task_id, outcome))
    }

    /// Tasks by id; an empty slice lists every task of the user.
    ///
    /// Calls `GET /tasks`.
    pub async fn tasks<S: AsRef<str> + Sync>(
        &self,
        task_ids: &[S],
    ) -> ClientResult<BTreeMap<String, Task>> {
        let mut history = ResponseHistory::new();
        Ok(self.scheduler.tasks(task_ids, &mut history).await?)
    }

    /// One task by id.
    ///
    /// Calls `GET /tasks?tasks=<id>`.
    pub async fn task(&self, task_id: &str) -> ClientResult<Task> {
        let mut history = ResponseHistory::new();
        Ok(self.scheduler.task(task_id, &mut history).await?)
    }

    /// Poll a task until it reaches `final_status`.
    ///
    /// Uses the configured polling waits when `schedule` is `None`.
    pub async fn poll_task(
        &self,
        task_id: &str,
        final_status: TaskStatus,
        schedule: Option<PollingSchedule>,
    ) -> ClientResult<TaskOutcome> {
        let schedule = schedule.unwrap_or_else(|| self.scheduler.default_schedule());
        Ok(self
            .scheduler
            .poll_task(task_id, final_status, schedule, ResponseHistory::new())
            .await?)
    }
}

/// Take `name` out of a response object.
pub(crate) fn take_field(mut payload: Value, name: &str) -> ClientResult<Value> {
    match payload.get_mut(name) {
        Some(value) => Ok(value.take()),
        None => Err(SchedError::Payload(format!("missing `{name}` in response")).into()),
    }
}
