//! FirecREST request scheduler
//!
//! This crate is the client-side access layer between endpoint wrappers and
//! an HTTP transport for the FirecREST HPC API. It keeps a client within the
//! per-service rate limits of the backend and drives long-running tasks to
//! completion.
//!
//! # Overview
//!
//! - [`RateLimiter`] spaces calls per [`ServiceCategory`]
//! - [`RetryStage`] resends on HTTP 429 after the advertised reset
//! - [`RequestCoalescer`] folds concurrent polls of `/tasks`,
//!   `/compute/jobs` and `/compute/acct` into one physical call
//! - [`classify_response`] maps responses to [`SchedError`] variants
//! - [`TaskPoller`] polls a task along a [`PollingSchedule`]
//!
//! All of it is owned by one [`RequestScheduler`] per client.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use firecrest_sched::{
//!     EnvTokenProvider, RequestScheduler, ResponseHistory, SchedulerConfig, TaskStatus,
//! };
//!
//! let scheduler = RequestScheduler::new(
//!     SchedulerConfig::default().with_merge_get_requests(true),
//!     Arc::new(my_transport),
//!     Arc::new(EnvTokenProvider::firecrest()),
//! );
//!
//! let outcome = scheduler
//!     .poll_task(
//!         "4f2e7c",
//!         TaskStatus::SUCCESS,
//!         scheduler.default_schedule(),
//!         ResponseHistory::new(),
//!     )
//!     .await?;
//! println!("{}", outcome.data);
//! ```

pub mod auth;
pub mod category;
pub mod classify;
pub mod coalesce;
pub mod error;
pub mod http;
pub mod poller;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod stage;
pub mod task;
pub mod throttle;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use auth::{EnvTokenProvider, StaticToken, TokenProvider};
pub use category::ServiceCategory;
pub use classify::{ERROR_HEADERS, classify_optional, classify_response, classify_task_status};
pub use coalesce::{CoalescingKey, IdSet, PollingEndpoint, RequestCoalescer, RoundOutcome};
pub use error::{ErrorKind, ResponseHistory, SchedError, SchedResult};
pub use http::{
    Headers, HttpRequest, HttpResponse, MACHINE_HEADER, Method, RequestBody, TASK_ID_HEADER,
    UploadFile, UploadSource,
};
pub use poller::{TaskOutcome, TaskPoller};
pub use retry::{DEFAULT_RESET, MAX_RESET, RetryPolicy, parse_retry_after, resolve_backoff};
pub use schedule::PollingSchedule;
pub use scheduler::{DEFAULT_POLLING_ATTEMPTS, RequestScheduler, SchedulerConfig};
pub use stage::{Dispatch, RetryStage, SendStage, ThrottleStage};
pub use task::{Task, TaskStatus, tasks_from_payload};
pub use throttle::RateLimiter;
pub use transport::Transport;
