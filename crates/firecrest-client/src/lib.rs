//! FirecREST client
//!
//! Async client for the FirecREST v1 REST API of HPC centers, built on the
//! [`firecrest_sched`] request scheduler.
//!
//! # Example
//!
//! ```ignore
//! use firecrest_client::{ClientConfig, Firecrest, JobScript};
//!
//! let config = ClientConfig::load(None)?;
//! let client = Firecrest::new(&config)?;
//!
//! for system in client.all_systems().await? {
//!     println!("{}: {}", system.system, system.status);
//! }
//!
//! let job = client
//!     .submit("daint", JobScript::Remote("/scratch/run.sh".into()), None, None)
//!     .await?;
//! println!("{}", job["jobid"]);
//! ```

pub mod auth;
pub mod client;
pub mod compute;
pub mod config;
pub mod error;
pub mod external;
pub mod reservations;
pub mod status;
pub mod storage;
pub mod transport;
pub mod types;
pub mod utilities;

pub use auth::ClientCredentialsAuth;
pub use client::Firecrest;
pub use compute::AccountingQuery;
pub use config::{AuthConfig, ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use external::{ExternalTransfer, TransferDirection};
pub use transport::ReqwestTransport;
pub use types::{JobScript, LsEntry, Reservation, ServiceStatus, SystemStatus, TransferJob};

pub use firecrest_sched::{
    PollingSchedule, RequestScheduler, ResponseHistory, SchedError, SchedulerConfig,
    ServiceCategory, Task, TaskOutcome, TaskStatus, UploadFile,
};
