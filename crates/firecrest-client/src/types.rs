//! Typed views of FirecREST payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use firecrest_sched::SchedError;

use crate::error::ClientResult;

/// Availability of one microservice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: String,
    pub status: String,
    #[serde(default)]
    pub description: String,
}

/// Availability of one HPC system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub system: String,
    pub status: String,
    #[serde(default)]
    pub description: String,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub link_target: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub permissions: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(default, deserialize_with = "size_from_any")]
    pub size: u64,
}

fn size_from_any<'de, D: serde::Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    match Value::deserialize(de)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid size {n}"))),
        Value::String(s) => s
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid size {s:?}"))),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!("invalid size {other}"))),
    }
}

/// Job script for [`crate::Firecrest::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobScript {
    /// Script contents, uploaded as `script.batch`.
    Text(String),
    /// Script on the local file system, uploaded.
    LocalFile(std::path::PathBuf),
    /// Script already on the cluster.
    Remote(String),
}

/// Options of a transfer job on the storage partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferJob {
    /// Name of the Slurm job.
    pub job_name: Option<String>,
    /// Time limit in `HH:MM:SS` or Slurm format.
    pub time: Option<String>,
    /// Start only after this job finished.
    pub stage_out_job_id: Option<String>,
    /// Project account to charge.
    pub account: Option<String>,
}

/// A reservation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub name: String,
    pub account: String,
    pub number_of_nodes: String,
    pub node_type: String,
    /// `YYYY-MM-DDTHH:MM:SS`
    pub start_time: String,
    /// `YYYY-MM-DDTHH:MM:SS`
    pub end_time: String,
}

/// String form of a job id, whether the payload carries it as text or number.
pub(crate) fn job_id_of(job: &Value) -> Option<String> {
    match job.get("jobid")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> ClientResult<T> {
    serde_json::from_value(value).map_err(|e| SchedError::Payload(format!("{what}: {e}")).into())
}
