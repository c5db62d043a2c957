//! Compute microservice: Slurm jobs.
//!
//! Every call creates a task on the service, which is polled until it
//! succeeds. Listing calls go through the scheduler's coalescing, so a
//! result may cover more jobs than were asked for and is filtered here.

use std::collections::BTreeMap;

use firecrest_sched::{HttpRequest, UploadFile};
use serde_json::{Value, json};

use crate::client::Firecrest;
use crate::error::{ClientError, ClientResult};
use crate::types::{JobScript, job_id_of};
use crate::utilities::open_upload;

/// Name under which an inline script is uploaded.
const INLINE_SCRIPT_NAME: &str = "script.batch";

/// Accounting query for [`Firecrest::poll`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountingQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub page_size: Option<u32>,
    pub page_number: Option<u32>,
}

impl Firecrest {
    /// Submit a batch script and wait for the scheduler to accept it.
    ///
    /// The returned job info carries `firecrest_taskid`.
    ///
    /// Calls `POST /compute/jobs/upload` or `POST /compute/jobs/path`, then
    /// `GET /tasks`.
    pub async fn submit(
        &self,
        machine: &str,
        script: JobScript,
        account: Option<&str>,
        env_vars: Option<&BTreeMap<String, String>>,
    ) -> ClientResult<Value> {
        let env = match env_vars.filter(|vars| !vars.is_empty()) {
            Some(vars) => Some(
                serde_json::to_string(vars)
                    .map_err(|e| ClientError::InvalidArgument(format!("env_vars: {e}")))?,
            ),
            None => None,
        };

        let request = match script {
            JobScript::Text(text) => HttpRequest::post("/compute/jobs/upload")
                .with_file(UploadFile::from_bytes(INLINE_SCRIPT_NAME, text.into_bytes())),
            JobScript::LocalFile(path) => {
                HttpRequest::post("/compute/jobs/upload").with_file(open_upload(&path, None)?)
            }
            JobScript::Remote(path) => {
                HttpRequest::post("/compute/jobs/path").with_form("targetPath", path)
            }
        }
        .with_machine(machine)
        .with_optional_form("account", account)
        .with_optional_form("env", env);

        let (task_id, outcome) = self.submit_task(request, 201).await?;
        let mut result = outcome.data;
        if let Some(job) = result.as_object_mut() {
            job.insert("firecrest_taskid".into(), json!(task_id));
        }
        Ok(result)
    }

    /// Accounting information of jobs, finished or not.
    ///
    /// Calls `GET /compute/acct`, then `GET /tasks`.
    pub async fn poll<S: AsRef<str>>(
        &self,
        machine: &str,
        job_ids: &[S],
        query: &AccountingQuery,
    ) -> ClientResult<Vec<Value>> {
        let jobs = joined(job_ids);
        let request = HttpRequest::get("/compute/acct")
            .with_machine(machine)
            .with_optional_query("jobs", jobs)
            .with_optional_query("starttime", query.start_time.as_deref())
            .with_optional_query("endtime", query.end_time.as_deref())
            .with_optional_query("pageSize", query.page_size)
            .with_optional_query("pageNumber", query.page_number);

        let (_, outcome) = self.submit_task(request, 200).await?;
        // sacct without matches is reported as an empty object
        Ok(filter_jobs(job_list(outcome.data), job_ids))
    }

    /// Jobs still queued or running.
    ///
    /// Calls `GET /compute/jobs`, then `GET /tasks`.
    pub async fn poll_active<S: AsRef<str>>(
        &self,
        machine: &str,
        job_ids: &[S],
        page_size: Option<u32>,
        page_number: Option<u32>,
    ) -> ClientResult<Vec<Value>> {
        let request = HttpRequest::get("/compute/jobs")
            .with_machine(machine)
            .with_optional_query("jobs", joined(job_ids))
            .with_optional_query("pageSize", page_size)
            .with_optional_query("pageNumber", page_number);

        let (_, outcome) = self.submit_task(request, 200).await?;
        Ok(filter_jobs(job_list(outcome.data), job_ids))
    }

    /// Cancel a job. Returns the scheduler's message.
    ///
    /// Calls `DELETE /compute/jobs/{job_id}`, then `GET /tasks`.
    pub async fn cancel(&self, machine: &str, job_id: &str) -> ClientResult<Value> {
        let request = HttpRequest::delete(format!("/compute/jobs/{job_id}")).with_machine(machine);
        let (_, outcome) = self.submit_task(request, 200).await?;
        Ok(outcome.data)
    }
}

fn joined<S: AsRef<str>>(ids: &[S]) -> Option<String> {
    (!ids.is_empty()).then(|| {
        ids.iter()
            .map(|id| id.as_ref())
            .collect::<Vec<_>>()
            .join(",")
    })
}

/// Job records of a task result given as a list or as an object keyed by index.
fn job_list(data: Value) -> Vec<Value> {
    match data {
        Value::Array(jobs) => jobs,
        Value::Object(map) => map.into_iter().map(|(_, job)| job).collect(),
        _ => Vec::new(),
    }
}

/// Keep the requested jobs; merged polls may return other callers' jobs.
fn filter_jobs<S: AsRef<str>>(jobs: Vec<Value>, job_ids: &[S]) -> Vec<Value> {
    if job_ids.is_empty() {
        return jobs;
    }
    jobs.into_iter()
        .filter(|job| {
            job_id_of(job).is_some_and(|id| job_ids.iter().any(|wanted| wanted.as_ref() == id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined() {
        assert_eq!(joined::<&str>(&[]), None);
        assert_eq!(joined(&["1", "2"]).as_deref(), Some("1,2"));
    }

    #[test]
    fn test_job_list_shapes() {
        assert!(job_list(json!({})).is_empty());
        assert_eq!(job_list(json!([{"jobid": "1"}])).len(), 1);
        let jobs = job_list(json!({"0": {"jobid": "1"}, "1": {"jobid": "2"}}));
        assert_eq!(jobs.len(), 2);
        assert!(job_list(json!("nothing")).is_empty());
    }

    #[test]
    fn test_filter_jobs() {
        let jobs = vec![
            json!({"jobid": "1"}),
            json!({"jobid": 2}),
            json!({"jobid": "3"}),
        ];
        let kept = filter_jobs(jobs.clone(), &["2", "3"]);
        assert_eq!(kept, vec![json!({"jobid": 2}), json!({"jobid": "3"})]);
        assert_eq!(filter_jobs::<&str>(jobs, &[]).len(), 3);
    }
}
