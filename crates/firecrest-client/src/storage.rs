//! Storage microservice: internal transfer jobs and external transfers.

use firecrest_sched::{HttpRequest, ResponseHistory, SchedError, TASK_ID_HEADER};
use serde_json::{Value, json};

use crate::client::{Firecrest, take_field};
use crate::error::ClientResult;
use crate::external::{ExternalTransfer, TransferDirection};
use crate::types::TransferJob;

impl Firecrest {
    /// Move `source_path` to `target_path` in a transfer job.
    ///
    /// Calls `POST /storage/xfer-internal/mv`, then `GET /tasks`.
    pub async fn submit_move_job(
        &self,
        machine: &str,
        source_path: &str,
        target_path: &str,
        job: &TransferJob,
    ) -> ClientResult<Value> {
        self.internal_transfer("mv", machine, Some(source_path), target_path, job, &[])
            .await
    }

    /// Copy `source_path` to `target_path` in a transfer job.
    ///
    /// Calls `POST /storage/xfer-internal/cp`, then `GET /tasks`.
    pub async fn submit_copy_job(
        &self,
        machine: &str,
        source_path: &str,
        target_path: &str,
        job: &TransferJob,
    ) -> ClientResult<Value> {
        self.internal_transfer("cp", machine, Some(source_path), target_path, job, &[])
            .await
    }

    /// Calls `POST /storage/xfer-internal/rsync`, then `GET /tasks`.
    pub async fn submit_rsync_job(
        &self,
        machine: &str,
        source_path: &str,
        target_path: &str,
        job: &TransferJob,
    ) -> ClientResult<Value> {
        self.internal_transfer("rsync", machine, Some(source_path), target_path, job, &[])
            .await
    }

    /// Delete `target_path` in a transfer job.
    ///
    /// Calls `POST /storage/xfer-internal/rm`, then `GET /tasks`.
    pub async fn submit_delete_job(
        &self,
        machine: &str,
        target_path: &str,
        job: &TransferJob,
    ) -> ClientResult<Value> {
        self.internal_transfer("rm", machine, None, target_path, job, &[])
            .await
    }

    /// Pack `source_path` into a gzip tarball at `target_path`.
    ///
    /// Calls `POST /storage/xfer-internal/compress`, then `GET /tasks`.
    pub async fn submit_compress_job(
        &self,
        machine: &str,
        source_path: &str,
        target_path: &str,
        dereference: bool,
        job: &TransferJob,
    ) -> ClientResult<Value> {
        let extra = if dereference {
            vec![("dereference", "true".to_string())]
        } else {
            Vec::new()
        };
        self.internal_transfer("compress", machine, Some(source_path), target_path, job, &extra)
            .await
    }

    /// Unpack the archive `source_path` into `target_path`.
    ///
    /// `extension` is one of `auto`, `.zip`, `.tar`, `.tgz`, `.gz` or `.bz2`;
    /// `auto` lets the service guess from the file name.
    ///
    /// Calls `POST /storage/xfer-internal/extract`, then `GET /tasks`.
    pub async fn submit_extract_job(
        &self,
        machine: &str,
        source_path: &str,
        target_path: &str,
        extension: &str,
        job: &TransferJob,
    ) -> ClientResult<Value> {
        let extra = [("extension", extension.to_string())];
        self.internal_transfer("extract", machine, Some(source_path), target_path, job, &extra)
            .await
    }

    /// Start an upload through the staging area.
    ///
    /// `source_path` names the local file; the service answers with a task
    /// whose status tracks the transfer. Finish it with
    /// [`ExternalTransfer::finish_upload`].
    ///
    /// Calls `POST /storage/xfer-external/upload`.
    pub async fn external_upload(
        &self,
        machine: &str,
        source_path: &str,
        target_path: &str,
    ) -> ClientResult<ExternalTransfer<'_>> {
        let request = HttpRequest::post("/storage/xfer-external/upload")
            .with_machine(machine)
            .with_form("targetPath", target_path)
            .with_form("sourcePath", source_path);
        self.external_transfer(request, TransferDirection::Upload)
            .await
    }

    /// Start a download through the staging area.
    ///
    /// Calls `POST /storage/xfer-external/download`.
    pub async fn external_download(
        &self,
        machine: &str,
        source_path: &str,
    ) -> ClientResult<ExternalTransfer<'_>> {
        let request = HttpRequest::post("/storage/xfer-external/download")
            .with_machine(machine)
            .with_form("sourcePath", source_path);
        self.external_transfer(request, TransferDirection::Download)
            .await
    }

    /// Invalidate the temporary staging-area link of a download task.
    ///
    /// Calls `POST /storage/xfer-external/invalidate`.
    pub async fn invalidate(&self, task_id: &str) -> ClientResult<Option<Value>> {
        let request =
            HttpRequest::post("/storage/xfer-external/invalidate").with_header(TASK_ID_HEADER, task_id);
        self.call_optional(request, 201).await
    }

    async fn external_transfer(
        &self,
        request: HttpRequest,
        direction: TransferDirection,
    ) -> ClientResult<ExternalTransfer<'_>> {
        let mut history = ResponseHistory::new();
        let payload = self
            .scheduler()
            .call(&request, 201, &mut history)
            .await?;
        let task_id = match take_field(payload, "task_id")? {
            Value::String(id) => id,
            other => {
                return Err(SchedError::Payload(format!(
                    "{} returned a non-string task_id: {other}",
                    request.path
                ))
                .into());
            }
        };
        Ok(ExternalTransfer::new(self, direction, task_id, history))
    }

    /// The job info gains the `system` the transfer runs on.
    async fn internal_transfer(
        &self,
        operation: &str,
        machine: &str,
        source_path: Option<&str>,
        target_path: &str,
        job: &TransferJob,
        extra: &[(&str, String)],
    ) -> ClientResult<Value> {
        let mut request = HttpRequest::post(format!("/storage/xfer-internal/{operation}"))
            .with_machine(machine)
            .with_form("targetPath", target_path)
            .with_optional_form("sourcePath", source_path)
            .with_optional_form("jobname", job.job_name.as_deref())
            .with_optional_form("time", job.time.as_deref())
            .with_optional_form("stageOutJobId", job.stage_out_job_id.as_deref())
            .with_optional_form("account", job.account.as_deref());
        for (name, value) in extra {
            request = request.with_form(*name, value.clone());
        }

        let (_, outcome) = self.submit_task(request, 201).await?;
        let mut result = outcome.data;
        if let Some(info) = result.as_object_mut() {
            info.insert("system".into(), json!(outcome.system));
        }
        Ok(result)
    }
}
