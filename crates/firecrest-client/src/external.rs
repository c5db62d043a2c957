//! Large-file transfers through the object-storage staging area.
//!
//! An external upload walks the task through 110 (waiting for the upload
//! form), 111 (form received), 112/113 (staging area to system) and ends in
//! 114, or 115 on failure. An external download goes through 116 and ends in
//! 117 with a temporary link, or 118 on failure.

use std::path::Path;
use std::time::Duration;

use firecrest_sched::{ResponseHistory, TaskStatus, classify_task_status};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::client::Firecrest;
use crate::error::{ClientError, ClientResult};

const UPLOAD_FORM_READY: TaskStatus = TaskStatus::new(111);
const UPLOAD_COMPLETE: TaskStatus = TaskStatus::new(114);
const DOWNLOAD_READY: TaskStatus = TaskStatus::new(117);

/// Wait between task fetches while the staging area is being prepared.
const STAGING_POLL: Duration = Duration::from_secs(1);

/// Which way the file travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Local file to the system's filesystem.
    Upload,
    /// System's filesystem to a local file.
    Download,
}

impl TransferDirection {
    fn is_final(&self, status: TaskStatus) -> bool {
        match self {
            Self::Upload => status >= UPLOAD_COMPLETE,
            Self::Download => status >= DOWNLOAD_READY,
        }
    }
}

/// An external transfer tracked through its task.
///
/// Failure codes 115 and 118 surface as [`firecrest_sched::SchedError::UploadFailed`]
/// and [`firecrest_sched::SchedError::DownloadFailed`] from whichever method
/// fetches the task.
#[derive(Debug)]
pub struct ExternalTransfer<'a> {
    client: &'a Firecrest,
    direction: TransferDirection,
    task_id: String,
    status: Option<TaskStatus>,
    data: Value,
    object_storage_data: Option<Value>,
    history: ResponseHistory,
}

impl<'a> ExternalTransfer<'a> {
    pub(crate) fn new(
        client: &'a Firecrest,
        direction: TransferDirection,
        task_id: String,
        history: ResponseHistory,
    ) -> Self {
        info!("Tracking external {direction:?} for task {task_id}");
        Self {
            client,
            direction,
            task_id,
            status: None,
            data: Value::Null,
            object_storage_data: None,
            history,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Current task status.
    ///
    /// Calls `GET /tasks` until the transfer reached a final status.
    pub async fn status(&mut self) -> ClientResult<TaskStatus> {
        self.update().await?;
        Ok(self.status.unwrap_or(TaskStatus::QUEUED))
    }

    /// `false` once the transfer has finished.
    pub async fn in_progress(&mut self) -> ClientResult<bool> {
        let status = self.status().await?;
        Ok(!self.direction.is_final(status))
    }

    /// The task's `data` from the latest fetch.
    pub async fn data(&mut self) -> ClientResult<&Value> {
        self.update().await?;
        Ok(&self.data)
    }

    /// What the staging area needs for the transfer: the upload form of an
    /// upload, the link of a download.
    ///
    /// Polls the task once per second until the service provides it.
    pub async fn object_storage_data(&mut self) -> ClientResult<Value> {
        if self.object_storage_data.is_none() {
            self.update().await?;
        }
        loop {
            if let Some(data) = &self.object_storage_data {
                return Ok(data.clone());
            }
            info!("Sleeping for {STAGING_POLL:?}");
            tokio::time::sleep(STAGING_POLL).await;
            self.update().await?;
        }
    }

    /// Push the local file into the staging area.
    ///
    /// Runs the upload command the service hands out with the form. The move
    /// from the staging area to the system starts a few seconds later; follow
    /// it with [`status`](Self::status).
    pub async fn finish_upload(&mut self) -> ClientResult<()> {
        self.expect_direction(TransferDirection::Upload)?;
        let command = match self.object_storage_data().await?.get("command") {
            Some(Value::String(command)) => command.clone(),
            _ => {
                return Err(ClientError::Transfer(format!(
                    "task {} carries no upload command",
                    self.task_id
                )));
            }
        };

        info!("Uploading the file to the staging area with the command: {command}");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await?;
        if !output.status.success() {
            let err = ClientError::Transfer(format!(
                "Failed to finish upload with error: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
            error!("{err}");
            return Err(err);
        }
        Ok(())
    }

    /// Temporary link of the staged file.
    pub async fn object_storage_link(&mut self) -> ClientResult<String> {
        self.expect_direction(TransferDirection::Download)?;
        match self.object_storage_data().await? {
            Value::String(url) => Ok(url),
            data => data
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ClientError::Transfer(format!("task {} carries no link", self.task_id))
                }),
        }
    }

    /// Fetch the staged file into `target`.
    pub async fn finish_download(&mut self, target: impl AsRef<Path>) -> ClientResult<()> {
        let url = self.object_storage_link().await?;
        let target = target.as_ref();
        info!("Downloading the file from {url} and saving to {}", target.display());

        let mut response = self
            .client
            .staging_http()?
            .get(&url)
            .send()
            .await?
            .error_for_status()?;
        let mut file = tokio::fs::File::create(target).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Invalidate the temporary link of a download.
    ///
    /// Calls `POST /storage/xfer-external/invalidate`.
    pub async fn invalidate_link(&self) -> ClientResult<()> {
        self.expect_direction(TransferDirection::Download)?;
        self.client.invalidate(&self.task_id).await?;
        Ok(())
    }

    async fn update(&mut self) -> ClientResult<()> {
        if self.status.is_some_and(|status| self.direction.is_final(status)) {
            return Ok(());
        }

        let task = self
            .client
            .scheduler()
            .task(&self.task_id, &mut self.history)
            .await?;
        classify_task_status(&task, &self.history)?;
        info!("Task {} has status {}", self.task_id, task.status);

        if self.object_storage_data.is_none() {
            if task.status == UPLOAD_FORM_READY {
                self.object_storage_data = task.data.get("msg").cloned();
            } else if task.status == DOWNLOAD_READY {
                self.object_storage_data = Some(task.data.clone());
            }
        }
        self.status = Some(task.status);
        self.data = task.data;
        Ok(())
    }

    fn expect_direction(&self, direction: TransferDirection) -> ClientResult<()> {
        if self.direction == direction {
            Ok(())
        } else {
            Err(ClientError::InvalidArgument(format!(
                "task {} is an external {:?}, not a {direction:?}",
                self.task_id, self.direction
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_statuses() {
        assert!(!TransferDirection::Upload.is_final(UPLOAD_FORM_READY));
        assert!(!TransferDirection::Upload.is_final(TaskStatus::new(113)));
        assert!(TransferDirection::Upload.is_final(UPLOAD_COMPLETE));
        assert!(!TransferDirection::Download.is_final(TaskStatus::new(116)));
        assert!(TransferDirection::Download.is_final(DOWNLOAD_READY));
    }
}
