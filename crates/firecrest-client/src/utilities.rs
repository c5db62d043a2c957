//! Utilities microservice: small synchronous file operations.

use std::path::Path;

use firecrest_sched::{HttpRequest, ResponseHistory, UploadFile, classify_optional};
use serde_json::Value;
use tracing::info;

use crate::client::{Firecrest, take_field};
use crate::error::{ClientError, ClientResult};
use crate::types::{LsEntry, decode};

fn on(machine: &str, request: HttpRequest) -> HttpRequest {
    request.with_machine(machine)
}

fn flag(set: bool) -> Option<&'static str> {
    set.then_some("true")
}

impl Firecrest {
    /// List a remote directory.
    ///
    /// Calls `GET /utilities/ls`.
    pub async fn list_files(
        &self,
        machine: &str,
        target_path: &str,
        show_hidden: bool,
        recursive: bool,
    ) -> ClientResult<Vec<LsEntry>> {
        let request = on(machine, HttpRequest::get("/utilities/ls"))
            .with_query("targetPath", target_path)
            .with_optional_query("showhidden", flag(show_hidden))
            .with_optional_query("recursive", flag(recursive));
        let payload = self.call(request, 200).await?;
        decode(take_field(payload, "output")?, "ls output")
    }

    /// Create a directory; `parents` creates missing parents too.
    /// Returns the path of the new directory.
    ///
    /// Calls `POST /utilities/mkdir`.
    pub async fn mkdir(&self, machine: &str, target_path: &str, parents: bool) -> ClientResult<String> {
        let request = on(machine, HttpRequest::post("/utilities/mkdir"))
            .with_form("targetPath", target_path)
            .with_optional_form("p", flag(parents));
        self.call(request, 201).await?;
        Ok(target_path.to_string())
    }

    /// Rename or move a file. Returns the new path.
    ///
    /// Calls `PUT /utilities/rename`.
    pub async fn mv(&self, machine: &str, source_path: &str, target_path: &str) -> ClientResult<String> {
        let request = on(machine, HttpRequest::put("/utilities/rename"))
            .with_form("targetPath", target_path)
            .with_form("sourcePath", source_path);
        self.call(request, 200).await?;
        Ok(target_path.to_string())
    }

    /// Calls `PUT /utilities/chmod`.
    pub async fn chmod(&self, machine: &str, target_path: &str, mode: &str) -> ClientResult<()> {
        let request = on(machine, HttpRequest::put("/utilities/chmod"))
            .with_form("targetPath", target_path)
            .with_form("mode", mode);
        self.call(request, 200).await?;
        Ok(())
    }

    /// Change owner and/or group. Nothing is sent when both are `None`.
    ///
    /// Calls `PUT /utilities/chown`.
    pub async fn chown(
        &self,
        machine: &str,
        target_path: &str,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> ClientResult<()> {
        if owner.is_none() && group.is_none() {
            return Ok(());
        }
        let request = on(machine, HttpRequest::put("/utilities/chown"))
            .with_form("targetPath", target_path)
            .with_optional_form("owner", owner)
            .with_optional_form("group", group);
        self.call(request, 200).await?;
        Ok(())
    }

    /// Copy a file. Returns the path of the copy.
    ///
    /// Calls `POST /utilities/copy`.
    pub async fn copy(&self, machine: &str, source_path: &str, target_path: &str) -> ClientResult<String> {
        let request = on(machine, HttpRequest::post("/utilities/copy"))
            .with_form("targetPath", target_path)
            .with_form("sourcePath", source_path);
        self.call(request, 201).await?;
        Ok(target_path.to_string())
    }

    /// Create a symbolic link at `link_path` pointing to `target_path`.
    ///
    /// Calls `POST /utilities/symlink`.
    pub async fn symlink(&self, machine: &str, target_path: &str, link_path: &str) -> ClientResult<String> {
        let request = on(machine, HttpRequest::post("/utilities/symlink"))
            .with_form("targetPath", target_path)
            .with_form("linkPath", link_path);
        self.call(request, 201).await?;
        Ok(target_path.to_string())
    }

    /// Output of `file` on the remote path.
    ///
    /// Calls `GET /utilities/file`.
    pub async fn file_type(&self, machine: &str, target_path: &str) -> ClientResult<String> {
        let request =
            on(machine, HttpRequest::get("/utilities/file")).with_query("targetPath", target_path);
        self.output_string(request).await
    }

    /// `stat` of the remote path.
    ///
    /// Calls `GET /utilities/stat`.
    pub async fn stat(&self, machine: &str, target_path: &str, dereference: bool) -> ClientResult<Value> {
        let request = on(machine, HttpRequest::get("/utilities/stat"))
            .with_query("targetPath", target_path)
            .with_optional_query("dereference", flag(dereference));
        let payload = self.call(request, 200).await?;
        take_field(payload, "output")
    }

    /// SHA-256 checksum of the remote file.
    ///
    /// Calls `GET /utilities/checksum`.
    pub async fn checksum(&self, machine: &str, target_path: &str) -> ClientResult<String> {
        let request = on(machine, HttpRequest::get("/utilities/checksum"))
            .with_query("targetPath", target_path);
        self.output_string(request).await
    }

    /// First lines or bytes of a file. `lines` and `bytes` are exclusive.
    ///
    /// Calls `GET /utilities/head`.
    pub async fn head(
        &self,
        machine: &str,
        target_path: &str,
        lines: Option<&str>,
        bytes: Option<&str>,
        skip_ending: bool,
    ) -> ClientResult<String> {
        if lines.is_some() && bytes.is_some() {
            return Err(ClientError::InvalidArgument(
                "`lines` and `bytes` cannot be set together".into(),
            ));
        }
        let request = on(machine, HttpRequest::get("/utilities/head"))
            .with_query("targetPath", target_path)
            .with_optional_query("lines", lines)
            .with_optional_query("bytes", bytes)
            .with_optional_query("skip_ending", flag(skip_ending));
        self.output_string(request).await
    }

    /// Last lines or bytes of a file. `lines` and `bytes` are exclusive.
    ///
    /// Calls `GET /utilities/tail`.
    pub async fn tail(
        &self,
        machine: &str,
        target_path: &str,
        lines: Option<&str>,
        bytes: Option<&str>,
        skip_beginning: bool,
    ) -> ClientResult<String> {
        if lines.is_some() && bytes.is_some() {
            return Err(ClientError::InvalidArgument(
                "`lines` and `bytes` cannot be set together".into(),
            ));
        }
        let request = on(machine, HttpRequest::get("/utilities/tail"))
            .with_query("targetPath", target_path)
            .with_optional_query("lines", lines)
            .with_optional_query("bytes", bytes)
            .with_optional_query("skip_beginning", flag(skip_beginning));
        self.output_string(request).await
    }

    /// Contents of a small file.
    ///
    /// Calls `GET /utilities/view`.
    pub async fn view(&self, machine: &str, target_path: &str) -> ClientResult<String> {
        let request =
            on(machine, HttpRequest::get("/utilities/view")).with_query("targetPath", target_path);
        self.output_string(request).await
    }

    /// Username on the machine.
    ///
    /// Calls `GET /utilities/whoami`.
    pub async fn whoami(&self, machine: &str) -> ClientResult<String> {
        self.output_string(on(machine, HttpRequest::get("/utilities/whoami")))
            .await
    }

    /// Download a small file to `target`.
    ///
    /// Calls `GET /utilities/download`.
    pub async fn simple_download(
        &self,
        machine: &str,
        source_path: &str,
        target: impl AsRef<Path>,
    ) -> ClientResult<()> {
        let request = on(machine, HttpRequest::get("/utilities/download"))
            .with_query("sourcePath", source_path);
        let mut history = ResponseHistory::new();
        history.push(self.scheduler().send(&request).await?);
        classify_optional(&history, 200)?;

        let body = history.last().map(|r| r.body.as_slice()).unwrap_or_default();
        tokio::fs::write(target.as_ref(), body).await?;
        info!(
            "Downloaded {source_path} to {} ({} bytes)",
            target.as_ref().display(),
            body.len()
        );
        Ok(())
    }

    /// Upload a small file into the remote directory `target_path`.
    ///
    /// The stream is rewound to its starting offset if the call is
    /// rate-limited and resent.
    ///
    /// Calls `POST /utilities/upload`.
    pub async fn simple_upload(
        &self,
        machine: &str,
        file: UploadFile,
        target_path: &str,
    ) -> ClientResult<()> {
        let request = on(machine, HttpRequest::post("/utilities/upload"))
            .with_form("targetPath", target_path)
            .with_file(file);
        self.call(request, 201).await?;
        Ok(())
    }

    /// Upload a local file, keeping its name unless `file_name` is given.
    pub async fn simple_upload_path(
        &self,
        machine: &str,
        source: impl AsRef<Path>,
        target_path: &str,
        file_name: Option<&str>,
    ) -> ClientResult<()> {
        let file = open_upload(source.as_ref(), file_name)?;
        self.simple_upload(machine, file, target_path).await
    }

    /// Delete a file or directory.
    ///
    /// Calls `DELETE /utilities/rm`.
    pub async fn simple_delete(&self, machine: &str, target_path: &str) -> ClientResult<()> {
        let request =
            on(machine, HttpRequest::delete("/utilities/rm")).with_form("targetPath", target_path);
        self.call_optional(request, 204).await?;
        Ok(())
    }

    async fn output_string(&self, request: HttpRequest) -> ClientResult<String> {
        let payload = self.call(request, 200).await?;
        decode(take_field(payload, "output")?, "output")
    }
}

/// Open a local file as an upload, named after the file unless overridden.
pub(crate) fn open_upload(path: &Path, file_name: Option<&str>) -> ClientResult<UploadFile> {
    let name = match file_name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ClientError::InvalidArgument(format!("{} is not a file", path.display()))
            })?,
    };
    let file = std::fs::File::open(path)?;
    Ok(UploadFile::new(name, file))
}
