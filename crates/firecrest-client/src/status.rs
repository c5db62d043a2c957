//! Status microservice.

use firecrest_sched::HttpRequest;
use serde_json::Value;

use crate::client::{Firecrest, take_field};
use crate::error::ClientResult;
use crate::types::{ServiceStatus, SystemStatus, decode};

impl Firecrest {
    /// Status of every microservice.
    ///
    /// Calls `GET /status/services`.
    pub async fn all_services(&self) -> ClientResult<Vec<ServiceStatus>> {
        let payload = self.call(HttpRequest::get("/status/services"), 200).await?;
        decode(take_field(payload, "out")?, "services")
    }

    /// Status of one microservice.
    ///
    /// Calls `GET /status/services/{name}`.
    pub async fn service(&self, name: &str) -> ClientResult<ServiceStatus> {
        let payload = self
            .call(HttpRequest::get(format!("/status/services/{name}")), 200)
            .await?;
        decode(payload, "service")
    }

    /// Status of every system.
    ///
    /// Calls `GET /status/systems`.
    pub async fn all_systems(&self) -> ClientResult<Vec<SystemStatus>> {
        let payload = self.call(HttpRequest::get("/status/systems"), 200).await?;
        decode(take_field(payload, "out")?, "systems")
    }

    /// Status of one system.
    ///
    /// Calls `GET /status/systems/{name}`.
    pub async fn system(&self, name: &str) -> ClientResult<SystemStatus> {
        let payload = self
            .call(HttpRequest::get(format!("/status/systems/{name}")), 200)
            .await?;
        decode(take_field(payload, "out")?, "system")
    }

    /// Configuration parameters of the deployment.
    ///
    /// Calls `GET /status/parameters`.
    pub async fn parameters(&self) -> ClientResult<Value> {
        let payload = self.call(HttpRequest::get("/status/parameters"), 200).await?;
        take_field(payload, "out")
    }

    /// Filesystem status per system, or of one system.
    ///
    /// Calls `GET /status/filesystems[/{system}]`.
    pub async fn filesystems(&self, system: Option<&str>) -> ClientResult<Value> {
        match system {
            Some(name) => {
                let payload = self
                    .call(HttpRequest::get(format!("/status/filesystems/{name}")), 200)
                    .await?;
                Ok(serde_json::json!({ name: take_field(payload, "out")? }))
            }
            None => {
                let payload = self.call(HttpRequest::get("/status/filesystems"), 200).await?;
                take_field(payload, "out")
            }
        }
    }
}
