//! HTTP transport seam.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SchedResult;
use crate::http::{HttpRequest, HttpResponse};

/// Sends one physical HTTP request.
///
/// Implementations resolve `request.path` against their base URL, apply
/// their own timeouts and report network failures as
/// [`SchedError::Transport`](crate::SchedError::Transport). Any status code,
/// including 4xx and 5xx, is a successful send.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> SchedResult<HttpResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &HttpRequest) -> SchedResult<HttpResponse> {
        (**self).send(request).await
    }
}
