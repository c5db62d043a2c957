//! Dispatch pipeline.
//!
//! A plain call goes through three stages, outermost first:
//!
//! ```text
//! RetryStage -> ThrottleStage -> SendStage -> Transport
//! ```
//!
//! [`RetryStage`] resends on 429, [`ThrottleStage`] waits for the category
//! deadline and marks the dispatch, [`SendStage`] adds the bearer token and
//! hands the request to the transport.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::auth::TokenProvider;
use crate::category::ServiceCategory;
use crate::error::{SchedError, SchedResult};
use crate::http::{HttpRequest, HttpResponse};
use crate::retry::{RetryPolicy, resolve_backoff};
use crate::throttle::RateLimiter;
use crate::transport::Transport;

/// One stage of the dispatch pipeline.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, request: &HttpRequest) -> SchedResult<HttpResponse>;
}

#[async_trait]
impl<D: Dispatch + ?Sized> Dispatch for Arc<D> {
    async fn dispatch(&self, request: &HttpRequest) -> SchedResult<HttpResponse> {
        (**self).dispatch(request).await
    }
}

fn category_of(request: &HttpRequest) -> SchedResult<ServiceCategory> {
    request.category().ok_or_else(|| {
        SchedError::InvalidRequest(format!("no service category for path {}", request.path))
    })
}

/// Adds the bearer token and sends through the transport.
pub struct SendStage {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
}

impl SendStage {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { transport, tokens }
    }
}

#[async_trait]
impl Dispatch for SendStage {
    async fn dispatch(&self, request: &HttpRequest) -> SchedResult<HttpResponse> {
        let token = self.tokens.get_token().await?;
        let mut request = request.clone();
        request
            .headers
            .insert("Authorization", format!("Bearer {token}"));

        info!("Making {} request to {}", request.method, request.path);
        let started = Instant::now();
        let result = self.transport.send(&request).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(response) => debug!(
                status = response.status,
                "{} {} finished in {elapsed:?}", request.method, request.path
            ),
            Err(e) => debug!("{} {} failed after {elapsed:?}: {e}", request.method, request.path),
        }
        result
    }
}

/// Waits for the category deadline, then marks the dispatch.
pub struct ThrottleStage<D> {
    inner: D,
    limiter: Arc<RateLimiter>,
}

impl<D> ThrottleStage<D> {
    pub fn new(inner: D, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<D: Dispatch> Dispatch for ThrottleStage<D> {
    async fn dispatch(&self, request: &HttpRequest) -> SchedResult<HttpResponse> {
        let category = category_of(request)?;
        self.limiter.acquire(category).await;
        self.inner.dispatch(request).await
    }
}

/// Resends on 429, raising the category deadline by the advertised reset.
pub struct RetryStage<D> {
    inner: D,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl<D> RetryStage<D> {
    pub fn new(inner: D, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            limiter,
            policy,
        }
    }
}

#[async_trait]
impl<D: Dispatch> Dispatch for RetryStage<D> {
    async fn dispatch(&self, request: &HttpRequest) -> SchedResult<HttpResponse> {
        let category = category_of(request)?;
        let upload = request.body.upload();
        let offset = upload
            .map(|file| file.position())
            .transpose()
            .map_err(|e| SchedError::InvalidRequest(format!("upload stream: {e}")))?;

        let mut retries = 0;
        loop {
            let response = self.inner.dispatch(request).await?;
            if !response.is_rate_limited() {
                return Ok(response);
            }
            if !self.policy.allows(retries) {
                debug!("Rate limit retry budget of {retries} exhausted for {}", request.path);
                return Ok(response);
            }

            let reset = resolve_backoff(&response.headers);
            if let (Some(file), Some(offset)) = (upload, offset) {
                debug!("Rewinding upload {} to offset {offset}", file.file_name());
                file.rewind_to(offset)
                    .map_err(|e| SchedError::InvalidRequest(format!("upload stream: {e}")))?;
            }
            info!(
                "Rate limit in `{category}` is reached, next request will be possible in {}s",
                reset.as_secs_f64()
            );
            self.limiter.raise(category, reset);
            retries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::http::UploadFile;
    use crate::testing::MockTransport;
    use rustc_hash::FxHashMap;
    use std::time::Duration;

    fn send_stage(transport: &Arc<MockTransport>) -> SendStage {
        SendStage::new(transport.clone(), Arc::new(StaticToken::new("tok")))
    }

    #[tokio::test]
    async fn test_send_stage_adds_bearer() {
        let transport = Arc::new(MockTransport::new());
        transport.push(HttpResponse::new(200));
        let stage = send_stage(&transport);

        let response = stage.dispatch(&HttpRequest::get("/status/systems")).await.unwrap();
        assert_eq!(response.status, 200);
        let sent = transport.requests();
        assert_eq!(
            sent[0].request.headers.get("authorization"),
            Some("Bearer tok")
        );
    }

    #[tokio::test]
    async fn test_send_stage_token_failure() {
        let transport = Arc::new(MockTransport::new());
        let stage = SendStage::new(
            transport.clone(),
            Arc::new(crate::auth::EnvTokenProvider::new("FIRECREST_STAGE_TEST_UNSET")),
        );
        let err = stage.dispatch(&HttpRequest::get("/status/systems")).await.unwrap_err();
        assert!(matches!(err, SchedError::Token(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_stage_spacing() {
        let transport = Arc::new(MockTransport::new());
        let limiter = Arc::new(RateLimiter::default());
        let stage = ThrottleStage::new(send_stage(&transport), limiter);
        for _ in 0..3 {
            transport.push(HttpResponse::new(200));
        }

        let start = Instant::now();
        for _ in 0..3 {
            stage.dispatch(&HttpRequest::get("/compute/jobs")).await.unwrap();
        }
        let sent = transport.requests();
        assert_eq!(sent[0].at - start, Duration::ZERO);
        assert_eq!(sent[1].at - sent[0].at, Duration::from_secs(1));
        assert_eq!(sent[2].at - sent[1].at, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_throttle_stage_rejects_unknown_path() {
        let transport = Arc::new(MockTransport::new());
        let stage = ThrottleStage::new(send_stage(&transport), Arc::new(RateLimiter::default()));
        let err = stage.dispatch(&HttpRequest::get("/nowhere")).await.unwrap_err();
        assert!(matches!(err, SchedError::InvalidRequest(_)));
    }

    fn pipeline(
        transport: &Arc<MockTransport>,
        policy: RetryPolicy,
    ) -> RetryStage<ThrottleStage<SendStage>> {
        let limiter = Arc::new(RateLimiter::new(&FxHashMap::default()));
        RetryStage::new(
            ThrottleStage::new(send_stage(transport), limiter.clone()),
            limiter,
            policy,
        )
    }

    fn too_many(retry_after: &str) -> HttpResponse {
        HttpResponse::new(429).with_header("Retry-After", retry_after)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let transport = Arc::new(MockTransport::new());
        transport.push(too_many("2"));
        transport.push(too_many("2"));
        transport.push(HttpResponse::new(200));
        let stage = pipeline(&transport, RetryPolicy::unbounded());

        let start = Instant::now();
        let response = stage.dispatch(&HttpRequest::get("/tasks")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.call_count(), 3);
        assert_eq!(Instant::now() - start, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_caps_oversized_reset() {
        let transport = Arc::new(MockTransport::new());
        transport.push(too_many("9223372036854775807"));
        transport.push(HttpResponse::new(200));
        let stage = pipeline(&transport, RetryPolicy::unbounded());

        let start = Instant::now();
        let response = stage.dispatch(&HttpRequest::get("/tasks")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(Instant::now() - start, crate::retry::MAX_RESET);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_returns_429() {
        let transport = Arc::new(MockTransport::new());
        transport.push(too_many("1"));
        transport.push(too_many("1"));
        transport.push(HttpResponse::new(200));
        let stage = pipeline(&transport, RetryPolicy::bounded(1));

        let response = stage.dispatch(&HttpRequest::get("/tasks")).await.unwrap();
        assert_eq!(response.status, 429);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_missing_header_waits_default() {
        let transport = Arc::new(MockTransport::new());
        transport.push(HttpResponse::new(429));
        transport.push(HttpResponse::new(201));
        let stage = pipeline(&transport, RetryPolicy::unbounded());

        let start = Instant::now();
        let response = stage.dispatch(&HttpRequest::post("/utilities/mkdir")).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(Instant::now() - start, crate::retry::DEFAULT_RESET);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rewinds_upload() {
        let transport = Arc::new(MockTransport::new());
        transport.push(too_many("0"));
        transport.push(too_many("0"));
        transport.push(HttpResponse::new(201));
        let stage = pipeline(&transport, RetryPolicy::unbounded());

        let file = UploadFile::from_bytes("script.sh", "#!/bin/bash\necho hi\n");
        let request = HttpRequest::post("/utilities/upload")
            .with_form("targetPath", "/home/user")
            .with_file(file);
        stage.dispatch(&request).await.unwrap();

        let bodies: Vec<_> = transport
            .requests()
            .into_iter()
            .map(|r| r.upload.unwrap())
            .collect();
        assert_eq!(bodies.len(), 3);
        for body in &bodies {
            assert_eq!(body.as_slice(), b"#!/bin/bash\necho hi\n");
        }
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error("connection reset");
        let stage = pipeline(&transport, RetryPolicy::unbounded());
        let err = stage.dispatch(&HttpRequest::get("/tasks")).await.unwrap_err();
        assert!(matches!(err, SchedError::Transport(_)));
        assert_eq!(transport.call_count(), 1);
    }
}
