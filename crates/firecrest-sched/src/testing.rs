//! Scripted in-memory transport for tests.
//!
//! ```ignore
//! let transport = Arc::new(MockTransport::new());
//! transport.push(HttpResponse::new(429).with_header("Retry-After", "1"));
//! transport.push(HttpResponse::json(200, &json!({"tasks": {}})));
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::error::{SchedError, SchedResult};
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::Transport;

type Responder = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

enum Reply {
    Response(HttpResponse),
    Error(String),
}

/// A request as the mock saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    /// Virtual time at which the send started.
    pub at: Instant,
    /// Bytes of the file part, read the way a real transport would.
    pub upload: Option<Vec<u8>>,
}

/// Transport that replays queued replies and records every request.
///
/// Queued replies are used first; once the queue is empty the responder
/// installed with [`MockTransport::with_responder`] answers, and without
/// one the send fails with a transport error.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Reply>>,
    responder: Option<Responder>,
    latency: Duration,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer unscripted requests with `responder`.
    pub fn with_responder(
        mut self,
        responder: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Keep every send in flight for `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a response.
    pub fn push(&self, response: HttpResponse) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(Reply::Response(response));
    }

    /// Queue a JSON response.
    pub fn push_json(&self, status: u16, body: Value) {
        self.push(HttpResponse::json(status, &body));
    }

    /// Queue a transport failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(Reply::Error(message.into()));
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("mock request log lock poisoned")
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .expect("mock request log lock poisoned")
            .len()
    }

    /// Requests whose path starts with `prefix`.
    pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.request.path.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> SchedResult<HttpResponse> {
        let upload = match request.body.upload() {
            Some(file) => Some(
                file.read_remaining()
                    .map_err(|e| SchedError::Transport(e.to_string()))?,
            ),
            None => None,
        };
        self.requests
            .lock()
            .expect("mock request log lock poisoned")
            .push(RecordedRequest {
                request: request.clone(),
                at: Instant::now(),
                upload,
            });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front();
        match scripted {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Error(message)) => Err(SchedError::Transport(message)),
            None => match &self.responder {
                Some(responder) => Ok(responder(request)),
                None => Err(SchedError::Transport(format!(
                    "no scripted response for {} {}",
                    request.method, request.path
                ))),
            },
        }
    }
}

/// Body of `GET /tasks` listing `(id, status)` pairs.
pub fn tasks_body(tasks: &[(&str, &str)]) -> Value {
    let entries: serde_json::Map<String, Value> = tasks
        .iter()
        .map(|(id, status)| {
            let task = json!({
                "task_id": id,
                "hash_id": id,
                "status": status,
                "description": "",
                "data": {},
            });
            (id.to_string(), task)
        })
        .collect();
    json!({ "tasks": entries })
}

/// `GET /tasks` response with one task carrying `data` and `system`.
pub fn task_response(id: &str, status: &str, data: Value, system: Option<&str>) -> HttpResponse {
    let mut task = json!({
        "task_id": id,
        "hash_id": id,
        "status": status,
        "description": "",
        "data": data,
    });
    if let Some(system) = system {
        task["system"] = json!(system);
    }
    HttpResponse::json(200, &json!({ "tasks": { id: task } }))
}
