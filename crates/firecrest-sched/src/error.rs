//! Error handling for the request scheduler.

use std::fmt;

use thiserror::Error;

use crate::http::HttpResponse;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// The ordered HTTP responses that led to an error.
///
/// Endpoint wrappers that chain several calls (submit, then poll the task)
/// push every response they observe, so a failure report shows the whole
/// exchange and not only the last step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHistory(Vec<HttpResponse>);

impl ResponseHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a response.
    pub fn push(&mut self, response: HttpResponse) {
        self.0.push(response);
    }

    /// The most recent response, if any.
    pub fn last(&self) -> Option<&HttpResponse> {
        self.0.last()
    }

    /// Number of recorded responses.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the responses, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HttpResponse> {
        self.0.iter()
    }
}

impl From<HttpResponse> for ResponseHistory {
    fn from(response: HttpResponse) -> Self {
        Self(vec![response])
    }
}

impl fmt::Display for ResponseHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last() {
            None => write!(f, "no response received"),
            Some(response) => match response.json_body() {
                Some(body) => write!(f, "last request: {} {}", response.status, body),
                None => write!(f, "last request: {} not JSON", response.status),
            },
        }
    }
}

/// Tag of a [`SchedError`], for callers that branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    NotFound,
    HeaderSignaled,
    UnexpectedStatus,
    NonJsonResponse,
    UploadFailed,
    DownloadFailed,
    PollingExhausted,
    Service,
    Payload,
    Transport,
    Token,
    InvalidRequest,
    Internal,
}

/// Errors that can occur while scheduling or classifying a request.
///
/// The type is `Clone` so one classified outcome can be handed to every
/// caller that waited on the same coalesced round.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum SchedError {
    /// HTTP 401 from the service.
    #[error("{history}: unauthorized request")]
    Auth { history: ResponseHistory },

    /// HTTP 404 from the service, or a task id missing from the task list.
    #[error("{history}: resource not found")]
    NotFound { history: ResponseHistory },

    /// The service reported a failure through one of its error headers.
    #[error("{history}: {header}: {message}")]
    HeaderSignaled {
        header: String,
        message: String,
        history: ResponseHistory,
    },

    /// A successful status other than the one the endpoint promises.
    #[error("{history}: expected status {expected}")]
    UnexpectedStatus {
        expected: u16,
        history: ResponseHistory,
    },

    /// The response body could not be decoded as JSON.
    #[error("{history}: response body is not valid JSON")]
    NonJsonResponse { history: ResponseHistory },

    /// The external upload of a task failed (task status 115).
    #[error("{history}: upload failed for task {task_id}")]
    UploadFailed {
        task_id: String,
        history: ResponseHistory,
    },

    /// The external download of a task failed (task status 118).
    #[error("{history}: download failed for task {task_id}")]
    DownloadFailed {
        task_id: String,
        history: ResponseHistory,
    },

    /// The polling schedule ran out before the task reached its final status.
    #[error("{history}: polling schedule exhausted for task {task_id}")]
    PollingExhausted {
        task_id: String,
        history: ResponseHistory,
    },

    /// Any other failure reported by the service.
    #[error("{history}")]
    Service { history: ResponseHistory },

    /// A JSON payload that does not have the documented shape.
    #[error("Unexpected payload: {0}")]
    Payload(String),

    /// Network failure reported by the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The authorization provider could not produce a token.
    #[error("Authorization error: {0}")]
    Token(String),

    /// The request cannot be scheduled as built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Scheduler bookkeeping failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } => ErrorKind::Auth,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::HeaderSignaled { .. } => ErrorKind::HeaderSignaled,
            Self::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            Self::NonJsonResponse { .. } => ErrorKind::NonJsonResponse,
            Self::UploadFailed { .. } => ErrorKind::UploadFailed,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::PollingExhausted { .. } => ErrorKind::PollingExhausted,
            Self::Service { .. } => ErrorKind::Service,
            Self::Payload(_) => ErrorKind::Payload,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Token(_) => ErrorKind::Token,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The responses that led to this error, for classified failures.
    pub fn history(&self) -> Option<&ResponseHistory> {
        match self {
            Self::Auth { history }
            | Self::NotFound { history }
            | Self::HeaderSignaled { history, .. }
            | Self::UnexpectedStatus { history, .. }
            | Self::NonJsonResponse { history }
            | Self::UploadFailed { history, .. }
            | Self::DownloadFailed { history, .. }
            | Self::PollingExhausted { history, .. }
            | Self::Service { history } => Some(history),
            _ => None,
        }
    }

    /// Status of the last response behind this error.
    pub fn last_status(&self) -> Option<u16> {
        self.history()?.last().map(|r| r.status)
    }
}
