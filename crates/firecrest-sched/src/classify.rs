//! Response and task-status classification.

use serde_json::Value;
use tracing::error;

use crate::error::{ResponseHistory, SchedError, SchedResult};
use crate::task::{Task, TaskStatus};

/// Headers through which the service reports request-level failures.
///
/// Any of them takes precedence over the status code.
pub const ERROR_HEADERS: [&str; 9] = [
    "X-A-Directory",
    "X-Error",
    "X-Invalid-Path",
    "X-Machine-Does-Not-Exist",
    "X-Machine-Not-Available",
    "X-Not-A-Directory",
    "X-Not-Found",
    "X-Permission-Denied",
    "X-Timeout",
];

/// Classify the last response of `history`, requiring a JSON body.
pub fn classify_response(history: &ResponseHistory, expected_status: u16) -> SchedResult<Value> {
    classify(history, expected_status, false)?
        .ok_or_else(|| SchedError::NonJsonResponse {
            history: history.clone(),
        })
}

/// Classify the last response of `history`; a body that is empty or not
/// JSON yields `None`.
pub fn classify_optional(
    history: &ResponseHistory,
    expected_status: u16,
) -> SchedResult<Option<Value>> {
    classify(history, expected_status, true)
}

fn classify(
    history: &ResponseHistory,
    expected_status: u16,
    allow_none: bool,
) -> SchedResult<Option<Value>> {
    let Some(response) = history.last() else {
        return Err(SchedError::Internal("classified an empty response history".into()));
    };

    let err = if let Some((header, message)) = ERROR_HEADERS
        .iter()
        .find_map(|h| response.headers.get(h).map(|v| (*h, v)))
    {
        SchedError::HeaderSignaled {
            header: header.to_string(),
            message: message.to_string(),
            history: history.clone(),
        }
    } else if response.status == 401 {
        SchedError::Auth {
            history: history.clone(),
        }
    } else if response.status == 404 {
        SchedError::NotFound {
            history: history.clone(),
        }
    } else if response.status >= 400 {
        SchedError::Service {
            history: history.clone(),
        }
    } else if response.status != expected_status {
        SchedError::UnexpectedStatus {
            expected: expected_status,
            history: history.clone(),
        }
    } else if let Some(body) = response.json_body() {
        return Ok(Some(body));
    } else if allow_none {
        return Ok(None);
    } else {
        SchedError::NonJsonResponse {
            history: history.clone(),
        }
    };

    error!("{err}");
    Err(err)
}

/// Raise the typed failure for a task that reports a failure code.
pub fn classify_task_status(task: &Task, history: &ResponseHistory) -> SchedResult<()> {
    let err = match task.status {
        TaskStatus::UPLOAD_FAILED => SchedError::UploadFailed {
            task_id: task.id.clone(),
            history: history.clone(),
        },
        TaskStatus::DOWNLOAD_FAILED => SchedError::DownloadFailed {
            task_id: task.id.clone(),
            history: history.clone(),
        },
        status if status >= TaskStatus::FAILURE_THRESHOLD => SchedError::Service {
            history: history.clone(),
        },
        _ => return Ok(()),
    };
    error!("Task {} failed with status {}: {err}", task.id, task.status);
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::http::HttpResponse;
    use serde_json::json;

    fn history(response: HttpResponse) -> ResponseHistory {
        response.into()
    }

    fn kind_of(response: HttpResponse, expected: u16) -> ErrorKind {
        classify_response(&history(response), expected)
            .unwrap_err()
            .kind()
    }

    #[test]
    fn test_success() {
        let body = json!({"output": "ok"});
        let value = classify_response(&history(HttpResponse::json(200, &body)), 200).unwrap();
        assert_eq!(value, body);
    }

    #[test]
    fn test_header_wins_over_status() {
        let response = HttpResponse::json(400, &json!({"description": "bad"}))
            .with_header("X-Invalid-Path", "/nope is an invalid path");
        let err = classify_response(&history(response), 200).unwrap_err();
        match err {
            SchedError::HeaderSignaled {
                header, message, ..
            } => {
                assert_eq!(header, "X-Invalid-Path");
                assert_eq!(message, "/nope is an invalid path");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let response = HttpResponse::new(401).with_header("X-Permission-Denied", "denied");
        assert_eq!(kind_of(response, 200), ErrorKind::HeaderSignaled);
    }

    #[test]
    fn test_status_precedence() {
        assert_eq!(kind_of(HttpResponse::new(401), 200), ErrorKind::Auth);
        assert_eq!(kind_of(HttpResponse::new(404), 200), ErrorKind::NotFound);
        assert_eq!(kind_of(HttpResponse::new(400), 200), ErrorKind::Service);
        assert_eq!(kind_of(HttpResponse::new(503), 200), ErrorKind::Service);
        assert_eq!(
            kind_of(HttpResponse::json(200, &json!({})), 201),
            ErrorKind::UnexpectedStatus
        );
        assert_eq!(
            kind_of(HttpResponse::new(200).with_body("plain text"), 200),
            ErrorKind::NonJsonResponse
        );
        assert_eq!(kind_of(HttpResponse::new(204), 204), ErrorKind::NonJsonResponse);
    }

    #[test]
    fn test_optional_body() {
        let value = classify_optional(&history(HttpResponse::new(204)), 204).unwrap();
        assert_eq!(value, None);

        let raw = HttpResponse::new(200).with_body(vec![0x7f, b'E', b'L', b'F']);
        assert_eq!(classify_optional(&history(raw), 200).unwrap(), None);

        let value =
            classify_optional(&history(HttpResponse::json(204, &json!({"a": 1}))), 204).unwrap();
        assert_eq!(value, Some(json!({"a": 1})));
    }

    #[test]
    fn test_error_carries_history() {
        let mut responses = ResponseHistory::new();
        responses.push(HttpResponse::json(201, &json!({"task_id": "t"})));
        responses.push(HttpResponse::new(500));
        let err = classify_response(&responses, 200).unwrap_err();
        assert_eq!(err.history().map(ResponseHistory::len), Some(2));
        assert_eq!(err.to_string(), "last request: 500 not JSON");
    }

    #[test]
    fn test_empty_history() {
        let err = classify_response(&ResponseHistory::new(), 200).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    fn task(status: &str) -> Task {
        serde_json::from_value(json!({"task_id": "t1", "status": status})).unwrap()
    }

    #[test]
    fn test_task_status_classification() {
        let history = ResponseHistory::new();
        assert!(classify_task_status(&task("100"), &history).is_ok());
        assert!(classify_task_status(&task("200"), &history).is_ok());

        let err = classify_task_status(&task("115"), &history).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UploadFailed);
        let err = classify_task_status(&task("118"), &history).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DownloadFailed);
        let err = classify_task_status(&task("400"), &history).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Service);
    }
}
