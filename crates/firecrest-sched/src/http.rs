//! Request and response values exchanged with a [`Transport`](crate::Transport).

use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::category::ServiceCategory;

/// Header naming the target system of a call.
pub const MACHINE_HEADER: &str = "X-Machine-Name";

/// Header carrying a task id for storage uploads and downloads.
pub const TASK_ID_HEADER: &str = "X-Task-Id";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header list with case-insensitive lookup. Insertion order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any value stored under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// A seekable byte source that can back a file upload.
pub trait UploadSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> UploadSource for T {}

/// File part of a multipart body.
///
/// The reader is shared between clones of the request so the retry stage
/// can rewind the exact stream the transport consumes.
#[derive(Clone)]
pub struct UploadFile {
    file_name: String,
    reader: Arc<Mutex<Box<dyn UploadSource>>>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, reader: impl UploadSource + 'static) -> Self {
        Self {
            file_name: file_name.into(),
            reader: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    /// Upload an in-memory buffer.
    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(file_name, Cursor::new(bytes.into()))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Current read offset of the underlying stream.
    pub fn position(&self) -> io::Result<u64> {
        self.with_reader(|r| r.stream_position())
    }

    /// Move the read offset back to `offset`.
    pub fn rewind_to(&self, offset: u64) -> io::Result<()> {
        self.with_reader(|r| r.seek(SeekFrom::Start(offset)).map(|_| ()))
    }

    /// Read from the current offset to the end of the stream.
    pub fn read_remaining(&self) -> io::Result<Vec<u8>> {
        self.with_reader(|r| {
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            Ok(buf)
        })
    }

    fn with_reader<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn UploadSource>) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| io::Error::other("upload reader lock poisoned"))?;
        f(&mut reader)
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Body of an outbound request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// Form fields plus one file part named `file`.
    Multipart {
        fields: Vec<(String, String)>,
        file: UploadFile,
    },
}

impl RequestBody {
    /// The file part, when the body streams one.
    pub fn upload(&self) -> Option<&UploadFile> {
        match self {
            Self::Multipart { file, .. } => Some(file),
            _ => None,
        }
    }

    /// The plain form fields of the body.
    pub fn fields(&self) -> &[(String, String)] {
        match self {
            Self::Empty => &[],
            Self::Form(fields) | Self::Multipart { fields, .. } => fields,
        }
    }
}

/// One logical API call, relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Endpoint path, starting with `/`.
    pub path: String,
    pub headers: Headers,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Headers::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Target a system through the `X-Machine-Name` header.
    pub fn with_machine(self, machine: impl Into<String>) -> Self {
        self.with_header(MACHINE_HEADER, machine)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter only when a value is present.
    pub fn with_optional_query(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.with_query(name, value.to_string()),
            None => self,
        }
    }

    /// Append a form field, turning an empty body into a form body.
    pub fn with_form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let field = (name.into(), value.into());
        match &mut self.body {
            RequestBody::Empty => self.body = RequestBody::Form(vec![field]),
            RequestBody::Form(fields) | RequestBody::Multipart { fields, .. } => fields.push(field),
        }
        self
    }

    pub fn with_optional_form(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.with_form(name, value.to_string()),
            None => self,
        }
    }

    /// Attach a file part. Existing form fields are kept.
    pub fn with_file(mut self, file: UploadFile) -> Self {
        let fields = std::mem::take(&mut self.body).fields().to_vec();
        self.body = RequestBody::Multipart { fields, file };
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_query(&self, name: &str) -> bool {
        self.query_value(name).is_some()
    }

    /// Replace every value of `name`, or drop the parameter for `None`.
    pub fn set_query(&mut self, name: &str, value: Option<String>) {
        self.query.retain(|(n, _)| n != name);
        if let Some(value) = value {
            self.query.push((name.to_string(), value));
        }
    }

    pub fn machine(&self) -> Option<&str> {
        self.headers.get(MACHINE_HEADER)
    }

    /// Service category derived from the path.
    pub fn category(&self) -> Option<ServiceCategory> {
        ServiceCategory::from_path(&self.path)
    }
}

/// Response as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Decoded body, or `None` when it is not JSON.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Retry-After", "5");
        headers.insert("retry-after", "7");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("RETRY-AFTER"), Some("7"));
        assert!(!headers.contains("RateLimit-Reset"));
    }

    #[test]
    fn test_request_builders() {
        let request = HttpRequest::get("/tasks")
            .with_query("tasks", "a,b")
            .with_optional_query("pageSize", None::<u32>)
            .with_machine("daint");
        assert_eq!(request.query_value("tasks"), Some("a,b"));
        assert!(!request.has_query("pageSize"));
        assert_eq!(request.machine(), Some("daint"));
        assert_eq!(request.category(), Some(ServiceCategory::Tasks));

        let mut request = request;
        request.set_query("tasks", None);
        assert!(!request.has_query("tasks"));
    }

    #[test]
    fn test_form_then_file_keeps_fields() {
        let request = HttpRequest::post("/utilities/upload")
            .with_form("targetPath", "/home/user")
            .with_file(UploadFile::from_bytes("data.txt", "hello"));
        let RequestBody::Multipart { fields, file } = &request.body else {
            panic!("expected multipart body");
        };
        assert_eq!(fields, &vec![("targetPath".to_string(), "/home/user".to_string())]);
        assert_eq!(file.file_name(), "data.txt");
    }

    #[test]
    fn test_upload_rewind() {
        let file = UploadFile::from_bytes("f", "abcdef");
        file.rewind_to(2).unwrap();
        assert_eq!(file.position().unwrap(), 2);
        assert_eq!(file.read_remaining().unwrap(), b"cdef");
        assert_eq!(file.position().unwrap(), 6);
        file.rewind_to(2).unwrap();
        assert_eq!(file.read_remaining().unwrap(), b"cdef");
    }

    #[test]
    fn test_response_json() {
        let response = HttpResponse::json(200, &json!({"out": [1, 2]}));
        assert!(response.is_success());
        assert_eq!(response.json_body(), Some(json!({"out": [1, 2]})));
        assert_eq!(HttpResponse::new(204).json_body(), None);
    }
}
