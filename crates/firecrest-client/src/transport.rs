//! HTTP transport backed by reqwest.

use std::fmt;

use async_trait::async_trait;
use firecrest_sched::{
    Headers, HttpRequest, HttpResponse, Method, RequestBody, SchedError, SchedResult, Transport,
};
use reqwest::{Client, multipart};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("firecrest-rs/", env!("CARGO_PKG_VERSION"));

/// Sends scheduler requests to a FirecREST deployment.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ReqwestTransport {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the HTTP client described by `config`.
    pub fn http_client(config: &ClientConfig) -> ClientResult<Client> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout())
            .danger_accept_invalid_certs(!config.verify_tls);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }

    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self::new(Self::http_client(config)?, &config.firecrest_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build(&self, request: &HttpRequest) -> SchedResult<reqwest::RequestBuilder> {
        let url = format!("{}{}", self.base_url, request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Multipart { fields, file } => {
                // Read from the current offset so a rewound stream resends the same bytes.
                let bytes = file.read_remaining().map_err(|e| {
                    SchedError::Transport(format!("reading {}: {e}", file.file_name()))
                })?;
                let mut form = multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                let part = multipart::Part::bytes(bytes).file_name(file.file_name().to_string());
                builder.multipart(form.part("file", part))
            }
        };
        Ok(builder)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> SchedResult<HttpResponse> {
        let response = self
            .build(request)?
            .send()
            .await
            .map_err(|e| SchedError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| SchedError::Transport(e.to_string()))?;

        let mut out = HttpResponse::new(status).with_body(body.to_vec());
        out.headers = headers;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firecrest_sched::UploadFile;

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(Client::new(), "https://firecrest.example.org/")
    }

    #[test]
    fn test_base_url_trimmed() {
        assert_eq!(transport().base_url(), "https://firecrest.example.org");
    }

    #[test]
    fn test_build_query_and_headers() {
        let request = HttpRequest::get("/utilities/ls")
            .with_machine("daint")
            .with_query("targetPath", "/home/user")
            .with_header("Authorization", "Bearer t");
        let built = transport().build(&request).unwrap().build().unwrap();

        assert_eq!(built.method(), reqwest::Method::GET);
        assert_eq!(
            built.url().as_str(),
            "https://firecrest.example.org/utilities/ls?targetPath=%2Fhome%2Fuser"
        );
        assert_eq!(built.headers()["X-Machine-Name"], "daint");
        assert_eq!(built.headers()["authorization"], "Bearer t");
    }

    #[test]
    fn test_build_form_body() {
        let request = HttpRequest::post("/utilities/mkdir")
            .with_form("targetPath", "/scratch/new dir")
            .with_form("p", "true");
        let built = transport().build(&request).unwrap().build().unwrap();
        let body = built.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"targetPath=%2Fscratch%2Fnew+dir&p=true");
    }

    #[test]
    fn test_build_multipart_consumes_upload() {
        let file = UploadFile::from_bytes("script.sh", b"#!/bin/bash\n".to_vec());
        let request = HttpRequest::post("/compute/jobs/upload")
            .with_form("account", "proj")
            .with_file(file.clone());
        let built = transport().build(&request).unwrap().build().unwrap();
        assert_eq!(built.method(), reqwest::Method::POST);
        assert_eq!(file.position().unwrap(), 12);
    }
}
