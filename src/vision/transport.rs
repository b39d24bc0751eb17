// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP transports: the native client and a curl subprocess for plaintext endpoints

use async_trait::async_trait;
use reqwest::Client;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::{ReelscopeError, Result};

/// Floor for the curl `--max-time`
pub const CURL_MIN_TIMEOUT: Duration = Duration::from_secs(120);

/// A JSON POST
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub timeout: Duration,
}

/// What came back; `status` is `None` when the transport cannot see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: Option<u16>,
    pub body: String,
}

/// Capability to deliver a JSON POST
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Transport over reqwest
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .header("Content-Type", "application/json")
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(ReelscopeError::from_transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(ReelscopeError::from_transport)?;
        Ok(HttpResponse {
            status: Some(status),
            body,
        })
    }
}

/// Transport that shells out to curl.
///
/// Used for plain `http://` endpoints, typically local relays, where headers must reach the
/// server untouched. The body goes through a temp file that is removed on every exit path.
pub struct CurlTransport {
    curl: String,
    /// Where request bodies are staged; the system temp dir when unset
    body_dir: Option<PathBuf>,
}

impl CurlTransport {
    pub fn new(curl: impl Into<String>) -> Self {
        Self {
            curl: curl.into(),
            body_dir: None,
        }
    }

    pub fn with_body_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.body_dir = Some(dir.into());
        self
    }

    fn arguments(&self, request: &HttpRequest, body_path: &str) -> Vec<String> {
        let max_time = request.timeout.max(CURL_MIN_TIMEOUT).as_secs();
        let mut args = vec![
            "-s".to_string(),
            "-X".to_string(),
            "POST".to_string(),
            request.url.clone(),
            "-H".to_string(),
            "Content-Type: application/json".to_string(),
        ];
        for (name, value) in &request.headers {
            args.push("-H".to_string());
            args.push(format!("{}: {}", name, value));
        }
        args.push("-d".to_string());
        args.push(format!("@{}", body_path));
        args.push("--max-time".to_string());
        args.push(max_time.to_string());
        args
    }
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new("curl")
    }
}

#[async_trait]
impl HttpTransport for CurlTransport {
    async fn post_json(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("reelscope_body").suffix(".json");
        let mut body_file = match &self.body_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        body_file.write_all(request.body.as_bytes())?;
        body_file.flush()?;

        let body_path = body_file.path().to_string_lossy().into_owned();
        let args = self.arguments(request, &body_path);

        debug!("Posting {} bytes through {}", request.body.len(), self.curl);

        let output = Command::new(&self.curl)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ReelscopeError::Network(format!("failed to start {}: {}", self.curl, e)))?;

        drop(body_file);

        let body = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() && body.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReelscopeError::Network(format!(
                "curl exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if body.trim().is_empty() {
            return Err(ReelscopeError::Network("curl produced no output".to_string()));
        }

        Ok(HttpResponse { status: None, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timeout: Duration) -> HttpRequest {
        HttpRequest {
            url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            headers: vec![("Authorization".to_string(), "Bearer sk-test".to_string())],
            body: "{}".to_string(),
            timeout,
        }
    }

    #[test]
    fn curl_arguments_carry_headers_and_body_file() {
        let transport = CurlTransport::default();
        let args = transport.arguments(&request(Duration::from_secs(60)), "/tmp/body.json");
        assert_eq!(
            args,
            vec![
                "-s",
                "-X",
                "POST",
                "http://127.0.0.1:9/v1/chat/completions",
                "-H",
                "Content-Type: application/json",
                "-H",
                "Authorization: Bearer sk-test",
                "-d",
                "@/tmp/body.json",
                "--max-time",
                "120",
            ]
        );
    }

    #[test]
    fn curl_timeout_never_drops_below_floor() {
        let transport = CurlTransport::default();
        let args = transport.arguments(&request(Duration::from_secs(300)), "/b");
        assert_eq!(args.last().map(String::as_str), Some("300"));
    }

    #[tokio::test]
    async fn missing_curl_is_a_network_error() {
        let transport = CurlTransport::new("curl-binary-that-does-not-exist");
        let err = transport.post_json(&request(Duration::from_secs(1))).await.unwrap_err();
        assert!(matches!(err, ReelscopeError::Network(_)));
    }

    #[cfg(unix)]
    fn stub_curl(dir: &std::path::Path, reply: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-curl");
        std::fs::write(&script, format!("#!/bin/sh\nprintf '%s' '{}'\n", reply)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    fn is_empty_dir(dir: &std::path::Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn body_file_is_removed_after_success_and_error_replies() {
        let bin = tempfile::tempdir().unwrap();
        let bodies = tempfile::tempdir().unwrap();

        let ok = CurlTransport::new(stub_curl(bin.path(), r#"{"choices":[]}"#)).with_body_dir(bodies.path());
        let response = ok.post_json(&request(Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.body, r#"{"choices":[]}"#);
        assert_eq!(response.status, None);
        assert!(is_empty_dir(bodies.path()));

        let bin = tempfile::tempdir().unwrap();
        let envelope = CurlTransport::new(stub_curl(bin.path(), r#"{"error":{"message":"bad key"}}"#))
            .with_body_dir(bodies.path());
        let response = envelope.post_json(&request(Duration::from_secs(5))).await.unwrap();
        assert!(response.body.contains("bad key"));
        assert!(is_empty_dir(bodies.path()));
    }

    #[tokio::test]
    async fn body_file_is_removed_when_curl_cannot_start() {
        let bodies = tempfile::tempdir().unwrap();
        let transport = CurlTransport::new("curl-binary-that-does-not-exist").with_body_dir(bodies.path());
        assert!(transport.post_json(&request(Duration::from_secs(1))).await.is_err());
        assert!(is_empty_dir(bodies.path()));
    }

    #[tokio::test]
    async fn connect_failure_does_not_leak_the_url() {
        let transport = ReqwestTransport::new().unwrap();
        let mut req = request(Duration::from_secs(5));
        req.url = "http://127.0.0.1:1/v1beta/models/m:generateContent?key=SECRETKEY123".to_string();

        let err = transport.post_json(&req).await.unwrap_err();
        assert!(matches!(err, ReelscopeError::Network(_)));
        assert!(!err.to_string().contains("SECRETKEY123"));
    }
}
