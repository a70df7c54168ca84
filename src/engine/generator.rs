use crate::error::SessionError;
use crate::model::{ChartType, DataFile, ServiceConfig};
use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(rename = "downloadUrl")]
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

/// HTTP client for the remote chart generation service.
#[derive(Debug, Clone)]
pub struct GeneratorClient {
    pub http: reqwest::Client,
    base_url: Url,
    generate_url: Url,
    timeout: Duration,
}

impl GeneratorClient {
    pub fn new(cfg: &ServiceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("build http client")?;
        let base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base url {:?}", cfg.base_url))?;
        let generate_url = resolve_against_base(&base_url, &cfg.generate_path)
            .with_context(|| format!("invalid generate path {:?}", cfg.generate_path))?;
        Ok(Self {
            http,
            base_url,
            generate_url,
            timeout: cfg.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Upload `file` and ask the service for a `chart_type` presentation.
    ///
    /// Returns the absolute retrieval URI of the generated file.
    pub async fn generate(&self, file: &DataFile, chart_type: ChartType) -> Result<Url, SessionError> {
        let data_part = Part::stream_with_length(file.content.clone(), file.size() as u64)
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(|e| self.transport_error(e))?;
        let form = Form::new()
            .part("dataFile", data_part)
            .text("chartType", chart_type.tag());

        debug!(url = %self.generate_url, chart_type = %chart_type, "posting export request");
        let resp = self
            .http
            .post(self.generate_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            // A missing or malformed error body falls back to the status line.
            let body = resp.bytes().await.unwrap_or_default();
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| status_message(status));
            warn!(status = status.as_u16(), %message, "export service rejected request");
            return Err(SessionError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        let parsed: GenerateResponse = serde_json::from_slice(&body).map_err(|e| {
            SessionError::Transport(format!("export service returned an unreadable response: {e}"))
        })?;
        resolve_against_base(&self.base_url, &parsed.download_url).map_err(|e| {
            SessionError::Transport(format!(
                "export service returned an invalid download path {:?}: {e:#}",
                parsed.download_url
            ))
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> SessionError {
        let message = if e.is_timeout() {
            format!(
                "export request timed out after {}",
                humantime::format_duration(self.timeout)
            )
        } else if e.is_connect() {
            format!("could not reach the export service at {}", self.base_url)
        } else if e.is_decode() || e.is_body() {
            format!("export service returned an unreadable response: {e}")
        } else {
            format!("export request failed: {e}")
        };
        SessionError::Transport(message)
    }
}

fn status_message(status: StatusCode) -> String {
    format!(
        "API Error: {}",
        status.canonical_reason().unwrap_or(status.as_str())
    )
}

/// Resolve a service-relative path (`/files/x.pptx`) onto the base address, keeping any path
/// prefix the base carries. The base's query and fragment are dropped. Absolute `http(s)`
/// URLs are returned unchanged; any other scheme is rejected.
pub fn resolve_against_base(base: &Url, path: &str) -> Result<Url> {
    let mut dir = base.clone();
    dir.set_query(None);
    dir.set_fragment(None);
    if !dir.path().ends_with('/') {
        let with_slash = format!("{}/", dir.path());
        dir.set_path(&with_slash);
    }
    let url = dir
        .join(path.trim_start_matches('/'))
        .with_context(|| format!("resolve {path:?} against {base}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => anyhow::bail!("unsupported scheme {other:?} in {path:?}"),
    }
}
