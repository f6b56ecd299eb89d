//! HTTP OCR engine adapter.
//!
//! Speaks a Document-AI-style REST protocol:
//!
//! | Call | Request |
//! |------|---------|
//! | inline | `POST {endpoint}/{processor}:process` with base64 `rawDocument` and an optional page selector |
//! | batch | `POST {endpoint}/{processor}:batchProcess` naming the input blob and the output prefix |
//! | wait | `GET {endpoint}/{operation}` until `done` |
//!
//! Responses are normalised by [`super::parse_ocr_document`].

use super::{parse_ocr_document, BatchJob, OcrEngine, OcrOutput};
use crate::error::{BackendError, CatalogError};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct HttpOcrEngine {
    client: reqwest::Client,
    endpoint: String,
    processor: String,
    bearer_token: Option<String>,
    poll_interval: Duration,
}

impl HttpOcrEngine {
    /// Fails with [`CatalogError::Config`] when the endpoint or processor is
    /// empty.
    pub fn new(
        endpoint: impl Into<String>,
        processor: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, CatalogError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let processor = processor.into().trim().trim_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(CatalogError::Config("OCR endpoint is not configured".into()));
        }
        if processor.is_empty() {
            return Err(CatalogError::Config(
                "OCR processor identity is not configured".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| CatalogError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            processor,
            bearer_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.bearer_token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json(&self, req: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

/// Map an unsuccessful HTTP status to a [`BackendError`].
pub(crate) fn classify_failure(status: u16, body: &str) -> BackendError {
    let lower = body.to_lowercase();
    let page_limit = lower.contains("page limit")
        || lower.contains("pages exceed")
        || (lower.contains("pages") && lower.contains("exceed"));
    match status {
        400 if page_limit => BackendError::PageLimitExceeded {
            detail: body.chars().take(300).collect(),
        },
        404 => BackendError::NotFound {
            uri: body.chars().take(300).collect(),
        },
        _ => BackendError::Failed(format!("HTTP {status}: {}", body.chars().take(300).collect::<String>())),
    }
}

pub(crate) fn inline_request(bytes: &[u8], pages: Option<&[usize]>) -> Value {
    let content = base64::engine::general_purpose::STANDARD.encode(bytes);
    let mut body = json!({
        "rawDocument": {"content": content, "mimeType": "application/pdf"},
    });
    if let Some(pages) = pages.filter(|p| !p.is_empty()) {
        body["processOptions"] = json!({"individualPageSelector": {"pages": pages}});
    }
    body
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    fn processor(&self) -> &str {
        &self.processor
    }

    async fn process_inline(
        &self,
        bytes: &[u8],
        pages: Option<&[usize]>,
    ) -> Result<OcrOutput, BackendError> {
        let url = format!("{}/{}:process", self.endpoint, self.processor);
        debug!(pages = ?pages, "Inline OCR request to {}", url);
        let reply = self
            .send_json(self.client.post(&url).json(&inline_request(bytes, pages)))
            .await?;
        parse_ocr_document(&reply)
    }

    async fn submit_batch(
        &self,
        uri: &str,
        output_prefix: &str,
    ) -> Result<BatchJob, BackendError> {
        let url = format!("{}/{}:batchProcess", self.endpoint, self.processor);
        let body = json!({
            "inputDocuments": {"gcsDocuments": {"documents": [
                {"gcsUri": uri, "mimeType": "application/pdf"}
            ]}},
            "documentOutputConfig": {"gcsOutputConfig": {"gcsUri": output_prefix}},
        });
        let reply = self.send_json(self.client.post(&url).json(&body)).await?;
        let name = reply
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Malformed("batch reply has no operation name".into()))?;
        info!("Submitted batch OCR job {}", name);
        Ok(BatchJob {
            name: name.to_string(),
            output_prefix: output_prefix.to_string(),
        })
    }

    async fn wait_batch(&self, job: &BatchJob) -> Result<(), BackendError> {
        let url = format!("{}/{}", self.endpoint, job.name);
        loop {
            let status = self.send_json(self.client.get(&url)).await?;
            if status.get("done").and_then(Value::as_bool).unwrap_or(false) {
                if let Some(err) = status.get("error") {
                    let msg = err
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| err.to_string());
                    return Err(BackendError::Failed(msg));
                }
                return Ok(());
            }
            debug!("Batch job {} still running", job.name);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
