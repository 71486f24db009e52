use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use inbox_triage_core::{
    BatchExtractResult, BulkUpdateItem, BulkUpdateResult, ExtractedInfo, GeneratedResponse,
    RawRecord, RecordId, RecordList, RecordPatch,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("remote call timed out")]
    Timeout,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("failed to decode remote payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// The remote side of the record collection.
///
/// Every operation resolves to an explicit [`RemoteError`] on failure; callers in this crate
/// turn those into load and mutation outcomes rather than propagating them.
pub trait RecordSource: Send + Sync {
    fn list_records(&self) -> impl Future<Output = Result<RecordList, RemoteError>> + Send;

    fn update_record(
        &self,
        id: RecordId,
        patch: RecordPatch,
    ) -> impl Future<Output = Result<RawRecord, RemoteError>> + Send;

    fn delete_record(&self, id: RecordId) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn bulk_update(
        &self,
        updates: Vec<BulkUpdateItem>,
    ) -> impl Future<Output = Result<BulkUpdateResult, RemoteError>> + Send;

    fn generate_response(
        &self,
        id: RecordId,
    ) -> impl Future<Output = Result<GeneratedResponse, RemoteError>> + Send;

    fn extract_info(
        &self,
        id: RecordId,
    ) -> impl Future<Output = Result<ExtractedInfo, RemoteError>> + Send;

    /// Server-side extraction for several records. Unknown ids come back as error entries.
    fn batch_extract(
        &self,
        ids: Vec<RecordId>,
    ) -> impl Future<Output = Result<BatchExtractResult, RemoteError>> + Send;
}

impl<T: RecordSource> RecordSource for Arc<T> {
    fn list_records(&self) -> impl Future<Output = Result<RecordList, RemoteError>> + Send {
        self.as_ref().list_records()
    }

    fn update_record(
        &self,
        id: RecordId,
        patch: RecordPatch,
    ) -> impl Future<Output = Result<RawRecord, RemoteError>> + Send {
        self.as_ref().update_record(id, patch)
    }

    fn delete_record(&self, id: RecordId) -> impl Future<Output = Result<(), RemoteError>> + Send {
        self.as_ref().delete_record(id)
    }

    fn bulk_update(
        &self,
        updates: Vec<BulkUpdateItem>,
    ) -> impl Future<Output = Result<BulkUpdateResult, RemoteError>> + Send {
        self.as_ref().bulk_update(updates)
    }

    fn generate_response(
        &self,
        id: RecordId,
    ) -> impl Future<Output = Result<GeneratedResponse, RemoteError>> + Send {
        self.as_ref().generate_response(id)
    }

    fn extract_info(
        &self,
        id: RecordId,
    ) -> impl Future<Output = Result<ExtractedInfo, RemoteError>> + Send {
        self.as_ref().extract_info(id)
    }

    fn batch_extract(
        &self,
        ids: Vec<RecordId>,
    ) -> impl Future<Output = Result<BatchExtractResult, RemoteError>> + Send {
        self.as_ref().batch_extract(ids)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self { base_url: "http://127.0.0.1:4020".to_string(), timeout_secs: 30 }
    }
}

/// Talks to the record service over HTTP and unwraps its response envelope.
#[derive(Debug, Clone)]
pub struct HttpRecordSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct BulkUpdateRequest {
    updates: Vec<BulkUpdateItem>,
}

#[derive(Debug, Serialize)]
struct BatchExtractRequest {
    ids: Vec<RecordId>,
}

impl HttpRecordSource {
    /// # Errors
    /// Returns [`RemoteError::Transport`] if the HTTP client cannot be constructed.
    pub fn new(config: &HttpSourceConfig) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let status = response.status();
    if status.is_success() {
        let envelope = response
            .json::<Envelope<T>>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))?;
        return Ok(envelope.data);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map_or_else(|_| body.clone(), |parsed| parsed.error);
    if status == StatusCode::NOT_FOUND {
        return Err(RemoteError::NotFound(message));
    }
    Err(RemoteError::Status { status: status.as_u16(), message })
}

impl RecordSource for HttpRecordSource {
    async fn list_records(&self) -> Result<RecordList, RemoteError> {
        let response = self.client.get(self.url("/v1/records")).send().await?;
        decode(response).await
    }

    async fn update_record(
        &self,
        id: RecordId,
        patch: RecordPatch,
    ) -> Result<RawRecord, RemoteError> {
        let response =
            self.client.patch(self.url(&format!("/v1/records/{id}"))).json(&patch).send().await?;
        decode(response).await
    }

    async fn delete_record(&self, id: RecordId) -> Result<(), RemoteError> {
        let response = self.client.delete(self.url(&format!("/v1/records/{id}"))).send().await?;
        decode::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn bulk_update(
        &self,
        updates: Vec<BulkUpdateItem>,
    ) -> Result<BulkUpdateResult, RemoteError> {
        let response = self
            .client
            .post(self.url("/v1/records/bulk-update"))
            .json(&BulkUpdateRequest { updates })
            .send()
            .await?;
        decode(response).await
    }

    async fn generate_response(&self, id: RecordId) -> Result<GeneratedResponse, RemoteError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/records/{id}/generate-response")))
            .send()
            .await?;
        decode(response).await
    }

    async fn extract_info(&self, id: RecordId) -> Result<ExtractedInfo, RemoteError> {
        let response =
            self.client.get(self.url(&format!("/v1/records/{id}/extract-info"))).send().await?;
        decode(response).await
    }

    async fn batch_extract(&self, ids: Vec<RecordId>) -> Result<BatchExtractResult, RemoteError> {
        let response = self
            .client
            .post(self.url("/v1/records/batch-extract"))
            .json(&BatchExtractRequest { ids })
            .send()
            .await?;
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_drops_trailing_slash() {
        let config =
            HttpSourceConfig { base_url: "http://localhost:4020/".to_string(), timeout_secs: 5 };
        let source = match HttpRecordSource::new(&config) {
            Ok(source) => source,
            Err(err) => panic!("client should build: {err}"),
        };
        assert_eq!(source.base_url(), "http://localhost:4020");
        assert_eq!(source.url("/v1/records"), "http://localhost:4020/v1/records");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let config =
            HttpSourceConfig { base_url: "http://127.0.0.1:9".to_string(), timeout_secs: 2 };
        let source = match HttpRecordSource::new(&config) {
            Ok(source) => source,
            Err(err) => panic!("client should build: {err}"),
        };

        let err = match source.list_records().await {
            Ok(list) => panic!("expected failure, got {} records", list.records.len()),
            Err(err) => err,
        };
        assert!(
            matches!(err, RemoteError::Transport(_) | RemoteError::Timeout),
            "unexpected error: {err}"
        );
    }
}
