use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use clap::Parser;
use inbox_triage_api::{
    BatchExtractRequest, BulkUpdateRequest, DeleteResult, InboxApi, RecordNotFound,
    API_CONTRACT_VERSION,
};
use inbox_triage_core::{
    BatchExtractResult, BulkUpdateResult, ExtractedInfo, GeneratedResponse, RawRecord, RecordId,
    RecordList, RecordPatch,
};
use inbox_triage_store::Stats;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    api: InboxApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    records: usize,
}

#[derive(Debug, Parser)]
#[command(name = "inbox-triage-service")]
#[command(about = "Local HTTP record service for inbox triage")]
struct Args {
    /// JSON array, NDJSON or `.csv` export of records to serve. Starts empty when omitted.
    #[arg(long, env = "TRIAGE_DATASET")]
    dataset: Option<PathBuf>,
    #[arg(long, env = "TRIAGE_BIND", default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(err: &anyhow::Error) -> ServiceError {
        let status = if err.downcast_ref::<RecordNotFound>().is_some() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::BAD_REQUEST
        };
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: format!("{err:#}"),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/records", get(records_list))
        .route("/v1/records/bulk-update", post(records_bulk_update))
        .route("/v1/records/batch-extract", post(records_batch_extract))
        .route("/v1/records/:id", patch(record_update).delete(record_delete))
        .route("/v1/records/:id/generate-response", post(record_generate_response))
        .route("/v1/records/:id/extract-info", get(record_extract_info))
        .route("/v1/stats", get(stats))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let api = match &args.dataset {
        Some(path) => InboxApi::from_dataset(path)?,
        None => InboxApi::default(),
    };
    let state = ServiceState { api };
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, "inbox triage service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok", records: state.api.len() }))
}

async fn records_list(State(state): State<ServiceState>) -> Json<ServiceEnvelope<RecordList>> {
    Json(envelope(state.api.list_records()))
}

async fn record_update(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
    Json(patch): Json<RecordPatch>,
) -> Result<Json<ServiceEnvelope<RawRecord>>, ServiceError> {
    let record =
        state.api.update_record(RecordId(id), &patch).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(record)))
}

async fn record_delete(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
) -> Result<Json<ServiceEnvelope<DeleteResult>>, ServiceError> {
    let result = state.api.delete_record(RecordId(id)).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn records_bulk_update(
    State(state): State<ServiceState>,
    Json(request): Json<BulkUpdateRequest>,
) -> Json<ServiceEnvelope<BulkUpdateResult>> {
    Json(envelope(state.api.bulk_update(&request.updates)))
}

async fn records_batch_extract(
    State(state): State<ServiceState>,
    Json(request): Json<BatchExtractRequest>,
) -> Json<ServiceEnvelope<BatchExtractResult>> {
    Json(envelope(state.api.batch_extract(&request.ids)))
}

async fn record_generate_response(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
) -> Result<Json<ServiceEnvelope<GeneratedResponse>>, ServiceError> {
    let generated =
        state.api.generate_response(RecordId(id)).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(generated)))
}

async fn record_extract_info(
    State(state): State<ServiceState>,
    Path(id): Path<u64>,
) -> Result<Json<ServiceEnvelope<ExtractedInfo>>, ServiceError> {
    let info = state.api.extract_info(RecordId(id)).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(info)))
}

async fn stats(State(state): State<ServiceState>) -> Json<ServiceEnvelope<Stats>> {
    Json(envelope(state.api.stats()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use time::macros::datetime;
    use tower::ServiceExt;

    fn seeded_state() -> ServiceState {
        let api = InboxApi::default();
        api.import([
            RawRecord::new(
                1,
                "kim@example.com",
                "Login trouble",
                "I cannot sign in since yesterday",
                datetime!(2024-03-15 09:00:00 UTC),
            ),
            RawRecord::new(
                2,
                "lee@example.com",
                "URGENT: refund",
                "Charged twice on 03/01/2024. Thanks, Lee",
                datetime!(2024-03-14 09:00:00 UTC),
            ),
        ]);
        ServiceState { api }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response {
        let builder = Request::builder().uri(uri).method(method);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = app(seeded_state());

        let response = send(&router, "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(
            value.pointer("/data/records").and_then(serde_json::Value::as_u64),
            Some(2)
        );
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn list_returns_labelled_records_in_envelope() {
        let router = app(seeded_state());

        let response = send(&router, "GET", "/v1/records", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("api_contract_version").and_then(serde_json::Value::as_str),
            Some(API_CONTRACT_VERSION)
        );
        assert_eq!(
            value.pointer("/data/records/1/priority").and_then(serde_json::Value::as_str),
            Some("high")
        );
        assert_eq!(
            value.pointer("/data/records/0/category").and_then(serde_json::Value::as_str),
            Some("account")
        );
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn patch_updates_and_unknown_id_is_not_found() {
        let router = app(seeded_state());

        let response = send(
            &router,
            "PATCH",
            "/v1/records/1",
            Some(serde_json::json!({ "status": "in_progress", "starred": true })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(
            value.pointer("/data/status").and_then(serde_json::Value::as_str),
            Some("in_progress")
        );
        assert_eq!(value.pointer("/data/starred").and_then(serde_json::Value::as_bool), Some(true));

        let missing = send(&router, "PATCH", "/v1/records/99", Some(serde_json::json!({}))).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let value = response_json(missing).await;
        assert!(value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|error| error.contains("99")));
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn delete_then_stats_reflect_removal() {
        let router = app(seeded_state());

        let response = send(&router, "DELETE", "/v1/records/2", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let again = send(&router, "DELETE", "/v1/records/2", None).await;
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        let stats = response_json(send(&router, "GET", "/v1/stats", None).await).await;
        assert_eq!(stats.pointer("/data/total").and_then(serde_json::Value::as_u64), Some(1));
        assert_eq!(stats.pointer("/data/urgent_count").and_then(serde_json::Value::as_u64), Some(0));
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn bulk_update_reports_success_count() {
        let router = app(seeded_state());
        let payload = serde_json::json!({
            "updates": [
                { "id": 1, "patch": { "status": "resolved" } },
                { "id": 2, "patch": { "status": "resolved" } },
                { "id": 3, "patch": { "status": "resolved" } }
            ]
        });

        let response = send(&router, "POST", "/v1/records/bulk-update", Some(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value.pointer("/data/successful").and_then(serde_json::Value::as_u64), Some(2));
        assert_eq!(value.pointer("/data/total").and_then(serde_json::Value::as_u64), Some(3));

        let stats = response_json(send(&router, "GET", "/v1/stats", None).await).await;
        assert_eq!(
            stats.pointer("/data/resolution_rate").and_then(serde_json::Value::as_f64),
            Some(100.0)
        );
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn generate_response_and_extract_info_round_trip() {
        let router = app(seeded_state());

        let response = send(&router, "POST", "/v1/records/2/generate-response", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        let text = value.pointer("/data/text").and_then(serde_json::Value::as_str).unwrap_or_default();
        assert!(text.contains("billing inquiry"), "text: {text}");

        let list = response_json(send(&router, "GET", "/v1/records", None).await).await;
        assert_eq!(
            list.pointer("/data/records/1/response").and_then(serde_json::Value::as_str),
            Some(text)
        );

        let info = response_json(send(&router, "GET", "/v1/records/2/extract-info", None).await).await;
        assert_eq!(
            info.pointer("/data/dates/0").and_then(serde_json::Value::as_str),
            Some("03/01/2024")
        );

        let missing = send(&router, "GET", "/v1/records/7/extract-info", None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    // Test IDs: TSVC-007
    #[tokio::test]
    async fn batch_extract_marks_each_id() {
        let router = app(seeded_state());
        let payload = serde_json::json!({ "ids": [2, 42] });

        let response = send(&router, "POST", "/v1/records/batch-extract", Some(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(value.pointer("/data/total").and_then(serde_json::Value::as_u64), Some(2));
        assert_eq!(value.pointer("/data/successful").and_then(serde_json::Value::as_u64), Some(1));
        assert_eq!(value.pointer("/data/failed").and_then(serde_json::Value::as_u64), Some(1));
        assert_eq!(
            value.pointer("/data/results/0/status").and_then(serde_json::Value::as_str),
            Some("success")
        );
        assert_eq!(
            value.pointer("/data/results/0/extracted/dates/0").and_then(serde_json::Value::as_str),
            Some("03/01/2024")
        );
        assert_eq!(
            value.pointer("/data/results/1/status").and_then(serde_json::Value::as_str),
            Some("error")
        );
        assert_eq!(value.pointer("/data/results/1/id").and_then(serde_json::Value::as_u64), Some(42));
    }
}
