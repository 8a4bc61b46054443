//! HTTP API.
//!
//! | Method | Path                               | Purpose                     |
//! |--------|------------------------------------|-----------------------------|
//! | POST   | `/records`                         | Append one record           |
//! | POST   | `/records/batch`                   | Append many records         |
//! | GET    | `/checkpoints/:group/:partition`   | Inspect a checkpoint        |
//! | GET    | `/partitions/:partition`           | Inspect a partition         |
//!
//! Errors are returned as `{"error": message, "kind": kind}` with a status
//! derived from the error kind.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_core::ErrorKind;
use relay_partition::{PartitionError, Produced};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::service::RelayService;

/// Builds the API router.
pub fn router(service: RelayService) -> Router {
    Router::new()
        .route("/records", post(produce))
        .route("/records/batch", post(produce_batch))
        .route("/checkpoints/:group/:partition", get(checkpoint))
        .route("/partitions/:partition", get(partition))
        .with_state(service)
}

/// One record to append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceRequest {
    /// Key that selects the partition.
    pub partition_key: String,
    /// Record payload.
    pub payload: String,
}

/// Where a record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceResponse {
    /// Partition index.
    pub partition_id: u64,
    /// Sequence id within the partition.
    pub sequence_id: u64,
}

impl From<Produced> for ProduceResponse {
    fn from(produced: Produced) -> Self {
        Self {
            partition_id: produced.partition_id.get(),
            sequence_id: produced.sequence_id.get(),
        }
    }
}

/// Several records to append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceBatchRequest {
    /// Records, in order.
    pub records: Vec<ProduceRequest>,
}

/// Per-record results of a batch append, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceBatchResponse {
    /// One entry per request record.
    pub results: Vec<RecordResult>,
}

/// Outcome of one record in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordResult {
    /// Appended.
    Ok(ProduceResponse),
    /// Not appended.
    Err(ErrorBody),
}

/// Checkpoint of one group on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    /// Consumer group.
    pub group: String,
    /// Partition index.
    pub partition_id: u64,
    /// Last committed sequence id, or null if nothing was committed.
    pub sequence_id: Option<u64>,
}

/// Partition metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionResponse {
    /// Partition index.
    pub partition_id: u64,
    /// First retained sequence id.
    pub log_start: u64,
    /// Next sequence id to be assigned.
    pub log_end: u64,
    /// Retained records.
    pub record_count: u64,
    /// Number of segments.
    pub segment_count: u32,
    /// Encoded size in bytes.
    pub size_bytes: u64,
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Error kind, e.g. `throttled`.
    pub kind: String,
}

impl ErrorBody {
    fn new(message: String, kind: ErrorKind) -> Self {
        Self {
            error: message,
            kind: kind.as_str().to_string(),
        }
    }
}

/// Maps an error kind to an HTTP status.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidState => StatusCode::NOT_FOUND,
        ErrorKind::Throttled => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::DataExpired => StatusCode::GONE,
        ErrorKind::DeliveryFailed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Whole seconds for a `Retry-After` header, rounded up, at least 1.
#[must_use]
pub fn retry_after_secs(wait: Duration) -> u64 {
    u64::try_from(wait.as_millis().div_ceil(1000))
        .unwrap_or(u64::MAX)
        .max(1)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let retry_after = match &self {
            Self::Partition(
                PartitionError::Throttled { retry_after, .. }
                | PartitionError::DeliveryFailed {
                    retry_after: Some(retry_after),
                    ..
                },
            ) => Some(retry_after_secs(*retry_after)),
            _ => None,
        };

        let mut response = (
            status_for(kind),
            Json(ErrorBody::new(self.message(), kind)),
        )
            .into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

async fn produce(
    State(service): State<RelayService>,
    Json(request): Json<ProduceRequest>,
) -> Result<Json<ProduceResponse>, ServerError> {
    let produced = service
        .produce(request.partition_key, request.payload)
        .await?;
    Ok(Json(produced.into()))
}

async fn produce_batch(
    State(service): State<RelayService>,
    Json(request): Json<ProduceBatchRequest>,
) -> Result<Json<ProduceBatchResponse>, ServerError> {
    let limit = service.log().config().limits.max_batch_records as usize;
    if request.records.len() > limit {
        return Err(ServerError::InvalidRequest {
            message: format!("batch of {} records exceeds {limit}", request.records.len()),
        });
    }

    let records = request
        .records
        .into_iter()
        .map(|r| (r.partition_key, r.payload))
        .collect();
    let results = service
        .produce_batch(records)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(produced) => RecordResult::Ok(produced.into()),
            Err(err) => RecordResult::Err(ErrorBody::new(err.to_string(), err.kind())),
        })
        .collect();
    Ok(Json(ProduceBatchResponse { results }))
}

async fn checkpoint(
    State(service): State<RelayService>,
    Path((group, partition)): Path<(String, u64)>,
) -> Result<Json<CheckpointResponse>, ServerError> {
    let (group, partition_id, sequence_id) = service.checkpoint(&group, partition).await?;
    Ok(Json(CheckpointResponse {
        group: group.as_str().to_string(),
        partition_id: partition_id.get(),
        sequence_id: sequence_id.map(relay_core::SequenceId::get),
    }))
}

async fn partition(
    State(service): State<RelayService>,
    Path(partition): Path<u64>,
) -> Result<Json<PartitionResponse>, ServerError> {
    let metadata = service.partition(partition)?;
    Ok(Json(PartitionResponse {
        partition_id: metadata.partition_id.get(),
        log_start: metadata.log_start.get(),
        log_end: metadata.log_end.get(),
        record_count: metadata.record_count(),
        segment_count: metadata.segment_count,
        size_bytes: metadata.size_bytes,
    }))
}
