use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::error::LeaseError;
use crate::service::{Operation, Outcome};
use crate::store::SessionId;

/// Multipart field carrying the returned session content.
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct AcquireResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub message: &'static str,
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Run an operation on the blocking pool.
async fn run(state: &AppState, operation: Operation) -> ApiResult<Outcome> {
    let service = state.service.clone();
    let name = operation.name();
    tokio::task::spawn_blocking(move || service.execute(operation))
        .await
        .map_err(|err| ApiError::internal(format!("{name} task failed: {err}")))?
        .map_err(ApiError::from)
}

fn unexpected(outcome: Outcome) -> ApiError {
    ApiError::internal(format!("unexpected outcome: {outcome:?}"))
}

fn parse_id(raw: &str) -> ApiResult<SessionId> {
    SessionId::parse(raw).map_err(ApiError::from)
}

pub async fn acquire(State(state): State<AppState>) -> ApiResult<Json<AcquireResponse>> {
    match run(&state, Operation::Acquire).await? {
        Outcome::Acquired(session_id) => Ok(Json(AcquireResponse { session_id })),
        other => Err(unexpected(other)),
    }
}

/// Stream the session directory as a zip archive.
pub async fn export(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&raw_id)?;
    let archive = match run(&state, Operation::Export(id)).await? {
        Outcome::Exported(archive) => archive,
        other => return Err(unexpected(other)),
    };

    let file = tokio::fs::File::from_std(archive.file);
    let body = Body::from_stream(ReaderStream::new(file));
    let file_name = archive.file_name.replace('"', "'");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, archive.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// Reject unknown or unleased sessions before reading the upload. The
/// release itself checks again under the state lock.
async fn ensure_releasable(state: &AppState, id: &SessionId) -> ApiResult<()> {
    let manager = state.service.manager().clone();
    let id = id.clone();
    tokio::task::spawn_blocking(move || -> crate::error::Result<()> {
        let record = manager.get(&id)?;
        if record.is_locked() {
            Ok(())
        } else {
            Err(LeaseError::NotLocked(id))
        }
    })
    .await
    .map_err(|err| ApiError::internal(format!("release check task failed: {err}")))?
    .map_err(ApiError::from)
}

/// Accept the returned content and end the lease.
pub async fn release(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<ReleaseResponse>> {
    let id = parse_id(&raw_id)?;
    ensure_releasable(&state, &id).await?;
    let limit = state.max_upload_bytes();

    let mut upload: Option<Bytes> = None;
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "ignoring multipart field");
            continue;
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await? {
            let size = (buffer.len() + chunk.len()) as u64;
            if limit > 0 && size > limit {
                warn!(session_id = %id, limit, "release upload exceeds size limit");
                return Err(LeaseError::TooLarge { size, limit }.into());
            }
            buffer.extend_from_slice(&chunk);
        }
        upload = Some(buffer.freeze());
        break;
    }

    let Some(archive) = upload else {
        return Err(ApiError::bad_request("No file provided"));
    };

    match run(&state, Operation::Release(id, archive)).await? {
        Outcome::Released(session_id) => Ok(Json(ReleaseResponse {
            message: "Session released",
            session_id,
        })),
        other => Err(unexpected(other)),
    }
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    match run(&state, Operation::Health).await? {
        Outcome::Healthy => Ok(Json(HealthResponse {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now().to_rfc3339(),
        })),
        other => Err(unexpected(other)),
    }
}
