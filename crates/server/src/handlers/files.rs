//! tus protocol handlers.
//!
//! Implements the core protocol plus the `creation` extension:
//! - `OPTIONS /v1/files` advertises the server's capabilities
//! - `POST /v1/files` opens a session
//! - `HEAD /v1/files/{upload_key}` reports the current offset
//! - `PATCH /v1/files/{upload_key}` appends bytes

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_upload_error;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use berth_core::{TUS_VERSION, UploadKey};

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
pub const UPLOAD_KEY: HeaderName = HeaderName::from_static("upload-key");

/// Content type required on PATCH requests.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Extensions implemented on top of the core protocol.
const SUPPORTED_EXTENSIONS: &str = "creation";

/// Stamp `Tus-Resumable` on every response, errors included.
pub async fn tus_resumable(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    response
}

/// Reject clients speaking a different protocol version.
///
/// Requests without the header are accepted.
fn check_version(headers: &HeaderMap) -> ApiResult<()> {
    match headers.get(&TUS_RESUMABLE) {
        Some(v) if v.as_bytes() != TUS_VERSION.as_bytes() => Err(ApiError::UnsupportedVersion(
            String::from_utf8_lossy(v.as_bytes()).into_owned(),
        )),
        _ => Ok(()),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| ApiError::BadRequest(format!("{name} is not valid ASCII")))
        })
        .transpose()
}

fn header_u64(headers: &HeaderMap, name: &HeaderName) -> ApiResult<Option<u64>> {
    header_str(headers, name)?
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| ApiError::BadRequest(format!("{name} must be a non-negative integer")))
        })
        .transpose()
}

fn parse_key(upload_key: &str) -> ApiResult<UploadKey> {
    Ok(UploadKey::parse(upload_key)?)
}

fn offset_value(offset: u64) -> HeaderValue {
    HeaderValue::from(offset)
}

/// Count failures by error code before handing them to the client.
fn recorded(e: impl Into<ApiError>) -> ApiError {
    let e = e.into();
    record_upload_error(e.code());
    e
}

/// OPTIONS /v1/files - Advertise protocol version, extensions and limits.
pub async fn options_files(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION)),
            (TUS_EXTENSION, HeaderValue::from_static(SUPPORTED_EXTENSIONS)),
            (
                TUS_MAX_SIZE,
                HeaderValue::from(state.config.server.max_upload_size),
            ),
        ],
    )
}

/// POST /v1/files - Create an upload session.
///
/// Requires `Upload-Length`; takes the optional `Upload-Metadata` and a
/// client-chosen `Upload-Key`. The destination is resolved before the
/// session is acknowledged.
#[tracing::instrument(skip(state, headers))]
pub async fn create_file(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    check_version(&headers)?;

    let length = header_u64(&headers, &UPLOAD_LENGTH)?.ok_or_else(|| {
        ApiError::BadRequest("Upload-Length is required (deferred length is not supported)".into())
    })?;
    let metadata = header_str(&headers, &UPLOAD_METADATA)?.unwrap_or_default();
    let upload_key = header_str(&headers, &UPLOAD_KEY)?
        .map(parse_key)
        .transpose()?;

    let (session, completion) = state
        .engine
        .create_session(upload_key, length, metadata)
        .await
        .map_err(recorded)?;

    let location = format!("/v1/files/{}", session.upload_key);
    let headers = [
        (
            LOCATION,
            HeaderValue::try_from(location)
                .map_err(|e| ApiError::Internal(format!("invalid location header: {e}")))?,
        ),
        (
            UPLOAD_KEY,
            HeaderValue::try_from(session.upload_key.as_str())
                .map_err(|e| ApiError::Internal(format!("invalid upload key header: {e}")))?,
        ),
        (UPLOAD_OFFSET, offset_value(session.offset)),
    ];

    Ok(match completion {
        Some(outcome) => (StatusCode::CREATED, headers, Json(outcome)).into_response(),
        None => (StatusCode::CREATED, headers).into_response(),
    })
}

/// HEAD /v1/files/{upload_key} - Report the session's offset and length.
pub async fn head_file(
    State(state): State<AppState>,
    Path(upload_key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    check_version(&headers)?;
    let upload_key = parse_key(&upload_key)?;
    let session = state.engine.session(&upload_key).await?;

    Ok((
        StatusCode::OK,
        [
            (UPLOAD_OFFSET, offset_value(session.offset)),
            (UPLOAD_LENGTH, offset_value(session.length)),
            (CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
    )
        .into_response())
}

/// PATCH /v1/files/{upload_key} - Append bytes at `Upload-Offset`.
///
/// The request that delivers the last byte also runs completion; its
/// errors are returned here.
#[tracing::instrument(skip(state, headers, body), fields(size = body.len()))]
pub async fn patch_file(
    State(state): State<AppState>,
    Path(upload_key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    check_version(&headers)?;

    let content_type = header_str(&headers, &CONTENT_TYPE)?.unwrap_or_default();
    if content_type != OFFSET_OCTET_STREAM {
        return Err(ApiError::UnsupportedMediaType(format!(
            "expected {OFFSET_OCTET_STREAM}, got {content_type:?}"
        )));
    }
    let offset = header_u64(&headers, &UPLOAD_OFFSET)?
        .ok_or_else(|| ApiError::BadRequest("Upload-Offset is required".into()))?;
    let upload_key = parse_key(&upload_key)?;

    let outcome = state
        .engine
        .write_chunk(&upload_key, offset, body)
        .await
        .map_err(recorded)?;

    if let Some(completion) = &outcome.completion {
        tracing::info!(
            object_id = %completion.result.object_id,
            disposition = completion.disposition.as_str(),
            "Upload finished by final chunk"
        );
    }

    Ok((
        StatusCode::NO_CONTENT,
        [(UPLOAD_OFFSET, offset_value(outcome.offset))],
    )
        .into_response())
}
