//! Document conversion endpoint.
//!
//! A request moves through these stages, any of which can end it:
//!
//! 1. declared `Content-Length` checked against the upload limit
//! 2. `to` parameter and the multipart `file` part located
//! 3. input format detected and the pair resolved in the registry
//! 4. a slot taken from the [`AdmissionGate`](crate::admission::AdmissionGate)
//! 5. the part streamed into a fresh scratch directory, counting bytes
//! 6. the engine run with its timeout
//! 7. the output streamed back; the scratch directory goes with the body
//!
//! Authentication happens before this handler, in the auth middleware.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{ConnectInfo, FromRequest, Multipart, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use utoipa::{IntoParams, ToSchema};

use lc_core::formats::normalize;
use lc_core::Error;
use lc_engine::ScratchDir;

use crate::context::AppContext;
use crate::error::{AppError, ErrorBody};
use crate::middleware::request_id::RequestId;

/// Allowance for multipart boundaries and part headers on top of the file
/// size limit.
pub const MULTIPART_HEADROOM: usize = 64 * 1024;

/// Name of the multipart part carrying the document.
const FILE_FIELD: &str = "file";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConvertParams {
    /// Target format, e.g. `pdf`. Case-insensitive; a leading dot is ignored.
    pub to: Option<String>,
}

/// Multipart form accepted by [`convert_document`].
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ConvertUpload {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

/// POST /convert?to=<format>
#[utoipa::path(
    post,
    path = "/convert",
    params(ConvertParams),
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Converted document, typed by the requested output format"),
        (status = 400, description = "Unsupported format or malformed request", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 413, description = "Upload exceeds the size limit", body = ErrorBody),
        (status = 429, description = "All conversion slots busy; see Retry-After", body = ErrorBody),
        (status = 500, description = "Conversion failed or timed out", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn convert_document(State(ctx): State<AppContext>, request: Request) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let mut record = RequestRecord::new(client_ip(request.headers(), peer));

    match run(&ctx, request, &mut record).await {
        Ok(response) => {
            record.complete();
            response
        }
        Err(e) => {
            record.fail(&e);
            let mut err = AppError::new(e).reported();
            if let Some(id) = request_id {
                err = err.with_request_id(id);
            }
            err.into_response()
        }
    }
}

async fn run(ctx: &AppContext, request: Request, record: &mut RequestRecord) -> lc_core::Result<Response> {
    let limit = ctx.config.server.max_upload_bytes;

    if let Some(declared) = declared_length(request.headers()) {
        if declared > limit.saturating_add(MULTIPART_HEADROOM as u64) {
            return Err(Error::TooLarge { limit });
        }
    }

    let Query(params) = Query::<ConvertParams>::try_from_uri(request.uri())
        .map_err(|e| Error::Validation(format!("invalid query string: {}", e.body_text())))?;
    let to = params
        .to
        .map(|t| normalize(&t))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Validation("missing required query parameter 'to'".into()))?;
    record.output_format = Some(to.clone());

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| Error::Validation(format!("expected a multipart/form-data body: {}", e.body_text())))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        return convert_field(ctx, field, &to, limit, record).await;
    }

    Err(Error::Validation(format!(
        "missing multipart field '{FILE_FIELD}'"
    )))
}

async fn convert_field(
    ctx: &AppContext,
    field: Field<'_>,
    to: &str,
    limit: u64,
    record: &mut RequestRecord,
) -> lc_core::Result<Response> {
    let filename = field.file_name().map(String::from);
    let input = ctx
        .formats
        .detect_input(filename.as_deref(), field.content_type())
        .ok_or_else(|| {
            let supported: Vec<String> = ctx
                .formats
                .input_formats()
                .into_iter()
                .map(String::from)
                .collect();
            Error::unsupported(
                format!(
                    "Cannot determine the input format: the upload has no file extension. Supported: {}",
                    supported.join(", ")
                ),
                supported,
            )
        })?;
    record.input_format = Some(input.clone());

    // Invalid pairs are rejected before they can occupy a slot.
    let target = ctx.formats.resolve(&input, to)?;

    let permit = ctx
        .gate
        .acquire(ctx.config.conversion.admission_wait())
        .await?;

    let job = ScratchDir::create(&ctx.scratch_root, &target.input).await?;
    record.input_bytes = Some(stage_upload(field, job.input(), limit).await?);

    let output_path = ctx.worker.convert_job(&job, &target).await?;
    drop(permit);

    let file = tokio::fs::File::open(&output_path).await?;
    let output_bytes = file.metadata().await?.len();
    record.output_bytes = Some(output_bytes);

    // The scratch directory rides along with the body and is removed once the
    // last chunk is sent or the client goes away.
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _scratch = &job;
        chunk
    });

    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        download_stem(filename.as_deref()),
        target.output
    );

    let mut response = (StatusCode::OK, Body::from_stream(stream)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(target.mime));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(output_bytes));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Stream a multipart part to `dest`, failing as soon as it exceeds `limit`.
async fn stage_upload(mut field: Field<'_>, dest: &Path, limit: u64) -> lc_core::Result<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
        written += chunk.len() as u64;
        if written > limit {
            return Err(Error::TooLarge { limit });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if written == 0 {
        return Err(Error::Validation("uploaded file is empty".into()));
    }
    Ok(written)
}

fn multipart_error(e: MultipartError, limit: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::TooLarge { limit }
    } else {
        Error::Validation(format!("malformed multipart body: {}", e.body_text()))
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// First `X-Forwarded-For` entry, else the connection peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".into())
}

/// Filename stem for the download, reduced to `[A-Za-z0-9._ -]`.
fn download_stem(filename: Option<&str>) -> String {
    let name = filename
        .and_then(|f| f.rsplit(['/', '\\']).next())
        .unwrap_or_default();
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ' ' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == ' ' || c == '.');
    if cleaned.is_empty() {
        "document".into()
    } else {
        cleaned.to_string()
    }
}

/// Collects the per-request log record and emits it exactly once.
///
/// If the handler future is dropped before finishing (client disconnect),
/// the record is emitted as `conversion_aborted`.
struct RequestRecord {
    client_ip: String,
    input_format: Option<String>,
    output_format: Option<String>,
    input_bytes: Option<u64>,
    output_bytes: Option<u64>,
    started: Instant,
    emitted: bool,
}

impl RequestRecord {
    fn new(client_ip: String) -> Self {
        Self {
            client_ip,
            input_format: None,
            output_format: None,
            input_bytes: None,
            output_bytes: None,
            started: Instant::now(),
            emitted: false,
        }
    }

    fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn complete(&mut self) {
        self.emitted = true;
        tracing::info!(
            event = "conversion_complete",
            input_format = self.input_format.as_deref(),
            output_format = self.output_format.as_deref(),
            input_bytes = self.input_bytes,
            output_bytes = self.output_bytes,
            duration_ms = self.duration_ms(),
            client_ip = %self.client_ip,
            outcome = "ok",
            "Conversion complete"
        );
    }

    fn fail(&mut self, error: &Error) {
        self.emitted = true;
        let event = match error {
            Error::ConversionTimeout { .. } => "conversion_timeout",
            _ => "conversion_error",
        };
        if error.http_status() >= 500 {
            tracing::error!(
                event,
                input_format = self.input_format.as_deref(),
                output_format = self.output_format.as_deref(),
                input_bytes = self.input_bytes,
                duration_ms = self.duration_ms(),
                client_ip = %self.client_ip,
                outcome = error.code(),
                "Conversion failed: {error}"
            );
        } else {
            tracing::warn!(
                event,
                input_format = self.input_format.as_deref(),
                output_format = self.output_format.as_deref(),
                input_bytes = self.input_bytes,
                duration_ms = self.duration_ms(),
                client_ip = %self.client_ip,
                outcome = error.code(),
                "Conversion rejected: {error}"
            );
        }
    }
}

impl Drop for RequestRecord {
    fn drop(&mut self) {
        if !self.emitted {
            tracing::info!(
                event = "conversion_aborted",
                input_format = self.input_format.as_deref(),
                output_format = self.output_format.as_deref(),
                input_bytes = self.input_bytes,
                duration_ms = self.duration_ms(),
                client_ip = %self.client_ip,
                outcome = "client_disconnected",
                "Conversion abandoned by client"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_stem_sanitizes() {
        assert_eq!(download_stem(Some("Quarterly Report.docx")), "Quarterly Report");
        assert_eq!(download_stem(Some("C:\\Users\\me\\plan-v2.xlsx")), "plan-v2");
        assert_eq!(download_stem(Some("../../etc/passwd")), "passwd");
        assert_eq!(download_stem(Some("na\"me;.pptx")), "name");
        assert_eq!(download_stem(Some("résumé.odt")), "rsum");
        assert_eq!(download_stem(Some("archive.tar.odt")), "archive.tar");
        assert_eq!(download_stem(Some(".docx")), "docx");
        assert_eq!(download_stem(Some("文件.doc")), "document");
        assert_eq!(download_stem(None), "document");
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let peer: SocketAddr = "10.0.0.5:4711".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.5");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn declared_length_parses_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), None);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1024"));
        assert_eq!(declared_length(&headers), Some(1024));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(declared_length(&headers), None);
    }
}
