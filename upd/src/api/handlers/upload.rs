use crate::AppState;
use crate::errors::{Error, Result};
use crate::storage::resolve_filename;
use axum::{
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

/// Body returned for every stored upload.
pub const UPLOAD_OK: &str = "ok";

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: "Upload exceeds maximum body size".to_string(),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

#[utoipa::path(
    post,
    path = "/up",
    tag = "uploads",
    summary = "Upload file",
    description = "Store the file sent in the `file` multipart field as `<storage root>/<filename>`, \
                   replacing any existing file of the same name. Only the last segment of the declared \
                   filename is used.",
    request_body(
        content_type = "multipart/form-data",
        description = "Form with a single `file` part carrying a filename"
    ),
    responses(
        (status = 200, description = "File stored", body = String, content_type = "text/plain"),
        (status = 400, description = "Not multipart, missing `file` field or unusable filename"),
        (status = 413, description = "Payload too large"),
        (status = 429, description = "Too many uploads in progress"),
        (status = 500, description = "File could not be written")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<&'static str> {
    let _permit = match state.limiter.as_deref() {
        Some(limiter) => Some(limiter.acquire().await?),
        None => None,
    };

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            tracing::debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }

        let filename = resolve_filename(field.file_name())?;
        let mut spool = state.storage.spool(&filename);

        tracing::info!(path = %spool.target().display(), "Storing uploaded file");

        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            spool.write(&chunk).await?;
        }

        let spilled = spool.is_spilled();
        let size = spool.commit().await?;

        tracing::info!(filename = %filename, size, spilled, "Upload stored");

        return Ok(UPLOAD_OK);
    }

    Err(Error::BadRequest {
        message: format!("Missing multipart field '{UPLOAD_FIELD}'"),
    })
}
