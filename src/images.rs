//! Raw image uploads stored on the local filesystem and served back under
//! `/images/<name>`. Posts refer to uploads by that path.

use std::io::ErrorKind;
use std::path::Path;

use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web, HttpResponse};
use mime_guess::from_path;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::config::{IMAGES_ROUTE_PREFIX, SUPPORTED_IMAGE_EXTENSIONS};
use crate::core::errors::{ApiError, StoreError, ValidationError};
use crate::schemas::ImageOut;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

/// Lower-cased extension when it is one we accept.
fn image_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
    SUPPORTED_IMAGE_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

/// A stored image name is a single path segment with a known extension.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && image_extension(name).is_some()
}

// === HTTP Handlers ===

pub async fn upload_image(
    state: web::Data<AppState>,
    caller: AuthUser,
    query: web::Query<UploadQuery>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let mut errors = ValidationError::new();
    let ext = match query.filename.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            let ext = image_extension(name);
            if ext.is_none() {
                errors.push(
                    "filename",
                    format!("supported formats: {}", SUPPORTED_IMAGE_EXTENSIONS.join(", ")),
                );
            }
            ext
        }
        _ => {
            errors.push("filename", "filename is required");
            None
        }
    };
    if body.is_empty() {
        errors.push("body", "image data is required");
    } else if body.len() > state.uploads.max_bytes {
        errors.push("body", format!("image must be at most {} bytes", state.uploads.max_bytes));
    }
    errors.into_result()?;

    let name = format!("{}.{}", Uuid::new_v4(), ext.unwrap_or_default());
    tokio::fs::create_dir_all(&state.uploads.dir)
        .await
        .map_err(|e| ApiError::InternalError(format!("creating upload dir: {}", e)))?;
    tokio::fs::write(state.uploads.dir.join(&name), &body)
        .await
        .map_err(|e| ApiError::InternalError(format!("writing {}: {}", name, e)))?;

    log::info!("User {} uploaded {} ({} bytes)", caller.id, name, body.len());
    Ok(HttpResponse::Created().json(ImageOut {
        image_ref: format!("{}{}", IMAGES_ROUTE_PREFIX, name),
    }))
}

pub async fn serve_image(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let name = path.into_inner();
    if !is_safe_name(&name) {
        return Err(StoreError::not_found("Image").into());
    }

    let data = match tokio::fs::read(state.uploads.dir.join(&name)).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::not_found("Image").into())
        }
        Err(e) => return Err(ApiError::InternalError(format!("reading {}: {}", name, e))),
    };

    let mime = from_path(&name).first_or_octet_stream();
    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, mime.as_ref()))
        .body(data))
}
