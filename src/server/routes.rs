//! HTTP routes. Classification runs on the blocking pool; the tracking side
//! channel is spawned afterwards and can never change the response.

use super::openapi;
use super::protocol::{ClassifyResponse, ErrorResponse, HealthResponse, UploadForm};
use super::WebError;
use crate::classifier;
use crate::preprocess;
use crate::service::Service;
use crate::tracking::ClassificationEvent;
use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{get, post, web, Responder};
use anyhow::anyhow;
use futures_util::TryStreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Result<T> = std::result::Result<T, WebError>;

/// Multipart field the image is uploaded in
pub const FILE_FIELD: &str = "file";

/// An image upload, read fully into memory
struct Upload {
    bytes: Vec<u8>,
    content_type: String,
    filename: Option<String>,
}

/// Register the API routes and schema, followed by the static UI at `/`
pub fn configure(ui_dir: PathBuf) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.service(classify)
            .service(health)
            .service(openapi::swagger_ui())
            .service(Files::new("/", ui_dir).index_file("index.html"));
    }
}

/// Read the first `file` field of the upload, up to `limit` bytes
async fn read_upload(payload: &mut Multipart, limit: usize) -> Result<Upload> {
    while let Some(mut field) = payload.try_next().await? {
        if field.name() != FILE_FIELD {
            continue;
        }

        let content_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_default();
        let filename = field
            .content_disposition()
            .get_filename()
            .map(String::from);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if bytes.len() + chunk.len() > limit {
                return Err(WebError::InvalidInput(format!(
                    "File exceeds the upload limit of {limit} bytes"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(Upload {
            bytes,
            content_type,
            filename,
        });
    }

    Err(WebError::InvalidInput(format!(
        "No file uploaded in field `{FILE_FIELD}`"
    )))
}

/// Classify an uploaded image as a cat or a dog
#[utoipa::path(
    post,
    path = "/api",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Classification result", body = ClassifyResponse),
        (status = 400, description = "Upload is not an image", body = ErrorResponse),
        (status = 500, description = "Image could not be processed", body = ErrorResponse),
        (status = 503, description = "Model not loaded", body = ErrorResponse)
    )
)]
#[post("/api")]
pub async fn classify(mut payload: Multipart, state: web::Data<Service>) -> Result<impl Responder> {
    let model = state.model().cloned().ok_or(WebError::ModelUnavailable)?;

    let upload = read_upload(&mut payload, state.max_upload_bytes()).await?;
    if !upload.content_type.starts_with("image/") {
        debug!("rejected upload with content type {:?}", upload.content_type);
        return Err(WebError::InvalidInput("File must be an image".into()));
    }

    let bytes = upload.bytes;
    let (result, image) = web::block(move || -> anyhow::Result<_> {
        let image = preprocess::decode(&bytes)?;
        let result = classifier::classify(model.as_ref(), &image)?;
        Ok((result, image))
    })
    .await
    .map_err(|e| anyhow!("inference task failed: {e}"))??;

    info!(
        "classified {} as {} ({:.4})",
        upload.filename.as_deref().unwrap_or("unknown"),
        result.label,
        result.confidence
    );

    if let Some(runs) = state.runs().cloned() {
        let event = ClassificationEvent {
            result: result.clone(),
            image: Arc::new(image),
            content_type: upload.content_type,
            filename: upload.filename,
        };
        actix_web::rt::spawn(async move {
            if let Err(e) = web::block(move || runs.log_best_effort(&event)).await {
                warn!("run logging aborted: {e}");
            }
        });
    }

    Ok(web::Json(ClassifyResponse::from(&result)))
}

/// Liveness, and whether inference is available
#[get("/health")]
pub async fn health(state: web::Data<Service>) -> impl Responder {
    web::Json(HealthResponse {
        status: "healthy".into(),
        model_loaded: state.model_loaded(),
    })
}
