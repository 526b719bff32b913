//! The user-facing JSON web server. `POST /api` classifies an uploaded image,
//! `GET /health` reports liveness, and everything else is the bundled UI.

use actix_multipart::MultipartError;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use protocol::ErrorResponse;

pub mod openapi;
pub mod protocol;
pub mod routes;

/// Everything a request can fail with
#[derive(Debug)]
pub enum WebError {
    /// The model is not loaded
    ModelUnavailable,

    /// The upload is not something we can classify
    InvalidInput(String),

    /// Decoding, preprocessing or inference failed
    Processing(anyhow::Error),
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebError::ModelUnavailable => {
                write!(f, "Model not loaded. Please check if the model file exists.")
            }
            WebError::InvalidInput(msg) => write!(f, "{msg}"),
            WebError::Processing(err) => write!(f, "Error processing image: {err:#}"),
        }
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(ErrorResponse {
                detail: self.to_string(),
            })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            WebError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            WebError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            WebError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError::Processing(err)
    }
}

impl From<MultipartError> for WebError {
    fn from(err: MultipartError) -> Self {
        WebError::InvalidInput(format!("invalid multipart upload: {err}"))
    }
}
