use crate::classifier::{round4, Classification};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of a successful `POST /api`
#[derive(Debug, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ClassifyResponse {
    /// `cat` or `dog`
    #[schema(example = "dog")]
    pub classification: String,

    /// Probability of the predicted class, at least 0.5
    #[schema(example = 0.9731)]
    pub confidence: f64,
    pub probabilities: Probabilities,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Probabilities {
    pub cat: f64,
    pub dog: f64,
}

impl From<&Classification> for ClassifyResponse {
    fn from(c: &Classification) -> Self {
        ClassifyResponse {
            classification: c.label.to_string(),
            confidence: round4(c.confidence),
            probabilities: Probabilities {
                cat: c.cat_probability,
                dog: c.dog_probability,
            },
        }
    }
}

/// Body of every failed request
#[derive(Debug, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "File must be an image")]
    pub detail: String,
}

/// Multipart form accepted by `POST /api`
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// The image to classify (JPEG, PNG, ...)
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

/// Body of `GET /health`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}
