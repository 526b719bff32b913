//! The published API schema. Only the classification endpoint is documented;
//! `/health` is an operational route and stays out of it.

use super::protocol::{ClassifyResponse, ErrorResponse, Probabilities, UploadForm};
use super::routes;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Where the schema document is served
pub const OPENAPI_JSON: &str = "/openapi.json";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cat or Dog Classifier API",
        version = "1.0.0",
        description = "Accepts image uploads and returns classifications with confidence scores. \
                       All classifications are logged for tracking and analysis."
    ),
    paths(routes::classify),
    components(schemas(ClassifyResponse, Probabilities, ErrorResponse, UploadForm)),
    external_docs(url = "/", description = "Interactive Web UI")
)]
pub struct ApiDoc;

/// Swagger UI at `/docs/`, backed by the schema at `/openapi.json`
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs/{_:.*}").url(OPENAPI_JSON, ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_documents_every_status() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let responses = &doc["paths"]["/api"]["post"]["responses"];
        for status in ["200", "400", "500", "503"] {
            assert!(responses.get(status).is_some(), "missing {status}");
        }
        assert!(doc["paths"].get("/health").is_none());
        assert_eq!(doc["externalDocs"]["url"], "/");
    }
}
