//! The service context: everything a request handler needs, built once at
//! startup and only read afterwards

use crate::classifier::Classifier;
use crate::config::Settings;
use crate::torch::TorchModel;
use crate::tracking::{self, RunLogger};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Service {
    /// `None` when the model failed to load (degraded mode)
    model: Option<Arc<dyn Classifier>>,

    /// `None` when the tracking store could not be set up
    runs: Option<RunLogger>,

    max_upload_bytes: usize,
}

impl Service {
    pub fn new(
        model: Option<Arc<dyn Classifier>>,
        runs: Option<RunLogger>,
        max_upload_bytes: usize,
    ) -> Self {
        Service {
            model,
            runs,
            max_upload_bytes,
        }
    }

    /// Load the model and connect to the tracking store. Neither failure is
    /// fatal: the service comes up without the missing piece.
    pub fn init(settings: &Settings) -> Self {
        let model_path = &settings.model.path;
        let model: Option<Arc<dyn Classifier>> = if !model_path.exists() {
            warn!("model file {} not found", model_path.display());
            None
        } else {
            match TorchModel::load(model_path, settings.model.channels_first) {
                Ok(model) => {
                    info!("model loaded successfully from {}", model_path.display());
                    Some(Arc::new(model))
                }
                Err(e) => {
                    warn!("error loading model: {e:#}");
                    None
                }
            }
        };

        let model_id = model_path.display().to_string();
        let runs = tracking::open_store(&settings.tracking.uri)
            .and_then(|store| RunLogger::connect(store, &settings.tracking.experiment, &model_id));
        let runs = match runs {
            Ok(runs) => Some(runs),
            Err(e) => {
                warn!("could not set up run tracking: {e:#}");
                None
            }
        };

        Service::new(model, runs, settings.server.max_upload_bytes)
    }

    pub fn model(&self) -> Option<&Arc<dyn Classifier>> {
        self.model.as_ref()
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn runs(&self) -> Option<&RunLogger> {
        self.runs.as_ref()
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Counterpart of `init`. Nothing needs releasing yet.
    pub fn shutdown(&self) {
        info!("shutting down (model loaded: {})", self.model_loaded());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &std::path::Path) -> Settings {
        let mut settings = Settings::load("does/not/exist.toml").unwrap();
        settings.model.path = root.join("missing.pt");
        settings.tracking.uri = format!("file:{}", root.join("mlruns").display());
        settings
    }

    #[test]
    fn test_degraded_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let service = Service::init(&settings(dir.path()));
        assert!(!service.model_loaded());
        assert!(service.runs().is_some());
        assert!(dir.path().join("mlruns/cat_dog_classifier/meta.json").exists());
        service.shutdown();
    }

    #[test]
    fn test_bad_tracking_uri_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.tracking.uri = "postgres://nowhere".into();
        let service = Service::init(&settings);
        assert!(service.runs().is_none());
        assert!(!service.model_loaded());
    }

    #[test]
    fn test_corrupt_model_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.model.path = dir.path().join("corrupt.pt");
        std::fs::write(&settings.model.path, b"not torchscript").unwrap();
        let service = Service::init(&settings);
        assert!(!service.model_loaded());
    }
}
