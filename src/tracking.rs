//! Best-effort experiment tracking. Every classification becomes one run in a
//! tracking store, holding its metrics, parameters and a JPEG copy of the
//! input image. Nothing here is ever read back by the service.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use image::{DynamicImage, ImageOutputFormat};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classifier::Classification;

/// Artifact directory the input images are logged under
pub const INPUT_IMAGES: &str = "input_images";

/// A file to copy into a run's artifact directory
#[derive(Debug, Clone)]
pub struct Artifact {
    pub local_path: PathBuf,
    pub artifact_path: String,
}

/// One logged observation
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_name: String,
    pub start_time: DateTime<Utc>,
    pub metrics: Vec<(String, f64)>,
    pub params: Vec<(String, String)>,
    pub artifacts: Vec<Artifact>,
}

/// An append-only store of runs grouped into experiments
pub trait TrackingStore: Send + Sync {
    /// Create the experiment unless it already exists. Returns whether it was created.
    fn create_experiment_if_absent(&self, name: &str) -> Result<bool>;

    /// Persist a complete run under `experiment`
    fn log_run(&self, experiment: &str, run: &RunRecord) -> Result<()>;
}

/// Open the store a connection string points at. Only local file stores are
/// supported: `file:<path>`, `file://<path>` or a bare path.
pub fn open_store(uri: &str) -> Result<Arc<dyn TrackingStore>> {
    let root = match uri.split_once(':') {
        Some(("file", rest)) => rest.strip_prefix("//").unwrap_or(rest),
        Some((scheme, _)) if scheme.len() > 1 => {
            return Err(anyhow!("unsupported tracking store scheme `{scheme}`"))
        }
        // Bare path (a single letter is a Windows drive)
        _ => uri,
    };
    if root.is_empty() {
        return Err(anyhow!("tracking store uri `{uri}` has no path"));
    }

    Ok(Arc::new(FileStore::new(root)))
}

#[derive(Serialize, Deserialize)]
struct ExperimentMeta {
    name: String,
    creation_time: String,
}

#[derive(Serialize, Deserialize)]
struct RunMeta {
    run_name: String,
    experiment: String,
    start_time: i64,
    end_time: i64,
    status: String,
}

/// A tracking store kept as a directory tree:
/// `<root>/<experiment>/<run>/{meta.json, metrics/, params/, artifacts/}`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, experiment: &str, run_name: &str) -> PathBuf {
        self.root.join(experiment).join(run_name)
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), value)?;
        Ok(())
    }
}

impl TrackingStore for FileStore {
    fn create_experiment_if_absent(&self, name: &str) -> Result<bool> {
        let dir = self.root.join(name);
        let meta = dir.join("meta.json");
        if meta.exists() {
            return Ok(false);
        }

        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Self::write_json(
            &meta,
            &ExperimentMeta {
                name: name.to_string(),
                creation_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        )?;
        Ok(true)
    }

    fn log_run(&self, experiment: &str, run: &RunRecord) -> Result<()> {
        let experiment_dir = self.root.join(experiment);
        if !experiment_dir.is_dir() {
            return Err(anyhow!("experiment `{experiment}` does not exist"));
        }

        // Build the run aside and move it into place once complete
        let staging = experiment_dir.join(format!(".{}.partial", run.run_name));
        if let Err(e) = Self::write_run(&staging, experiment, run) {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!("could not remove {}: {cleanup}", staging.display());
            }
            return Err(e);
        }

        let dir = self.run_dir(experiment, &run.run_name);
        fs::rename(&staging, &dir).with_context(|| format!("moving run into {}", dir.display()))?;

        debug!("logged run {} to {}", run.run_name, dir.display());
        Ok(())
    }
}

impl FileStore {
    fn write_run(dir: &Path, experiment: &str, run: &RunRecord) -> Result<()> {
        let metrics = dir.join("metrics");
        let params = dir.join("params");
        fs::create_dir_all(&metrics)?;
        fs::create_dir_all(&params)?;

        let ts = run.start_time.timestamp_millis();
        for (key, value) in &run.metrics {
            fs::write(metrics.join(key), format!("{ts} {value} 0\n"))?;
        }

        for (key, value) in &run.params {
            fs::write(params.join(key), value)?;
        }

        for artifact in &run.artifacts {
            let file_name = artifact
                .local_path
                .file_name()
                .ok_or_else(|| anyhow!("artifact {:?} has no file name", artifact.local_path))?;
            let dest = dir.join("artifacts").join(&artifact.artifact_path);
            fs::create_dir_all(&dest)?;
            fs::copy(&artifact.local_path, dest.join(file_name)).with_context(|| {
                format!("copying artifact {}", artifact.local_path.display())
            })?;
        }

        Self::write_json(
            &dir.join("meta.json"),
            &RunMeta {
                run_name: run.run_name.clone(),
                experiment: experiment.to_string(),
                start_time: ts,
                end_time: Utc::now().timestamp_millis(),
                status: "FINISHED".into(),
            },
        )
    }
}

/// Everything known about one classification, handed to the logger
#[derive(Debug, Clone)]
pub struct ClassificationEvent {
    pub result: Classification,
    pub image: Arc<DynamicImage>,
    pub content_type: String,
    pub filename: Option<String>,
}

/// `classification_<date>_<time>_<8 random hex chars>`
pub fn run_name(now: DateTime<Local>) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("classification_{}_{suffix:08x}", now.format("%Y%m%d_%H%M%S"))
}

/// Logs classifications as runs of one experiment
#[derive(Clone)]
pub struct RunLogger {
    store: Arc<dyn TrackingStore>,
    experiment: String,
    model_id: String,
}

impl RunLogger {
    /// Connect to the store and make sure the experiment exists
    pub fn connect(
        store: Arc<dyn TrackingStore>,
        experiment: &str,
        model_id: &str,
    ) -> Result<Self> {
        match store.create_experiment_if_absent(experiment)? {
            true => info!("created tracking experiment {experiment}"),
            false => info!("using existing tracking experiment {experiment}"),
        }

        Ok(RunLogger {
            store,
            experiment: experiment.to_string(),
            model_id: model_id.to_string(),
        })
    }

    /// Record a classification as a new run
    pub fn log_classification(&self, event: &ClassificationEvent) -> Result<String> {
        let now = Local::now();
        let result = &event.result;

        // Removed when dropped, whether or not logging succeeds
        let tmp = tempfile::Builder::new()
            .prefix("input_")
            .suffix(".jpg")
            .tempfile()?;
        let mut writer = BufWriter::new(tmp.as_file());
        DynamicImage::ImageRgb8(event.image.to_rgb8())
            .write_to(&mut writer, ImageOutputFormat::Jpeg(90))
            .context("encoding input image as JPEG")?;
        writer.flush()?;

        let run = RunRecord {
            run_name: run_name(now),
            start_time: now.with_timezone(&Utc),
            metrics: vec![
                ("confidence".into(), result.confidence),
                ("cat_probability".into(), result.cat_probability),
                ("dog_probability".into(), result.dog_probability),
            ],
            params: vec![
                ("classified_class".into(), result.label.to_string()),
                ("model_path".into(), self.model_id.clone()),
                ("image_format".into(), event.content_type.clone()),
                (
                    "filename".into(),
                    event.filename.clone().unwrap_or_else(|| "unknown".into()),
                ),
                (
                    "timestamp".into(),
                    now.to_rfc3339_opts(SecondsFormat::Micros, false),
                ),
            ],
            artifacts: vec![Artifact {
                local_path: tmp.path().to_path_buf(),
                artifact_path: INPUT_IMAGES.into(),
            }],
        };

        self.store.log_run(&self.experiment, &run)?;
        Ok(run.run_name)
    }

    /// Like `log_classification`, but failures only produce a warning
    pub fn log_best_effort(&self, event: &ClassificationEvent) {
        match self.log_classification(event) {
            Ok(run) => debug!("logged classification as run {run}"),
            Err(e) => warn!("run logging failed: {e:#}"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::interpret;
    use image::{ImageBuffer, Rgba};
    use std::sync::atomic::Ordering;

    fn event(filename: Option<&str>) -> ClassificationEvent {
        ClassificationEvent {
            result: interpret(&[0.9]).unwrap(),
            image: Arc::new(DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
                40,
                30,
                Rgba([10, 20, 30, 255]),
            ))),
            content_type: "image/png".into(),
            filename: filename.map(String::from),
        }
    }

    #[test]
    fn test_open_store_uris() {
        assert!(open_store("file:./mlruns").is_ok());
        assert!(open_store("file:///tmp/mlruns").is_ok());
        assert!(open_store("mlruns").is_ok());
        assert!(open_store("sqlite:///mlflow.db").is_err());
        assert!(open_store("file:").is_err());
    }

    #[test]
    fn test_run_name_format() {
        let a = run_name(Local::now());
        let b = run_name(Local::now());
        assert!(a.starts_with("classification_"));
        // classification_YYYYmmdd_HHMMSS_xxxxxxxx
        assert_eq!(a.len(), "classification_".len() + 8 + 1 + 6 + 1 + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_experiment_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.create_experiment_if_absent("cats").unwrap());
        assert!(!store.create_experiment_if_absent("cats").unwrap());
    }

    #[test]
    fn test_log_classification() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let logger = RunLogger::connect(store.clone(), "cats", "models/pets.pt").unwrap();

        let run = logger.log_classification(&event(None)).unwrap();
        let run_dir = store.run_dir("cats", &run);

        let confidence = fs::read_to_string(run_dir.join("metrics/confidence")).unwrap();
        let value: f64 = confidence.split(' ').nth(1).unwrap().parse().unwrap();
        assert!((value - 0.9).abs() < 1e-6);

        let param = |key: &str| fs::read_to_string(run_dir.join("params").join(key)).unwrap();
        assert_eq!(param("classified_class"), "dog");
        assert_eq!(param("model_path"), "models/pets.pt");
        assert_eq!(param("image_format"), "image/png");
        assert_eq!(param("filename"), "unknown");
        assert!(DateTime::parse_from_rfc3339(&param("timestamp")).is_ok());

        let images: Vec<_> = fs::read_dir(run_dir.join("artifacts").join(INPUT_IMAGES))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(images.len(), 1);
        let logged = image::open(&images[0]).unwrap();
        assert_eq!((logged.width(), logged.height()), (40, 30));

        // The temporary copy is gone
        let tmp_name = images[0].file_name().unwrap();
        assert!(!std::env::temp_dir().join(tmp_name).exists());
    }

    #[test]
    fn test_missing_experiment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let run = RunRecord {
            run_name: "r".into(),
            start_time: Utc::now(),
            metrics: vec![],
            params: vec![],
            artifacts: vec![],
        };
        assert!(store.log_run("nope", &run).is_err());
    }

    #[test]
    fn test_failed_run_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.create_experiment_if_absent("cats").unwrap();

        let run = RunRecord {
            run_name: "classification_20240101_000000_deadbeef".into(),
            start_time: Utc::now(),
            metrics: vec![("confidence".into(), 0.9)],
            params: vec![("classified_class".into(), "dog".into())],
            artifacts: vec![Artifact {
                local_path: dir.path().join("vanished.jpg"),
                artifact_path: INPUT_IMAGES.into(),
            }],
        };
        let err = store.log_run("cats", &run).unwrap_err();
        assert!(format!("{err:#}").contains("vanished.jpg"));

        let entries: Vec<_> = fs::read_dir(dir.path().join("cats"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("meta.json")]);
    }

    #[test]
    fn test_best_effort_swallows_errors() {
        let store = Arc::new(test::BrokenStore::default());
        let logger = RunLogger::connect(store.clone(), "cats", "m").unwrap();
        logger.log_best_effort(&event(Some("rex.png")));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    }
}
