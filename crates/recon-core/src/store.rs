//! Durable storage for the trained model and the feedback log
//!
//! The model is one JSON document replaced atomically on save. Feedback is
//! an append-only JSON-lines file, one [`FeedbackRecord`] per line.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::engine::{ModelSchema, TrainedModel};
use crate::error::{Error, Result};
use crate::models::FeedbackRecord;

pub const MODEL_FILE: &str = "model.json";
pub const FEEDBACK_FILE: &str = "feedback.jsonl";

/// Where trained models and feedback are kept
pub trait ModelStore: Send + Sync {
    /// Human-readable location for status output
    fn location(&self) -> String;

    /// Persist a model, replacing any previous one
    fn save(&self, model: &TrainedModel) -> Result<()>;

    /// Load the saved model, if any. Models with a different schema are
    /// rejected with `Error::ModelSchema`.
    fn load(&self) -> Result<Option<TrainedModel>>;

    fn append_feedback(&self, record: &FeedbackRecord) -> Result<()>;

    fn read_feedback(&self) -> Result<Vec<FeedbackRecord>>;
}

/// Just enough of the model document to check compatibility
#[derive(Deserialize)]
struct SchemaHeader {
    schema: ModelSchema,
}

/// Validate the schema before decoding the rest of the document
fn decode_model(json: &str) -> Result<TrainedModel> {
    let header: SchemaHeader = serde_json::from_str(json)
        .map_err(|e| Error::ModelSchema(format!("model file has no readable schema: {}", e)))?;
    header.schema.validate()?;
    Ok(serde_json::from_str(json)?)
}

/// Model store in a local directory
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    /// Create a store, creating the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                Error::Persistence(format!(
                    "Failed to create model directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            info!("Created model directory: {}", dir.display());
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    fn feedback_path(&self) -> PathBuf {
        self.dir.join(FEEDBACK_FILE)
    }
}

impl ModelStore for FileModelStore {
    fn location(&self) -> String {
        self.model_path().display().to_string()
    }

    fn save(&self, model: &TrainedModel) -> Result<()> {
        // Write next to the target so the rename stays on one filesystem
        let tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, model)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(self.model_path())
            .map_err(|e| Error::Persistence(format!("Failed to save model: {}", e)))?;

        info!("Saved model to {}", self.model_path().display());
        Ok(())
    }

    fn load(&self) -> Result<Option<TrainedModel>> {
        let path = self.model_path();
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        decode_model(&json).map(Some)
    }

    fn append_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.feedback_path())?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn read_feedback(&self) -> Result<Vec<FeedbackRecord>> {
        let path = self.feedback_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut records = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = number + 1, "Skipping unreadable feedback record: {}", e),
            }
        }
        Ok(records)
    }
}

/// In-process model store for tests and one-off runs
#[derive(Default)]
pub struct MemoryModelStore {
    model: Mutex<Option<String>>,
    feedback: Mutex<Vec<FeedbackRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects every save and feedback append
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    /// Seed the store with a raw model document
    pub fn with_document(json: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut model) = store.model.lock() {
            *model = Some(json.into());
        }
        store
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("model store is read-only".to_string()));
        }
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Persistence("model store lock poisoned".to_string())
}

impl ModelStore for MemoryModelStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn save(&self, model: &TrainedModel) -> Result<()> {
        self.check_writable()?;
        let json = serde_json::to_string(model)?;
        *self.model.lock().map_err(poisoned)? = Some(json);
        Ok(())
    }

    fn load(&self) -> Result<Option<TrainedModel>> {
        let guard = self.model.lock().map_err(poisoned)?;
        guard.as_deref().map(decode_model).transpose()
    }

    fn append_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        self.check_writable()?;
        self.feedback.lock().map_err(poisoned)?.push(record.clone());
        Ok(())
    }

    fn read_feedback(&self) -> Result<Vec<FeedbackRecord>> {
        Ok(self.feedback.lock().map_err(poisoned)?.clone())
    }
}
