//! The single persisted session slot.
//!
//! A session is the subject set, the prompt and the aspect ratio a user
//! chose to keep for later. There is exactly one slot, stored under the
//! fixed key [`SESSION_KEY`]. Reading a record that does not parse discards
//! it.

use crate::error::{PhotoshootError, Result};
use crate::image::{AspectRatio, SubjectImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Key the session record is stored under.
pub const SESSION_KEY: &str = "aiPhotoshootSession";

/// Environment variable overriding the directory of the global store.
pub const SESSION_DIR_ENV: &str = "PHOTOSHOOT_SESSION_DIR";

/// A session as written by [`SessionStore::save`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Subject images, in order.
    pub subjects: Vec<SubjectImage>,
    /// Scene description.
    pub prompt: String,
    /// Aspect ratio hint.
    pub aspect_ratio: AspectRatio,
}

/// A session as read back by [`SessionStore::load`]; every field is
/// optional and applied only when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSession {
    /// Stored subjects (`uploadedImages` in older records).
    #[serde(default, alias = "uploadedImages")]
    pub subjects: Option<Vec<SubjectImage>>,
    /// Stored prompt.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Stored aspect ratio.
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
}

/// Storage port for the session slot.
pub trait SessionStore: Send + Sync {
    /// Reads the stored session. Missing or corrupted records yield `None`;
    /// a corrupted record is deleted.
    fn load(&self) -> Option<PartialSession>;

    /// Overwrites the stored session.
    fn save(&self, session: &SessionRecord) -> Result<()>;
}

fn parse_record(raw: &str) -> std::result::Result<PartialSession, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Session store backed by one JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Creates a store keeping its record at `<dir>/aiPhotoshootSession.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{SESSION_KEY}.json")),
        }
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn discard(&self, reason: &serde_json::Error) {
        tracing::warn!(path = %self.path.display(), "discarding corrupted session: {reason}");
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to remove corrupted session: {e}");
        }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<PartialSession> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to read session: {e}");
                return None;
            }
        };
        match parse_record(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                self.discard(&e);
                None
            }
        }
    }

    fn save(&self, session: &SessionRecord) -> Result<()> {
        let io_err = |source| PhotoshootError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string(session)?;
        std::fs::write(&self.path, json).map_err(io_err)?;
        tracing::debug!(path = %self.path.display(), subjects = session.subjects.len(), "session saved");
        Ok(())
    }
}

/// Session store kept in memory, holding the raw serialized record.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    raw: Mutex<Option<String>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `raw` as its record, parsed on first load.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    /// Returns the raw record, if any.
    pub fn raw(&self) -> Option<String> {
        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<PartialSession> {
        let mut slot = self.raw.lock().unwrap_or_else(PoisonError::into_inner);
        let raw = slot.as_deref()?;
        match parse_record(raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("discarding corrupted session: {e}");
                *slot = None;
                None
            }
        }
    }

    fn save(&self, session: &SessionRecord) -> Result<()> {
        let json = serde_json::to_string(session)?;
        *self.raw.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
        Ok(())
    }
}

/// Returns the process-wide session store, created on first use.
///
/// The record lives in `$PHOTOSHOOT_SESSION_DIR` when set, otherwise in the
/// platform data directory (`<data dir>/photoshoot`), falling back to the
/// system temp directory.
pub fn global() -> &'static FileSessionStore {
    static STORE: OnceLock<FileSessionStore> = OnceLock::new();
    STORE.get_or_init(|| FileSessionStore::in_dir(default_dir()))
}

fn default_dir() -> PathBuf {
    std::env::var_os(SESSION_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::data_dir().map(|d| d.join("photoshoot")))
        .unwrap_or_else(|| std::env::temp_dir().join("photoshoot"))
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn record() -> SessionRecord {
        SessionRecord {
            subjects: vec![SubjectImage {
                id: "dog.png-1-0".into(),
                payload: "AAAA".into(),
                media_type: "image/png".into(),
            }],
            prompt: "a dog on the moon".into(),
            aspect_ratio: AspectRatio::Landscape,
        }
    }

    #[test]
    fn test_file_store_round_trip() -> TestResult {
        let temp = tempfile::tempdir()?;
        let store = FileSessionStore::in_dir(temp.path().join("nested"));
        assert_eq!(store.load(), None);

        store.save(&record())?;
        let loaded = store.load().unwrap();
        assert_eq!(loaded.subjects, Some(record().subjects));
        assert_eq!(loaded.prompt.as_deref(), Some("a dog on the moon"));
        assert_eq!(loaded.aspect_ratio, Some(AspectRatio::Landscape));
        Ok(())
    }

    #[test]
    fn test_file_store_save_overwrites() -> TestResult {
        let temp = tempfile::tempdir()?;
        let store = FileSessionStore::in_dir(temp.path());
        store.save(&record())?;

        let mut second = record();
        second.prompt = "a cat".into();
        second.subjects.clear();
        store.save(&second)?;

        let loaded = store.load().unwrap();
        assert_eq!(loaded.prompt.as_deref(), Some("a cat"));
        assert_eq!(loaded.subjects, Some(vec![]));
        Ok(())
    }

    #[test]
    fn test_file_store_discards_corrupted_record() -> TestResult {
        let temp = tempfile::tempdir()?;
        let store = FileSessionStore::in_dir(temp.path());
        std::fs::write(store.path(), "{not json")?;

        assert_eq!(store.load(), None);
        assert!(!store.path().exists());
        Ok(())
    }

    #[test]
    fn test_wrong_shape_is_treated_as_corrupted() {
        let store = MemorySessionStore::with_raw(r#"{"subjects": "not a list"}"#);
        assert_eq!(store.load(), None);
        assert_eq!(store.raw(), None);
    }

    #[test]
    fn test_legacy_field_name_is_accepted() {
        let store = MemorySessionStore::with_raw(
            r#"{"uploadedImages": [{"id": "a", "data": "QQ==", "mimeType": "image/jpeg"}],
                "prompt": "beach"}"#,
        );
        let loaded = store.load().unwrap();
        assert_eq!(loaded.subjects.unwrap()[0].id, "a");
        assert_eq!(loaded.prompt.as_deref(), Some("beach"));
        assert_eq!(loaded.aspect_ratio, None);
    }

    #[test]
    fn test_saved_record_uses_camel_case() -> TestResult {
        let store = MemorySessionStore::new();
        store.save(&record())?;
        let json: serde_json::Value = serde_json::from_str(&store.raw().unwrap())?;
        assert_eq!(json["aspectRatio"], "landscape");
        assert_eq!(json["subjects"][0]["mimeType"], "image/png");
        Ok(())
    }
}
