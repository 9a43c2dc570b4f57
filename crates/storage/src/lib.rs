//! Session persistence: two whole-record JSON files under fixed keys.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use directories::ProjectDirs;
use doc_model::{DocumentId, SessionState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Record holding the serialized [`SessionState`].
pub const STATE_KEY: &str = "pdf_stitcher_v2_state";
/// Record holding the raw bytes of every open document.
pub const FILES_KEY: &str = "pdf_stitcher_v2_files";

const STATE_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Raw bytes of every open document, keyed by document id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilesRecord(BTreeMap<DocumentId, StoredBytes>);

impl FilesRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: DocumentId, bytes: Vec<u8>) {
        self.0.insert(id, StoredBytes(bytes));
    }

    pub fn remove(&mut self, id: DocumentId) -> Option<Vec<u8>> {
        self.0.remove(&id).map(|stored| stored.0)
    }

    pub fn get(&self, id: DocumentId) -> Option<&[u8]> {
        self.0.get(&id).map(|stored| stored.0.as_slice())
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.0.keys().copied()
    }
}

/// Bytes persisted as a base64 string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StoredBytes(Vec<u8>);

impl Serialize for StoredBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for StoredBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map(StoredBytes).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateEnvelope<T> {
    version: u32,
    state: T,
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn from_default_project() -> StorageResult<Self> {
        let dirs = ProjectDirs::from("dev", "PageStitch", "PageStitch")
            .ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads the record stored under `key`, or `None` if it was never written.
    pub fn read_record<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Replaces the record stored under `key`.
    ///
    /// The new contents land in a sibling temp file first, so readers never
    /// observe a half-written record.
    pub fn write_record<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        fs::create_dir_all(&self.root)?;

        let bytes = serde_json::to_vec(value)?;
        let path = self.record_path(key);
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &path)?;

        tracing::trace!(key, "record written");
        Ok(())
    }

    pub fn remove_record(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Loads the session. Legacy fields are migrated before returning.
    pub fn load_state(&self) -> StorageResult<Option<SessionState>> {
        let Some(envelope) = self.read_record::<StateEnvelope<SessionState>>(STATE_KEY)? else {
            return Ok(None);
        };

        if envelope.version > STATE_SCHEMA_VERSION {
            tracing::warn!(version = envelope.version, "session written by a newer version");
        }

        let mut state = envelope.state;
        state.migrate();
        Ok(Some(state))
    }

    pub fn save_state(&self, state: &SessionState) -> StorageResult<()> {
        self.write_record(STATE_KEY, &StateEnvelope { version: STATE_SCHEMA_VERSION, state })
    }

    pub fn load_files(&self) -> StorageResult<Option<FilesRecord>> {
        self.read_record(FILES_KEY)
    }

    pub fn save_files(&self, files: &FilesRecord) -> StorageResult<()> {
        self.write_record(FILES_KEY, files)
    }

    /// Forgets the whole session.
    pub fn clear(&self) -> StorageResult<()> {
        self.remove_record(STATE_KEY)?;
        self.remove_record(FILES_KEY)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}
