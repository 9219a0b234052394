//! File-backed schema persistence.
//!
//! Each data source gets two files in the resources directory:
//! ```text
//! resources/
//!   ├── <name>_schema.json     (the schema document)
//!   └── <name>_metadata.json   (generated_at, ttl_seconds, hash, ...)
//! ```
//! A schema is served from disk only while `generated_at + ttl_seconds` lies
//! in the future.


use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::datasource::validate_name;

pub const SCHEMA_VERSION: &str = "1.0";
const DEFAULT_TTL_SECONDS: u64 = 3600;
const SCHEMA_SUFFIX: &str = "_schema.json";
const METADATA_SUFFIX: &str = "_metadata.json";

#[derive(Error, Diagnostic, Debug)]
pub enum SchemaStoreError {
    #[error("Failed to access {path}: {message}")]
    #[diagnostic(code(mcp_bridge::schema::io))]
    Io { path: String, message: String },

    #[error("Failed to encode schema for {data_source}: {message}")]
    #[diagnostic(code(mcp_bridge::schema::serialization))]
    Serialization {
        data_source: String,
        message: String,
    },

    #[error("Invalid data source name: {0}")]
    #[diagnostic(code(mcp_bridge::schema::invalid_name))]
    InvalidName(String),
}

fn io_error(path: &Path, e: std::io::Error) -> SchemaStoreError {
    SchemaStoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Contents of `<name>_metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaFileMetadata {
    pub data_source: String,
    pub generated_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub schema_size: usize,
    pub version: String,
    pub hash: String,
}

impl SchemaFileMetadata {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let ttl = Duration::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX));
        now.signed_duration_since(self.generated_at) <= ttl
    }
}

/// Entry returned by [`SchemaStore::list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSchema {
    #[serde(flatten)]
    pub metadata: SchemaFileMetadata,
    pub is_fresh: bool,
    pub schema_file_exists: bool,
}

/// JSON text with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let ordered: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                Value::Object(
                    ordered
                        .into_iter()
                        .map(|(k, v)| (k.clone(), v))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Lowercase hex form of a digest.
pub fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 of `data`, hex encoded.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex_digest(&Sha256::digest(data))
}

/// SHA-256 of the canonical JSON form, hex encoded.
pub fn schema_hash(schema: &Value) -> String {
    sha256_hex(canonical_json(schema))
}

#[derive(Debug, Clone)]
pub struct SchemaStore {
    dir: PathBuf,
}

impl SchemaStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SchemaStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, name: &str) -> Result<(PathBuf, PathBuf), SchemaStoreError> {
        validate_name(name).map_err(|_| SchemaStoreError::InvalidName(name.to_string()))?;
        Ok((
            self.dir.join(format!("{}{}", name, SCHEMA_SUFFIX)),
            self.dir.join(format!("{}{}", name, METADATA_SUFFIX)),
        ))
    }

    fn read_metadata(path: &Path) -> Option<SchemaFileMetadata> {
        let text = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&text) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Ignoring unreadable schema metadata {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Fresh cached schema for `name`, if any.
    pub fn get(&self, name: &str) -> Option<Value> {
        let (schema_path, metadata_path) = self.paths(name).ok()?;
        if !schema_path.exists() {
            return None;
        }
        let metadata = Self::read_metadata(&metadata_path)?;
        if !metadata.is_fresh(Utc::now()) {
            debug!("Cached schema for {} is stale", name);
            return None;
        }
        let text = fs::read_to_string(&schema_path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Persist `schema` and its metadata. The TTL comes from the schema's
    /// own `metadata.cache_ttl`.
    pub fn save(&self, name: &str, schema: &Value) -> Result<SchemaFileMetadata, SchemaStoreError> {
        let (schema_path, metadata_path) = self.paths(name)?;
        let encode_error = |e: serde_json::Error| SchemaStoreError::Serialization {
            data_source: name.to_string(),
            message: e.to_string(),
        };

        let body = serde_json::to_string_pretty(schema).map_err(encode_error)?;
        let metadata = SchemaFileMetadata {
            data_source: name.to_string(),
            generated_at: Utc::now(),
            ttl_seconds: schema["metadata"]["cache_ttl"]
                .as_u64()
                .unwrap_or(DEFAULT_TTL_SECONDS),
            schema_size: schema.to_string().len(),
            version: SCHEMA_VERSION.to_string(),
            hash: schema_hash(schema),
        };
        let metadata_body = serde_json::to_string_pretty(&metadata).map_err(encode_error)?;

        fs::write(&schema_path, body).map_err(|e| io_error(&schema_path, e))?;
        fs::write(&metadata_path, metadata_body).map_err(|e| io_error(&metadata_path, e))?;
        debug!("Saved schema for {} ({} bytes)", name, metadata.schema_size);
        Ok(metadata)
    }

    /// True when no fresh schema is cached.
    pub fn is_stale(&self, name: &str) -> bool {
        self.get(name).is_none()
    }

    /// Remove both files; missing files are not an error.
    pub fn invalidate(&self, name: &str) -> Result<(), SchemaStoreError> {
        let (schema_path, metadata_path) = self.paths(name)?;
        for path in [schema_path, metadata_path] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Ok(())
    }

    /// Hash of the cached schema, if a fresh one exists.
    pub fn hash(&self, name: &str) -> Option<String> {
        self.get(name).map(|schema| schema_hash(&schema))
    }

    /// Every data source with metadata on disk, keyed by name.
    pub fn list(&self) -> Result<BTreeMap<String, StoredSchema>, SchemaStoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let now = Utc::now();
        let mut listed = BTreeMap::new();

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|f| f.strip_suffix(METADATA_SUFFIX))
            else {
                continue;
            };
            let Some(metadata) = Self::read_metadata(&entry.path()) else {
                continue;
            };
            let schema_file_exists = self.dir.join(format!("{}{}", name, SCHEMA_SUFFIX)).exists();
            listed.insert(
                name.to_string(),
                StoredSchema {
                    is_fresh: metadata.is_fresh(now),
                    metadata,
                    schema_file_exists,
                },
            );
        }
        Ok(listed)
    }

    /// Delete every stale schema; returns how many data sources were removed.
    pub fn cleanup_stale(&self) -> Result<usize, SchemaStoreError> {
        let mut removed = 0;
        for (name, stored) in self.list()? {
            if !stored.is_fresh {
                self.invalidate(&name)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
