//! Metadata record stored inside the container filesystem.
//!
//! The record lives at `/cibox/meta` so it travels with the container
//! through clone and archive. Writes are read-modify-write with a shallow
//! top-level merge; keys this version does not know are kept as they are.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cibox_shared::errors::{CiboxError, CiboxResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Persisted metadata of a managed container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerMeta {
    /// Base image the container was cloned from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped: Option<DateTime<Utc>>,

    #[serde(
        default,
        rename = "exitCode",
        skip_serializing_if = "Option::is_none"
    )]
    pub exit_code: Option<i32>,

    /// Insertion-ordered, de-duplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Literal command string executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,

    /// Keys written by other versions.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerMeta {
    /// Exact tag membership.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Partial update merged into the stored record.
///
/// Only fields set to `Some` are written; lists replace the stored list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetaPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<DateTime<Utc>>,

    #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

/// Reads and writes the metadata file of one container.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// `path` is the host path of `/cibox/meta`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored record, or an empty one if the file is absent or empty.
    pub fn read(&self) -> CiboxResult<ContainerMeta> {
        let raw = self.read_map()?;
        serde_json::from_value(Value::Object(raw)).map_err(|e| {
            CiboxError::Metadata(format!("invalid record {}: {}", self.path.display(), e))
        })
    }

    /// Shallow merge of `patch` into the stored record.
    pub fn merge(&self, patch: &MetaPatch) -> CiboxResult<()> {
        let mut raw = self.read_map()?;
        match serde_json::to_value(patch)? {
            Value::Object(update) => raw.extend(update),
            other => {
                return Err(CiboxError::Internal(format!(
                    "metadata patch serialized to {other}"
                )));
            }
        }
        self.write_map(&raw)
    }

    /// Union `tags` into the stored tags, keeping first-insertion order.
    ///
    /// Returns the resulting tag list.
    pub fn add_tags<I, S>(&self, tags: I) -> CiboxResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = self.read()?.tags;
        for tag in tags {
            let tag = tag.into();
            if !current.contains(&tag) {
                current.push(tag);
            }
        }

        self.merge(&MetaPatch {
            tags: Some(current.clone()),
            ..Default::default()
        })?;
        Ok(current)
    }

    fn read_map(&self) -> CiboxResult<Map<String, Value>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(CiboxError::Metadata(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str(&raw).map_err(|e| {
            CiboxError::Metadata(format!("invalid JSON in {}: {}", self.path.display(), e))
        })? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(CiboxError::Metadata(format!(
                "{} holds {} instead of an object",
                self.path.display(),
                json_kind(&other)
            ))),
        }
    }

    /// Write through a sibling temp file so a crash never leaves half a record.
    fn write_map(&self, map: &Map<String, Value>) -> CiboxResult<()> {
        let parent = self.path.parent().ok_or_else(|| {
            CiboxError::Internal(format!("metadata path {} has no parent", self.path.display()))
        })?;
        std::fs::create_dir_all(parent)?;

        let tmp = self.path.with_extension("tmp");
        let mut json = serde_json::to_string_pretty(map)?;
        json.push('\n');

        std::fs::write(&tmp, json).map_err(|e| {
            CiboxError::Metadata(format!("cannot write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            CiboxError::Metadata(format!("cannot replace {}: {}", self.path.display(), e))
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
