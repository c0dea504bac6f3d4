//! Ledger document types and schema validation.
//!
//! The persisted form is a JSON document with a fixed set of top-level
//! keys; anything else is a schema violation and the write is rejected.

use crate::coord::GeoBbox;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// The only coordinate reference system an AOI descriptor may carry.
pub const AOI_CRS: &str = "EPSG:4326";

/// Errors that can occur while loading or persisting a ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The document (or a mutation of it) does not satisfy the schema.
    /// The on-disk ledger is left at its previous valid state.
    #[error("ledger validation failed: {0}")]
    ValidationFailed(String),

    /// The on-disk document changed underneath this writer.
    #[error("ledger conflict: {path} was modified by another writer")]
    Conflict { path: PathBuf },

    /// Filesystem error reading or writing the ledger or an artifact.
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// AOI descriptor fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Aoi {
    /// Opaque AOI identifier (e.g. "tashkent_core")
    pub id: String,
    /// `[west, south, east, north]` in WGS84 degrees
    pub bbox: GeoBbox,
    /// Always "EPSG:4326"
    pub crs: String,
}

impl Aoi {
    /// Creates an AOI descriptor with the fixed CRS.
    pub fn new(id: impl Into<String>, bbox: GeoBbox) -> Self {
        Self {
            id: id.into(),
            bbox,
            crs: AOI_CRS.to_string(),
        }
    }
}

/// One content-addressed file produced by a run. Unique by `path` within
/// a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Artifact {
    /// Run-relative path (e.g. "vector/buildings.parquet")
    pub path: String,
    /// Lowercase hex SHA-256 of the file content at time of write
    pub sha256: String,
    /// File size in bytes at time of write
    pub size: u64,
}

/// The ledger document for one pipeline run.
///
/// `deny_unknown_fields` enforces the "no unknown top-level keys" half of
/// the schema at parse time; [`LedgerDoc::validate`] enforces the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerDoc {
    /// Opaque run identifier
    pub run_id: String,
    /// Run creation timestamp (UTC)
    pub created_at: DateTime<Utc>,
    /// AOI descriptor, immutable once set
    pub aoi: Aoi,
    /// Input sources the run consumed (free-form, keyed by source name)
    pub sources: BTreeMap<String, serde_json::Value>,
    /// Files the run produced, unique by path
    pub artifacts: Vec<Artifact>,
}

impl LedgerDoc {
    /// Creates an empty ledger document stamped now.
    pub fn new(run_id: impl Into<String>, aoi: Aoi) -> Self {
        Self {
            run_id: run_id.into(),
            created_at: Utc::now(),
            aoi,
            sources: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    /// Validates the document against the ledger schema.
    ///
    /// Checks the invariants that `deny_unknown_fields` cannot express:
    /// non-empty run id, the fixed CRS, a well-formed AOI bbox, artifact
    /// path uniqueness and sha256/path shape.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.run_id.is_empty() {
            return Err(LedgerError::ValidationFailed("run_id is empty".into()));
        }
        if self.aoi.id.is_empty() {
            return Err(LedgerError::ValidationFailed("aoi.id is empty".into()));
        }
        if self.aoi.crs != AOI_CRS {
            return Err(LedgerError::ValidationFailed(format!(
                "aoi.crs must be {AOI_CRS}, got {}",
                self.aoi.crs
            )));
        }
        // GeoBbox rejects malformed arrays at parse time; re-check here so
        // programmatic mutations cannot sneak one through either.
        if self.aoi.bbox.west >= self.aoi.bbox.east || self.aoi.bbox.south >= self.aoi.bbox.north {
            return Err(LedgerError::ValidationFailed("aoi.bbox is malformed".into()));
        }

        let mut seen = std::collections::HashSet::with_capacity(self.artifacts.len());
        for a in &self.artifacts {
            if a.path.is_empty() || a.path.starts_with('/') || a.path.contains("..") {
                return Err(LedgerError::ValidationFailed(format!(
                    "artifact path must be run-relative: {:?}",
                    a.path
                )));
            }
            if a.sha256.len() != 64 || !a.sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(LedgerError::ValidationFailed(format!(
                    "artifact {} has malformed sha256: {:?}",
                    a.path, a.sha256
                )));
            }
            if !seen.insert(a.path.as_str()) {
                return Err(LedgerError::ValidationFailed(format!(
                    "duplicate artifact path: {}",
                    a.path
                )));
            }
        }
        Ok(())
    }

    /// Inserts or replaces the artifact with the same path.
    ///
    /// Replacing happens in place, so the array keeps its length and order;
    /// upserting an identical artifact leaves the document unchanged.
    pub fn upsert_artifact(&mut self, artifact: Artifact) {
        match self.artifacts.iter_mut().find(|a| a.path == artifact.path) {
            Some(existing) => *existing = artifact,
            None => self.artifacts.push(artifact),
        }
    }

    /// Looks up an artifact by its run-relative path.
    pub fn artifact(&self, path: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> LedgerDoc {
        let bbox = GeoBbox::new(69.103, 41.168, 69.397, 41.434).unwrap();
        LedgerDoc::new("run-001", Aoi::new("tashkent", bbox))
    }

    fn sample_artifact() -> Artifact {
        Artifact {
            path: "vector/buildings.parquet".into(),
            sha256: "a".repeat(64),
            size: 100,
        }
    }

    #[test]
    fn test_new_doc_validates() {
        sample_doc().validate().unwrap();
    }

    #[test]
    fn test_upsert_appends_then_replaces_in_place() {
        let mut doc = sample_doc();
        doc.upsert_artifact(sample_artifact());
        assert_eq!(doc.artifacts.len(), 1);

        let replacement = Artifact {
            path: "vector/buildings.parquet".into(),
            sha256: "b".repeat(64),
            size: 120,
        };
        doc.upsert_artifact(replacement.clone());

        assert_eq!(doc.artifacts.len(), 1, "array length stays 1");
        assert_eq!(doc.artifacts[0], replacement);
    }

    #[test]
    fn test_idempotent_upsert_is_byte_identical() {
        let mut doc = sample_doc();
        doc.upsert_artifact(sample_artifact());
        let first = serde_json::to_vec(&doc).unwrap();

        doc.upsert_artifact(sample_artifact());
        let second = serde_json::to_vec(&doc).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let mut doc = sample_doc();
        doc.artifacts.push(sample_artifact());
        doc.artifacts.push(sample_artifact());
        assert!(matches!(
            doc.validate(),
            Err(LedgerError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_absolute_artifact_path_rejected() {
        let mut doc = sample_doc();
        doc.artifacts.push(Artifact {
            path: "/etc/passwd".into(),
            sha256: "a".repeat(64),
            size: 1,
        });
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_malformed_sha256_rejected() {
        let mut doc = sample_doc();
        doc.artifacts.push(Artifact {
            path: "x.png".into(),
            sha256: "nothex".into(),
            size: 1,
        });
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_wrong_crs_rejected() {
        let mut doc = sample_doc();
        doc.aoi.crs = "EPSG:3857".into();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_unknown_top_level_key_rejected_at_parse() {
        let mut value = serde_json::to_value(sample_doc()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("extra".into(), serde_json::json!(1));

        let parsed: Result<LedgerDoc, _> = serde_json::from_value(value);
        assert!(parsed.is_err(), "unknown top-level keys must be rejected");
    }

    #[test]
    fn test_missing_required_key_rejected_at_parse() {
        let mut value = serde_json::to_value(sample_doc()).unwrap();
        value.as_object_mut().unwrap().remove("artifacts");

        let parsed: Result<LedgerDoc, _> = serde_json::from_value(value);
        assert!(parsed.is_err());
    }
}
