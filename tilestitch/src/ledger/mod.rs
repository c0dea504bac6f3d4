//! Content-addressed artifact ledger.
//!
//! One JSON document per run records every file the run produced, keyed by
//! run-relative path with a SHA-256 and size. The store follows an explicit
//! load / validate / mutate / persist lifecycle:
//!
//! - every mutation is validated against the schema before anything touches
//!   disk; an invalid mutation is rejected and the previous valid document
//!   stays in place,
//! - persistence writes to a temp file and renames, so a crash mid-write
//!   never leaves a corrupt ledger,
//! - a fingerprint of the last bytes this store read or wrote detects a
//!   concurrent external writer, which fails that writer with
//!   [`LedgerError::Conflict`] instead of silently clobbering.
//!
//! Concurrent upserts from stages of the same process are serialized by the
//! store's internal mutex.

mod types;

pub use types::{Aoi, Artifact, LedgerDoc, LedgerError, AOI_CRS};

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Calculate the SHA-256 checksum of a file as a lowercase hex string.
///
/// Streams the file in 8 KiB chunks so large rasters never load whole.
pub fn hash_file(path: &Path) -> Result<String, LedgerError> {
    let file = File::open(path).map_err(|e| LedgerError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| LedgerError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

struct StoreInner {
    doc: LedgerDoc,
    /// SHA-256 of the document bytes last read from or written to disk.
    disk_fingerprint: String,
}

/// Serialized access to one run's ledger document on disk.
pub struct LedgerStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl LedgerStore {
    /// Creates a new ledger on disk for a run.
    ///
    /// Fails with `ValidationFailed` if the initial document does not
    /// satisfy the schema; nothing is written in that case.
    pub fn create(path: impl Into<PathBuf>, doc: LedgerDoc) -> Result<Self, LedgerError> {
        let path = path.into();
        doc.validate()?;

        let bytes = Self::encode(&doc)?;
        Self::write_atomic(&path, &bytes)?;
        info!(path = %path.display(), run_id = %doc.run_id, "Created run ledger");

        Ok(Self {
            path,
            inner: Mutex::new(StoreInner {
                doc,
                disk_fingerprint: hash_bytes(&bytes),
            }),
        })
    }

    /// Opens an existing ledger, validating it before use.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let bytes = fs::read(&path).map_err(|e| LedgerError::Io {
            path: path.clone(),
            source: e,
        })?;

        let doc: LedgerDoc = serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::ValidationFailed(e.to_string()))?;
        doc.validate()?;

        Ok(Self {
            path,
            inner: Mutex::new(StoreInner {
                doc,
                disk_fingerprint: hash_bytes(&bytes),
            }),
        })
    }

    /// Path of the on-disk document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a snapshot of the current document.
    pub fn document(&self) -> LedgerDoc {
        self.inner.lock().expect("ledger mutex poisoned").doc.clone()
    }

    /// Upserts one artifact record and persists the ledger.
    ///
    /// The mutation is applied to a copy, validated, and only then written;
    /// on any failure the in-memory and on-disk documents are unchanged.
    pub fn upsert(&self, artifact: Artifact) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("ledger mutex poisoned");

        let mut candidate = inner.doc.clone();
        candidate.upsert_artifact(artifact.clone());
        candidate.validate()?;

        let bytes = Self::encode(&candidate)?;
        self.persist_guarded(&mut inner, candidate, bytes)?;
        debug!(path = %artifact.path, sha256 = %artifact.sha256, "Upserted artifact");
        Ok(())
    }

    /// Hashes a file under `root` and upserts it as `rel_path`.
    pub fn upsert_file(&self, root: &Path, rel_path: &str) -> Result<Artifact, LedgerError> {
        let full = root.join(rel_path);
        let sha256 = hash_file(&full)?;
        let size = fs::metadata(&full)
            .map_err(|e| LedgerError::Io {
                path: full.clone(),
                source: e,
            })?
            .len();

        let artifact = Artifact {
            path: rel_path.to_string(),
            sha256,
            size,
        };
        self.upsert(artifact.clone())?;
        Ok(artifact)
    }

    /// Hashes an output file and upserts it keyed by its path relative
    /// to the ledger document's directory.
    ///
    /// Artifact keys are always run-relative; a file outside the ledger
    /// directory has no unambiguous key (two `mosaic.png` from different
    /// directories would collide) and fails with `ValidationFailed`.
    pub fn upsert_output(&self, file: &Path) -> Result<Artifact, LedgerError> {
        let root = self.path.parent().unwrap_or_else(|| Path::new("."));
        let rel = file
            .strip_prefix(root)
            .ok()
            .and_then(Path::to_str)
            .ok_or_else(|| {
                LedgerError::ValidationFailed(format!(
                    "output {} is outside the ledger directory {}",
                    file.display(),
                    root.display()
                ))
            })?;
        self.upsert_file(root, rel)
    }

    /// Records a named input source and persists the ledger.
    pub fn set_source(
        &self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("ledger mutex poisoned");

        let mut candidate = inner.doc.clone();
        candidate.sources.insert(name.into(), value);
        candidate.validate()?;

        let bytes = Self::encode(&candidate)?;
        self.persist_guarded(&mut inner, candidate, bytes)
    }

    /// Writes `bytes` after checking the on-disk document is still the one
    /// this store last saw. Commits the new state only on success.
    fn persist_guarded(
        &self,
        inner: &mut StoreInner,
        candidate: LedgerDoc,
        bytes: Vec<u8>,
    ) -> Result<(), LedgerError> {
        let on_disk = fs::read(&self.path).map_err(|e| LedgerError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        if hash_bytes(&on_disk) != inner.disk_fingerprint {
            return Err(LedgerError::Conflict {
                path: self.path.clone(),
            });
        }

        Self::write_atomic(&self.path, &bytes)?;
        inner.doc = candidate;
        inner.disk_fingerprint = hash_bytes(&bytes);
        Ok(())
    }

    fn encode(doc: &LedgerDoc) -> Result<Vec<u8>, LedgerError> {
        let mut bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| LedgerError::ValidationFailed(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LedgerError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| LedgerError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, path).map_err(|e| LedgerError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
