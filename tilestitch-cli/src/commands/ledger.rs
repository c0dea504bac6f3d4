//! `ledger` - inspect and verify a run's artifact ledger.

use crate::error::CliError;
use clap::{Args, Subcommand};
use std::path::PathBuf;
use tilestitch::ledger::{hash_file, LedgerStore};
use tracing::warn;

#[derive(Debug, Args)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub command: LedgerCommand,
}

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// Print the ledger document
    Show {
        /// Ledger JSON path
        #[arg(long)]
        path: PathBuf,
    },
    /// Re-hash every recorded artifact and compare against the ledger
    Verify {
        /// Ledger JSON path
        #[arg(long)]
        path: PathBuf,

        /// Directory artifact paths are relative to (defaults to the
        /// ledger's directory)
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

pub fn run(args: &LedgerArgs) -> Result<(), CliError> {
    match &args.command {
        LedgerCommand::Show { path } => show(path),
        LedgerCommand::Verify { path, root } => verify(path, root.as_deref()),
    }
}

fn show(path: &PathBuf) -> Result<(), CliError> {
    let store = LedgerStore::open(path)?;
    let doc = store.document();
    let json = serde_json::to_string_pretty(&doc)
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    println!("{json}");
    Ok(())
}

fn verify(path: &PathBuf, root: Option<&std::path::Path>) -> Result<(), CliError> {
    let store = LedgerStore::open(path)?;
    let doc = store.document();

    let default_root = path.parent().map(PathBuf::from).unwrap_or_default();
    let root = root.unwrap_or(&default_root);

    let mut mismatches = 0usize;
    for artifact in &doc.artifacts {
        let full = root.join(&artifact.path);
        match (hash_file(&full), std::fs::metadata(&full)) {
            (Ok(sha256), Ok(meta)) if sha256 == artifact.sha256 && meta.len() == artifact.size => {
                println!("ok       {}", artifact.path);
            }
            (Ok(sha256), Ok(meta)) => {
                warn!(
                    path = %artifact.path,
                    expected_sha256 = %artifact.sha256,
                    actual_sha256 = %sha256,
                    expected_size = artifact.size,
                    actual_size = meta.len(),
                    "Artifact does not match its record"
                );
                println!("changed  {}", artifact.path);
                mismatches += 1;
            }
            _ => {
                println!("missing  {}", artifact.path);
                mismatches += 1;
            }
        }
    }

    if mismatches > 0 {
        return Err(CliError::VerifyFailed { mismatches });
    }
    println!("Verified {} artifact(s)", doc.artifacts.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilestitch::coord::GeoBbox;
    use tilestitch::ledger::{Aoi, LedgerDoc};

    fn sample_store(dir: &std::path::Path) -> LedgerStore {
        let bbox = GeoBbox::new(69.103, 41.168, 69.397, 41.434).unwrap();
        let doc = LedgerDoc::new("run-001", Aoi::new("tashkent", bbox));
        LedgerStore::create(dir.join("run.json"), doc).unwrap()
    }

    #[test]
    fn test_verify_clean_ledger() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"payload").unwrap();
        let store = sample_store(dir.path());
        store.upsert_file(dir.path(), "a.bin").unwrap();

        verify(&dir.path().join("run.json"), None).unwrap();
    }

    #[test]
    fn test_verify_flags_modified_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"payload").unwrap();
        let store = sample_store(dir.path());
        store.upsert_file(dir.path(), "a.bin").unwrap();

        std::fs::write(dir.path().join("a.bin"), b"tampered").unwrap();

        let result = verify(&dir.path().join("run.json"), None);
        assert!(matches!(
            result,
            Err(CliError::VerifyFailed { mismatches: 1 })
        ));
    }

    #[test]
    fn test_verify_flags_missing_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"payload").unwrap();
        let store = sample_store(dir.path());
        store.upsert_file(dir.path(), "a.bin").unwrap();

        std::fs::remove_file(dir.path().join("a.bin")).unwrap();

        let result = verify(&dir.path().join("run.json"), None);
        assert!(matches!(
            result,
            Err(CliError::VerifyFailed { mismatches: 1 })
        ));
    }
}
