//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use tilestitch::grid::GridError;
use tilestitch::layer::LayerError;
use tilestitch::ledger::LedgerError;
use tilestitch::mosaic::MosaicError;
use tilestitch::seam::SeamError;
use tilestitch::stylize::StylizeError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// A flag value could not be parsed or is out of range
    InvalidArgument(String),
    /// Grid partitioning failed
    Grid(GridError),
    /// Layer directory error
    Layer(LayerError),
    /// Mosaic compositing failed
    Mosaic(MosaicError),
    /// Seam repair failed
    Seam(SeamError),
    /// Stylize stage failed
    Stylize(StylizeError),
    /// Ledger operation failed
    Ledger(LedgerError),
    /// Ledger verification found mismatched artifacts
    VerifyFailed { mismatches: usize },
    /// Failed to write an output file
    FileWrite { path: String, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Ledger(LedgerError::Conflict { .. }) => {
                eprintln!();
                eprintln!("Another process modified the ledger during this run.");
                eprintln!("Re-run the command once the other writer has finished.");
            }
            CliError::VerifyFailed { .. } => {
                eprintln!();
                eprintln!("One or more artifacts changed on disk after being recorded.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Grid(e) => write!(f, "Failed to partition AOI: {}", e),
            CliError::Layer(e) => write!(f, "Layer error: {}", e),
            CliError::Mosaic(e) => write!(f, "Failed to composite mosaic: {}", e),
            CliError::Seam(e) => write!(f, "Seam repair failed: {}", e),
            CliError::Stylize(e) => write!(f, "Stylize failed: {}", e),
            CliError::Ledger(e) => write!(f, "Ledger error: {}", e),
            CliError::VerifyFailed { mismatches } => {
                write!(f, "Ledger verification failed: {} artifact(s) mismatched", mismatches)
            }
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path, error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Grid(e) => Some(e),
            CliError::Layer(e) => Some(e),
            CliError::Mosaic(e) => Some(e),
            CliError::Seam(e) => Some(e),
            CliError::Stylize(e) => Some(e),
            CliError::Ledger(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<GridError> for CliError {
    fn from(e: GridError) -> Self {
        CliError::Grid(e)
    }
}

impl From<LayerError> for CliError {
    fn from(e: LayerError) -> Self {
        CliError::Layer(e)
    }
}

impl From<MosaicError> for CliError {
    fn from(e: MosaicError) -> Self {
        CliError::Mosaic(e)
    }
}

impl From<SeamError> for CliError {
    fn from(e: SeamError) -> Self {
        CliError::Seam(e)
    }
}

impl From<StylizeError> for CliError {
    fn from(e: StylizeError) -> Self {
        CliError::Stylize(e)
    }
}

impl From<LedgerError> for CliError {
    fn from(e: LedgerError) -> Self {
        CliError::Ledger(e)
    }
}
