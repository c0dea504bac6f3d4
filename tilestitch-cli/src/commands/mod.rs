//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and a
//! `run` handler.
//!
//! # Command Modules
//!
//! - [`partition`] - Split an AOI bbox into an overlapping tile grid
//! - [`mosaic`] - Flatten a tile layer into a single image
//! - [`repair`] - Regenerate seams between adjacent tiles
//! - [`stylize`] - Re-render every tile through a regeneration backend
//! - [`ledger`] - Inspect and verify a run's artifact ledger

pub mod ledger;
pub mod mosaic;
pub mod partition;
pub mod repair;
pub mod stylize;

use crate::error::CliError;
use tilestitch::ledger::LedgerStore;

/// Opens the ledger when a path was given.
pub fn open_ledger(path: &Option<std::path::PathBuf>) -> Result<Option<LedgerStore>, CliError> {
    match path {
        Some(p) => Ok(Some(LedgerStore::open(p)?)),
        None => Ok(None),
    }
}

/// Parses a `#RRGGBB` (or `RRGGBB`) color string.
pub fn parse_color(s: &str) -> Result<[u8; 3], CliError> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CliError::InvalidArgument(format!(
            "expected a #RRGGBB color, got {s:?}"
        )));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);
    Ok([channel(0), channel(2), channel(4)])
}
