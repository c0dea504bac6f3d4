//! `partition` - split an AOI bbox into an overlapping tile grid.

use crate::error::CliError;
use clap::Args;
use std::path::PathBuf;
use tilestitch::coord::GeoBbox;
use tilestitch::grid::{partition, scale_bbox};

#[derive(Debug, Args)]
pub struct PartitionArgs {
    /// AOI bounding box as `west,south,east,north` in WGS84 degrees
    #[arg(long, value_name = "W,S,E,N")]
    pub bbox: String,

    /// Grid size N (the partition is N x N)
    #[arg(long, default_value = "3")]
    pub grid: u32,

    /// Fractional context overlap per tile side
    #[arg(long, default_value = "0.1")]
    pub overlap: f64,

    /// Scale the bbox around its center by this fraction first
    #[arg(long)]
    pub scale: Option<f64>,

    /// Write the grid JSON here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: &PartitionArgs) -> Result<(), CliError> {
    let bbox = parse_bbox(&args.bbox)?;
    let bbox = match args.scale {
        Some(fraction) => scale_bbox(&bbox, fraction, None)?,
        None => bbox,
    };

    let grid = partition(&bbox, args.grid, args.overlap)?;
    let mut json = serde_json::to_vec_pretty(&grid)
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    json.push(b'\n');

    match &args.output {
        Some(path) => std::fs::write(path, &json).map_err(|error| CliError::FileWrite {
            path: path.display().to_string(),
            error,
        })?,
        None => print!("{}", String::from_utf8_lossy(&json)),
    }
    Ok(())
}

fn parse_bbox(s: &str) -> Result<GeoBbox, CliError> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| CliError::InvalidArgument(format!("bbox {s:?}: {e}")))?;
    let [west, south, east, north] = parts[..] else {
        return Err(CliError::InvalidArgument(format!(
            "bbox must have 4 comma-separated values, got {}",
            parts.len()
        )));
    };
    GeoBbox::new(west, south, east, north)
        .map_err(|e| CliError::InvalidArgument(format!("bbox {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        let b = parse_bbox("69.103, 41.168, 69.397, 41.434").unwrap();
        assert_eq!(b.west, 69.103);
        assert_eq!(b.north, 41.434);

        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
        // west >= east
        assert!(parse_bbox("10,0,5,5").is_err());
    }

    #[test]
    fn test_run_writes_grid_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("grid.json");
        let args = PartitionArgs {
            bbox: "69.103,41.168,69.397,41.434".into(),
            grid: 3,
            overlap: 0.1,
            scale: None,
            output: Some(out.clone()),
        };

        run(&args).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(value["n"], 3);
        assert_eq!(value["tiles"].as_array().unwrap().len(), 9);
    }
}
