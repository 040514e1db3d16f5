use clap::Parser;
use geo::{Coord, Rect};
use std::path::PathBuf;

use crate::cli::{get_env, parse_args};

/// Environment variable overriding the worker count when `--workers` is absent
pub const WORKERS_ENV: &str = "FEATURE_TILER_WORKERS";

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Feature Tiler - Compiles geographic features into a multi-zoom tile store
pub struct Settings {
    /// JSON file with the master features
    #[clap(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// TOML file describing the zoom levels
    #[clap(short, long, value_name = "FILE")]
    pub levels: PathBuf,

    /// Directory receiving the compiled tiles
    #[clap(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Area to compile as min_lon,min_lat,max_lon,max_lat (defaults to the input bounds)
    #[clap(short, long, value_parser = parse_area, allow_hyphen_values = true)]
    pub area: Option<Rect<f64>>,

    /// Maximum worker threads per zoom level (overrides the level file)
    #[clap(short, long)]
    pub workers: Option<usize>,

    /// Also compile the ring of tiles bordering the area
    #[clap(long, default_value = "false")]
    pub padded: bool,

    /// Remove existing output before compiling
    #[clap(long, default_value = "false")]
    pub clear: bool,
}

impl Settings {
    /// Parse the process arguments, exiting with usage on error.
    pub fn from_cli() -> Self {
        match parse_args::<Settings>() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Worker count from the flag, then the environment.
    pub fn worker_override(&self) -> Option<usize> {
        self.workers.or_else(|| get_env(WORKERS_ENV))
    }
}

/// Parse `min_lon,min_lat,max_lon,max_lat`.
pub fn parse_area(value: &str) -> Result<Rect<f64>, String> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<Vec<f64>, String>>()?;
    let [min_lon, min_lat, max_lon, max_lat] = parts[..] else {
        return Err(format!("expected 4 comma separated numbers, got {}", parts.len()));
    };
    if min_lon >= max_lon || min_lat >= max_lat {
        return Err("area minimum must be below its maximum".to_string());
    }
    Ok(Rect::new(
        Coord {
            x: min_lon,
            y: min_lat,
        },
        Coord {
            x: max_lon,
            y: max_lat,
        },
    ))
}
