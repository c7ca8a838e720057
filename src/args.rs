use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cloudless")]
#[command(about = "Annual cloud-free Sentinel-2 mosaics: export, assemble, clip", long_about = None)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub subcmd: Subaction,
}

#[derive(Debug, Subcommand)]
pub enum Subaction {
    /// Composite the year's scenes and export populated tiles
    Export(RunArgs),
    /// Merge exported tiles into one compressed GeoTIFF
    Assemble(RunArgs),
    /// Clip the merged mosaic to the boundary and remove the unclipped file
    Clip(RunArgs),
    /// Export, assemble and clip in one go
    Run(RunArgs),
    /// Print the effective configuration as JSON
    Config(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON configuration file; defaults are used when absent
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Year to process, overriding the configuration
    #[arg(short, long)]
    pub year: Option<i32>,

    /// Root directory for all inputs and outputs
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Scene manifest, overriding the configuration
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Boundary vector file, overriding the configuration
    #[arg(long)]
    pub boundary: Option<PathBuf>,

    /// Keep the unclipped mosaic after clipping
    #[arg(long)]
    pub keep_mosaic: bool,
}
