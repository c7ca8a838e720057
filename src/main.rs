//! cloudless command-line interface
//!
//! Runs the export, assembly and clip stages of a yearly mosaic, separately
//! or together, from a JSON configuration file.

mod args;

use anyhow::{Context, Result};
use args::{CliArgs, RunArgs, Subaction};
use clap::Parser;
use cloudless::PipelineConfig;

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(year) = args.year {
        config.year = year;
    }
    if let Some(root) = &args.root {
        config.paths.root = root.clone();
    }
    if let Some(catalog) = &args.catalog {
        config.paths.catalog = catalog.clone();
    }
    if let Some(boundary) = &args.boundary {
        config.paths.boundary = boundary.clone();
    }
    if args.keep_mosaic {
        config.keep_unclipped_mosaic = true;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[cfg(feature = "gdal")]
fn execute(subcmd: &Subaction, config: &PipelineConfig) -> Result<()> {
    use cloudless::io::{GdalStore, LocalDirectoryDestination, ManifestCatalog};
    use cloudless::Pipeline;

    let store = GdalStore::new();
    let destination = LocalDirectoryDestination::new(&config.paths.root, &store);
    let catalog_path = config.catalog_path();

    match subcmd {
        Subaction::Export(_) | Subaction::Run(_) => {
            let catalog = ManifestCatalog::from_file(&catalog_path, &store)
                .with_context(|| format!("opening scene catalog {}", catalog_path.display()))?;
            let pipeline = Pipeline::new(config, &catalog, &destination, &store)?;
            if matches!(subcmd, Subaction::Run(_)) {
                let summary = pipeline.run()?;
                log::info!(
                    "Exported {} tiles, mosaic {} x {} px, clipped to {}",
                    summary.export.report.submitted().len(),
                    summary.mosaic.width,
                    summary.mosaic.height,
                    summary.clip.output_path.display()
                );
            } else {
                let summary = pipeline.export()?;
                log::info!(
                    "{} of {} tiles exported, {} skipped, {} failed",
                    summary.report.submitted().len(),
                    summary.tile_count,
                    summary.report.skipped().len(),
                    summary.report.failed().len()
                );
            }
        }
        Subaction::Assemble(_) => {
            let catalog = cloudless::io::MemoryCatalog::new();
            let summary = Pipeline::new(config, &catalog, &destination, &store)?.assemble()?;
            log::info!("Merged {} tiles into {}", summary.tiles.len(), summary.output_path.display());
        }
        Subaction::Clip(_) => {
            let catalog = cloudless::io::MemoryCatalog::new();
            let summary = Pipeline::new(config, &catalog, &destination, &store)?.clip()?;
            log::info!("Clipped raster: {}", summary.output_path.display());
        }
        Subaction::Config(_) => {}
    }
    Ok(())
}

#[cfg(not(feature = "gdal"))]
fn execute(_subcmd: &Subaction, _config: &PipelineConfig) -> Result<()> {
    anyhow::bail!("GeoTIFF support is not compiled in; rebuild with the default `gdal` feature enabled")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_args = CliArgs::parse();
    let run_args = match &cli_args.subcmd {
        Subaction::Export(a) | Subaction::Assemble(a) | Subaction::Clip(a) | Subaction::Run(a) | Subaction::Config(a) => a,
    };
    let config = load_config(run_args)?;

    if let Subaction::Config(_) = cli_args.subcmd {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    execute(&cli_args.subcmd, &config)
}
