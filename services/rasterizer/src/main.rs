//! Habitat rasterizer.
//!
//! Burns a GeoJSON FeatureCollection onto a reference grid and writes either
//! a sparse feature stack or one raster per feature.

mod config;
mod loader;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use raster_pipeline::{PipelineOutput, RasterPipeline};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::Overrides;

#[derive(Parser, Debug)]
#[command(name = "rasterizer")]
#[command(about = "Rasterize polygon features onto a reference grid")]
struct Args {
    /// Reference grid descriptor (JSON or YAML)
    #[arg(short, long, env = "RASTER_GRID")]
    grid: PathBuf,

    /// GeoJSON FeatureCollection to rasterize
    #[arg(short, long, env = "RASTER_FEATURES")]
    features: PathBuf,

    /// Run configuration file (YAML); environment variables are used when omitted
    #[arg(short, long, env = "RASTER_CONFIG")]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Assembly strategy: stack or files
    #[arg(long)]
    assembler: Option<String>,

    /// Worker threads (0 = all cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Touch policy: all_touched or exact
    #[arg(long)]
    touch: Option<String>,

    /// Burn mode: presence or rank
    #[arg(long)]
    burn_mode: Option<String>,

    /// Comma-separated dissolve columns
    #[arg(long)]
    group_by: Option<String>,

    /// Directory for cached dissolve outputs
    #[arg(long)]
    dissolve_cache_dir: Option<PathBuf>,

    /// Fail instead of writing partial output when any feature fails
    #[arg(long)]
    strict: bool,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs)?;

    info!("Starting rasterizer");

    let overrides = Overrides {
        output_dir: args.output.clone(),
        assembler: args.assembler.clone(),
        workers: args.workers,
        touch: args.touch.clone(),
        burn_mode: args.burn_mode.clone(),
        group_by: args.group_by.clone(),
        dissolve_cache_dir: args.dissolve_cache_dir.clone(),
        strict: args.strict,
    };
    let config = config::resolve(args.config.as_deref(), &overrides)?;
    info!(
        assembler = %config.assembler,
        touch = %config.touch,
        burn_mode = %config.burn_mode,
        group_by = ?config.group_by,
        output = %config.output_dir.display(),
        "Loaded configuration"
    );

    let grid = loader::load_grid(&args.grid)?;
    let features = loader::load_features(&args.features)?;

    let pipeline = RasterPipeline::new(config)?;
    let run = pipeline.run(&grid, features)?;

    match &run.output {
        PipelineOutput::Stack { stack, path } => {
            info!(path = %path.display(), features = stack.len(), nnz = stack.nnz(), "Stack written");
        }
        PipelineOutput::Files(assembly) => {
            info!(
                catalog = %assembly.catalog_path.display(),
                written = assembly.written,
                failed = assembly.failed,
                "Rasters written"
            );
        }
    }

    for failure in &run.report.failures {
        warn!(feature = %failure.key, stage = ?failure.stage, error = %failure.message, "Feature not in output");
    }

    println!("{}", serde_json::to_string_pretty(&run.report)?);
    Ok(())
}
