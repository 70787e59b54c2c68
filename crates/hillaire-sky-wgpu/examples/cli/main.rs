//! Sky LUT precompute CLI
//!
//! Runs the standard Hillaire pipeline once and leaves the exported tables
//! under the chosen cache directory. On a second invocation the tables are
//! imported from disk instead of recomputed, unless `--force` is given.

use clap::Parser;
use hillaire_sky_wgpu::{PrecomputeConfig, SkyLuts};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the LUT precompute tool.
#[derive(Parser)]
#[command(version, about = "Precomputes Hillaire sky lookup tables and caches them on disk")]
struct Args {
    /// Directory holding one EXR artifact per table
    #[arg(long, short, default_value = "lut-cache")]
    cache_dir: PathBuf,

    /// Recompute every table even when a cached artifact exists
    #[arg(long, short)]
    force: bool,

    /// Upper bound in seconds on the export read-back
    #[arg(long, default_value = "10")]
    readback_timeout: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    tracing::info!("initializing GPU");
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    // The 32-bit float tables are sampled with linear filtering.
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: None,
        required_features: wgpu::Features::FLOAT32_FILTERABLE,
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))?;

    let mut config = PrecomputeConfig::hillaire(&args.cache_dir);
    config.use_cached = !args.force;
    config.readback_timeout = Duration::from_secs(args.readback_timeout);

    let mut sky = SkyLuts::new(&device, config)?;

    if !sky.requires_precompute() {
        tracing::info!("tables already up to date, nothing to do");
        return Ok(());
    }

    let report = sky.precompute(&device, &queue)?;
    sky.mark_clean();

    for id in &report.imported {
        println!("imported  {}", sky.cache().path_for(*id).display());
    }
    for id in &report.exported {
        println!("exported  {}", sky.cache().path_for(*id).display());
    }
    for error in &report.export_errors {
        eprintln!("export failed: {error}");
    }

    tracing::info!(
        imported = report.imported.len(),
        exported = report.exported.len(),
        failed = report.export_errors.len(),
        "precompute finished"
    );

    Ok(())
}
