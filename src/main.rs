//! RayOS Offload CLI
//!
//! Runs the producer -> compute stage -> consumer pipeline until the tick
//! limit is reached or the process is interrupted.

use anyhow::Result;
use clap::Parser;
use rayos_offload::hal::{self, DeviceCandidate};
use rayos_offload::{Backend, DeviceClass, OffloadPipelineBuilder, PipelineConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rayos-offload")]
#[command(about = "RayOS Offload - dataflow pipeline with a GPU compute stage", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// List compute platforms and devices, then exit
    #[arg(long)]
    list_devices: bool,

    /// Kernel implementation behind the compute stage
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Device class discovery may select
    #[arg(short, long, value_enum)]
    device_class: Option<DeviceClass>,

    /// Stop after this many produced arrays (0 = until interrupted)
    #[arg(short, long)]
    ticks: Option<u64>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Cli::parse()).await {
        match err.downcast_ref::<rayos_offload::Error>() {
            Some(e) => {
                log::error!("{} ({}): {}", e.code_name(), e.code_value(), e);
                std::process::exit(e.exit_code());
            }
            None => {
                log::error!("{:#}", err);
                std::process::exit(1);
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.list_devices {
        list_devices();
        return Ok(());
    }

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    // Override with CLI options
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(class) = cli.device_class {
        config.device_class = class;
    }
    if let Some(ticks) = cli.ticks {
        config.max_ticks = ticks;
    }

    log::info!("╔════════════════════════════════════════╗");
    log::info!("║          RayOS Offload Pipeline        ║");
    log::info!("╚════════════════════════════════════════╝");

    let poll_interval = config.tick_interval();
    let pipeline = OffloadPipelineBuilder::new()
        .with_config(config)
        .build()?
        .start()?;

    tokio::select! {
        _ = pipeline.wait_complete(poll_interval.max(Duration::from_millis(1))) => {
            log::info!("Tick limit reached");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received shutdown signal");
        }
    }

    pipeline.shutdown()?;
    Ok(())
}

fn list_devices() {
    let instance = hal::create_instance();
    let platforms = hal::list_devices(&instance);

    if platforms.is_empty() {
        println!("No compute platform found");
        return;
    }

    for platform in platforms {
        println!("Platform: {}", platform.name);
        for device in &platform.devices {
            println!(
                "  {} [{:?}] available={} extensions={}",
                device.name(),
                device.device_type(),
                device.is_available(),
                device.extensions().join(",")
            );
        }
    }
}
