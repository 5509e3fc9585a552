mod config;
mod demo;

use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use simplelog::{ColorChoice, CombinedLogger, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use strata_runtime::{Dispatcher, PipelineContext};
use strata_world::NoiseWorld;

use config::{AppConfig, load_app_config};
use demo::Demo;

#[derive(Parser, Debug)]
#[command(name = "strata", version, about = "Headless chunk meshing and upload driver")]
struct Cli {
    /// TOML file with `[pipeline]` and `[demo]` tables
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    frames: Option<u32>,

    /// View radius in chunk columns
    #[arg(long)]
    radius: Option<i32>,

    /// Upload budget per frame in milliseconds
    #[arg(long)]
    frame_budget_ms: Option<u64>,

    /// Worker threads; 1 runs everything on the calling thread
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long)]
    builders: Option<usize>,

    #[arg(long)]
    seed: Option<i32>,

    /// Also write the log to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    match log_file {
        Some(path) => {
            let cfg = simplelog::Config::default();
            CombinedLogger::init(vec![
                TermLogger::new(
                    LevelFilter::Info,
                    cfg.clone(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(LevelFilter::Debug, cfg, File::create(path)?),
            ])?;
        }
        None => {
            env_logger::Builder::new()
                .target(env_logger::Target::Stdout)
                .filter_level(log::LevelFilter::Info)
                .parse_env("RUST_LOG")
                .init();
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let mut cfg = match &cli.config {
        Some(path) => load_app_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(v) = cli.frames {
        cfg.demo.frames = v;
    }
    if let Some(v) = cli.radius {
        cfg.demo.radius = v;
    }
    if let Some(v) = cli.frame_budget_ms {
        cfg.demo.frame_budget_ms = v;
    }
    if let Some(v) = cli.seed {
        cfg.demo.seed = v;
    }
    if cli.threads.is_some() {
        cfg.pipeline.worker_threads = cli.threads;
    }
    if cli.builders.is_some() {
        cfg.pipeline.builder_capacity = cli.builders;
    }

    let mut world = NoiseWorld::new(cfg.demo.seed);
    world.chunk_size = cfg.pipeline.chunk_size;
    let world = Arc::new(world);
    let dispatcher = Dispatcher::new(
        PipelineContext {
            world: world.clone(),
            mesher: Demo::mesher(),
        },
        &cfg.pipeline,
    )?;
    log::info!(
        "seed {} radius {} over {} frames, {}",
        cfg.demo.seed,
        cfg.demo.radius,
        cfg.demo.frames,
        if dispatcher.is_single_threaded() {
            "single-threaded".to_string()
        } else {
            format!("{} worker(s)", dispatcher.sizing().worker_threads)
        }
    );

    let summary = Demo::new(cfg.demo, world, dispatcher, cfg.pipeline.chunk_size).run()?;
    log::info!(
        "resident {} chunks ({} verts); stop cancelled {} task(s), dropped {} upload(s)",
        summary.resident_chunks,
        summary.resident_vertices,
        summary.stop.cancelled_tasks,
        summary.stop.dropped_uploads
    );
    Ok(())
}
