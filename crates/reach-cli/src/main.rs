//! reach CLI - robot workspace sampling and PCD2 streaming
//!
//! Samples the reachable workspace of a serial chain, exports it locally,
//! streams it over a WebSocket, or receives such a stream.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reach_ir::{ChainDef, PipelineConfig, Resolution, ShellConfig};
use reach_kernel::{KinematicModel, SerialChain};
use reach_stream::{PipelineError, ReceiverSession, Transport, WorkspacePipeline, WsTransport};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod export;

#[derive(Parser)]
#[command(name = "reach")]
#[command(about = "Monte Carlo robot workspace estimation", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Chain description (.json or .toml)
    #[arg(long)]
    robot: PathBuf,
    /// Pipeline configuration (.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Resolution preset: low, medium or high
    #[arg(long)]
    preset: Option<Resolution>,
    /// Override the sample count
    #[arg(long)]
    samples: Option<u32>,
    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the workspace and export point clouds
    Sample {
        #[command(flatten)]
        run: RunArgs,
        /// Raw samples output (.xyz)
        #[arg(long)]
        out: PathBuf,
        /// Voxel-deduplicated output (.xyz)
        #[arg(long)]
        dedup: Option<PathBuf>,
        /// Outer shell output (x y z nx ny nz)
        #[arg(long)]
        outer: Option<PathBuf>,
        /// Inner cavity shell output (x y z nx ny nz)
        #[arg(long)]
        inner: Option<PathBuf>,
    },
    /// Sample the workspace and stream it as PCD2 over a WebSocket
    Stream {
        #[command(flatten)]
        run: RunArgs,
        /// Receiver address, e.g. ws://127.0.0.1:8000/ws_workspace
        #[arg(long)]
        url: String,
    },
    /// Accept one WebSocket connection and store every received cloud
    Receive {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8765")]
        listen: String,
        /// Directory for pcd_<seq>.xyz files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Display the movable joints and tool point of a chain
    Info {
        /// Chain description (.json or .toml)
        #[arg(long)]
        robot: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Sample {
            run,
            out,
            dedup,
            outer,
            inner,
        } => {
            sample(&run, &out, dedup.as_deref(), outer.as_deref(), inner.as_deref()).await?;
        }
        Commands::Stream { run, url } => {
            stream(&run, &url).await?;
        }
        Commands::Receive { listen, out_dir } => {
            receive(&listen, &out_dir).await?;
        }
        Commands::Info { robot } => {
            show_info(&robot)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_chain(path: &Path) -> Result<SerialChain> {
    let def = ChainDef::load(path).with_context(|| format!("loading {}", path.display()))?;
    Ok(SerialChain::from_def(&def)?)
}

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(preset) = args.preset {
        preset.apply(&mut config);
    }
    if let Some(samples) = args.samples {
        config.sampler.samples = samples;
    }
    if args.seed.is_some() {
        config.sampler.seed = args.seed;
    }
    config.validate()?;
    Ok(config)
}

fn print_progress(percent: f64, label: &str) {
    eprint!("\r{percent:5.1}% {label:<24}");
    let _ = std::io::stderr().flush();
}

/// Raise the pipeline's abort flag on Ctrl-C.
fn abort_on_ctrl_c(pipeline: &WorkspacePipeline) -> tokio::task::JoinHandle<()> {
    let handle = pipeline.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting");
            handle.abort();
        }
    })
}

async fn sample(
    args: &RunArgs,
    out: &Path,
    dedup: Option<&Path>,
    outer: Option<&Path>,
    inner: Option<&Path>,
) -> Result<()> {
    let mut chain = load_chain(&args.robot)?;
    let mut config = load_config(args)?;
    if dedup.is_some() && config.dedup.voxel_size.is_none() {
        config.dedup.voxel_size = Some(Resolution::Medium.voxel_size());
    }
    if (outer.is_some() || inner.is_some()) && config.shell.is_none() {
        config.shell = Some(ShellConfig::default());
    }

    let mut pipeline = WorkspacePipeline::new(config)?;
    let watcher = abort_on_ctrl_c(&pipeline);
    let result = pipeline.sample(&mut chain, &mut print_progress).await;
    watcher.abort();
    eprintln!();

    let report = match result {
        Err(PipelineError::Aborted { .. }) => {
            println!("Sampling aborted, nothing written");
            return Ok(());
        }
        other => other?,
    };

    export::save_xyz(out, &report.points)?;
    println!("Wrote {} samples to {}", report.points.len(), out.display());

    if let (Some(path), Some(points)) = (dedup, &report.deduped) {
        export::save_xyz(path, points)?;
        println!("Wrote {} voxel representatives to {}", points.len(), path.display());
    }
    if let Some(shell) = &report.shell {
        if let Some(path) = outer {
            export::save_xyzn(path, &shell.outer)?;
            println!("Wrote {} outer shell points to {}", shell.outer.len(), path.display());
        }
        if let Some(path) = inner {
            export::save_xyzn(path, &shell.inner)?;
            println!("Wrote {} inner shell points to {}", shell.inner.len(), path.display());
        }
    }

    Ok(())
}

async fn stream(args: &RunArgs, url: &str) -> Result<()> {
    let mut chain = load_chain(&args.robot)?;
    let config = load_config(args)?;
    let mut pipeline = WorkspacePipeline::new(config)?;
    let mut transport = WsTransport::connect(url).await?;

    let watcher = abort_on_ctrl_c(&pipeline);
    let result = pipeline
        .run(&mut chain, &mut transport, &mut print_progress)
        .await;
    watcher.abort();
    eprintln!();

    match result {
        Ok(report) => {
            println!(
                "Sent {} points in {} frames (seq {})",
                report.stream.meta.total_points,
                report.stream.frames_sent,
                report.stream.meta.seq_id
            );
        }
        Err(PipelineError::Aborted {
            seq_id,
            frames_sent,
        }) => match seq_id {
            Some(seq) => println!("Upload of seq {seq} aborted after {frames_sent} frames"),
            None => println!("Sampling aborted, nothing sent"),
        },
        Err(err) => return Err(err.into()),
    }

    transport.close().await?;
    Ok(())
}

async fn receive(listen: &str, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(%listen, "waiting for a connection");

    let (stream, peer) = listener.accept().await?;
    info!(%peer, "connection accepted");
    let mut transport = WsTransport::accept(stream).await?;

    let mut session = ReceiverSession::new();
    let mut written = Vec::new();
    session
        .serve(&mut transport, |cloud| {
            let path = out_dir.join(format!("pcd_{}.xyz", cloud.seq_id));
            match export::save_xyz(&path, &cloud.points) {
                Ok(()) => written.push((path, cloud.points.len())),
                Err(err) => warn!(seq_id = cloud.seq_id, %err, "failed to write cloud"),
            }
        })
        .await?;

    for (path, n) in &written {
        println!("Wrote {n} points to {}", path.display());
    }
    if written.is_empty() {
        println!("No complete cloud received");
    }
    Ok(())
}

fn show_info(path: &Path) -> Result<()> {
    let def = ChainDef::load(path).with_context(|| format!("loading {}", path.display()))?;
    let chain = SerialChain::from_def(&def)?;

    println!("chain: {}", def.name.as_deref().unwrap_or("unnamed"));
    println!("  Joints: {}", def.joints.len());
    println!("  Movable joints: {}", def.movable_count());

    let joints = chain.movable_joints();
    if !joints.is_empty() {
        println!("\nMovable joints:");
        for (i, joint) in joints.iter().enumerate() {
            println!(
                "  {}: {} [{:.4}, {:.4}] value {:.4}",
                i,
                joint.id,
                joint.lower,
                joint.upper,
                chain.joint_value(i)
            );
        }
    }

    let origin = chain.origin();
    println!("\nShell origin: ({:.4}, {:.4}, {:.4})", origin.x, origin.y, origin.z);
    match chain.tool_point() {
        Some(p) => println!("Tool point: ({:.4}, {:.4}, {:.4})", p.x, p.y, p.z),
        None => println!("Tool point: none"),
    }

    Ok(())
}
