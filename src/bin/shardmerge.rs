//! shardmerge - run and inspect shard-merge jobs
//!
//! Usage:
//!   shardmerge run --config job.json [--threads N] [--report report.json]
//!   shardmerge plan --config job.json
//!   shardmerge dump <segment>
//!   shardmerge write-segment --input pairs.tsv --output out.seg
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`).
//! SIGINT/SIGTERM cancel a running job; no partial shard output is left.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shardmerge::segment::{SegmentReader, SegmentWriter};
use shardmerge::{run_job, CancelToken, FileSystem, JobConfig, LocalFileSystem, Manifest, ShardPlanner};

#[derive(Parser, Debug)]
#[command(name = "shardmerge", version, about = "Shard-merge orchestration for sorted segments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a job and print its report as JSON
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Worker threads (overrides the config; default auto-tuned)
        #[arg(long)]
        threads: Option<usize>,
        /// Also write the report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the shard -> source paths plan without merging
    Plan {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print a segment's pairs as tab-separated lines
    Dump { segment: PathBuf },
    /// Build a segment from sorted `key<TAB>value` lines
    WriteSegment {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run { config, threads, report } => cmd_run(config, threads, report),
        Command::Plan { config } => cmd_plan(config),
        Command::Dump { segment } => cmd_dump(segment),
        Command::WriteSegment { input, output } => cmd_write_segment(input, output),
    }
}

fn cmd_run(config_path: PathBuf, threads: Option<usize>, report_path: Option<PathBuf>) -> Result<()> {
    let mut config = JobConfig::read_from(&config_path)
        .with_context(|| format!("failed to read job config {}", config_path.display()))?;
    if threads.is_some() {
        config.threads = threads;
    }

    let cancel = CancelToken::new();
    install_signal_handler(cancel.clone())?;

    let report = run_job(&config, cancel).context("shard-merge job failed")?;
    let json = serde_json::to_string_pretty(&report)?;
    if let Some(path) = report_path {
        std::fs::write(&path, &json).with_context(|| format!("failed to write report {}", path.display()))?;
    }
    println!("{}", json);
    Ok(())
}

fn install_signal_handler(cancel: CancelToken) -> Result<()> {
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("failed to register signal handlers")?;

    thread::spawn(move || {
        for sig in signals.forever() {
            tracing::warn!(signal = sig, "received signal, cancelling job");
            cancel.cancel();
        }
    });
    Ok(())
}

fn cmd_plan(config_path: PathBuf) -> Result<()> {
    let config = JobConfig::read_from(&config_path)
        .with_context(|| format!("failed to read job config {}", config_path.display()))?;
    let manifest = Manifest::from_config(&config)?;
    let plan = ShardPlanner::plan_manifest(&manifest);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn cmd_dump(segment: PathBuf) -> Result<()> {
    let fs = LocalFileSystem::new();
    let path = segment.to_string_lossy();
    let reader = SegmentReader::new(fs.open(&path)?)
        .with_context(|| format!("failed to open segment {}", segment.display()))?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for pair in reader {
        let pair = pair?;
        writeln!(
            out,
            "{}\t{}",
            String::from_utf8_lossy(&pair.key),
            String::from_utf8_lossy(&pair.value)
        )?;
    }
    out.flush()?;
    Ok(())
}

fn cmd_write_segment(input: PathBuf, output: PathBuf) -> Result<()> {
    let lines = BufReader::new(File::open(&input).with_context(|| format!("failed to open {}", input.display()))?);
    let fs = LocalFileSystem::new();
    let mut writer = SegmentWriter::new(fs.create(&output.to_string_lossy())?)?;

    for (n, line) in lines.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('\t') else {
            bail!("line {}: expected key<TAB>value", n + 1);
        };
        writer
            .add(key.as_bytes(), value.as_bytes())
            .with_context(|| format!("line {}", n + 1))?;
    }
    let meta = writer.finish()?;
    tracing::info!(
        path = %output.display(),
        records = meta.record_count,
        bytes = meta.byte_size,
        "segment written"
    );
    Ok(())
}
