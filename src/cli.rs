//
// cli.rs
// dicom-deid
//
// Defines the CLI surface with Clap and wires the engine, batch runner and transfer together.
//
// dicom-deid contributors - October 2026

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::anonymize::AnonymizerOptions;
use crate::batch::{BatchRunner, RunConfig};
use crate::engine::{Engine, EngineConfig};
use crate::guard::{AssumeBurnedIn, BurnedInAnnotationGuard, OnBurnedIn};
use crate::scu::{self, StoreScuTransfer};
use crate::transfer::{DirectoryTransfer, RetryingTransfer, Transfer};

#[derive(Parser)]
#[command(name = "dicom-deid")]
#[command(about = "Deterministic, resumable DICOM de-identification", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Anonymize files, directories or glob patterns
    Run(RunArgs),
    /// Perform a DICOM C-ECHO against a remote store (AE@HOST:PORT or HOST:PORT)
    Echo {
        addr: String,
        #[arg(long)]
        calling_ae: Option<String>,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Files, directories (walked recursively) or glob patterns
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Write anonymized files here as <SOPInstanceUID>.dcm instead of rewriting in place
    #[arg(short, long)]
    pub output_directory: Option<PathBuf>,

    /// Record original -> anonymized PatientID pairs to this CSV; it must not exist yet
    #[arg(short = 'm', long)]
    pub map: Option<PathBuf>,

    /// Reuse the PatientID substitutes recorded by an earlier run
    #[arg(long)]
    pub prior_map: Option<PathBuf>,

    /// Seed for reproducible substitutes; random when omitted
    #[arg(long, env = "DICOM_DEID_SEED", hide_env_values = true)]
    pub seed: Option<String>,

    #[arg(long, default_value = "")]
    pub id_prefix: String,

    #[arg(long, default_value = "")]
    pub id_suffix: String,

    #[arg(long, value_enum, default_value_t = AssumeBurnedInArg::IfYes)]
    pub assume_burned_in_annotation: AssumeBurnedInArg,

    #[arg(long, value_enum, default_value_t = OnBurnedInArg::Fail)]
    pub on_burned_in_annotation: OnBurnedInArg,

    /// Append completed files here and skip them on the next run
    #[arg(long, env = "DICOM_DEID_CHECKPOINT")]
    pub checkpoint: Option<PathBuf>,

    /// Move each anonymized file into this directory
    #[arg(long, conflicts_with = "transfer_scu")]
    pub transfer_dir: Option<PathBuf>,

    /// C-STORE each anonymized file to this remote store (AE@HOST:PORT)
    #[arg(long)]
    pub transfer_scu: Option<String>,

    #[arg(long)]
    pub calling_ae: Option<String>,

    #[arg(long, default_value_t = 3)]
    pub transfer_attempts: u32,

    #[arg(long, default_value_t = 500)]
    pub retry_delay_ms: u64,

    /// Worker threads; 1 keeps discovery order
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum AssumeBurnedInArg {
    IfYes,
    UnlessNo,
    Never,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum OnBurnedInArg {
    Warn,
    Fail,
}

impl From<AssumeBurnedInArg> for AssumeBurnedIn {
    fn from(value: AssumeBurnedInArg) -> Self {
        match value {
            AssumeBurnedInArg::IfYes => AssumeBurnedIn::IfYes,
            AssumeBurnedInArg::UnlessNo => AssumeBurnedIn::UnlessNo,
            AssumeBurnedInArg::Never => AssumeBurnedIn::Never,
        }
    }
}

impl From<OnBurnedInArg> for OnBurnedIn {
    fn from(value: OnBurnedInArg) -> Self {
        match value {
            OnBurnedInArg::Warn => OnBurnedIn::Warn,
            OnBurnedInArg::Fail => OnBurnedIn::Fail,
        }
    }
}

impl From<&RunArgs> for EngineConfig {
    fn from(args: &RunArgs) -> Self {
        EngineConfig {
            seed: args.seed.clone(),
            anonymizer: AnonymizerOptions {
                id_prefix: args.id_prefix.clone(),
                id_suffix: args.id_suffix.clone(),
            },
            guard: BurnedInAnnotationGuard::new(
                args.assume_burned_in_annotation.into(),
                args.on_burned_in_annotation.into(),
            ),
            map_path: args.map.clone(),
            prior_map: args.prior_map.clone(),
        }
    }
}

impl From<&RunArgs> for RunConfig {
    fn from(args: &RunArgs) -> Self {
        RunConfig {
            output_directory: args.output_directory.clone(),
            checkpoint: args.checkpoint.clone(),
            jobs: args.jobs,
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => run_batch(&args)?,
        Commands::Echo { addr, calling_ae } => {
            let status = scu::echo(&addr, calling_ae)
                .with_context(|| format!("C-ECHO to {addr} failed"))?;
            println!("C-ECHO {addr}: status {status:#06X}");
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (e.g. from a test harness) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_batch(args: &RunArgs) -> anyhow::Result<()> {
    if args.jobs == 0 {
        bail!("--jobs must be at least 1");
    }

    // Rejected layouts must fail before the map or the transfer directory is created.
    let run_config: RunConfig = args.into();
    let with_transfer = args.transfer_dir.is_some() || args.transfer_scu.is_some();
    run_config
        .validate(with_transfer, args.seed.is_some())
        .context("invalid run configuration")?;

    let transfer = build_transfer(args)?;
    let engine = Engine::new(args.into()).context("failed to initialize the anonymizer")?;
    let runner = BatchRunner::new(&engine, run_config, transfer.as_deref())
        .context("failed to prepare the batch")?;

    let summary = runner.run(&args.sources).context("batch aborted")?;

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }
    info!(
        completed = summary.completed,
        resumed = summary.resumed,
        not_applicable = summary.not_applicable,
        "done"
    );
    Ok(())
}

fn build_transfer(args: &RunArgs) -> anyhow::Result<Option<Box<dyn Transfer>>> {
    let delay = Duration::from_millis(args.retry_delay_ms);
    let transfer: Box<dyn Transfer> = match (&args.transfer_dir, &args.transfer_scu) {
        (Some(dir), _) => {
            let inner = DirectoryTransfer::new(dir)
                .with_context(|| format!("cannot prepare transfer directory {}", dir.display()))?;
            Box::new(RetryingTransfer::new(inner, args.transfer_attempts, delay))
        }
        (None, Some(addr)) => {
            let inner = StoreScuTransfer::new(addr.clone(), args.calling_ae.clone());
            Box::new(RetryingTransfer::new(inner, args.transfer_attempts, delay))
        }
        (None, None) => return Ok(None),
    };
    Ok(Some(transfer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments_map_onto_engine_and_batch_config() {
        let cli = Cli::try_parse_from([
            "dicom-deid",
            "run",
            "scans/",
            "-o",
            "out",
            "--seed",
            "test123",
            "--id-prefix",
            "AB",
            "--on-burned-in-annotation",
            "warn",
            "--jobs",
            "4",
        ])
        .expect("parse");

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let engine: EngineConfig = (&args).into();
        let batch: RunConfig = (&args).into();
        assert_eq!(engine.seed.as_deref(), Some("test123"));
        assert_eq!(engine.anonymizer.id_prefix, "AB");
        assert_eq!(batch.output_directory, Some(PathBuf::from("out")));
        assert_eq!(batch.jobs, 4);
    }

    #[test]
    fn transfer_targets_are_exclusive() {
        let result = Cli::try_parse_from([
            "dicom-deid",
            "run",
            "a.dcm",
            "--transfer-dir",
            "remote",
            "--transfer-scu",
            "STORE@localhost:104",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn run_requires_a_source() {
        assert!(Cli::try_parse_from(["dicom-deid", "run"]).is_err());
    }

    #[test]
    fn rejected_layout_creates_no_map_or_transfer_directory() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let map = dir.path().join("map.csv");
        let remote = dir.path().join("remote");
        let argv: Vec<std::ffi::OsString> = vec![
            "dicom-deid".into(),
            "run".into(),
            dir.path().into(),
            "-m".into(),
            map.as_path().into(),
            "--transfer-dir".into(),
            remote.as_path().into(),
        ];
        let cli = Cli::try_parse_from(argv).expect("parse");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        assert!(run_batch(&args).is_err());
        assert!(!map.exists());
        assert!(!remote.exists());
    }
}
