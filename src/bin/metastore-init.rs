//! metastore-init - startup hook for the platform metadata store
//!
//! Brings the database at the given path to the latest schema and data
//! version, then exits. Intended to run to completion before the API server
//! starts.
//!
//! Usage:
//!   metastore-init <db-path> [--config <path>] [--from-scratch]

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use metastore_lib::config::InitConfig;
use metastore_lib::migration::{MigrationOrchestrator, NoopLegacyTransfer};
use metastore_lib::store::MetaStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Options {
    db_path: PathBuf,
    config_path: Option<PathBuf>,
    from_scratch: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    match parse_args(&args) {
        Ok(Some(options)) => match run(options) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            print_help();
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<Option<Options>, String> {
    let mut db_path = None;
    let mut config_path = None;
    let mut from_scratch = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "help" | "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--version" | "-V" => {
                println!("metastore-init {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--from-scratch" => from_scratch = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown option: {other}"));
            }
            path => {
                if db_path.is_some() {
                    return Err(format!("Unexpected argument: {path}"));
                }
                db_path = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }

    let db_path = db_path.ok_or("Missing required <db-path> argument")?;
    Ok(Some(Options {
        db_path,
        config_path,
        from_scratch,
    }))
}

fn run(options: Options) -> anyhow::Result<()> {
    let config = match &options.config_path {
        Some(path) => serde_json::from_str::<InitConfig>(&fs::read_to_string(path)?)?,
        None => InitConfig::default(),
    };

    let store = MetaStore::open(&options.db_path)?;
    let transfer = NoopLegacyTransfer;
    let orchestrator = MigrationOrchestrator::new(&store, &config, &store, &transfer);

    let report = orchestrator.run(options.from_scratch)?;

    info!(
        phase = ?report.phase,
        resolved_version = report.resolved_version,
        marker_written = report.marker_written,
        default_source_seeded = report.default_source_seeded,
        skipped = report.skipped.len(),
        "Startup migration complete"
    );
    if let Some(repairs) = &report.repairs {
        info!(
            projects_enriched = repairs.projects_enriched,
            tags_deleted = repairs.tags_deleted,
            orphan_tags = repairs.orphan_tags,
            previews_truncated = repairs.previews_truncated,
            preview_failures = repairs.preview_failures,
            "Repair passes finished"
        );
    }

    Ok(())
}

fn print_help() {
    println!(
        "metastore-init - startup initialization for the platform metadata store

Usage:
  metastore-init <db-path> [--config <path>] [--from-scratch]

Options:
  --config <path>   JSON configuration file (stage switches, default source)
  --from-scratch    Skip the legacy store transfer for new deployments
  -h, --help        Show this help
  -V, --version     Show version"
    );
}
