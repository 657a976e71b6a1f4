// ABOUTME: CLI entrypoint for the orgfoundry command
// ABOUTME: Handles logging setup, report printing, error exit codes and command dispatch

use clap::Parser;
use orgfoundry::{
    api::ApiClient,
    cli::{Cli, Commands},
    config::{FileConfig, Settings, Throttle},
    model::{FileState, SyncReport, UploadOutcome, UploadReport},
    storage::Paths,
    sync::{download_all, download_one, status, upload_all, upload_one},
    Result,
};
use std::path::{Path, PathBuf};

/// Exit code when a download finished but some documents failed.
const EXIT_PARTIAL: i32 = 1;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("orgfoundry: [E{}] {}", e.exit_code(), e);
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,reqwest=info,hyper=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let file = FileConfig::discover(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, file)?;
    let root = absolute_root(&settings.root);
    let paths = Paths::new(root);

    match cli.command() {
        Commands::Status => {
            for entry in status(&paths)? {
                let marker = match entry.state {
                    FileState::Synced => " ",
                    FileState::Modified => "M",
                    FileState::Untracked => "?",
                };
                println!("{} {}", marker, entry.path.display());
            }
            Ok(0)
        }
        Commands::Download => {
            let client = client(&settings)?;
            Ok(print_sync_report(&download_all(&client, &paths)?))
        }
        command @ Commands::Fetch { .. } => {
            let client = client(&settings)?;
            let Some(selector) = command.selector() else {
                return Ok(0);
            };
            Ok(print_sync_report(&download_one(&client, &paths, &selector)?))
        }
        Commands::Upload { path } => {
            let client = client(&settings)?;
            let report = upload_one(&client, &paths, &upload_path(&path, &paths))?;
            print_upload_report(&report);
            Ok(0)
        }
        Commands::UploadAll => {
            let client = client(&settings)?;
            let batch = upload_all(&client, &paths)?;
            if batch.is_empty() {
                println!("Nothing to upload");
            }
            for report in &batch.uploaded {
                print_upload_report(report);
            }
            match batch.failed {
                Some((path, e)) => {
                    eprintln!("orgfoundry: [E{}] {}: {}", e.exit_code(), path.display(), e);
                    Ok(e.exit_code())
                }
                None => Ok(0),
            }
        }
    }
}

fn client(settings: &Settings) -> Result<ApiClient> {
    let client = ApiClient::new(settings.token()?, settings.url.clone(), settings.timeout)?;
    Ok(match settings.throttle {
        Throttle::Default => client,
        Throttle::Disabled => client.disable_throttle(),
        Throttle::Range(min, max) => client.with_throttle(min, max),
    })
}

fn absolute_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}

// Paths given on the command line are relative to the working directory when
// they exist there, otherwise relative to the sync root.
fn upload_path(path: &Path, paths: &Paths) -> PathBuf {
    if path.is_relative() && !path.exists() {
        return path.to_path_buf();
    }
    path.canonicalize()
        .unwrap_or_else(|_| paths.root.join(path))
}

fn print_sync_report(report: &SyncReport) -> i32 {
    for path in &report.succeeded {
        println!("  wrote   {}", path.display());
    }
    for warning in &report.warnings {
        println!("  warning {}: {}", warning.path.display(), warning.message);
    }
    for failure in &report.failed {
        println!(
            "  failed  {} [{}]: {}",
            failure.path.display(),
            failure.error_kind,
            failure.message
        );
    }

    let summary = format!(
        "{} written, {} unchanged, {} failed, {} warnings",
        report.succeeded.len(),
        report.skipped.len(),
        report.failed.len(),
        report.warnings.len()
    );
    if report.is_success() {
        println!("Success: {}", summary);
        0
    } else if report.is_partial() {
        println!("Partial: {}", summary);
        EXIT_PARTIAL
    } else {
        println!("Failure: {}", summary);
        EXIT_PARTIAL
    }
}

fn print_upload_report(report: &UploadReport) {
    let verb = match report.action {
        UploadOutcome::Created => "created",
        UploadOutcome::Updated => "updated",
    };
    println!("{} {} ({})", verb, report.path.display(), report.remote_id);
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
}
