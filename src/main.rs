//! CLI entry point for hapiq.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use hapiq::download::registry::build_default_registry;
use hapiq::{CancelToken, DownloadRequest, Extractor};

mod cli;

use cli::{Args, Command, DownloadArgs, ExtractArgs, IdArgs};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let outcome = match args.command {
        Command::Extract(extract_args) => run_extract(extract_args).await,
        Command::Download(download_args) => run_download(download_args, args.quiet).await,
        Command::Validate(id_args) => run_validate(id_args).await,
        Command::Detect(id_args) => run_detect(id_args).await,
    };

    match outcome {
        Ok(code) => code,
        Err(error) => {
            error!(%error, "invocation failed");
            ExitCode::from(1)
        }
    }
}

async fn run_extract(args: ExtractArgs) -> Result<ExitCode> {
    let registry = Arc::new(build_default_registry().await?);
    let extractor = Extractor::new(args.to_options()).with_registry(registry);

    let mut results = Vec::new();
    let mut failures = 0usize;

    for file in &args.files {
        match extractor.extract_file(file).await {
            Ok(result) => {
                info!(
                    file = %file.display(),
                    links = result.links.len(),
                    "extracted"
                );
                results.push(result);
            }
            Err(error) => {
                failures += 1;
                warn!(file = %file.display(), %error, "extraction failed");
            }
        }
    }

    let json = serde_json::to_string_pretty(&results)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(ExitCode::from(exit_code_for(results.len(), failures)))
}

async fn run_download(args: DownloadArgs, quiet: bool) -> Result<ExitCode> {
    let registry = build_default_registry().await?;
    let adapter = registry.resolve(&args.id, args.source.as_deref()).await?;

    let cancel = CancelToken::new();
    let request = DownloadRequest {
        id: args.id.clone(),
        output_dir: args.output.clone(),
        options: args.to_options(),
        metadata: None,
        cancel: cancel.clone(),
    };

    // Ctrl-C cancels in-flight transfers; a cancelled download leaves no
    // witness file behind.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling download");
            signal_cancel.cancel();
        }
    });

    let spinner = spawn_spinner(quiet, &args.id);
    let result = adapter.download(&request).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let result = result?;
    info!(
        source = %result.source,
        files = result.stats.files_downloaded,
        skipped = result.stats.files_skipped,
        failed = result.stats.files_failed,
        dir = %result.output_dir.display(),
        "download complete"
    );
    for warning in &result.warnings {
        warn!(%warning, "download warning");
    }

    if !result.success {
        return Ok(ExitCode::from(1));
    }
    if result.stats.files_failed > 0 {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_validate(args: IdArgs) -> Result<ExitCode> {
    let registry = build_default_registry().await?;

    let validation = if let Some(source) = &args.source {
        let adapter = registry
            .get(source)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown source '{source}'"))?;
        adapter.validate(&args.id)
    } else {
        match registry.detect(&args.id).await {
            Some(detection) => {
                for other in &detection.also_possible {
                    warn!(source = %other, "identifier also matches this source");
                }
                detection.validation
            }
            None => hapiq::SourceValidation::invalid(&args.id, "no registered source claims this identifier"),
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&validation)?);
    } else if validation.valid {
        println!("valid: {}", validation.id);
        for warning in &validation.warnings {
            println!("  warning: {warning}");
        }
    } else {
        println!("invalid: {}", validation.errors.join("; "));
    }

    Ok(if validation.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn run_detect(args: IdArgs) -> Result<ExitCode> {
    let registry = build_default_registry().await?;
    match registry.detect(&args.id).await {
        Some(detection) => {
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "source": detection.source,
                        "id": detection.validation.id,
                        "also_possible": detection.also_possible,
                    })
                );
            } else {
                println!("{}", detection.source);
                for other in &detection.also_possible {
                    println!("  also possible: {other}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("unknown");
            Ok(ExitCode::from(1))
        }
    }
}

/// Spawns a terminal spinner during downloads. Suppressed when quiet or
/// when stderr is not a terminal.
fn spawn_spinner(quiet: bool, id: &str) -> Option<ProgressBar> {
    use std::io::IsTerminal;
    if quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Downloading {id}..."));
    spinner.enable_steady_tick(Duration::from_millis(100));
    Some(spinner)
}

/// Exit code policy: 0 all succeeded, 2 partial success, 1 total failure.
fn exit_code_for(succeeded: usize, failed: usize) -> u8 {
    if failed == 0 {
        0
    } else if succeeded > 0 {
        2
    } else {
        1
    }
}
