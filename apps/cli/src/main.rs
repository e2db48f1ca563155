use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    drive_observer, DatasetService, HttpDatasetService, SessionClient, DEFAULT_REQUEST_TIMEOUT,
};
use shared::{
    domain::OperationKind,
    protocol::{DatasetSummary, OperationRequest},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod console;
mod local;

use console::ConsoleObserver;
use local::LocalDatasetService;

#[derive(Parser, Debug)]
#[command(name = "clean-cli", about = "Upload a CSV dataset and clean it step by step")]
struct Args {
    /// Base URL of the dataset server.
    #[arg(long, required_unless_present = "local", conflicts_with = "local")]
    server_url: Option<String>,
    /// Run the dataset service inside this process instead of contacting a server.
    #[arg(long)]
    local: bool,
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file, apply operations in order, and optionally export the result.
    Run {
        #[arg(long)]
        input: PathBuf,
        /// `kind[:param]`, e.g. `remove-duplicates`, `fill-missing:median`,
        /// `drop-high-missing-columns:0.3`. May be repeated.
        #[arg(long = "op", value_parser = parse_op_spec)]
        ops: Vec<OperationRequest>,
        /// Restore the original dataset after the operations.
        #[arg(long)]
        reset: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Upload a file and print its summary.
    Summary {
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let service: Arc<dyn DatasetService> = match &args.server_url {
        Some(server_url) => {
            let http = HttpDatasetService::new(server_url, Duration::from_secs(args.timeout_secs))?;
            info!(server = %http.base_url(), "using dataset server");
            Arc::new(http)
        }
        None => Arc::new(LocalDatasetService::default()),
    };
    let client = SessionClient::new(service);
    let observer = tokio::spawn(drive_observer(
        client.subscribe_events(),
        ConsoleObserver::new(std::io::stdout()),
    ));

    let outcome = execute(&client, args.command).await;
    drop(client);
    // Event lines must be flushed before anything else goes to stdout.
    observer.await.context("event observer task failed")?;
    if let Some(summary) = outcome? {
        print!("{}", format_column_details(&summary));
    }
    Ok(())
}

/// Runs one command. `summary` hands back the uploaded dataset's summary
/// for printing once the event stream has drained.
async fn execute(client: &SessionClient, command: Command) -> Result<Option<DatasetSummary>> {
    match command {
        Command::Run {
            input,
            ops,
            reset,
            output,
        } => {
            upload_file(client, &input).await?;
            for request in ops {
                client.apply_operation(request).await?;
            }
            if reset {
                client.reset_session().await?;
            }
            if let Some(output) = output {
                let bytes = client.export_session().await?;
                tokio::fs::write(&output, &bytes)
                    .await
                    .with_context(|| format!("failed to write {}", output.display()))?;
                info!(path = %output.display(), size = bytes.len(), "wrote cleaned dataset");
            }
            client.end_session();
            Ok(None)
        }
        Command::Summary { input } => {
            let summary = upload_file(client, &input).await?;
            client.end_session();
            Ok(Some(summary))
        }
    }
}

async fn upload_file(client: &SessionClient, input: &Path) -> Result<DatasetSummary> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let filename = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(client.upload(&filename, &bytes).await?)
}

fn format_column_details(summary: &DatasetSummary) -> String {
    let mut text = String::new();
    for (idx, name) in summary.column_names.iter().enumerate() {
        let kind = summary
            .column_types
            .get(idx)
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "?".to_string());
        let missing = summary.missing_per_column.get(idx).copied().unwrap_or(0);
        text.push_str(&format!("  {name:<24} {kind:<8} missing={missing}\n"));
    }
    text
}

/// Parses `kind[:param]` into a validated operation request.
fn parse_op_spec(spec: &str) -> Result<OperationRequest, String> {
    let (kind, param) = match spec.split_once(':') {
        Some((kind, param)) => (kind, Some(param.trim())),
        None => (spec, None),
    };
    let kind = OperationKind::from_str(kind.trim()).map_err(|e| e.to_string())?;
    let mut request = OperationRequest::new(kind);
    if let Some(param) = param {
        if kind.accepts_method() {
            request = request.with_method(param);
        } else if kind.accepts_threshold() {
            let threshold = param
                .parse::<f64>()
                .map_err(|_| format!("'{param}' is not a number"))?;
            request = request.with_threshold(threshold);
        } else {
            return Err(format!("{kind} does not take a parameter"));
        }
    }
    request.validate().map_err(|e| e.to_string())?;
    Ok(request)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
