//! Command-line host for the `hostman_provision` engine.
//!
//! Applies one lifecycle operation to one resource record stored as JSON.
//!
//! ## Usage
//!
//! 1. Create a `.env` file with `HOSTMAN_TOKEN=...`
//! 2. Run: `hostman_provision <resource_type> <create|read|update|delete> <record.json> [prior.json]`
//!
//! The record left by the operation is written back to `record.json`, even
//! when the operation fails, and the resource id is printed on stdout.
//! Logs go to stderr (`RUST_LOG=hostman_provision=debug` for API calls).

#![allow(clippy::print_stdout)] // The id on stdout is the binary's output

use std::{env, process::ExitCode};

use hostman_provision::{Engine, RecordFile, ReconcileError};
use serde_json::Value;
use tracing::error;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: hostman_provision <resource_type> <create|read|update|delete> <record.json> [prior.json]";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [resource_type, operation, record_path, rest @ ..] = args.as_slice() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    match run(resource_type, operation, record_path, rest.first()).await {
        Ok(id) => {
            println!("{id}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "operation failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    resource_type: &str,
    operation: &str,
    record_path: &str,
    prior_path: Option<&String>,
) -> Result<String, ReconcileError> {
    let engine = Engine::from_env()?;
    let file = RecordFile::new(record_path);
    let mut record = file.load()?;

    let outcome = match operation {
        "create" => engine.create(resource_type, &mut record).await,
        "read" => engine.read(resource_type, &mut record).await,
        "update" => {
            let prior = match prior_path {
                Some(path) => RecordFile::new(path).load()?,
                None => record.clone(),
            };
            engine.update(resource_type, &prior, &mut record).await
        }
        "delete" => engine.delete(resource_type, &mut record).await,
        other => {
            return Err(ReconcileError::Validation {
                resource: "operation",
                reason: format!("unknown operation `{other}`, expected create|read|update|delete"),
            });
        }
    };

    // Persist whatever was achieved: an id assigned before a failure must survive.
    file.save(&record)?;
    outcome?;

    Ok(record
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}
