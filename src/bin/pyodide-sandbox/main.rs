//! Command-line front end: run one Python snippet in the sandbox.
//!
//! Runtime events stream to stderr as `[kind] text`; the terminal result is
//! printed to stdout as one JSON object. The exit status is non-zero when the
//! result is an error.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pyodide_sandbox::config::{MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
use pyodide_sandbox::{init_tracing, ExecuteRequest, ExecutionResult, Sandbox, SessionItem};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use crate::cli::Cli;

fn main() -> Result<ExitCode> {
    let mut cli = Cli::parse();
    cli.sandbox.validate()?;
    init_tracing(&cli.sandbox);
    tracing::info!(
        deno = %cli.sandbox.deno_path,
        policy = cli.sandbox.process_policy.label(),
        "pyodide-sandbox started"
    );

    let request = build_request(&cli)?;
    let sandbox = Sandbox::new(cli.sandbox.clone());
    let result = run_streaming(&sandbox, request, cli.quiet);

    let rendered =
        serde_json::to_string(&result.to_json()).context("failed to render result JSON")?;
    println!("{rendered}");
    Ok(if result.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn build_request(cli: &Cli) -> Result<ExecuteRequest> {
    let code = read_code(cli)?;
    let mut request = ExecuteRequest::new(code);
    if let Some(secs) = cli.run_timeout_secs {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) {
            bail!(
                "--run-timeout-secs must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}, got {secs}"
            );
        }
        request = request.timeout(Duration::from_secs(secs));
    }
    if !cli.sync_in.is_empty() {
        request = request.sync_in(cli.sync_in.iter().cloned());
    }
    if !cli.sync_out.is_empty() {
        request = request.sync_out(cli.sync_out.iter().cloned());
    }
    Ok(request)
}

fn read_code(cli: &Cli) -> Result<String> {
    if let Some(code) = &cli.code {
        return Ok(code.clone());
    }
    match cli.file.as_deref() {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read code from '{}'", path.display())),
        _ => {
            let mut code = String::new();
            io::stdin()
                .read_to_string(&mut code)
                .context("failed to read code from stdin")?;
            Ok(code)
        }
    }
}

fn run_streaming(sandbox: &Sandbox, request: ExecuteRequest, quiet: bool) -> ExecutionResult {
    let stderr = io::stderr();
    let mut stderr = stderr.lock();
    let mut result = None;
    for item in sandbox.run(request) {
        match item {
            SessionItem::Event(event) => {
                if !quiet {
                    // A closed stderr must not abort the run.
                    let _ = writeln!(stderr, "[{}] {}", event.label(), event.text());
                }
            }
            SessionItem::Result(outcome) => result = Some(outcome),
        }
    }
    result.unwrap_or_else(|| ExecutionResult::error(pyodide_sandbox::sandbox::NO_RESULT_MESSAGE))
}
