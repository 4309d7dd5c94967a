//! Sandbox worker: reads one execution request as JSON on stdin, runs the
//! script against the transferred files in the current directory, and
//! prints the result envelope as JSON on stdout.

use anyhow::Context;
use std::io::Read;
use tabletalk::sandbox::{run_worker_request, WorkerRequest};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading request from stdin")?;
    let request: WorkerRequest =
        serde_json::from_str(&input).context("parsing execution request")?;

    let response = run_worker_request(request);
    println!(
        "{}",
        serde_json::to_string(&response).context("serializing response envelope")?
    );
    Ok(())
}
