//! Runs the module's execution method in a child process and collects the
//! `_results` dict it writes to a pipe on exit (§4.5 "Agent internals").
//! The Agent has no knowledge of what language or class it is invoking:
//! it shells out to `AGENT_MODULE_RUNNER` (default `module-runner`),
//! handing it the module source path, the class name + config, and the
//! target, and reads back one JSON document on stdout — the host contract
//! stays generic the same way `fame-worker::module_host` keeps the
//! in-process hook generic.

use crate::task::{ResultsPayload, Target};
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub async fn execute(
    module_path: &Path,
    module_name: &str,
    config: &std::collections::HashMap<String, serde_json::Value>,
    target: &Target,
) -> ResultsPayload {
    let runner_bin = std::env::var("AGENT_MODULE_RUNNER").unwrap_or_else(|_| "module-runner".to_string());

    let target_json = match target {
        Target::File(path) => json!({ "kind": "file", "path": path.to_string_lossy() }),
        Target::Url(url) => json!({ "kind": "url", "url": url }),
    };
    let request = json!({
        "module_path": module_path.to_string_lossy(),
        "class_name": module_name,
        "config": config,
        "target": target_json,
    });

    let child = Command::new(&runner_bin)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            log::error!("[AGENT] failed to spawn {runner_bin}: {e}");
            return failed_result(&format!("could not spawn module runner: {e}"));
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(request.to_string().as_bytes()).await {
            log::error!("[AGENT] failed to write request to module runner: {e}");
        }
    }

    let output = match child.wait_with_output().await {
        Ok(output) => output,
        Err(e) => {
            log::error!("[AGENT] module runner wait failed: {e}");
            return failed_result(&format!("module runner did not exit cleanly: {e}"));
        }
    };

    if !output.stderr.is_empty() {
        log::warn!("[AGENT] module runner stderr: {}", String::from_utf8_lossy(&output.stderr));
    }

    match serde_json::from_slice::<ResultsPayload>(&output.stdout) {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("[AGENT] module runner produced no valid _results payload: {e}");
            failed_result(&format!("invalid _results payload: {e}"))
        }
    }
}

fn failed_result(message: &str) -> ResultsPayload {
    let mut payload = ResultsPayload::default();
    payload.inner.logs.push(message.to_string());
    payload
}
