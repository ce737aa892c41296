//! Subprocess invocation of the external strategy runtime: JSON on stdin,
//! JSON on stdout, tolerant of stdout pollution, wall-clock bounded.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

pub struct RuntimeInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub input: serde_json::Value,
    pub timeout: Duration,
}

/// Spawn `invocation.program`, write its JSON input to stdin, and parse
/// its stdout as JSON -- tolerating diagnostic prints before the JSON
/// body by falling back to extracting the last balanced `{...}` region.
pub async fn run_subprocess(invocation: RuntimeInvocation) -> EngineResult<serde_json::Value> {
    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // On timeout below we drop the `wait_with_output` future without an
        // explicit kill; `kill_on_drop` is what actually reaps the child
        // instead of leaving it running past its deadline.
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::RuntimeSubprocessFailed(e.to_string()))?;

    let input_bytes = serde_json::to_vec(&invocation.input)?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&input_bytes)
            .await
            .map_err(|e| EngineError::RuntimeSubprocessFailed(e.to_string()))?;
        drop(stdin);
    }

    let timeout = invocation.timeout;
    let wait_result = tokio::time::timeout(timeout, child.wait_with_output()).await;

    let output = match wait_result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(EngineError::RuntimeSubprocessFailed(e.to_string())),
        Err(_) => {
            return Err(EngineError::RuntimeTimeout(timeout));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(program = %invocation.program, status = ?output.status, stderr = %stderr, "strategy runtime exited non-zero");
    }

    parse_runtime_output(&output.stdout)
}

/// Strict parse first; if that fails, extract the last balanced
/// `{...}` region in the buffer (to skip over stray prints) and retry.
pub fn parse_runtime_output(stdout: &[u8]) -> EngineResult<serde_json::Value> {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(stdout) {
        return Ok(value);
    }

    let text = String::from_utf8_lossy(stdout);
    if let Some(region) = last_balanced_braces(&text) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(region) {
            return Ok(value);
        }
    }

    Err(EngineError::RuntimeOutputUnparseable)
}

/// Finds the last top-level-balanced `{...}` substring by scanning from
/// the end for a closing brace and matching backwards.
fn last_balanced_braces(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut end = None;
    for i in (0..bytes.len()).rev() {
        if bytes[i] == b'}' {
            end = Some(i);
            break;
        }
    }
    let end = end?;

    let mut depth = 0i32;
    let mut start = None;
    for i in (0..=end).rev() {
        match bytes[i] {
            b'}' => depth += 1,
            b'{' => {
                depth -= 1;
                if depth == 0 {
                    start = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let start = start?;
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let value = parse_runtime_output(br#"{"success":true}"#).unwrap();
        assert_eq!(value["success"], true);
    }

    #[test]
    fn tolerates_leading_diagnostic_prints() {
        let stdout = b"loading model...\nwarming cache\n{\"success\":true,\"signal\":{\"signal\":\"LONG\",\"price\":1.0}}";
        let value = parse_runtime_output(stdout).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["signal"]["signal"], "LONG");
    }

    #[test]
    fn tolerates_trailing_garbage_with_unmatched_brace() {
        // The trailing unmatched `{` has no closing brace, so the last
        // balanced region found by scanning backward from the final `}`
        // is still the genuine JSON object.
        let stdout = b"{\"success\":true}\nsome trailer that is not json {not valid";
        let value = parse_runtime_output(stdout).unwrap();
        assert_eq!(value["success"], true);
    }

    #[test]
    fn fails_on_unparseable_output() {
        let err = parse_runtime_output(b"not json at all, no braces").unwrap_err();
        assert!(matches!(err, EngineError::RuntimeOutputUnparseable));
    }

    #[test]
    fn extracts_nested_balanced_object() {
        let stdout = b"noise {\"outer\": {\"inner\": 1}} trailing noise without braces";
        let value = parse_runtime_output(stdout).unwrap();
        assert_eq!(value["outer"]["inner"], 1);
    }
}
