//! Auto-sync of `executionConfig` from the on-disk strategy source: strategy
//! code lives at a known on-disk location keyed by strategy ID. The Python
//! source embeds a `STRATEGY_CONFIG` dict literal; this module extracts it
//! with the same tolerant, last-resort parsing approach the runtime uses on
//! subprocess output, since a Python dict literal is not valid JSON (single
//! quotes, `True`/`False`/`None`).

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::store::models::{ExecutionConfig, ExtraScalar};

/// Scan `strategies_dir/{strategy_id}/*.py` for the file the coordinator
/// should load and invoke. `None` means no source is present, which the
/// coordinator treats as a fatal condition for that execution.
pub fn locate_strategy_source(strategies_dir: &str, strategy_id: &str) -> Option<PathBuf> {
    let dir = Path::new(strategies_dir).join(strategy_id);
    let entries = fs::read_dir(&dir).ok()?;

    let mut py_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("py"))
        .collect();

    if py_files.is_empty() {
        return None;
    }
    if py_files.len() > 1 {
        warn!(strategy_id, count = py_files.len(), "multiple strategy source files found, using the first");
    }
    py_files.sort();
    Some(py_files.remove(0))
}

/// Extract `STRATEGY_CONFIG` from the strategy's on-disk source and
/// translate it into an [`ExecutionConfig`]. Returns `None` if no file,
/// no literal, or the literal fails to parse -- the caller logs a
/// warning and leaves the existing (incomplete) config in place.
pub fn sync_execution_config_from_disk(strategies_dir: &str, strategy_id: &str) -> Option<ExecutionConfig> {
    let path = locate_strategy_source(strategies_dir, strategy_id);
    let path = match path {
        Some(p) => p,
        None => {
            warn!(strategies_dir, strategy_id, "no strategy source file found for auto-sync");
            return None;
        }
    };
    let source = fs::read_to_string(&path).ok()?;

    extract_strategy_config_literal(&source).and_then(|literal| parse_python_dict_literal(&literal))
}

fn extract_strategy_config_literal(source: &str) -> Option<String> {
    let marker = "STRATEGY_CONFIG";
    let start_idx = source.find(marker)?;
    let brace_start = source[start_idx..].find('{')? + start_idx;

    let mut depth = 0i32;
    let mut end = None;
    for (i, ch) in source[brace_start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(brace_start + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end?;
    Some(source[brace_start..end].to_string())
}

/// Best-effort translation of a Python dict literal into JSON: swap
/// single-quoted strings for double-quoted ones and normalize the
/// Python literal keywords. This is intentionally narrow -- it only
/// needs to cope with the flat scalar-valued dicts strategy authors
/// actually write for `STRATEGY_CONFIG`.
fn parse_python_dict_literal(literal: &str) -> Option<ExecutionConfig> {
    let normalized = literal
        .replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null");

    let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&normalized).ok()?;

    let mut config = ExecutionConfig::default();
    for (key, value) in raw {
        match key.as_str() {
            "symbol" => config.symbol = value.as_str().map(|s| s.to_string()),
            "resolution" => {
                config.resolution = match value {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }
            }
            "risk_per_trade" => config.risk_per_trade = value.as_f64(),
            "leverage" => config.leverage = value.as_f64(),
            "max_positions" => config.max_positions = value.as_i64(),
            "max_daily_loss" => config.max_daily_loss = value.as_f64(),
            other => {
                let scalar = match value {
                    serde_json::Value::String(s) => Some(ExtraScalar::String(s)),
                    serde_json::Value::Number(n) => n.as_f64().map(ExtraScalar::Number),
                    serde_json::Value::Bool(b) => Some(ExtraScalar::Bool(b)),
                    _ => None,
                };
                if let Some(scalar) = scalar {
                    config.extras.insert(other.to_string(), scalar);
                }
            }
        }
    }
    Some(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn extracts_and_parses_a_simple_dict_literal() {
        let source = r#"
import numpy as np

STRATEGY_CONFIG = {
    'symbol': 'BTCUSDT',
    'resolution': '5',
    'leverage': 3,
    'risk_per_trade': 0.01,
    'use_atr_stop': True,
    'note': None,
}

def run(candles):
    pass
"#;
        let literal = extract_strategy_config_literal(source).unwrap();
        let config = parse_python_dict_literal(&literal).unwrap();
        assert_eq!(config.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(config.resolution.as_deref(), Some("5"));
        assert_eq!(config.leverage, Some(3.0));
        assert!(matches!(config.extras.get("use_atr_stop"), Some(ExtraScalar::Bool(true))));
        assert!(!config.extras.contains_key("note"));
    }

    #[test]
    fn missing_marker_returns_none() {
        assert!(extract_strategy_config_literal("def run(): pass").is_none());
    }

    #[test]
    fn sync_from_disk_reads_single_py_file() {
        let tmp = tempfile::tempdir().unwrap();
        let strategy_dir = tmp.path().join("strat-1");
        fs::create_dir_all(&strategy_dir).unwrap();
        let mut f = fs::File::create(strategy_dir.join("main.py")).unwrap();
        writeln!(f, "STRATEGY_CONFIG = {{'symbol': 'ETHUSDT', 'resolution': '15'}}").unwrap();

        let config = sync_execution_config_from_disk(tmp.path().to_str().unwrap(), "strat-1").unwrap();
        assert_eq!(config.symbol.as_deref(), Some("ETHUSDT"));
        assert!(config.is_complete());
    }

    #[test]
    fn sync_from_disk_missing_dir_returns_none() {
        assert!(sync_execution_config_from_disk("/nonexistent/path", "strat-1").is_none());
    }
}
