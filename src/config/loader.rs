//! Configuration loading: file < environment < command line.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::config::schema::{BenchConfig, ConfigOverrides};

/// Config file looked up in the working directory when `--config` is absent.
pub const LOCAL_CONFIG_FILE: &str = "qabench.json";

/// Get the per-user configuration file path (`~/.qabench/config.json`).
pub fn get_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".qabench").join("config.json")
}

/// Load the file layer of the configuration.
///
/// An explicit `config_path` must exist. Without one, `./qabench.json` and
/// then `~/.qabench/config.json` are tried; a missing or unparsable implicit
/// file falls back to defaults with a warning.
pub fn load_config(config_path: Option<&Path>) -> Result<BenchConfig> {
    if let Some(path) = config_path {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config {}", path.display()))?;
        return serde_json::from_str(&contents)
            .with_context(|| format!("Cannot parse config {}", path.display()));
    }

    for path in [PathBuf::from(LOCAL_CONFIG_FILE), get_config_path()] {
        if !path.exists() {
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BenchConfig>(&contents) {
                Ok(cfg) => {
                    debug!("loaded config from {}", path.display());
                    return Ok(cfg);
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config from {}: {}. Using default configuration.",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read config from {}: {}. Using default configuration.",
                    path.display(),
                    e
                );
            }
        }
        break;
    }

    Ok(BenchConfig::default())
}

/// Overlay environment variables onto `config`.
///
/// `lookup` abstracts `std::env::var` so tests do not mutate process state.
/// Unparsable numeric values are ignored with a warning.
pub fn apply_env<F>(config: &mut BenchConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let s = &mut config.serving;
    if let Some(v) = get("OLLAMA_HOST") {
        s.host = v;
    }
    if let Some(v) = get("MODEL") {
        s.model = v;
    } else if let Some(first) = get("MODELS").and_then(|v| v.split_whitespace().next().map(str::to_string)) {
        s.model = first;
    }
    if let Some(v) = get("EVAL_LANG") {
        s.lang = v.to_lowercase();
    }
    if let Some(v) = get("NUM_Q") {
        match v.trim().parse() {
            Ok(n) => s.num_questions = n,
            Err(_) => warn!("ignoring NUM_Q={:?}: not a non-negative integer", v),
        }
    }
    if let Some(v) = get("QA_PATH") {
        s.dataset_path = PathBuf::from(v);
    }
    if let Some(v) = get("OUT_DIR") {
        s.out_dir = PathBuf::from(v);
    }

    let g = &mut config.grading;
    if let Some(v) = get("GRADING_API_KEY") {
        g.api_key = v;
    }
    if let Some(v) = get("GRADING_URL") {
        g.url = v;
    }
    if let Some(v) = get("GRADING_MODEL") {
        g.model = v;
    }
    if let Some(v) = get("GRADING_CONCURRENCY") {
        match v.trim().parse::<usize>() {
            Ok(n) if n > 0 => g.concurrency = n,
            _ => warn!("ignoring GRADING_CONCURRENCY={:?}: not a positive integer", v),
        }
    }
}

/// Build the effective configuration: explicit argument > environment > file > default.
pub fn resolve_config(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<BenchConfig> {
    let mut config = load_config(config_path)?;
    apply_env(&mut config, |key| std::env::var(key).ok());
    overrides.apply(&mut config);
    Ok(config)
}
