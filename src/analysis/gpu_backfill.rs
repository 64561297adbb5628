//! Add `num_gpus` to run logs written before GPU counts were recorded.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::utils::helpers::{list_files_with_ext, split_model_lang, write_json_atomic};

/// GPU counts for models too large for a single GPU.
pub const GPU_COUNTS: [(&str, u32); 5] = [
    ("deepseek-r1:671b", 3),
    ("llama3.1:405b", 4),
    ("qwen2.5:230b", 2),
    ("qwen3:235b", 2),
    ("gpt-oss:120b", 2),
];

/// GPU count for a model name, or `default` when it is not a known large model.
pub fn gpus_for_model(model: &str, default: u32) -> u32 {
    GPU_COUNTS
        .iter()
        .find(|(m, _)| *m == model)
        .map(|(_, n)| *n)
        .unwrap_or(default)
}

/// Fill in `num_gpus` on every `.log` in `dir` that lacks it.
///
/// Other keys are left exactly as they are. Empty or non-object logs are
/// skipped. Returns the updated files with the count written to each.
pub fn backfill(dir: &Path, default: u32) -> Result<Vec<(PathBuf, u32)>> {
    let mut updated = Vec::new();
    for path in list_files_with_ext(dir, "log")? {
        match backfill_one(&path, default) {
            Ok(Some(n)) => updated.push((path, n)),
            Ok(None) => {}
            Err(e) => warn!("error processing {}: {:#}", path.display(), e),
        }
    }
    Ok(updated)
}

fn backfill_one(path: &Path, default: u32) -> Result<Option<u32>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    if raw.trim().is_empty() {
        debug!("skip empty file {}", path.display());
        return Ok(None);
    }
    let mut value: serde_json::Value = serde_json::from_str(&raw)?;
    let Some(obj) = value.as_object_mut() else {
        debug!("skip non-object json {}", path.display());
        return Ok(None);
    };
    if obj.contains_key("num_gpus") {
        return Ok(None);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let model = split_model_lang(&stem).map(|(m, _)| m).unwrap_or(&stem);
    let n = gpus_for_model(model, default);
    obj.insert("num_gpus".to_string(), n.into());
    write_json_atomic(path, &value)?;

    if n > 1 {
        info!("updated {}: num_gpus={}", path.display(), n);
    } else {
        debug!("updated {}: num_gpus={}", path.display(), n);
    }
    Ok(Some(n))
}
