//! Destructive housekeeping on result files: removing questions and renaming.
//!
//! Both operations compute their plan first; callers decide whether to apply it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::utils::helpers::write_json_atomic;

/// Question ids removed when none are given.
pub const DEFAULT_REMOVED_IDS: &str = "167,828,869";

/// How a record is matched against the ids to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MatchMode {
    /// `question_id` (or legacy `question_num`) when present, else list position.
    #[default]
    Auto,
    /// Position in the file's list.
    Index,
    /// The `question_id` field only; records without one are kept.
    QuestionId,
}

/// Parse `"167, 828,869"` into a set of ids.
pub fn parse_id_list(raw: &str) -> Result<BTreeSet<usize>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .with_context(|| format!("invalid question id {:?}", s))
        })
        .collect()
}

fn stored_id(item: &serde_json::Value) -> Option<usize> {
    item.get("question_id")
        .or_else(|| item.get("question_num"))
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
}

fn key_for(item: &serde_json::Value, idx: usize, mode: MatchMode) -> Option<usize> {
    match mode {
        MatchMode::Index => Some(idx),
        MatchMode::QuestionId => stored_id(item),
        MatchMode::Auto => Some(stored_id(item).unwrap_or(idx)),
    }
}

/// Result of removing ids from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRemoval {
    pub path: PathBuf,
    pub before: usize,
    pub removed: usize,
}

/// Remove records whose key is in `ids` from every file matching `pattern`.
///
/// Files are rewritten atomically only when `apply` is set. Empty files and
/// files that are not JSON lists are skipped.
pub fn remove_questions(
    pattern: &str,
    ids: &BTreeSet<usize>,
    mode: MatchMode,
    apply: bool,
) -> Result<Vec<FileRemoval>> {
    let mut targets: Vec<PathBuf> = glob::glob(pattern)
        .with_context(|| format!("invalid glob {:?}", pattern))?
        .filter_map(|entry| match entry {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("unreadable glob entry: {}", e);
                None
            }
        })
        .filter(|p| p.is_file())
        .collect();
    targets.sort();
    if targets.is_empty() {
        bail!("no files matched: {}", pattern);
    }

    let mut report = Vec::new();
    for path in targets {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        if raw.trim().is_empty() {
            debug!("skip empty file {}", path.display());
            continue;
        }
        let data: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Cannot parse {}", path.display()))?;
        let Some(items) = data.as_array() else {
            debug!("skip non-list json {}", path.display());
            continue;
        };

        let kept: Vec<&serde_json::Value> = items
            .iter()
            .enumerate()
            .filter(|(idx, item)| !key_for(item, *idx, mode).is_some_and(|k| ids.contains(&k)))
            .map(|(_, item)| item)
            .collect();
        let removed = items.len() - kept.len();

        if apply && removed > 0 {
            write_json_atomic(&path, &kept)?;
            info!("removed {} questions from {}", removed, path.display());
        }
        report.push(FileRemoval {
            path,
            before: items.len(),
            removed,
        });
    }
    Ok(report)
}

/// A planned or performed rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Destination already existed; nothing was done.
    pub skipped: bool,
}

/// Replace the last `-` with `_` in names under `dir` containing `contains`.
///
/// An empty `contains` matches every file. Renames happen only when `apply`
/// is set; an existing destination is never overwritten.
pub fn normalize_names(dir: &Path, contains: &str, apply: bool) -> Result<Vec<Rename>> {
    if !dir.is_dir() {
        bail!("results dir not found: {}", dir.display());
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory {}", dir.display()))?
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();

    let mut plan = Vec::new();
    for name in names {
        if !contains.is_empty() && !name.contains(contains) {
            continue;
        }
        let Some(idx) = name.rfind('-') else {
            continue;
        };
        let new_name = format!("{}_{}", &name[..idx], &name[idx + 1..]);
        let from = dir.join(&name);
        let to = dir.join(&new_name);
        if to.exists() {
            warn!("skip (dest exists): {}", to.display());
            plan.push(Rename { from, to, skipped: true });
            continue;
        }
        if apply {
            std::fs::rename(&from, &to)
                .with_context(|| format!("Cannot rename {} → {}", from.display(), to.display()))?;
            info!("renamed {} -> {}", name, new_name);
        }
        plan.push(Rename { from, to, skipped: false });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{load_records, save_records, AnswerRecord};

    fn write_ids(path: &Path, ids: &[usize]) {
        let records: Vec<AnswerRecord> = ids
            .iter()
            .map(|&i| AnswerRecord::new(i, format!("q{}", i), "a", "m", 0.0))
            .collect();
        save_records(path, &records).unwrap();
    }

    fn ids_in(path: &Path) -> Vec<usize> {
        load_records(path).unwrap().iter().map(|r| r.question_id).collect()
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list(DEFAULT_REMOVED_IDS).unwrap(), BTreeSet::from([167, 828, 869]));
        assert_eq!(parse_id_list(" 1, ,2 ").unwrap(), BTreeSet::from([1, 2]));
        assert!(parse_id_list("1,x").is_err());
    }

    #[test]
    fn test_remove_default_ids_reduces_count_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m-en.json");
        let all: Vec<usize> = (160..900).collect();
        write_ids(&path, &all);
        let pattern = dir.path().join("*.json").to_string_lossy().to_string();
        let ids = parse_id_list(DEFAULT_REMOVED_IDS).unwrap();

        let preview = remove_questions(&pattern, &ids, MatchMode::Auto, false).unwrap();
        assert_eq!(preview[0].removed, 3);
        assert_eq!(ids_in(&path).len(), all.len());

        let done = remove_questions(&pattern, &ids, MatchMode::Auto, true).unwrap();
        assert_eq!(done[0].removed, 3);
        let left = ids_in(&path);
        assert_eq!(left.len(), all.len() - 3);
        assert!(!left.contains(&828));
        assert!(left.contains(&827) && left.contains(&829));
    }

    #[test]
    fn test_remove_absent_ids_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m-en.json");
        write_ids(&path, &[0, 1, 2]);
        let pattern = dir.path().join("*.json").to_string_lossy().to_string();
        let r = remove_questions(&pattern, &BTreeSet::from([167]), MatchMode::Auto, true).unwrap();
        assert_eq!(r[0].removed, 0);
        assert_eq!(ids_in(&path), vec![0, 1, 2]);
    }

    #[test]
    fn test_match_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m-en.json");
        std::fs::write(
            &path,
            r#"[{"question_id": 10}, {"question_num": 0}, {"question": "no id"}]"#,
        )
        .unwrap();
        let pattern = path.to_string_lossy().to_string();

        let by_index = remove_questions(&pattern, &BTreeSet::from([0]), MatchMode::Index, false).unwrap();
        assert_eq!(by_index[0].removed, 1);

        // Auto: id 0 is the legacy field of item 1; item 2 falls back to index 2.
        let auto = remove_questions(&pattern, &BTreeSet::from([0, 2]), MatchMode::Auto, false).unwrap();
        assert_eq!(auto[0].removed, 2);

        let by_id = remove_questions(&pattern, &BTreeSet::from([2, 10]), MatchMode::QuestionId, false).unwrap();
        assert_eq!(by_id[0].removed, 1);
    }

    #[test]
    fn test_remove_no_match_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*.json").to_string_lossy().to_string();
        assert!(remove_questions(&pattern, &BTreeSet::new(), MatchMode::Auto, false).is_err());
    }

    #[test]
    fn test_normalize_names() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        std::fs::write(p.join("mimir-7b-en.json"), "[]").unwrap();
        std::fs::write(p.join("mimir-7b-no.log"), "{}").unwrap();
        std::fs::write(p.join("mimir-7b_no.log"), "{}").unwrap();
        std::fs::write(p.join("qwen3:8b-en.json"), "[]").unwrap();

        let preview = normalize_names(p, "mimir", false).unwrap();
        assert_eq!(preview.len(), 3);
        assert_eq!(preview.iter().filter(|r| r.skipped).count(), 1);
        assert!(p.join("mimir-7b-en.json").exists());

        let done = normalize_names(p, "mimir", true).unwrap();
        let skipped: Vec<_> = done.iter().filter(|r| r.skipped).collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].from, p.join("mimir-7b-no.log"));
        assert!(p.join("mimir-7b_en.json").exists());
        assert!(p.join("mimir_7b_no.log").exists());
        assert!(!p.join("mimir-7b-en.json").exists());
        assert!(p.join("mimir-7b-no.log").exists());
        assert!(p.join("qwen3:8b-en.json").exists());
    }
}
