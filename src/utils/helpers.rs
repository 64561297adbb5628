//! Utility functions for qabench.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Language tags recognised as filename suffixes.
pub const KNOWN_LANGS: [&str; 2] = ["en", "no"];

/// Separators that have historically preceded the language suffix.
const LANG_SEPARATORS: [char; 3] = ['-', '_', ':'];

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref().to_path_buf();
    fs::create_dir_all(&path).with_context(|| format!("Cannot create directory {}", path.display()))?;
    Ok(path)
}

/// Serialize `value` as pretty JSON and write it atomically (temp file + rename).
///
/// A trailing newline is appended so files stay diff-friendly.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value)
        .with_context(|| format!("Cannot serialize {}", path.display()))?;
    content.push('\n');
    write_atomic(path, &content)
}

/// Write text atomically: write to `<path>.tmp`, then rename over `path`.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    fs::write(&tmp, content).with_context(|| format!("Cannot write to {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Cannot rename {} → {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Strip a provider/org prefix from a model id (`openai/gpt-oss-120b` → `gpt-oss-120b`).
pub fn model_file_component(model: &str) -> &str {
    match model.rfind('/') {
        Some(i) => &model[i + 1..],
        None => model,
    }
}

/// The shared `<model>-<lang>` stem of an answers file and its log.
pub fn result_stem(model: &str, lang: &str) -> String {
    format!("{}-{}", model_file_component(model), lang)
}

/// Split a result file stem into `(model, lang)`.
///
/// Accepts `-`, `_` and `:` before the language suffix. Returns `None` when
/// the stem has no recognised language suffix.
pub fn split_model_lang(stem: &str) -> Option<(&str, &str)> {
    for lang in KNOWN_LANGS {
        let Some(head) = stem.strip_suffix(lang) else {
            continue;
        };
        let Some(model) = head.strip_suffix(&LANG_SEPARATORS[..]) else {
            continue;
        };
        if !model.is_empty() {
            return Some((model, lang));
        }
    }
    None
}

/// Find the largest byte index `<= idx` that lies on a UTF-8 char boundary.
pub fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while !s.is_char_boundary(i) && i > 0 {
        i -= 1;
    }
    i
}

/// Truncate a string to max length, adding a suffix if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    let suffix = "...";
    if s.len() <= max_len {
        return s.to_string();
    }
    if max_len <= suffix.len() {
        let end = floor_char_boundary(s, max_len);
        return s[..end].to_string();
    }
    let end = floor_char_boundary(s, max_len - suffix.len());
    let mut result = s[..end].to_string();
    result.push_str(suffix);
    result
}

/// List files in `dir` with the given extension, sorted by name.
pub fn list_files_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Cannot read directory {}", dir.display()))?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|s| s.to_str()) == Some(ext))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/out.txt");
        write_atomic(&path, "hi").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hi");
        assert!(!dir.path().join("a/b/out.txt.tmp").exists());
    }

    #[test]
    fn test_write_atomic_reports_blocked_parent() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("results");
        fs::write(&blocker, "not a directory").unwrap();
        let err = write_atomic(&blocker.join("run.json"), "{}").unwrap_err();
        assert!(format!("{:#}", err).contains("Cannot create directory"));
        assert!(ensure_dir(&blocker).is_err());
    }

    #[test]
    fn test_result_stem_strips_org_prefix() {
        assert_eq!(result_stem("openai/gpt-oss-120b", "en"), "gpt-oss-120b-en");
        assert_eq!(result_stem("qwen3:8b", "no"), "qwen3:8b-no");
    }

    #[test]
    fn test_split_model_lang_separators() {
        assert_eq!(split_model_lang("qwen3:8b-en"), Some(("qwen3:8b", "en")));
        assert_eq!(split_model_lang("qwen3:8b_no"), Some(("qwen3:8b", "no")));
        assert_eq!(split_model_lang("norwai-mixtral-8x7b:en"), Some(("norwai-mixtral-8x7b", "en")));
    }

    #[test]
    fn test_split_model_lang_rejects_bare_or_unknown() {
        assert_eq!(split_model_lang("en"), None);
        assert_eq!(split_model_lang("-en"), None);
        assert_eq!(split_model_lang("llama3.1:8b"), None);
        assert_eq!(split_model_lang("model-de"), None);
        assert_eq!(split_model_lang("modelen"), None);
    }

    #[test]
    fn test_write_json_atomic_replaces_and_cleans_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"a": 2})).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["a"], 2);
        assert!(!dir.path().join("out.json.tmp").exists());
    }

    #[test]
    fn test_list_files_with_ext_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "[]").unwrap();
        fs::write(dir.path().join("a.json"), "[]").unwrap();
        fs::write(dir.path().join("a.log"), "{}").unwrap();
        let files = list_files_with_ext(dir.path(), "json").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(truncate_string("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_string_multibyte() {
        let t = truncate_string("Østfold fylke", 5);
        assert!(t.ends_with("..."));
    }
}
