//! On-disk state: answers files, run logs, and their pairing.
//!
//! An answers file `<out_dir>/<model>-<lang>.json` holds a JSON array of
//! [`AnswerRecord`]; its paired log `<out_dir>/<model>-<lang>.log` holds one
//! [`RunLog`] object. Legacy field names written by older runs are accepted on
//! read; canonical names are always written. Keys this crate does not know
//! about are carried through a rewrite untouched.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::RecordError;
use crate::utils::helpers::write_json_atomic;

/// Judge verdict for one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "T")]
    Correct,
    #[serde(rename = "F")]
    Incorrect,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::Correct => "T",
            Grade::Incorrect => "F",
        }
    }

    /// Lenient parse used when reading stored grades.
    pub fn from_stored(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "T" | "TRUE" => Some(Grade::Correct),
            "F" | "FALSE" => Some(Grade::Incorrect),
            _ => None,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored grades outside `T`/`F` read back as "ungraded".
fn deserialize_grade<'de, D>(deserializer: D) -> Result<Option<Grade>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => Grade::from_stored(&s),
        Some(serde_json::Value::Bool(b)) => Some(if b { Grade::Correct } else { Grade::Incorrect }),
        _ => None,
    })
}

/// One generated answer, optionally graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    #[serde(alias = "question_num")]
    pub question_id: usize,
    #[serde(default)]
    pub question: String,
    #[serde(default, alias = "correct_ans")]
    pub expected_answer: String,
    #[serde(default, alias = "model_ans")]
    pub model_answer: String,
    /// Seconds spent waiting for the serving endpoint.
    #[serde(default)]
    pub latency: f64,
    #[serde(
        default,
        deserialize_with = "deserialize_grade",
        skip_serializing_if = "Option::is_none"
    )]
    pub grade: Option<Grade>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnswerRecord {
    pub fn new(
        question_id: usize,
        question: impl Into<String>,
        expected_answer: impl Into<String>,
        model_answer: impl Into<String>,
        latency: f64,
    ) -> Self {
        Self {
            question_id,
            question: question.into(),
            expected_answer: expected_answer.into(),
            model_answer: model_answer.into(),
            latency,
            grade: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_correct(&self) -> bool {
        self.grade == Some(Grade::Correct)
    }
}

/// Run metadata paired with an answers file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default, alias = "num_q")]
    pub num_questions: usize,
    #[serde(default, alias = "duration_s")]
    pub runtime_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_gpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_answers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slurm_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slurm_array_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RunLog {
    /// GPU-hours: runtime in hours times GPU count (1 when unknown).
    pub fn gpu_hours(&self) -> f64 {
        self.runtime_seconds / 3600.0 * self.num_gpus.unwrap_or(1) as f64
    }
}

// ---------------------------------------------------------------------------
// Grade tallies
// ---------------------------------------------------------------------------

/// Counts over a record list. `invalid` are records without a grade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GradeTally {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub invalid: usize,
}

impl GradeTally {
    pub fn from_records(records: &[AnswerRecord]) -> Self {
        let mut tally = GradeTally {
            total: records.len(),
            ..Default::default()
        };
        for r in records {
            match r.grade {
                Some(Grade::Correct) => tally.correct += 1,
                Some(Grade::Incorrect) => tally.incorrect += 1,
                None => tally.invalid += 1,
            }
        }
        tally
    }

    /// `correct / (total - invalid)`, or 0.0 when nothing valid was graded.
    pub fn accuracy(&self) -> f64 {
        let valid = self.total - self.invalid;
        if valid == 0 {
            0.0
        } else {
            self.correct as f64 / valid as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

fn read_text(path: &Path) -> Result<String, RecordError> {
    let text = std::fs::read_to_string(path).map_err(|source| RecordError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Err(RecordError::Empty(path.to_path_buf()));
    }
    Ok(text)
}

/// Load an answers file.
pub fn load_records(path: &Path) -> Result<Vec<AnswerRecord>, RecordError> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|source| RecordError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically write an answers file.
pub fn save_records(path: &Path, records: &[AnswerRecord]) -> anyhow::Result<()> {
    write_json_atomic(path, records)
}

/// Load a run log.
pub fn load_run_log(path: &Path) -> Result<RunLog, RecordError> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|source| RecordError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically write a run log.
pub fn save_run_log(path: &Path, log: &RunLog) -> anyhow::Result<()> {
    write_json_atomic(path, log)
}

/// Duplicate `question_id`s in a record list, ascending.
pub fn duplicate_ids(records: &[AnswerRecord]) -> Vec<usize> {
    let mut seen = BTreeSet::new();
    let mut dups = BTreeSet::new();
    for r in records {
        if !seen.insert(r.question_id) {
            dups.insert(r.question_id);
        }
    }
    dups.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

/// The log path paired with an answers file (same stem, `.log`).
pub fn paired_log_path(answers: &Path) -> PathBuf {
    answers.with_extension("log")
}

/// The answers path paired with a log file (same stem, `.json`).
pub fn paired_answers_path(log: &Path) -> PathBuf {
    log.with_extension("json")
}

/// An answers file together with its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPair {
    pub stem: String,
    pub answers: PathBuf,
    pub log: PathBuf,
}

/// Outcome of scanning a results directory.
#[derive(Debug, Clone, Default)]
pub struct Pairing {
    pub pairs: Vec<ResultPair>,
    pub answers_without_log: Vec<PathBuf>,
    pub logs_without_answers: Vec<PathBuf>,
}

/// Pair every `*.json` in `dir` with its `*.log`, sorted by stem.
pub fn discover_pairs(dir: &Path) -> anyhow::Result<Pairing> {
    use crate::utils::helpers::list_files_with_ext;

    let mut pairing = Pairing::default();
    for answers in list_files_with_ext(dir, "json")? {
        let log = paired_log_path(&answers);
        if log.is_file() {
            let stem = answers
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            pairing.pairs.push(ResultPair { stem, answers, log });
        } else {
            pairing.answers_without_log.push(answers);
        }
    }
    for log in list_files_with_ext(dir, "log")? {
        if !paired_answers_path(&log).is_file() {
            pairing.logs_without_answers.push(log);
        }
    }
    Ok(pairing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_canonical_names_without_grade() {
        let r = AnswerRecord::new(3, "q", "a", "m", 1.5);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["question_id"], 3);
        assert_eq!(v["expected_answer"], "a");
        assert_eq!(v["model_answer"], "m");
        assert!(v.get("grade").is_none());
    }

    #[test]
    fn test_record_reads_legacy_names() {
        let r: AnswerRecord = serde_json::from_str(
            r#"{"question_num": 7, "question": "q", "model_ans": "m", "correct_ans": "a", "grade": "t"}"#,
        )
        .unwrap();
        assert_eq!(r.question_id, 7);
        assert_eq!(r.model_answer, "m");
        assert_eq!(r.expected_answer, "a");
        assert_eq!(r.latency, 0.0);
        assert_eq!(r.grade, Some(Grade::Correct));
    }

    #[test]
    fn test_unknown_grade_reads_as_ungraded() {
        let r: AnswerRecord =
            serde_json::from_str(r#"{"question_id": 1, "grade": "maybe"}"#).unwrap();
        assert_eq!(r.grade, None);
        let r: AnswerRecord = serde_json::from_str(r#"{"question_id": 1, "grade": null}"#).unwrap();
        assert_eq!(r.grade, None);
    }

    #[test]
    fn test_extra_keys_survive_rewrite() {
        let r: AnswerRecord =
            serde_json::from_str(r#"{"question_id": 1, "source": "wiki"}"#).unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["source"], "wiki");
    }

    #[test]
    fn test_run_log_legacy_aliases() {
        let log: RunLog = serde_json::from_str(
            r#"{"model": "qwen3:8b", "lang": "en", "num_q": 1000, "duration_s": 7200.0, "timestamp": "x"}"#,
        )
        .unwrap();
        assert_eq!(log.num_questions, 1000);
        assert!((log.runtime_seconds - 7200.0).abs() < 1e-9);
        assert!((log.gpu_hours() - 2.0).abs() < 1e-9);
        let v = serde_json::to_value(&log).unwrap();
        assert!(v.get("accuracy").is_none());
        assert_eq!(v["runtime_seconds"], 7200.0);
    }

    #[test]
    fn test_gpu_hours_uses_gpu_count() {
        let log = RunLog {
            runtime_seconds: 1800.0,
            num_gpus: Some(4),
            ..Default::default()
        };
        assert!((log.gpu_hours() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_tally_accuracy_excludes_invalid() {
        let mut records: Vec<AnswerRecord> =
            (0..4).map(|i| AnswerRecord::new(i, "q", "a", "m", 0.0)).collect();
        records[0].grade = Some(Grade::Correct);
        records[1].grade = Some(Grade::Correct);
        records[2].grade = Some(Grade::Incorrect);
        let tally = GradeTally::from_records(&records);
        assert_eq!(tally.invalid, 1);
        assert!((tally.accuracy() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_tally_accuracy_all_invalid_is_zero() {
        let records = vec![AnswerRecord::new(0, "q", "a", "m", 0.0)];
        assert_eq!(GradeTally::from_records(&records).accuracy(), 0.0);
        assert_eq!(GradeTally::from_records(&[]).accuracy(), 0.0);
    }

    #[test]
    fn test_duplicate_ids() {
        let records: Vec<AnswerRecord> = [0, 1, 1, 2, 2, 2]
            .iter()
            .map(|&i| AnswerRecord::new(i, "q", "a", "m", 0.0))
            .collect();
        assert_eq!(duplicate_ids(&records), vec![1, 2]);
    }

    #[test]
    fn test_discover_pairs_reports_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        std::fs::write(p.join("a-en.json"), "[]").unwrap();
        std::fs::write(p.join("a-en.log"), "{}").unwrap();
        std::fs::write(p.join("b-en.json"), "[]").unwrap();
        std::fs::write(p.join("c-no.log"), "{}").unwrap();

        let pairing = discover_pairs(p).unwrap();
        assert_eq!(pairing.pairs.len(), 1);
        assert_eq!(pairing.pairs[0].stem, "a-en");
        assert_eq!(pairing.answers_without_log, vec![p.join("b-en.json")]);
        assert_eq!(pairing.logs_without_answers, vec![p.join("c-no.log")]);
    }

    #[test]
    fn test_load_empty_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(matches!(load_records(&path), Err(RecordError::Empty(_))));
    }

    #[test]
    fn test_paired_paths_keep_dotted_model_names() {
        let answers = Path::new("results/llama3.1:8b-en.json");
        assert_eq!(paired_log_path(answers), PathBuf::from("results/llama3.1:8b-en.log"));
    }
}
