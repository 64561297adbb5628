//! QA dataset loading.
//!
//! The dataset is a JSON object whose `qa_pairs` key holds an ordered list of
//! `{question, answer}` objects. Order matters: a pair's position is its
//! `question_id` in every answers file generated from it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::DatasetError;

/// One trivia question and its canonical expected answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QAPair {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

/// Parse dataset text. `path` is only used in error messages.
pub fn parse_pairs(text: &str, path: &Path) -> Result<Vec<QAPair>, DatasetError> {
    let raw: serde_json::Value = serde_json::from_str(text).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let pairs = raw
        .as_object()
        .and_then(|obj| obj.get("qa_pairs"))
        .ok_or_else(|| DatasetError::MissingPairs(path.to_path_buf()))?;
    if !pairs.is_array() {
        return Err(DatasetError::MalformedPairs(path.to_path_buf()));
    }
    serde_json::from_value(pairs.clone()).map_err(|_| DatasetError::MalformedPairs(path.to_path_buf()))
}

/// Load every pair from the dataset file.
pub fn load_pairs(path: &Path) -> Result<Vec<QAPair>, DatasetError> {
    let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_pairs(&text, path)
}

/// Load the first `limit` pairs in dataset order.
pub fn load_first(path: &Path, limit: usize) -> Result<Vec<QAPair>, DatasetError> {
    let mut pairs = load_pairs(path)?;
    pairs.truncate(limit);
    Ok(pairs)
}
