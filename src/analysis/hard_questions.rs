//! Questions that models get wrong (or right) consistently.
//!
//! A record counts as right only when graded `T`; a missing grade counts as
//! wrong.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::records::{load_records, AnswerRecord};
use crate::utils::helpers::list_files_with_ext;

/// Records of one file not graded `T`, in file order.
pub fn wrong_records(records: &[AnswerRecord]) -> Vec<AnswerRecord> {
    records.iter().filter(|r| !r.is_correct()).cloned().collect()
}

/// Ids every file agrees on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consensus {
    pub always_wrong: BTreeSet<usize>,
    pub always_right: BTreeSet<usize>,
    /// Answers files that took part.
    pub files: Vec<PathBuf>,
}

/// Intersect right and wrong ids over every answers file in `dir`.
///
/// Files that cannot be read as answers are skipped with a warning.
pub fn consensus(dir: &Path) -> Result<Consensus> {
    let candidates = list_files_with_ext(dir, "json")?;
    if candidates.is_empty() {
        bail!("no results JSON files found in {}", dir.display());
    }

    let mut result: Option<Consensus> = None;
    for path in candidates {
        let records = match load_records(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let (right, wrong): (Vec<&AnswerRecord>, Vec<&AnswerRecord>) =
            records.iter().partition(|r| r.is_correct());
        let right: BTreeSet<usize> = right.iter().map(|r| r.question_id).collect();
        let wrong: BTreeSet<usize> = wrong.iter().map(|r| r.question_id).collect();
        debug!("{}: {} right, {} wrong", path.display(), right.len(), wrong.len());

        match result.as_mut() {
            None => {
                result = Some(Consensus {
                    always_wrong: wrong,
                    always_right: right,
                    files: vec![path],
                })
            }
            Some(acc) => {
                acc.always_wrong = &acc.always_wrong & &wrong;
                acc.always_right = &acc.always_right & &right;
                acc.files.push(path);
            }
        }
    }

    match result {
        Some(c) => Ok(c),
        None => bail!("no readable answers files in {}", dir.display()),
    }
}

/// Full records for `ids`, taken from `reference` in its order.
pub fn records_for_ids(reference: &Path, ids: &BTreeSet<usize>) -> Result<Vec<AnswerRecord>> {
    if !reference.exists() {
        bail!("reference file not found: {}", reference.display());
    }
    Ok(load_records(reference)?
        .into_iter()
        .filter(|r| ids.contains(&r.question_id))
        .collect())
}
