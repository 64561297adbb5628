//! Grading: ask a judge model whether each generated answer is correct.
//!
//! Records of one answers file are graded by a fixed pool of tokio workers that
//! pull record indices from a shared queue and report `(index, verdict)` back
//! over a channel. The merged record list and the updated log are written once
//! every worker for that file has finished.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::schema::GradingConfig;
use crate::providers::base::{single_turn, LLMProvider};
use crate::providers::openai_compat::OpenAICompatProvider;
use crate::records::{
    discover_pairs, duplicate_ids, load_records, load_run_log, paired_log_path, save_records, save_run_log,
    AnswerRecord, Grade, GradeTally, ResultPair,
};

const JUDGE_SYSTEM_PROMPT: &str = "You are grading answers to a history quiz. \
Compare the model answer with the expected answer. The model answer is correct if it \
states the same fact, even when worded differently or with extra detail. \
Reply with a single letter: T if the model answer is correct, F if it is not.";

/// Outcome of one judge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Graded(Grade),
    /// Unparsable or ambiguous judge text, a reply with no visible answer,
    /// or a failed request.
    Invalid,
}

impl Verdict {
    pub fn grade(self) -> Option<Grade> {
        match self {
            Verdict::Graded(g) => Some(g),
            Verdict::Invalid => None,
        }
    }
}

/// Parse judge output into a grade.
///
/// Case-insensitive and word based: `T`/`TRUE` means correct, `F`/`FALSE`
/// means incorrect. Words are split on whitespace and stripped of surrounding
/// punctuation only, so `isn't` or `model's` stay whole and never match.
/// Text carrying both kinds of word, or neither, is `None`.
pub fn parse_verdict(text: &str) -> Option<Grade> {
    let mut saw_true = false;
    let mut saw_false = false;
    let words = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty());
    for word in words {
        match word.to_uppercase().as_str() {
            "T" | "TRUE" => saw_true = true,
            "F" | "FALSE" => saw_false = true,
            _ => {}
        }
    }
    match (saw_true, saw_false) {
        (true, false) => Some(Grade::Correct),
        (false, true) => Some(Grade::Incorrect),
        _ => None,
    }
}

/// Messages sent to the judge for one record.
pub fn judge_messages(record: &AnswerRecord) -> Vec<serde_json::Value> {
    let user = format!(
        "Question: {}\nExpected answer: {}\nModel answer: {}\n\nIs the model answer correct? Reply T or F.",
        record.question, record.expected_answer, record.model_answer
    );
    single_turn(Some(JUDGE_SYSTEM_PROMPT), &user)
}

/// Build the judge client. A missing API key is fatal.
pub fn build_judge(config: &GradingConfig) -> Result<Arc<dyn LLMProvider>> {
    if config.api_key.trim().is_empty() {
        bail!("No grading API key configured. Set GRADING_API_KEY or pass --api-key.");
    }
    let provider = OpenAICompatProvider::new(
        &config.api_key,
        &config.url,
        &config.model,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    Ok(Arc::new(provider))
}

async fn judge_one(provider: &dyn LLMProvider, model: &str, record: &AnswerRecord) -> Verdict {
    match provider.chat(&judge_messages(record), Some(model)).await {
        Ok(resp) if resp.content.is_none() => {
            debug!(
                "no visible verdict for question {} (finish_reason {})",
                record.question_id, resp.finish_reason
            );
            Verdict::Invalid
        }
        Ok(resp) => match parse_verdict(resp.text()) {
            Some(grade) => Verdict::Graded(grade),
            None => {
                debug!(
                    "unparsable verdict for question {}: {:?}",
                    record.question_id,
                    resp.text()
                );
                Verdict::Invalid
            }
        },
        Err(e) => {
            warn!("judge request failed for question {}: {}", record.question_id, e);
            Verdict::Invalid
        }
    }
}

/// Grade `records` and return them in their original order with the tally.
///
/// Only ungraded records are submitted unless `regrade` is set. Records that
/// come back invalid end up without a grade.
pub async fn grade_records(
    records: Vec<AnswerRecord>,
    provider: Arc<dyn LLMProvider>,
    model: &str,
    concurrency: usize,
    regrade: bool,
) -> (Vec<AnswerRecord>, GradeTally, usize) {
    let pending: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| regrade || r.grade.is_none())
        .map(|(i, _)| i)
        .collect();
    let submitted = pending.len();
    if pending.is_empty() {
        let tally = GradeTally::from_records(&records);
        return (records, tally, 0);
    }

    let records = Arc::new(records);
    let (job_tx, job_rx) = mpsc::unbounded_channel::<usize>();
    for idx in &pending {
        let _ = job_tx.send(*idx);
    }
    drop(job_tx);
    let jobs = Arc::new(Mutex::new(job_rx));
    let (verdict_tx, mut verdict_rx) = mpsc::unbounded_channel::<(usize, Verdict)>();

    let workers = concurrency.max(1).min(pending.len());
    debug!("grading {} records with {} workers", pending.len(), workers);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let jobs = Arc::clone(&jobs);
        let records = Arc::clone(&records);
        let provider = Arc::clone(&provider);
        let tx = verdict_tx.clone();
        let model = model.to_string();
        handles.push(tokio::spawn(async move {
            loop {
                let next = jobs.lock().await.recv().await;
                let Some(idx) = next else { break };
                let verdict = judge_one(provider.as_ref(), &model, &records[idx]).await;
                if tx.send((idx, verdict)).is_err() {
                    break;
                }
            }
        }));
    }
    drop(verdict_tx);

    let mut verdicts: Vec<Option<Verdict>> = vec![None; records.len()];
    let mut done = 0usize;
    while let Some((idx, verdict)) = verdict_rx.recv().await {
        verdicts[idx] = Some(verdict);
        done += 1;
        if done % 100 == 0 {
            info!("graded {}/{}", done, submitted);
        }
    }
    for result in futures_util::future::join_all(handles).await {
        if let Err(e) = result {
            warn!("grading worker failed: {}", e);
        }
    }

    let mut merged: Vec<AnswerRecord> = records.as_ref().clone();
    for idx in pending {
        // A worker that died mid-request leaves its record invalid.
        merged[idx].grade = verdicts[idx].unwrap_or(Verdict::Invalid).grade();
    }
    let tally = GradeTally::from_records(&merged);
    (merged, tally, submitted)
}

/// What grading one answers file did.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub stem: String,
    pub tally: GradeTally,
    /// Records sent to the judge in this run.
    pub submitted: usize,
    /// Question ids that occur more than once in the file.
    pub duplicate_ids: Vec<usize>,
}

impl FileReport {
    pub fn accuracy(&self) -> f64 {
        self.tally.accuracy()
    }
}

/// Grade one answers/log pair and write both back.
pub async fn grade_pair(
    pair: &ResultPair,
    provider: Arc<dyn LLMProvider>,
    config: &GradingConfig,
    regrade: bool,
) -> Result<FileReport> {
    let records = load_records(&pair.answers)?;
    let mut log = load_run_log(&pair.log)?;
    let duplicates = duplicate_ids(&records);
    if !duplicates.is_empty() {
        warn!("{} repeats question ids {:?}", pair.answers.display(), duplicates);
    }

    let (merged, tally, submitted) =
        grade_records(records, provider, &config.model, config.concurrency, regrade).await;

    save_records(&pair.answers, &merged)
        .with_context(|| format!("writing graded answers {}", pair.answers.display()))?;
    log.accuracy = Some(tally.accuracy());
    log.correct_answers = Some(tally.correct);
    log.invalid_answers = Some(tally.invalid);
    save_run_log(&pair.log, &log)
        .with_context(|| format!("updating log {}", pair.log.display()))?;

    info!(
        "{}: accuracy {:.4} ({} correct, {} invalid, {} submitted)",
        pair.stem,
        tally.accuracy(),
        tally.correct,
        tally.invalid,
        submitted
    );
    Ok(FileReport {
        stem: pair.stem.clone(),
        tally,
        submitted,
        duplicate_ids: duplicates,
    })
}

/// Pairs to grade under `target`, which is a results directory or one answers file.
///
/// Answers files without a log (and logs without answers) are warned about and
/// left out.
pub fn pairs_to_grade(target: &Path) -> Result<Vec<ResultPair>> {
    if target.is_file() {
        let log = paired_log_path(target);
        if !log.is_file() {
            warn!("skipping {}: no paired log {}", target.display(), log.display());
            return Ok(Vec::new());
        }
        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(vec![ResultPair {
            stem,
            answers: target.to_path_buf(),
            log,
        }]);
    }
    if !target.is_dir() {
        bail!("{} is neither a results directory nor an answers file", target.display());
    }

    let pairing = discover_pairs(target)?;
    for answers in &pairing.answers_without_log {
        warn!("skipping {}: no paired log", answers.display());
    }
    for log in &pairing.logs_without_answers {
        warn!("log {} has no answers file", log.display());
    }
    Ok(pairing.pairs)
}

/// Grade every pair under `target`, one file after another.
///
/// A file that fails to load or write is reported and the batch continues.
pub async fn grade_target(
    target: &Path,
    provider: Arc<dyn LLMProvider>,
    config: &GradingConfig,
    regrade: bool,
) -> Result<Vec<FileReport>> {
    let pairs = pairs_to_grade(target)?;
    if pairs.is_empty() {
        warn!("nothing to grade under {}", target.display());
    }
    let mut reports = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        match grade_pair(pair, Arc::clone(&provider), config, regrade).await {
            Ok(report) => reports.push(report),
            Err(e) => warn!("failed to grade {}: {:#}", pair.answers.display(), e),
        }
    }
    Ok(reports)
}
