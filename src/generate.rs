//! Answer generation: ask the served model every question, record what it says.
//!
//! The run is gated on an explicit health check of the serving endpoint. After
//! that, a question that keeps failing is recorded with an `ERROR: ...` answer
//! and the run moves on.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use backon::Retryable;
use tracing::{info, warn};

use crate::config::schema::ServingConfig;
use crate::dataset::{self, QAPair};
use crate::providers::base::{single_turn, strip_think_blocks, LLMProvider};
use crate::providers::retry::{is_retryable, question_backoff};
use crate::records::{save_records, save_run_log, AnswerRecord, RunLog};
use crate::utils::helpers::{ensure_dir, result_stem};

/// Prefix of `model_answer` for questions the endpoint never answered.
pub const ERROR_MARKER: &str = "ERROR:";

/// Log progress on the first question and every this-many after.
const PROGRESS_EVERY: usize = 25;

/// System prompt for a language tag. Tags starting with `no` get Norwegian.
pub fn system_prompt(lang: &str) -> &'static str {
    if lang.to_lowercase().starts_with("no") {
        "Du er ekspert på norsk språk og verdenshistorie før 1940. \
         Svar kort (1–2 setninger) og bruk kun kunnskap før 1940. Svar på norsk."
    } else {
        "You are an expert in answering history quizzes using only knowledge from up to 1940. \
         Answer in one or two sentences, using only knowledge up to 1940."
    }
}

/// GPU count visible to this job.
///
/// `SLURM_GPUS_ON_NODE` wins; otherwise the entries of `CUDA_VISIBLE_DEVICES`
/// are counted; otherwise 1.
pub fn detect_gpu_count<F>(lookup: F) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(n) = lookup("SLURM_GPUS_ON_NODE").and_then(|v| v.trim().parse::<u32>().ok()) {
        if n > 0 {
            return n;
        }
    }
    if let Some(devices) = lookup("CUDA_VISIBLE_DEVICES") {
        let n = devices.split(',').filter(|d| !d.trim().is_empty()).count() as u32;
        if n > 0 {
            return n;
        }
    }
    1
}

/// Everything one generation run produced.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub records: Vec<AnswerRecord>,
    pub log: RunLog,
}

/// Where a generation run was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRun {
    pub answers: PathBuf,
    pub log: PathBuf,
}

/// Ask one question, retrying with a constant delay. Returns the answer text or
/// the error marker.
async fn answer_question(
    provider: &dyn LLMProvider,
    config: &ServingConfig,
    idx: usize,
    system: &str,
    pair: &QAPair,
) -> String {
    let messages = single_turn(Some(system), &pair.question);
    let backoff = question_backoff(
        config.max_retries,
        Duration::from_secs_f64(config.retry_sleep_secs.max(0.0)),
    );

    let result = (|| async { provider.chat(&messages, Some(&config.model)).await })
        .retry(backoff)
        .when(is_retryable)
        .notify(|err: &anyhow::Error, delay: Duration| {
            warn!("error on question {}: {}; retrying in {:?}", idx, err, delay);
        })
        .await;

    match result {
        Ok(resp) => {
            if config.strip_think {
                strip_think_blocks(resp.text())
            } else {
                resp.text().trim().to_string()
            }
        }
        Err(e) => {
            warn!("giving up on question {}: {}", idx, e);
            format!("{} {}", ERROR_MARKER, e)
        }
    }
}

/// Run generation for the configured model over the first N dataset pairs.
///
/// Fails before asking anything when the dataset is malformed, no model is
/// configured, or the serving endpoint does not pass its health check.
pub async fn run_generation(config: &ServingConfig, provider: &dyn LLMProvider) -> Result<GenerationOutput> {
    if config.model.trim().is_empty() {
        bail!("No model specified. Provide --model or set MODEL (or MODELS).");
    }

    let pairs = dataset::load_first(&config.dataset_path, config.num_questions)?;

    provider.health_check().await.with_context(|| {
        format!(
            "serving endpoint {} is not reachable",
            provider.get_api_base().unwrap_or("<unknown>")
        )
    })?;

    let system = system_prompt(&config.lang);
    info!(
        model = %config.model,
        lang = %config.lang,
        num_q = pairs.len(),
        "starting generation"
    );

    let started = Instant::now();
    let mut records = Vec::with_capacity(pairs.len());
    for (idx, pair) in pairs.iter().enumerate() {
        if idx == 0 || (idx + 1) % PROGRESS_EVERY == 0 {
            info!("answering question {} of {}", idx + 1, pairs.len());
        }
        let asked = Instant::now();
        let answer = answer_question(provider, config, idx, system, pair).await;
        let latency = asked.elapsed().as_secs_f64();
        records.push(AnswerRecord::new(idx, &pair.question, &pair.answer, answer, latency));
    }
    let runtime = (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;

    let env = |key: &str| std::env::var(key).ok();
    let log = RunLog {
        model: config.model.clone(),
        lang: config.lang.clone(),
        num_questions: records.len(),
        runtime_seconds: runtime,
        num_gpus: Some(detect_gpu_count(env)),
        timestamp: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        slurm_job_id: env("SLURM_JOB_ID"),
        slurm_array_task_id: env("SLURM_ARRAY_TASK_ID"),
        node: env("SLURMD_NODENAME"),
        ..Default::default()
    };

    info!("finished generation in {:.1}s", runtime);
    Ok(GenerationOutput { records, log })
}

/// Persist a run as `<out_dir>/<model>-<lang>.json` and `.log`.
pub fn write_outputs(config: &ServingConfig, output: &GenerationOutput) -> Result<WrittenRun> {
    ensure_dir(&config.out_dir)?;
    let stem = result_stem(&config.model, &config.lang);
    let answers = config.out_dir.join(format!("{}.json", stem));
    let log = config.out_dir.join(format!("{}.log", stem));
    save_records(&answers, &output.records)?;
    save_run_log(&log, &output.log)?;
    Ok(WrittenRun { answers, log })
}
