//! Command handlers for the `qabench` binary.
//!
//! Each handler resolves configuration, runs the library operation, and
//! prints a human summary to stdout. Async work runs on a runtime created
//! here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use qabench::analysis::{gpu_backfill, hard_questions, mcnemar, pareto};
use qabench::config::loader::resolve_config;
use qabench::config::schema::{BenchConfig, ConfigOverrides};
use qabench::generate::{run_generation, write_outputs, ERROR_MARKER};
use qabench::grade::{build_judge, grade_target};
use qabench::maintenance::{normalize_names, parse_id_list, remove_questions, MatchMode};
use qabench::plot;
use qabench::providers::base::single_turn;
use qabench::providers::ollama::OllamaProvider;
use qabench::records::load_records;
use qabench::utils::helpers::{ensure_dir, truncate_string, write_json_atomic};

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create tokio runtime")
}

/// The explicit directory, or the configured output directory.
fn results_dir(config_path: Option<&Path>, explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => Ok(resolve_config(config_path, &ConfigOverrides::default())?.serving.out_dir),
    }
}

// ============================================================================
// Generation and grading
// ============================================================================

pub(crate) fn cmd_generate(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<()> {
    let config: BenchConfig = resolve_config(config_path, &overrides)?;
    let serving = &config.serving;
    let provider = OllamaProvider::new(
        &serving.host,
        &serving.model,
        Duration::from_secs(serving.request_timeout_secs),
    )?;

    let output = runtime()?.block_on(run_generation(serving, &provider))?;
    let written = write_outputs(serving, &output)?;

    let errors = output
        .records
        .iter()
        .filter(|r| r.model_answer.starts_with(ERROR_MARKER))
        .count();
    println!(
        "Generated {} answers for {} ({}) in {:.1}s",
        output.records.len(),
        serving.model,
        serving.lang,
        output.log.runtime_seconds
    );
    if errors > 0 {
        println!("  {} questions failed and were recorded as errors", errors);
    }
    println!("  answers: {}", written.answers.display());
    println!("  log:     {}", written.log.display());
    Ok(())
}

pub(crate) fn cmd_grade(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
    target: Option<PathBuf>,
    regrade: bool,
) -> Result<()> {
    let config = resolve_config(config_path, &overrides)?;
    let judge = build_judge(&config.grading)?;
    let target = target.unwrap_or_else(|| config.serving.out_dir.clone());
    info!(
        "grading {} with {} (concurrency {})",
        target.display(),
        config.grading.model,
        config.grading.concurrency
    );

    let reports = runtime()?.block_on(grade_target(&target, judge, &config.grading, regrade))?;

    println!("{:<40} {:>9} {:>8} {:>8} {:>10}", "run", "accuracy", "correct", "invalid", "submitted");
    for r in &reports {
        println!(
            "{:<40} {:>8.2}% {:>8} {:>8} {:>10}",
            truncate_string(&r.stem, 40),
            r.accuracy() * 100.0,
            r.tally.correct,
            r.tally.invalid,
            r.submitted
        );
    }
    for r in reports.iter().filter(|r| !r.duplicate_ids.is_empty()) {
        println!("{}: repeated question ids {:?}", r.stem, r.duplicate_ids);
    }
    println!("Graded {} files", reports.len());
    Ok(())
}

pub(crate) fn cmd_chat(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
    prompt: &str,
    system: Option<&str>,
) -> Result<()> {
    let config = resolve_config(config_path, &overrides)?;
    let judge = build_judge(&config.grading)?;
    let messages = single_turn(system, prompt);
    let response = runtime()?.block_on(judge.chat(&messages, None))?;
    println!("{}", serde_json::to_string_pretty(&response.raw)?);
    Ok(())
}

// ============================================================================
// Analysis
// ============================================================================

pub(crate) fn cmd_mcnemar(file1: &Path, file2: &Path, csv: Option<&Path>) -> Result<()> {
    let result = mcnemar::compare_paths(file1, file2)?;
    let t = result.table;

    println!("\ncomparing {} vs {}", result.model1, result.model2);
    println!("both correct:       {}", t.a);
    println!("m1 wrong, m2 right: {}", t.b);
    println!("m1 right, m2 wrong: {}", t.c);
    println!("both wrong:         {}", t.d);
    println!("\nchi-squared: {:.3}", result.chi_squared);
    println!("p-value:     {:.4}", result.p_value);
    match result.winner() {
        Some(winner) => println!("statistically significant (p<{}) - {} is better", mcnemar::ALPHA, winner),
        None => println!("not statistically significant"),
    }

    if let Some(path) = csv {
        mcnemar::append_csv(path, &result)?;
        println!("\nresults appended to {}", path.display());
    }
    Ok(())
}

pub(crate) fn cmd_hard_questions(input: &Path, reference: Option<&Path>, output: &Path) -> Result<()> {
    if input.is_file() {
        let records = load_records(input)?;
        let wrong = hard_questions::wrong_records(&records);
        write_json_atomic(output, &wrong)?;
        println!("wrote {} incorrect items to {}", wrong.len(), output.display());
        return Ok(());
    }

    let consensus = hard_questions::consensus(input)?;
    println!("files compared: {}", consensus.files.len());
    println!(
        "answered correctly by all:   {:?}",
        consensus.always_right.iter().collect::<Vec<_>>()
    );
    println!(
        "answered incorrectly by all: {:?}",
        consensus.always_wrong.iter().collect::<Vec<_>>()
    );

    let reference = match reference {
        Some(r) => r.to_path_buf(),
        None => consensus
            .files
            .first()
            .cloned()
            .context("no answers files to take records from")?,
    };
    let records = hard_questions::records_for_ids(&reference, &consensus.always_wrong)?;
    write_json_atomic(output, &records)?;
    println!("wrote {} items to {}", records.len(), output.display());
    Ok(())
}

/// Pareto report. `with_csv` is off for `plot pareto`, which only draws.
pub(crate) fn cmd_pareto(
    config_path: Option<&Path>,
    results_dir_arg: Option<PathBuf>,
    out_dir: &Path,
    with_csv: bool,
) -> Result<()> {
    let dir = results_dir(config_path, results_dir_arg)?;
    let points = pareto::load_points(&dir)?;
    println!("\nloaded {} model runs", points.len());
    let analysis = pareto::analyse(points);
    for lang in &analysis.languages {
        println!("{} models: {}", lang.lang, lang.points.len());
    }
    println!("total gpu hours: {:.1}h", analysis.total_gpu_hours);

    ensure_dir(out_dir)?;
    for lang in &analysis.languages {
        println!("\npareto optimal models ({}):", lang.lang);
        for p in lang.frontier() {
            println!(
                "  {}: {:.1}B params, {:.2} gpu-h ({} gpu × {:.2}h), {:.1}% acc",
                p.model,
                p.params_b,
                p.gpu_hours,
                p.num_gpus,
                p.hours,
                p.accuracy * 100.0
            );
        }
        if with_csv {
            let csv_path = out_dir.join(format!("pareto_{}.csv", lang.lang));
            pareto::write_csv(&csv_path, lang)?;
            println!("saved {}", csv_path.display());
        }
        let png_path = out_dir.join(format!("pareto_{}.png", lang.lang));
        plot::pareto::pareto_chart(lang, analysis.total_gpu_hours, &png_path)?;
        println!("saved {}", png_path.display());
    }
    Ok(())
}

// ============================================================================
// Maintenance
// ============================================================================

pub(crate) fn cmd_backfill_gpus(
    config_path: Option<&Path>,
    results_dir_arg: Option<PathBuf>,
    default_num_gpus: u32,
) -> Result<()> {
    let dir = results_dir(config_path, results_dir_arg)?;
    if !dir.is_dir() {
        anyhow::bail!("results dir not found: {}", dir.display());
    }
    let updated = gpu_backfill::backfill(&dir, default_num_gpus)?;
    for (path, n) in &updated {
        println!("updated {}: num_gpus={}", path.display(), n);
    }
    println!("updated {} log files", updated.len());
    Ok(())
}

pub(crate) fn cmd_remove_questions(
    config_path: Option<&Path>,
    questions: &str,
    glob: Option<String>,
    mode: MatchMode,
    apply: bool,
) -> Result<()> {
    let ids = parse_id_list(questions)?;
    let pattern = match glob {
        Some(p) => p,
        None => results_dir(config_path, None)?
            .join("*.json")
            .to_string_lossy()
            .to_string(),
    };
    let report = remove_questions(&pattern, &ids, mode, apply)?;
    for file in &report {
        if apply {
            println!(
                "removed {} of {} questions from {}",
                file.removed,
                file.before,
                file.path.display()
            );
        } else {
            println!(
                "dry-run: would remove {} of {} questions from {}",
                file.removed,
                file.before,
                file.path.display()
            );
        }
    }
    if !apply {
        println!("nothing written; pass --apply to modify files");
    }
    Ok(())
}

pub(crate) fn cmd_normalize_names(
    config_path: Option<&Path>,
    results_dir_arg: Option<PathBuf>,
    contains: &str,
    apply: bool,
) -> Result<()> {
    let dir = results_dir(config_path, results_dir_arg)?;
    let plan = normalize_names(&dir, contains, apply)?;
    let mut renamed = 0usize;
    for r in &plan {
        let from = r.from.file_name().unwrap_or_default().to_string_lossy();
        let to = r.to.file_name().unwrap_or_default().to_string_lossy();
        if r.skipped {
            println!("skip (dest exists): {}", to);
        } else if apply {
            println!("renamed: {} -> {}", from, to);
            renamed += 1;
        } else {
            println!("would rename: {} -> {}", from, to);
            renamed += 1;
        }
    }
    if apply {
        println!("done: renamed {} files", renamed);
    } else {
        println!("done: {} files would be renamed; pass --apply to rename", renamed);
    }
    Ok(())
}

// ============================================================================
// Plots
// ============================================================================

pub(crate) fn cmd_plot_accuracy(
    config_path: Option<&Path>,
    results_dir_arg: Option<PathBuf>,
    output: &Path,
) -> Result<()> {
    let dir = results_dir(config_path, results_dir_arg)?;
    plot::write_accuracy_chart(&dir, output)?;
    println!("Graph saved to {}", output.display());
    Ok(())
}

pub(crate) fn cmd_plot_families(
    config_path: Option<&Path>,
    results_dir_arg: Option<PathBuf>,
    graph_dir: &Path,
) -> Result<()> {
    let dir = results_dir(config_path, results_dir_arg)?;
    let written = plot::write_family_charts(&dir, graph_dir)?;
    for path in &written {
        println!("  - Saved graph to {}", path.display());
    }
    println!("All family graphs generated ({}).", written.len());
    Ok(())
}
