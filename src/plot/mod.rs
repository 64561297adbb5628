//! PNG charts: overall accuracy, per-family accuracy, Pareto.
//!
//! Accuracy values come from the graded run logs in a results directory; logs
//! without an `accuracy` are plotted as 0, as if nothing were right.

pub mod chart;
pub mod pareto;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use plotters::style::RGBColor;
use regex::Regex;
use tracing::{info, warn};

use crate::records::load_run_log;
use crate::utils::helpers::{ensure_dir, list_files_with_ext, split_model_lang};
use chart::{render_bars, BarChart, Series};

pub const ACCURACY_CHART: &str = "model_performance.png";
pub const FAMILY_DIR: &str = "family_graphs";

/// royalblue
const EN_COLOR: RGBColor = RGBColor(65, 105, 225);
/// darkorange
const NO_COLOR: RGBColor = RGBColor(255, 140, 0);

/// One graded run as the charts see it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunAccuracy {
    pub model: String,
    pub lang: String,
    /// Fraction in `[0, 1]`.
    pub accuracy: f64,
}

/// Read `(model, lang, accuracy)` from every log in `dir`.
///
/// Logs whose name carries no language suffix, or that fail to parse, are
/// skipped with a warning.
pub fn load_runs(dir: &Path) -> Result<Vec<RunAccuracy>> {
    let logs = list_files_with_ext(dir, "log")?;
    info!("found {} log files to process", logs.len());
    let mut runs = Vec::with_capacity(logs.len());
    for path in logs {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some((model, lang)) = split_model_lang(&stem) else {
            warn!("skipping malformed log file name: {}", path.display());
            continue;
        };
        match load_run_log(&path) {
            Ok(log) => runs.push(RunAccuracy {
                model: model.to_string(),
                lang: lang.to_string(),
                accuracy: log.accuracy.unwrap_or(0.0),
            }),
            Err(e) => warn!("could not process {}: {}", path.display(), e),
        }
    }
    Ok(runs)
}

fn percent(score: Option<&f64>) -> f64 {
    score.copied().unwrap_or(0.0) * 100.0
}

/// Grouped bar chart of accuracy per model, one bar per language.
///
/// `-all-gpus` run variants are merged into the plain model name.
pub fn accuracy_chart(runs: &[RunAccuracy]) -> Result<BarChart> {
    let mut table: BTreeMap<String, BTreeMap<&str, f64>> = BTreeMap::new();
    for run in runs {
        let model = run.model.replace("-all-gpus", "");
        table.entry(model).or_default().insert(run.lang.as_str(), run.accuracy);
    }
    if table.is_empty() {
        bail!("no results found in .log files");
    }

    Ok(BarChart {
        title: "Model Performance on the Dataset".into(),
        x_label: "Models".into(),
        y_label: "Accuracy (%)".into(),
        categories: table.keys().cloned().collect(),
        series: vec![
            Series {
                label: "English Prompt".into(),
                color: EN_COLOR,
                values: table.values().map(|s| percent(s.get("en"))).collect(),
            },
            Series {
                label: "Norwegian Prompt".into(),
                color: NO_COLOR,
                values: table.values().map(|s| percent(s.get("no"))).collect(),
            },
        ],
        value_labels: false,
        trend_lines: false,
    })
}

static FAMILY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9.\-]+").expect("valid family regex"));
static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.?\d*)([bBmM])").expect("valid size regex"));

/// Family of a model: the leading run of letters, digits, `.` and `-`.
///
/// `qwen3:8b` → `qwen3`, `deepseek-r1:70b` → `deepseek-r1`.
pub fn family_name(model: &str) -> Option<&str> {
    FAMILY_RE.find(model).map(|m| m.as_str())
}

/// Sort key (billions) and axis label for a model's size.
pub fn model_size(model: &str) -> (f64, String) {
    if model.contains("llama") && model.contains("instruct") {
        return (71.0, "70B-instruct".to_string());
    }
    if model.contains("mimir") {
        if model.contains("scratch") {
            return (7.0, "7B-core-scratch-instruct".to_string());
        }
        return (8.0, "7B-core-instruct".to_string());
    }
    let Some(caps) = SIZE_RE.captures(model) else {
        return (0.0, model.to_string());
    };
    let raw = &caps[1];
    let unit = &caps[2];
    let value: f64 = raw.parse().unwrap_or(0.0);
    let label = format!("{}{}", raw, unit.to_uppercase());
    if unit.eq_ignore_ascii_case("m") {
        (value / 1000.0, label)
    } else {
        (value, label)
    }
}

/// Per-family bar charts, bars ordered by parameter size. Returns `(family, chart)`.
pub fn family_charts(runs: &[RunAccuracy]) -> Vec<(String, BarChart)> {
    // family -> [(size, label, lang, accuracy)]
    let mut families: BTreeMap<&str, Vec<(f64, String, &str, f64)>> = BTreeMap::new();
    for run in runs {
        let Some(family) = family_name(&run.model) else {
            continue;
        };
        let (size, label) = model_size(&run.model);
        families
            .entry(family)
            .or_default()
            .push((size, label, run.lang.as_str(), run.accuracy));
    }

    let mut charts = Vec::with_capacity(families.len());
    for (family, entries) in families {
        // First label seen for each size wins.
        let mut sizes: Vec<(f64, String)> = Vec::new();
        for (size, label, _, _) in &entries {
            if !sizes.iter().any(|(s, _)| s == size) {
                sizes.push((*size, label.clone()));
            }
        }
        sizes.sort_by(|a, b| a.0.total_cmp(&b.0));

        let score = |lang: &str, size: f64| {
            entries
                .iter()
                .rev()
                .find(|(s, _, l, _)| *s == size && *l == lang)
                .map(|(_, _, _, acc)| acc * 100.0)
                .unwrap_or(0.0)
        };
        let chart = BarChart {
            title: format!("{} family", family),
            x_label: "Model Size (Parameters)".into(),
            y_label: "Accuracy (%)".into(),
            categories: sizes.iter().map(|(_, l)| l.clone()).collect(),
            series: vec![
                Series {
                    label: "English Prompt".into(),
                    color: EN_COLOR,
                    values: sizes.iter().map(|(s, _)| score("en", *s)).collect(),
                },
                Series {
                    label: "Norwegian Prompt".into(),
                    color: NO_COLOR,
                    values: sizes.iter().map(|(s, _)| score("no", *s)).collect(),
                },
            ],
            value_labels: true,
            trend_lines: true,
        };
        charts.push((family.to_string(), chart));
    }
    charts
}

/// Render `model_performance.png` from the logs in `results_dir`.
pub fn write_accuracy_chart(results_dir: &Path, output: &Path) -> Result<()> {
    let runs = load_runs(results_dir)?;
    render_bars(&accuracy_chart(&runs)?, output)?;
    info!("graph saved to {}", output.display());
    Ok(())
}

/// Render `<graph_dir>/<family>.png` for every family in `results_dir`.
pub fn write_family_charts(results_dir: &Path, graph_dir: &Path) -> Result<Vec<PathBuf>> {
    let runs = load_runs(results_dir)?;
    let charts = family_charts(&runs);
    if charts.is_empty() {
        bail!("no model families found in {}", results_dir.display());
    }
    ensure_dir(graph_dir)?;
    let mut written = Vec::with_capacity(charts.len());
    for (family, chart) in charts {
        let path = graph_dir.join(format!("{}.png", family));
        render_bars(&chart, &path)?;
        info!("saved graph for family {} to {}", family, path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{save_run_log, RunLog};

    fn run(model: &str, lang: &str, accuracy: f64) -> RunAccuracy {
        RunAccuracy {
            model: model.into(),
            lang: lang.into(),
            accuracy,
        }
    }

    #[test]
    fn test_family_name() {
        assert_eq!(family_name("qwen3:8b"), Some("qwen3"));
        assert_eq!(family_name("deepseek-r1:70b"), Some("deepseek-r1"));
        assert_eq!(family_name("llama3.1:405b"), Some("llama3.1"));
        assert_eq!(family_name(":odd"), None);
    }

    #[test]
    fn test_model_size() {
        assert_eq!(model_size("qwen3:8b"), (8.0, "8B".to_string()));
        assert_eq!(model_size("gemma3:270m"), (0.27, "270M".to_string()));
        assert_eq!(model_size("llama3.1:70b-instruct-q4"), (71.0, "70B-instruct".to_string()));
        assert_eq!(model_size("mimir-mistral-7b-core-scratch-instruct-Q4").0, 7.0);
        assert_eq!(model_size("mimir-mistral-7b-core-instruct-Q4").0, 8.0);
        assert_eq!(model_size("mystery"), (0.0, "mystery".to_string()));
    }

    #[test]
    fn test_accuracy_chart_merges_all_gpus_variant() {
        let runs = vec![
            run("qwen3:8b", "en", 0.6),
            run("qwen3:8b-all-gpus", "no", 0.5),
            run("gemma3:4b", "en", 0.4),
        ];
        let chart = accuracy_chart(&runs).unwrap();
        assert_eq!(chart.categories, vec!["gemma3:4b", "qwen3:8b"]);
        assert_eq!(chart.series[0].label, "English Prompt");
        assert_eq!(chart.series[0].values, vec![40.0, 60.0]);
        assert_eq!(chart.series[1].values, vec![0.0, 50.0]);
        assert!(!chart.value_labels);
        assert!(accuracy_chart(&[]).is_err());
    }

    #[test]
    fn test_family_charts_order_by_size() {
        let runs = vec![
            run("qwen3:32b", "en", 0.7),
            run("qwen3:8b", "en", 0.5),
            run("qwen3:8b", "no", 0.4),
            run("gemma3:270m", "en", 0.1),
        ];
        let charts = family_charts(&runs);
        let names: Vec<&str> = charts.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(names, vec!["gemma3", "qwen3"]);
        let qwen = &charts[1].1;
        assert_eq!(qwen.title, "qwen3 family");
        assert_eq!(qwen.categories, vec!["8B", "32B"]);
        assert_eq!(qwen.series[0].values, vec![50.0, 70.0]);
        assert_eq!(qwen.series[1].values, vec![40.0, 0.0]);
        assert!(qwen.value_labels && qwen.trend_lines);
    }

    #[test]
    fn test_write_charts_from_logs() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let log = RunLog {
            accuracy: Some(0.75),
            ..Default::default()
        };
        save_run_log(&p.join("qwen3:8b-en.log"), &log).unwrap();
        save_run_log(&p.join("qwen3:8b_no.log"), &log).unwrap();
        save_run_log(&p.join("nolang.log"), &log).unwrap();

        let runs = load_runs(p).unwrap();
        assert_eq!(runs.len(), 2);

        let out = p.join("charts").join(ACCURACY_CHART);
        write_accuracy_chart(p, &out).unwrap();
        assert!(chart::is_png(&out));

        let written = write_family_charts(p, &p.join(FAMILY_DIR)).unwrap();
        assert_eq!(written, vec![p.join(FAMILY_DIR).join("qwen3.png")]);
        assert!(chart::is_png(&written[0]));
    }
}
