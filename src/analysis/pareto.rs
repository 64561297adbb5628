//! Accuracy versus GPU-hour cost, and the non-dominated frontier.
//!
//! One point per graded run log. Cost is runtime in hours times the number of
//! GPUs the run held (1 when the log does not say). A point is on the frontier
//! when no other point of the same language is at least as accurate and at
//! most as expensive while being strictly better on one of the two.

use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::records::load_run_log;
use crate::utils::helpers::{list_files_with_ext, split_model_lang, KNOWN_LANGS};

/// Colour per model family, matched by substring of the lowercased name in
/// this order.
pub const FAMILY_COLORS: [(&str, &str); 9] = [
    ("deepseek", "#e41a1c"),
    ("llama", "#377eb8"),
    ("qwen", "#4daf4a"),
    ("gemma", "#ff7f00"),
    ("magistral", "#984ea3"),
    ("norwai", "#00CED1"),
    ("mimir", "#8B4513"),
    ("gpt-oss", "#f781bf"),
    ("qwq", "#a65628"),
];

pub const OTHER_FAMILY: &str = "other";
pub const OTHER_COLOR: &str = "#95a5a6";

/// Mixture-of-experts layouts whose total size is not `experts × size`.
const MOE_PARAMS: [(&str, f64); 1] = [("8x7b", 47.0)];

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)([bBmM])").expect("valid size regex"));
static MOE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)[xX](\d+(?:\.\d+)?)[bB]").expect("valid moe regex"));

/// Family key used for colouring.
pub fn family_of(model: &str) -> &'static str {
    let lower = model.to_lowercase();
    FAMILY_COLORS
        .iter()
        .find(|(family, _)| lower.contains(family))
        .map(|(family, _)| *family)
        .unwrap_or(OTHER_FAMILY)
}

pub fn family_color(family: &str) -> &'static str {
    FAMILY_COLORS
        .iter()
        .find(|(f, _)| *f == family)
        .map(|(_, c)| *c)
        .unwrap_or(OTHER_COLOR)
}

/// Parameter count in billions parsed from a model name; 0.0 when unknown.
///
/// `gemma3:270m` → 0.27, `qwen2.5:0.5b` → 0.5, `norwai-mixtral-8x7b` → 47.
pub fn params_billions(model: &str) -> f64 {
    let lower = model.to_lowercase();
    if let Some(caps) = MOE_RE.captures(&lower) {
        let layout = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if let Some((_, known)) = MOE_PARAMS.iter().find(|(l, _)| *l == layout) {
            return *known;
        }
        let experts: f64 = caps[1].parse().unwrap_or(0.0);
        let each: f64 = caps[2].parse().unwrap_or(0.0);
        return experts * each;
    }
    SIZE_RE
        .captures(&lower)
        .and_then(|caps| {
            let n: f64 = caps[1].parse().ok()?;
            Some(if &caps[2] == "m" { n / 1000.0 } else { n })
        })
        .unwrap_or(0.0)
}

/// One graded run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParetoPoint {
    /// Result file stem, e.g. `qwen3:8b-en`.
    pub run: String,
    /// Model name without the language suffix.
    pub model: String,
    pub lang: String,
    pub family: &'static str,
    pub params_b: f64,
    pub num_gpus: u32,
    pub hours: f64,
    pub gpu_hours: f64,
    /// Fraction in `[0, 1]`.
    pub accuracy: f64,
}

/// Load every graded log in `dir` as a point.
///
/// Logs without an accuracy (not graded yet), without a recognised language,
/// or that fail to parse are skipped with a warning.
pub fn load_points(dir: &Path) -> Result<Vec<ParetoPoint>> {
    let mut points = Vec::new();
    for path in list_files_with_ext(dir, "log")? {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let log = match load_run_log(&path) {
            Ok(log) => log,
            Err(e) => {
                warn!("skip {}: {}", path.display(), e);
                continue;
            }
        };
        let Some(accuracy) = log.accuracy else {
            warn!("skip {}: not graded", path.display());
            continue;
        };
        let (model, lang) = match split_model_lang(&stem) {
            Some((m, l)) => (m.to_string(), l.to_string()),
            None if KNOWN_LANGS.contains(&log.lang.as_str()) => (stem.clone(), log.lang.clone()),
            None => {
                warn!("skip {}: no language suffix", path.display());
                continue;
            }
        };
        let num_gpus = log.num_gpus.unwrap_or(1);
        let hours = log.runtime_seconds / 3600.0;
        debug!("{}: {:.2} gpu-h, accuracy {:.3}", stem, log.gpu_hours(), accuracy);
        points.push(ParetoPoint {
            family: family_of(&model),
            params_b: params_billions(&model),
            run: stem,
            model,
            lang,
            num_gpus,
            hours,
            gpu_hours: log.gpu_hours(),
            accuracy,
        });
    }
    Ok(points)
}

fn dominates(p: &ParetoPoint, q: &ParetoPoint) -> bool {
    p.accuracy >= q.accuracy
        && p.gpu_hours <= q.gpu_hours
        && (p.accuracy > q.accuracy || p.gpu_hours < q.gpu_hours)
}

/// Frontier membership for each point, in input order.
pub fn frontier_flags(points: &[ParetoPoint]) -> Vec<bool> {
    points
        .iter()
        .enumerate()
        .map(|(i, q)| {
            !points
                .iter()
                .enumerate()
                .any(|(j, p)| i != j && dominates(p, q))
        })
        .collect()
}

/// Points of one language with their frontier flags.
#[derive(Debug, Clone)]
pub struct LangFrontier {
    pub lang: String,
    pub points: Vec<ParetoPoint>,
    pub on_frontier: Vec<bool>,
}

impl LangFrontier {
    /// Frontier points ordered by increasing cost.
    pub fn frontier(&self) -> Vec<&ParetoPoint> {
        let mut front: Vec<&ParetoPoint> = self
            .points
            .iter()
            .zip(&self.on_frontier)
            .filter(|(_, on)| **on)
            .map(|(p, _)| p)
            .collect();
        front.sort_by(|a, b| a.gpu_hours.total_cmp(&b.gpu_hours));
        front
    }
}

/// Everything the `pareto` command reports.
#[derive(Debug, Clone)]
pub struct ParetoAnalysis {
    pub languages: Vec<LangFrontier>,
    pub total_gpu_hours: f64,
}

/// Split points by language and compute each frontier. Languages with no
/// points are left out.
pub fn analyse(points: Vec<ParetoPoint>) -> ParetoAnalysis {
    let total_gpu_hours = points.iter().map(|p| p.gpu_hours).sum();
    let languages = KNOWN_LANGS
        .iter()
        .filter_map(|lang| {
            let points: Vec<ParetoPoint> = points.iter().filter(|p| p.lang == *lang).cloned().collect();
            if points.is_empty() {
                return None;
            }
            let on_frontier = frontier_flags(&points);
            Some(LangFrontier {
                lang: lang.to_string(),
                points,
                on_frontier,
            })
        })
        .collect();
    ParetoAnalysis {
        languages,
        total_gpu_hours,
    }
}

/// Write `model,lang,params_b,num_gpus,hours,gpu_hours,accuracy,pareto` rows.
pub fn write_csv(path: &Path, frontier: &LangFrontier) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Cannot create {}", path.display()))?;
    writer.write_record([
        "model", "lang", "params_b", "num_gpus", "hours", "gpu_hours", "accuracy", "pareto",
    ])?;
    for (p, on) in frontier.points.iter().zip(&frontier.on_frontier) {
        writer.write_record([
            p.model.clone(),
            p.lang.clone(),
            format!("{}", p.params_b),
            p.num_gpus.to_string(),
            format!("{:.4}", p.hours),
            format!("{:.4}", p.gpu_hours),
            format!("{:.4}", p.accuracy),
            on.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{save_run_log, RunLog};

    fn point(model: &str, lang: &str, gpu_hours: f64, accuracy: f64) -> ParetoPoint {
        ParetoPoint {
            run: format!("{}-{}", model, lang),
            model: model.into(),
            lang: lang.into(),
            family: family_of(model),
            params_b: params_billions(model),
            num_gpus: 1,
            hours: gpu_hours,
            gpu_hours,
            accuracy,
        }
    }

    #[test]
    fn test_params_billions() {
        assert_eq!(params_billions("qwen3:8b"), 8.0);
        assert_eq!(params_billions("deepseek-r1:1.5b"), 1.5);
        assert_eq!(params_billions("qwen2.5:0.5b"), 0.5);
        assert!((params_billions("gemma3:270m") - 0.27).abs() < 1e-12);
        assert_eq!(params_billions("llama3.1:70b-instruct-q4"), 70.0);
        assert_eq!(params_billions("NorwAI-Magistral-24B-reasoning:Q8:0"), 24.0);
        assert_eq!(params_billions("norwai-mixtral-8x7b"), 47.0);
        assert_eq!(params_billions("mystery-model"), 0.0);
    }

    #[test]
    fn test_family_of() {
        assert_eq!(family_of("deepseek-r1:671b"), "deepseek");
        assert_eq!(family_of("NorwAI-Magistral-24B"), "magistral");
        assert_eq!(family_of("qwq:32b"), "qwq");
        assert_eq!(family_of("phi4"), OTHER_FAMILY);
        assert_eq!(family_color("qwen"), "#4daf4a");
        assert_eq!(family_color(OTHER_FAMILY), OTHER_COLOR);
    }

    #[test]
    fn test_frontier_flags() {
        let points = vec![
            point("small", "en", 1.0, 0.50),
            point("mid", "en", 4.0, 0.70),
            point("worse-mid", "en", 5.0, 0.60),
            point("big", "en", 20.0, 0.80),
            point("same-cost-worse", "en", 4.0, 0.65),
        ];
        assert_eq!(frontier_flags(&points), vec![true, true, false, true, false]);
    }

    #[test]
    fn test_identical_points_both_stay() {
        let points = vec![point("a", "en", 2.0, 0.5), point("b", "en", 2.0, 0.5)];
        assert_eq!(frontier_flags(&points), vec![true, true]);
    }

    #[test]
    fn test_analyse_splits_languages() {
        let points = vec![
            point("a", "en", 1.0, 0.5),
            point("a", "no", 2.0, 0.4),
            point("b", "no", 3.0, 0.3),
        ];
        let analysis = analyse(points);
        assert_eq!(analysis.languages.len(), 2);
        assert_eq!(analysis.languages[1].lang, "no");
        assert_eq!(analysis.languages[1].frontier().len(), 1);
        assert!((analysis.total_gpu_hours - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_load_points_skips_ungraded_and_uses_gpus() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        let graded = RunLog {
            model: "qwen3:235b".into(),
            lang: "en".into(),
            runtime_seconds: 3600.0,
            num_gpus: Some(2),
            accuracy: Some(0.8),
            ..Default::default()
        };
        save_run_log(&p.join("qwen3:235b-en.log"), &graded).unwrap();
        save_run_log(&p.join("qwen3:8b-en.log"), &RunLog::default()).unwrap();
        std::fs::write(p.join("legacy_no.log"), r#"{"duration_s": 1800, "accuracy": 0.5}"#).unwrap();

        let points = load_points(p).unwrap();
        assert_eq!(points.len(), 2);
        let big = points.iter().find(|x| x.model == "qwen3:235b").unwrap();
        assert_eq!(big.gpu_hours, 2.0);
        assert_eq!(big.params_b, 235.0);
        let legacy = points.iter().find(|x| x.model == "legacy").unwrap();
        assert_eq!(legacy.lang, "no");
        assert_eq!(legacy.num_gpus, 1);
        assert_eq!(legacy.gpu_hours, 0.5);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pareto_en.csv");
        let analysis = analyse(vec![point("qwen3:8b", "en", 1.5, 0.625)]);
        write_csv(&path, &analysis.languages[0]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("model,lang,params_b,num_gpus,hours,gpu_hours,accuracy,pareto")
        );
        assert_eq!(lines.next(), Some("qwen3:8b,en,8,1,1.5000,1.5000,0.6250,true"));
    }
}
