//! McNemar's paired test between two graded result sets.
//!
//! Records are aligned by `(part, question_id)`, where `part` is the position
//! of the source file in a `.txt` list (always 0 for a single `.json` file).
//! Contingency cells:
//!
//! |              | B right | B wrong |
//! |--------------|---------|---------|
//! | **A right**  | a       | c       |
//! | **A wrong**  | b       | d       |

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::records::{duplicate_ids, load_records, AnswerRecord};

/// Significance level used for the verdict.
pub const ALPHA: f64 = 0.05;

/// Default file results are appended to.
pub const DEFAULT_CSV: &str = "mcnemar_results.csv";

/// A named, possibly concatenated, set of graded records.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub name: String,
    /// `(part, record)`; `part` is the index of the source file.
    pub records: Vec<(usize, AnswerRecord)>,
    /// `(part, question_id)` keys that occur more than once. Only the first
    /// occurrence takes part in the comparison.
    pub duplicates: Vec<(usize, usize)>,
}

/// Load one answers file as `part`, noting repeated question ids.
fn load_part(
    path: &Path,
    part: usize,
    records: &mut Vec<(usize, AnswerRecord)>,
    duplicates: &mut Vec<(usize, usize)>,
) -> Result<()> {
    let loaded = load_records(path)?;
    let dups = duplicate_ids(&loaded);
    if !dups.is_empty() {
        warn!("{} repeats question ids {:?}; keeping the first of each", path.display(), dups);
    }
    duplicates.extend(dups.into_iter().map(|id| (part, id)));
    records.extend(loaded.into_iter().map(|r| (part, r)));
    Ok(())
}

/// Load a `.json` answers file, or a `.txt` file listing answers files one per line.
///
/// Listed files that do not exist are skipped with a warning.
pub fn load_result_set(path: &Path) -> Result<ResultSet> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "json" => {
            let mut records = Vec::new();
            let mut duplicates = Vec::new();
            load_part(path, 0, &mut records, &mut duplicates)?;
            Ok(ResultSet {
                name: file_stem(path),
                records,
                duplicates,
            })
        }
        "txt" => {
            let listing = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read list {}", path.display()))?;
            let mut names = Vec::new();
            let mut records = Vec::new();
            let mut duplicates = Vec::new();
            let listed = listing.lines().map(str::trim).filter(|l| !l.is_empty());
            for (part, line) in listed.enumerate() {
                let file = Path::new(line);
                if !file.exists() {
                    warn!("can't find {}, skipping", file.display());
                    continue;
                }
                load_part(file, part, &mut records, &mut duplicates)?;
                names.push(file_stem(file));
            }
            Ok(ResultSet {
                name: names.join("+"),
                records,
                duplicates,
            })
        }
        other => bail!("input must be a .json or .txt file, got {:?} ({})", other, path.display()),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 2×2 paired outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Contingency {
    /// Both right.
    pub a: usize,
    /// A wrong, B right.
    pub b: usize,
    /// A right, B wrong.
    pub c: usize,
    /// Both wrong.
    pub d: usize,
}

impl Contingency {
    pub fn total(&self) -> usize {
        self.a + self.b + self.c + self.d
    }

    /// Align two record sets and count outcomes. Only `T` counts as right.
    ///
    /// Keys present in only one set are reported and left out; a repeated key
    /// counts once, with its first outcome.
    pub fn from_sets(first: &ResultSet, second: &ResultSet) -> Self {
        let index = |set: &ResultSet| -> BTreeMap<(usize, usize), bool> {
            let mut outcomes = BTreeMap::new();
            for (part, r) in &set.records {
                outcomes.entry((*part, r.question_id)).or_insert(r.is_correct());
            }
            outcomes
        };
        let left = index(first);
        let right = index(second);

        let mut table = Contingency::default();
        let mut unmatched = 0usize;
        for (key, a_right) in &left {
            let Some(b_right) = right.get(key) else {
                unmatched += 1;
                continue;
            };
            match (a_right, b_right) {
                (true, true) => table.a += 1,
                (false, true) => table.b += 1,
                (true, false) => table.c += 1,
                (false, false) => table.d += 1,
            }
        }
        unmatched += right.keys().filter(|k| !left.contains_key(k)).count();
        if unmatched > 0 {
            warn!(
                "{} questions appear in only one of {} / {}; ignoring them",
                unmatched, first.name, second.name
            );
        }
        table
    }
}

/// Continuity-corrected statistic `(|b − c| − 1)² / (b + c)`, 0 when `b + c = 0`.
pub fn statistic(b: usize, c: usize) -> f64 {
    if b + c == 0 {
        return 0.0;
    }
    let diff = (b as f64 - c as f64).abs() - 1.0;
    diff * diff / (b + c) as f64
}

/// Upper-tail probability of χ² with one degree of freedom.
pub fn p_value(chi_squared: f64) -> f64 {
    if chi_squared <= 0.0 {
        return 1.0;
    }
    erfc((chi_squared / 2.0).sqrt()).clamp(0.0, 1.0)
}

/// Complementary error function (Chebyshev fit, |error| < 1.2e-7).
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Full comparison of two result sets.
#[derive(Debug, Clone, PartialEq)]
pub struct McNemarResult {
    pub model1: String,
    pub model2: String,
    pub table: Contingency,
    pub chi_squared: f64,
    pub p_value: f64,
}

impl McNemarResult {
    pub fn significant(&self) -> bool {
        self.p_value < ALPHA
    }

    /// The better model when the difference is significant.
    pub fn winner(&self) -> Option<&str> {
        if !self.significant() {
            return None;
        }
        if self.table.b > self.table.c {
            Some(&self.model2)
        } else {
            Some(&self.model1)
        }
    }
}

pub fn compare(first: &ResultSet, second: &ResultSet) -> McNemarResult {
    let table = Contingency::from_sets(first, second);
    let chi_squared = statistic(table.b, table.c);
    McNemarResult {
        model1: first.name.clone(),
        model2: second.name.clone(),
        table,
        chi_squared,
        p_value: p_value(chi_squared),
    }
}

/// Load both inputs and compare them.
pub fn compare_paths(first: &Path, second: &Path) -> Result<McNemarResult> {
    for p in [first, second] {
        if !p.exists() {
            bail!("can't find {}", p.display());
        }
    }
    Ok(compare(&load_result_set(first)?, &load_result_set(second)?))
}

/// Append one result row, writing the header when the file is new.
pub fn append_csv(path: &Path, result: &McNemarResult) -> Result<()> {
    let new_file = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    if new_file {
        writer.write_record([
            "model1", "model2", "a", "b", "c", "d", "chi_squared", "p_value", "significant",
        ])?;
    }
    let t = result.table;
    writer.write_record([
        result.model1.clone(),
        result.model2.clone(),
        t.a.to_string(),
        t.b.to_string(),
        t.c.to_string(),
        t.d.to_string(),
        format!("{:.3}", result.chi_squared),
        format!("{:.4}", result.p_value),
        if result.significant() { "yes" } else { "no" }.to_string(),
    ])?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{save_records, Grade};

    fn graded(n: usize, wrong: &[usize]) -> Vec<AnswerRecord> {
        (0..n)
            .map(|i| {
                let mut r = AnswerRecord::new(i, "q", "a", "m", 0.0);
                r.grade = Some(if wrong.contains(&i) { Grade::Incorrect } else { Grade::Correct });
                r
            })
            .collect()
    }

    fn set(name: &str, records: Vec<AnswerRecord>) -> ResultSet {
        ResultSet {
            name: name.into(),
            records: records.into_iter().map(|r| (0, r)).collect(),
            duplicates: Vec::new(),
        }
    }

    #[test]
    fn test_discordant_counts() {
        let a = set("A", graded(10, &[2, 5]));
        let b = set("B", graded(10, &[5]));
        let t = Contingency::from_sets(&a, &b);
        assert_eq!(t, Contingency { a: 8, b: 1, c: 0, d: 1 });
        assert_eq!(t.total(), 10);
    }

    #[test]
    fn test_alignment_ignores_file_order() {
        let a = set("A", graded(4, &[0]));
        let mut reversed = graded(4, &[3]);
        reversed.reverse();
        let b = set("B", reversed);
        let t = Contingency::from_sets(&a, &b);
        assert_eq!(t.b, 1);
        assert_eq!(t.c, 1);
    }

    #[test]
    fn test_missing_grade_counts_as_wrong() {
        let mut recs = graded(2, &[]);
        recs[1].grade = None;
        let t = Contingency::from_sets(&set("A", recs), &set("B", graded(2, &[])));
        assert_eq!(t.b, 1);
    }

    #[test]
    fn test_statistic() {
        assert_eq!(statistic(0, 0), 0.0);
        assert_eq!(statistic(1, 0), 0.0);
        assert!((statistic(10, 2) - 49.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_p_value_known_points() {
        assert_eq!(p_value(0.0), 1.0);
        assert!((p_value(3.841_458_8) - 0.05).abs() < 1e-4);
        assert!((p_value(6.634_896_6) - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_winner_requires_significance() {
        let a = set("A", graded(40, &(0..12).collect::<Vec<_>>()));
        let b = set("B", graded(40, &[0]));
        let r = compare(&a, &b);
        assert_eq!(r.table.b, 11);
        assert!(r.significant());
        assert_eq!(r.winner(), Some("B"));

        let r = compare(&set("A", graded(10, &[2, 5])), &set("B", graded(10, &[5])));
        assert!(!r.significant());
        assert_eq!(r.winner(), None);
    }

    #[test]
    fn test_txt_list_concatenates_parts() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        save_records(&p.join("m-en.json"), &graded(3, &[0])).unwrap();
        save_records(&p.join("m-no.json"), &graded(3, &[1])).unwrap();
        let listing = format!(
            "{}\n\n{}\n{}\n",
            p.join("m-en.json").display(),
            p.join("m-no.json").display(),
            p.join("missing.json").display()
        );
        std::fs::write(p.join("m.txt"), listing).unwrap();

        let rs = load_result_set(&p.join("m.txt")).unwrap();
        assert_eq!(rs.name, "m-en+m-no");
        assert_eq!(rs.records.len(), 6);
        // Same question_id in both parts stays distinct.
        let t = Contingency::from_sets(&rs, &rs);
        assert_eq!(t.total(), 6);
        assert_eq!(t.d, 2);
    }

    #[test]
    fn test_repeated_ids_are_reported_and_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut recs = graded(3, &[]);
        let mut repeat = AnswerRecord::new(1, "q", "a", "m", 0.0);
        repeat.grade = Some(Grade::Incorrect);
        recs.push(repeat);
        let path = dir.path().join("m-en.json");
        save_records(&path, &recs).unwrap();

        let rs = load_result_set(&path).unwrap();
        assert_eq!(rs.duplicates, vec![(0, 1)]);
        let t = Contingency::from_sets(&rs, &set("B", graded(3, &[])));
        assert_eq!(t, Contingency { a: 3, b: 0, c: 0, d: 0 });
    }

    #[test]
    fn test_rejects_other_extensions() {
        assert!(load_result_set(Path::new("results.csv")).is_err());
    }

    #[test]
    fn test_append_csv_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CSV);
        let r = compare(&set("A", graded(10, &[2, 5])), &set("B", graded(10, &[5])));
        append_csv(&path, &r).unwrap();
        append_csv(&path, &r).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "model1,model2,a,b,c,d,chi_squared,p_value,significant");
        assert_eq!(lines[1], "A,B,8,1,0,1,0.000,1.0000,no");
    }
}
