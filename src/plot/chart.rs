//! PNG rendering on top of plotters' bitmap backend.
//!
//! Text needs a TrueType font registered with plotters at runtime. The first
//! readable font from `QABENCH_FONT` or the usual system locations is used;
//! without one, charts are still drawn but carry no captions, tick labels,
//! legends or value labels.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::register_font;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use tracing::{debug, warn};

use crate::utils::helpers::ensure_dir;

pub const FONT_ENV: &str = "QABENCH_FONT";
pub const FONT_FAMILY: &str = "sans-serif";

const FONT_CANDIDATES: [&str; 8] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static FONT_READY: Lazy<bool> = Lazy::new(register_system_font);

fn register_system_font() -> bool {
    let candidates = std::env::var_os(FONT_ENV)
        .map(PathBuf::from)
        .into_iter()
        .chain(FONT_CANDIDATES.iter().map(PathBuf::from));
    for path in candidates {
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };
        // plotters keeps registered fonts for the life of the process.
        let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        match register_font(FONT_FAMILY, FontStyle::Normal, bytes) {
            Ok(()) => {
                debug!("chart font: {}", path.display());
                return true;
            }
            Err(_) => warn!("{} is not a usable font", path.display()),
        }
    }
    warn!("no TrueType font found, charts are drawn without text (set {})", FONT_ENV);
    false
}

/// Whether chart text can be drawn.
pub fn text_enabled() -> bool {
    *FONT_READY
}

pub fn draw_err<E: Display>(e: E) -> anyhow::Error {
    anyhow!("chart drawing failed: {}", e)
}

/// `#rrggbb` → colour.
pub fn hex_color(hex: &str) -> Option<RGBColor> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |i: usize| -> Option<u8> { u8::from_str_radix(digits.get(i..i + 2)?, 16).ok() };
    Some(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

/// Draw onto a white canvas of `size` pixels and save it as PNG at `path`.
///
/// The image is rendered next to the target under a dot-prefixed name and
/// renamed into place once complete.
pub fn render_png<F>(path: &Path, size: (u32, u32), draw: F) -> Result<()>
where
    F: FnOnce(&DrawingArea<BitMapBackend<'_>, Shift>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("{} is not a file path", path.display()))?;
    let tmp = path.with_file_name(format!(".{}", name));

    let drawn = (|| -> Result<()> {
        let root = BitMapBackend::new(&tmp, size).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        draw(&root)?;
        root.present().map_err(draw_err)?;
        Ok(())
    })();
    if let Err(e) = drawn {
        if tmp.exists() {
            fs::remove_file(&tmp).ok();
        }
        return Err(e.context(format!("Cannot render {}", path.display())));
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Cannot rename {} → {}", tmp.display(), path.display()))?;
    Ok(())
}

/// One bar series in a grouped bar chart.
pub struct Series {
    pub label: String,
    pub color: RGBColor,
    /// Percentages, one per category.
    pub values: Vec<f64>,
}

/// A grouped bar chart with a 0–100 % y axis.
pub struct BarChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub categories: Vec<String>,
    pub series: Vec<Series>,
    /// Print the value above each bar.
    pub value_labels: bool,
    /// Connect the bar tops of each series with a line.
    pub trend_lines: bool,
}

impl BarChart {
    /// Canvas size: wide enough for every group to stay readable.
    fn size(&self) -> (u32, u32) {
        let group_px = 28 * self.series.len().max(1) + 24;
        let width = (group_px * self.categories.len().max(1) + 160).max(720);
        (width as u32, 600)
    }
}

pub fn render_bars(chart: &BarChart, path: &Path) -> Result<()> {
    render_png(path, chart.size(), |root| {
        let text = text_enabled();
        let n = chart.categories.len().max(1);
        let centers: Vec<f64> = (0..n).map(|i| i as f64 + 0.5).collect();

        let mut builder = ChartBuilder::on(root);
        builder.margin(20);
        if text {
            builder
                .caption(&chart.title, (FONT_FAMILY, 24))
                .x_label_area_size(60)
                .y_label_area_size(60);
        }
        let mut plot = builder
            .build_cartesian_2d((0f64..n as f64).with_key_points(centers), 0f64..100f64)
            .map_err(draw_err)?;

        if text {
            let categories = &chart.categories;
            plot.configure_mesh()
                .disable_x_mesh()
                .x_desc(chart.x_label.as_str())
                .y_desc(chart.y_label.as_str())
                .x_label_formatter(&|x: &f64| categories.get(x.floor() as usize).cloned().unwrap_or_default())
                .draw()
                .map_err(draw_err)?;
        }

        let bar_w = 0.8 / chart.series.len().max(1) as f64;
        let value_style = TextStyle::from((FONT_FAMILY, 12).into_font()).pos(Pos::new(HPos::Center, VPos::Bottom));
        for (s_idx, series) in chart.series.iter().enumerate() {
            let color = series.color;
            let left = |c: usize| c as f64 + 0.1 + bar_w * s_idx as f64;
            let top = |v: &f64| v.clamp(0.0, 100.0);

            plot.draw_series(
                series
                    .values
                    .iter()
                    .enumerate()
                    .map(|(c, v)| Rectangle::new([(left(c), 0.0), (left(c) + bar_w, top(v))], color.filled())),
            )
            .map_err(draw_err)?
            .label(series.label.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));

            if chart.trend_lines && series.values.len() > 1 {
                let tops = series
                    .values
                    .iter()
                    .enumerate()
                    .map(|(c, v)| (left(c) + bar_w / 2.0, top(v)));
                plot.draw_series(LineSeries::new(tops, color.stroke_width(2)))
                    .map_err(draw_err)?;
            }
            if chart.value_labels && text {
                plot.draw_series(series.values.iter().enumerate().map(|(c, v)| {
                    Text::new(
                        format!("{:.1}", v),
                        (left(c) + bar_w / 2.0, top(v) + 1.0),
                        value_style.clone(),
                    )
                }))
                .map_err(draw_err)?;
            }
        }

        if text && !chart.series.is_empty() {
            plot.configure_series_labels()
                .position(SeriesLabelPosition::UpperRight)
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(draw_err)?;
        }
        Ok(())
    })
}

#[cfg(test)]
pub(crate) fn is_png(path: &Path) -> bool {
    fs::read(path)
        .map(|b| b.starts_with(b"\x89PNG\r\n\x1a\n"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_color() {
        let RGBColor(r, g, b) = hex_color("#e41a1c").unwrap();
        assert_eq!((r, g, b), (0xe4, 0x1a, 0x1c));
        let RGBColor(r, g, b) = hex_color("#00CED1").unwrap();
        assert_eq!((r, g, b), (0x00, 0xce, 0xd1));
        assert!(hex_color("e41a1c").is_none());
        assert!(hex_color("#e41a").is_none());
        assert!(hex_color("#zz1a1c").is_none());
    }

    #[test]
    fn test_bar_chart_size_grows_with_categories() {
        let chart = |n: usize| BarChart {
            title: String::new(),
            x_label: String::new(),
            y_label: String::new(),
            categories: (0..n).map(|i| format!("m{}", i)).collect(),
            series: vec![],
            value_labels: false,
            trend_lines: false,
        };
        assert_eq!(chart(1).size(), (720, 600));
        assert!(chart(40).size().0 > chart(20).size().0);
    }

    #[test]
    fn test_render_bars_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charts").join("bars.png");
        let chart = BarChart {
            title: "Model Performance".into(),
            x_label: "Models".into(),
            y_label: "Accuracy (%)".into(),
            categories: vec!["qwen3:8b".into(), "gemma3:4b".into()],
            series: vec![
                Series {
                    label: "English Prompt".into(),
                    color: RGBColor(65, 105, 225),
                    values: vec![60.0, 140.0],
                },
                Series {
                    label: "Norwegian Prompt".into(),
                    color: RGBColor(255, 140, 0),
                    values: vec![50.0, 0.0],
                },
            ],
            value_labels: true,
            trend_lines: true,
        };
        render_bars(&chart, &path).unwrap();
        assert!(is_png(&path));
        assert!(!dir.path().join("charts").join(".bars.png").exists());
    }

    #[test]
    fn test_render_png_reports_draw_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        let err = render_png(&path, (100, 100), |_| anyhow::bail!("no data")).unwrap_err();
        assert!(format!("{:#}", err).contains("no data"));
        assert!(!path.exists());
    }
}
