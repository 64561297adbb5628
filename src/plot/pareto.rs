//! Pareto scatter: accuracy against GPU-hours, one chart per language.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::analysis::pareto::{family_color, LangFrontier, ParetoPoint, FAMILY_COLORS, OTHER_FAMILY};

use super::chart::{draw_err, hex_color, render_png, text_enabled, FONT_FAMILY};

const SIZE: (u32, u32) = (1200, 800);

fn lang_name(lang: &str) -> &str {
    match lang {
        "en" => "English",
        "no" => "Norwegian",
        other => other,
    }
}

/// Short label for a frontier point: model name and size.
fn point_label(p: &ParetoPoint) -> String {
    if p.params_b >= 1.0 {
        format!("{} ({:.0}B)", p.model, p.params_b)
    } else if p.params_b > 0.0 {
        format!("{} ({:.0}M)", p.model, p.params_b * 1000.0)
    } else {
        p.model.clone()
    }
}

/// `(gpu_hours, accuracy %, label)` for every frontier point, cheapest first.
fn frontier_labels(frontier: &LangFrontier) -> Vec<(f64, f64, String)> {
    frontier
        .frontier()
        .into_iter()
        .map(|p| (p.gpu_hours, p.accuracy * 100.0, point_label(p)))
        .collect()
}

/// Families present in the chart, in colour-table order with `other` last.
fn legend_families(frontier: &LangFrontier) -> Vec<&'static str> {
    let present: BTreeSet<&str> = frontier.points.iter().map(|p| p.family).collect();
    FAMILY_COLORS
        .iter()
        .map(|(f, _)| *f)
        .chain(std::iter::once(OTHER_FAMILY))
        .filter(|f| present.contains(f))
        .collect()
}

fn family_rgb(family: &str) -> RGBColor {
    hex_color(family_color(family)).unwrap_or(BLACK)
}

/// Render the scatter for one language to `path` as PNG.
///
/// Frontier points are drawn larger with an outline and a label, and joined by
/// a line in order of cost. Point colour follows the model family.
pub fn pareto_chart(frontier: &LangFrontier, total_gpu_hours: f64, path: &Path) -> Result<()> {
    render_png(path, SIZE, |root| {
        let text = text_enabled();
        let max_cost = frontier
            .points
            .iter()
            .map(|p| p.gpu_hours)
            .fold(0.0_f64, f64::max);
        let x_max = if max_cost > 0.0 { max_cost * 1.05 } else { 1.0 };

        let mut builder = ChartBuilder::on(root);
        builder.margin(20);
        if text {
            let title = format!(
                "Pareto frontier: accuracy vs GPU hours ({}), {:.1}h total",
                lang_name(&frontier.lang),
                total_gpu_hours
            );
            builder
                .caption(title, (FONT_FAMILY, 22))
                .x_label_area_size(50)
                .y_label_area_size(60);
        }
        let mut plot = builder
            .build_cartesian_2d(0f64..x_max, 0f64..100f64)
            .map_err(draw_err)?;
        if text {
            plot.configure_mesh()
                .x_desc("GPU hours (runtime × num_gpus)")
                .y_desc("Accuracy (%)")
                .draw()
                .map_err(draw_err)?;
        }

        // Dominated points per family first, so frontier points sit on top.
        for family in legend_families(frontier) {
            let color = family_rgb(family);
            let dominated = frontier
                .points
                .iter()
                .zip(&frontier.on_frontier)
                .filter(|(p, on)| p.family == family && !**on)
                .map(|(p, _)| Circle::new((p.gpu_hours, p.accuracy * 100.0), 5, color.mix(0.4).filled()));
            plot.draw_series(dominated)
                .map_err(draw_err)?
                .label(family)
                .legend(move |(x, y)| Rectangle::new([(x, y - 6), (x + 12, y + 6)], color.filled()));
        }

        let front = frontier.frontier();
        plot.draw_series(LineSeries::new(
            front.iter().map(|p| (p.gpu_hours, p.accuracy * 100.0)),
            BLACK.stroke_width(2),
        ))
        .map_err(draw_err)?;
        plot.draw_series(front.iter().map(|p| {
            Circle::new((p.gpu_hours, p.accuracy * 100.0), 8, family_rgb(p.family).filled())
        }))
        .map_err(draw_err)?;
        plot.draw_series(
            front
                .iter()
                .map(|p| Circle::new((p.gpu_hours, p.accuracy * 100.0), 8, BLACK.stroke_width(2))),
        )
        .map_err(draw_err)?;

        if text {
            let style = TextStyle::from((FONT_FAMILY, 13).into_font()).pos(Pos::new(HPos::Center, VPos::Bottom));
            plot.draw_series(
                frontier_labels(frontier)
                    .into_iter()
                    .map(|(x, y, label)| Text::new(label, (x, y + 2.0), style.clone())),
            )
            .map_err(draw_err)?;
            plot.configure_series_labels()
                .position(SeriesLabelPosition::LowerRight)
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(draw_err)?;
        }
        Ok(())
    })
}
