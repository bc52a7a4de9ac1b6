//! Time-series figures over the usage databases, rendered with plotters.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use log::{info, warn};
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::config::Config;
use crate::dataset::Matrix;
use crate::db;
use crate::model::{Measure, UsageField};
use crate::util::Period;

/// Figure size in pixels.
const SIZE: (u32, u32) = (1200, 1000);

/// Brewer qualitative palette (Set3 followed by Paired), cycled when a
/// figure has more series than colours.
const PALETTE: [RGBColor; 24] = [
    RGBColor(0x8d, 0xd3, 0xc7),
    RGBColor(0xff, 0xff, 0xb3),
    RGBColor(0xbe, 0xba, 0xda),
    RGBColor(0xfb, 0x80, 0x72),
    RGBColor(0x80, 0xb1, 0xd3),
    RGBColor(0xfd, 0xb4, 0x62),
    RGBColor(0xb3, 0xde, 0x69),
    RGBColor(0xfc, 0xcd, 0xe5),
    RGBColor(0xd9, 0xd9, 0xd9),
    RGBColor(0xbc, 0x80, 0xbd),
    RGBColor(0xcc, 0xeb, 0xc5),
    RGBColor(0xff, 0xed, 0x6f),
    RGBColor(0xa6, 0xce, 0xe3),
    RGBColor(0x1f, 0x78, 0xb4),
    RGBColor(0xb2, 0xdf, 0x8a),
    RGBColor(0x33, 0xa0, 0x2c),
    RGBColor(0xfb, 0x9a, 0x99),
    RGBColor(0xe3, 0x1a, 0x1c),
    RGBColor(0xfd, 0xbf, 0x6f),
    RGBColor(0xff, 0x7f, 0x00),
    RGBColor(0xca, 0xb2, 0xd6),
    RGBColor(0x6a, 0x3d, 0x9a),
    RGBColor(0xff, 0xff, 0x99),
    RGBColor(0xb1, 0x59, 0x28),
];

/// Cumulative compute usage over a quarter, either one summed line for the
/// project or one line per user. When a total grant is known a straight
/// blue line runs from zero at the start of the quarter to the grant at
/// its end, the pace an evenly spent allocation would hold.
pub fn usage(
    config: &Config,
    project: &str,
    period: Period,
    by_user: bool,
    users: &[String],
    max_usage: Option<f64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let db = db::existing_usage(config, project, period.year)?;
    let by_user = by_user || !users.is_empty();

    let mut matrix = db.usage_matrix(period, UsageField::Su)?.scaled(1000.0);
    if !users.is_empty() {
        matrix = matrix.select_columns(users);
    }
    if matrix.is_empty() {
        warn!("no usage recorded for {project} in {period}, nothing to plot");
        return Ok(());
    }

    // an explicit ceiling is honoured even per user, the recorded grant
    // only makes sense against the project total
    let grant_ksu = match max_usage {
        Some(ksu) => Some(ksu),
        None if by_user => None,
        None => db.grant(period)?.map(|su| su / 1000.0),
    };
    let quota = match grant_ksu {
        Some(ksu) => {
            let (start, end) = db.quarter_range(period)?;
            Some([(start, 0.0), (end, ksu)])
        }
        None => None,
    };

    let bands = if by_user {
        line_bands(&matrix.sort_by_last_row())
    } else {
        vec![Band {
            label: project.to_string(),
            color: PALETTE[0],
            points: matrix.totals(),
        }]
    };

    let figure = Figure {
        title: format!(
            "Usage for Project {project} on {} ({period})",
            config.compute_system
        ),
        y_label: "Compute resources (KSU)".to_string(),
        style: ChartStyle::Lines,
        bands,
        quota,
        clamp_zero: true,
        legend: by_user,
    };
    let path = output.unwrap_or_else(|| PathBuf::from(format!("usage_{project}_{period}.png")));
    save(&figure, &path)?;
    info!("wrote {}", path.display());
    Ok(())
}

/// Per-user storage on one point over a quarter. The default is a stacked
/// area chart of sizes or inode counts; `--delta` switches to lines of
/// change since the first scan.
pub fn storage(
    config: &Config,
    project: &str,
    period: Period,
    point: &str,
    measure: Measure,
    users: &[String],
    cutoff: f64,
    delta: bool,
    show_total: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let db = db::existing_usage(config, project, period.year)?;
    let point = config.resolve_point(point);
    let (scale, y_label, measure_name) = match measure {
        Measure::Size => (1024f64.powi(4), "Storage Used (TiB)", "size"),
        Measure::Inodes => (1.0, "Inodes", "inodes"),
    };

    let mut matrix = db.storage_matrix(period, &point, measure)?.scaled(scale);
    if !users.is_empty() {
        matrix = matrix.select_columns(users);
    }

    let figure = if delta {
        let matrix = matrix.delta().retain_abs_above(cutoff);
        if matrix.is_empty() {
            warn!("no {point} changes above the cutoff, nothing to plot");
            return Ok(());
        }
        Figure {
            title: format!(
                "Change in {point} file usage since beginning of quarter {period} for Project {project}"
            ),
            y_label: y_label.to_string(),
            style: ChartStyle::Lines,
            bands: line_bands(&matrix.sort_by_last_row()),
            quota: None,
            clamp_zero: false,
            legend: true,
        }
    } else {
        let matrix = matrix.sort_by_last_row().fold_below(cutoff);
        if matrix.is_empty() {
            warn!("no {point} usage recorded for {period}, nothing to plot");
            return Ok(());
        }
        let quota = if show_total {
            let system = config.system_for_point(&point);
            match db.point_quota(system, &point, period)? {
                Some(q) => {
                    let level = match measure {
                        Measure::Size => q.size_grant / scale,
                        Measure::Inodes => q.inode_grant,
                    };
                    let first = matrix.dates[0];
                    let last = matrix.dates[matrix.dates.len() - 1];
                    Some([(first, level), (last, level)])
                }
                None => {
                    warn!("no {point} quota recorded for {period}");
                    None
                }
            }
        } else {
            None
        };
        Figure {
            title: format!("{point} file usage for Project {project} ({period})"),
            y_label: y_label.to_string(),
            style: ChartStyle::Areas,
            bands: stacked_bands(&matrix),
            quota,
            clamp_zero: true,
            legend: true,
        }
    };

    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!("{point}_{measure_name}_{project}_{period}.png"))
    });
    save(&figure, &path)?;
    info!("wrote {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChartStyle {
    Lines,
    Areas,
}

#[derive(Debug, Clone, PartialEq)]
struct Band {
    label: String,
    color: RGBColor,
    points: Vec<(NaiveDate, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
struct Figure {
    title: String,
    y_label: String,
    style: ChartStyle,
    /// Series in draw order.
    bands: Vec<Band>,
    /// Endpoints of a straight quota line, drawn in blue over the data.
    quota: Option<[(NaiveDate, f64); 2]>,
    /// Pin the bottom of the y axis to zero.
    clamp_zero: bool,
    legend: bool,
}

impl Figure {
    fn points(&self) -> impl Iterator<Item = &(NaiveDate, f64)> {
        self.bands
            .iter()
            .flat_map(|b| &b.points)
            .chain(self.quota.iter().flatten())
    }

    fn x_range(&self) -> (NaiveDate, NaiveDate) {
        let mut min = NaiveDate::MAX;
        let mut max = NaiveDate::MIN;
        for &(date, _) in self.points() {
            min = min.min(date);
            max = max.max(date);
        }
        if min >= max {
            // a single dump still gets a non-degenerate axis
            max = min + Days::new(1);
        }
        (min, max)
    }

    fn y_range(&self) -> (f64, f64) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &(_, value) in self.points() {
            min = min.min(value);
            max = max.max(value);
        }
        let max = if max > 0.0 { max * 1.05 } else { 1.0 };
        let min = if self.clamp_zero || min > 0.0 {
            0.0
        } else {
            min * 1.05
        };
        (min, max)
    }
}

/// One line per column, coloured by column position.
fn line_bands(matrix: &Matrix) -> Vec<Band> {
    (0..matrix.columns.len())
        .map(|j| Band {
            label: matrix.columns[j].clone(),
            color: PALETTE[j % PALETTE.len()],
            points: matrix.column_points(j),
        })
        .collect()
}

/// Running totals left to right, emitted top band first so that each band
/// drawn after it paints over the area below its own boundary. The visible
/// slice between two boundaries belongs to the later-drawn column.
fn stacked_bands(matrix: &Matrix) -> Vec<Band> {
    let mut cumulative = matrix.values.clone();
    for row in &mut cumulative {
        for j in 1..row.len() {
            row[j] += row[j - 1];
        }
    }
    (0..matrix.columns.len())
        .rev()
        .map(|j| Band {
            label: matrix.columns[j].clone(),
            color: PALETTE[j % PALETTE.len()],
            points: matrix
                .dates
                .iter()
                .zip(&cumulative)
                .map(|(&date, row)| (date, row[j]))
                .collect(),
        })
        .collect()
}

/// Pick the backend from the output extension and render.
fn save(figure: &Figure, path: &Path) -> Result<()> {
    match path.extension().and_then(OsStr::to_str) {
        Some(ext) if ext.eq_ignore_ascii_case("svg") => {
            render(figure, &SVGBackend::new(path, SIZE).into_drawing_area())
        }
        _ => render(figure, &BitMapBackend::new(path, SIZE).into_drawing_area()),
    }
    .with_context(|| format!("Failed to render {}", path.display()))
}

fn render<DB>(figure: &Figure, root: &DrawingArea<DB, Shift>) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let (x_min, x_max) = figure.x_range();
    let (y_min, y_max) = figure.y_range();
    let mut chart = ChartBuilder::on(root)
        .caption(figure.title.as_str(), ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .y_desc(figure.y_label.as_str())
        .x_label_formatter(&|date: &NaiveDate| date.format("%-d %b").to_string())
        .draw()?;

    for band in &figure.bands {
        let color = band.color;
        match figure.style {
            ChartStyle::Areas => {
                let series = chart.draw_series(AreaSeries::new(
                    band.points.iter().copied(),
                    0.0,
                    color.filled(),
                ))?;
                if figure.legend {
                    series.label(band.label.as_str()).legend(move |(x, y)| {
                        Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled())
                    });
                }
            }
            ChartStyle::Lines => {
                let series = chart.draw_series(LineSeries::new(
                    band.points.iter().copied(),
                    color.stroke_width(2),
                ))?;
                if figure.legend {
                    series.label(band.label.as_str()).legend(move |(x, y)| {
                        PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2))
                    });
                }
            }
        }
    }

    if let Some(quota) = &figure.quota {
        chart.draw_series(LineSeries::new(
            quota.iter().copied(),
            BLUE.stroke_width(2),
        ))?;
    }

    if figure.legend {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::MiddleRight)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}
