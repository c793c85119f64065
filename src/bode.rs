//! Bode diagrams: gain and phase over a logarithmic frequency axis.

use std::path::Path;

use anyhow::{anyhow, Result};
use log::info;
use ndarray::Array1;
use plotters::prelude::*;

use crate::analysis::AcAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    None,
    Dot,
    Circle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    None,
    Solid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotColor {
    Blue,
    Red,
    Magenta,
    Green,
    Black,
}

impl PlotColor {
    fn rgb(self) -> RGBColor {
        match self {
            PlotColor::Blue => BLUE,
            PlotColor::Red => RED,
            PlotColor::Magenta => MAGENTA,
            PlotColor::Green => GREEN,
            PlotColor::Black => BLACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesStyle {
    pub marker: Marker,
    pub color: PlotColor,
    pub line: LineStyle,
}

impl SeriesStyle {
    pub fn new(marker: Marker, color: PlotColor, line: LineStyle) -> Self {
        SeriesStyle { marker, color, line }
    }
}

impl Default for SeriesStyle {
    fn default() -> Self {
        SeriesStyle::new(Marker::Dot, PlotColor::Blue, LineStyle::Solid)
    }
}

/// One transfer function: gain in dB and phase in radians per frequency.
#[derive(Debug, Clone)]
pub struct BodeSeries {
    pub label: String,
    pub frequency: Array1<f64>,
    pub gain_db: Array1<f64>,
    pub phase: Array1<f64>,
    pub style: SeriesStyle,
}

impl BodeSeries {
    pub fn new(
        label: impl Into<String>,
        frequency: Array1<f64>,
        gain_db: Array1<f64>,
        phase: Array1<f64>,
        style: SeriesStyle,
    ) -> Result<Self> {
        let label = label.into();
        if gain_db.len() != frequency.len() || phase.len() != frequency.len() {
            return Err(anyhow!(
                "Series '{}' has {} frequencies, {} gains and {} phases",
                label,
                frequency.len(),
                gain_db.len(),
                phase.len()
            ));
        }
        Ok(BodeSeries {
            label,
            frequency,
            gain_db,
            phase,
            style,
        })
    }

    /// Gain and phase of `node` in an AC analysis.
    pub fn from_analysis(analysis: &AcAnalysis, node: &str, style: SeriesStyle) -> Result<Self> {
        BodeSeries::new(
            node,
            analysis.frequency.clone(),
            analysis.gain_db(node)?,
            analysis.phase(node)?,
            style,
        )
    }

    fn gain_points(&self) -> Vec<(f64, f64)> {
        finite_points(&self.frequency, &self.gain_db)
    }

    fn phase_points(&self) -> Vec<(f64, f64)> {
        finite_points(&self.frequency, &self.phase)
    }
}

/// Pairs usable on a log axis: positive frequency, finite value.
fn finite_points(x: &Array1<f64>, y: &Array1<f64>) -> Vec<(f64, f64)> {
    x.iter()
        .zip(y.iter())
        .filter(|(&x, &y)| x > 0.0 && x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect()
}

fn value_range(points: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    points.fold(None, |range, v| match range {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Widen a range by 5% each side, or by one unit if it is a single value.
fn padded((lo, hi): (f64, f64)) -> (f64, f64) {
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad, hi + pad)
}

/// Two stacked axes: gain above phase, frequency on a log scale.
#[derive(Debug, Clone)]
pub struct BodeDiagram {
    pub title: String,
    pub series: Vec<BodeSeries>,
    /// Frequencies marked by a vertical red line on both axes.
    pub reference_lines: Vec<f64>,
    pub size: (u32, u32),
}

impl BodeDiagram {
    pub fn new(title: impl Into<String>) -> Self {
        BodeDiagram {
            title: title.into(),
            series: Vec::new(),
            reference_lines: Vec::new(),
            size: (1600, 800),
        }
    }

    pub fn add_series(&mut self, series: BodeSeries) -> &mut Self {
        self.series.push(series);
        self
    }

    pub fn add_reference_line(&mut self, frequency: f64) -> &mut Self {
        self.reference_lines.push(frequency);
        self
    }

    fn frequency_range(&self) -> Option<(f64, f64)> {
        let frequencies = self
            .series
            .iter()
            .flat_map(|s| s.gain_points().into_iter().chain(s.phase_points()))
            .map(|(f, _)| f)
            .chain(self.reference_lines.iter().copied().filter(|f| *f > 0.0));
        value_range(frequencies).map(|(lo, hi)| if hi > lo { (lo, hi) } else { (lo / 2.0, hi * 2.0) })
    }

    /// Render the diagram as SVG.
    pub fn save_svg(&self, path: &Path) -> Result<()> {
        let (f_lo, f_hi) = self
            .frequency_range()
            .ok_or_else(|| anyhow!("Bode diagram '{}' has nothing to plot", self.title))?;
        let gain_range = value_range(self.series.iter().flat_map(|s| s.gain_points()).map(|(_, g)| g))
            .map(padded)
            .unwrap_or((-1.0, 1.0));
        let phase_range = value_range(self.series.iter().flat_map(|s| s.phase_points()).map(|(_, p)| p))
            .map(padded)
            .unwrap_or((-1.0, 1.0));

        let root = SVGBackend::new(path, self.size).into_drawing_area();
        root.fill(&WHITE)?;
        let root = root.titled(&self.title, ("sans-serif", 24))?;
        let areas = root.split_evenly((2, 1));

        let axes = [
            (&areas[0], gain_range, "Gain [dB]", true),
            (&areas[1], phase_range, "Phase [rad]", false),
        ];
        for (area, (y_lo, y_hi), y_desc, is_gain) in axes {
            let mut chart = ChartBuilder::on(area)
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d((f_lo..f_hi).log_scale(), y_lo..y_hi)?;
            chart
                .configure_mesh()
                .x_desc("Frequency [Hz]")
                .y_desc(y_desc)
                .draw()?;

            for series in &self.series {
                let points = if is_gain { series.gain_points() } else { series.phase_points() };
                let color = series.style.color.rgb();
                if series.style.line == LineStyle::Solid {
                    chart.draw_series(LineSeries::new(points.iter().copied(), &color))?;
                }
                match series.style.marker {
                    Marker::None => {}
                    Marker::Dot => {
                        chart.draw_series(points.iter().map(|&p| Circle::new(p, 2, color.filled())))?;
                    }
                    Marker::Circle => {
                        chart.draw_series(points.iter().map(|&p| Circle::new(p, 4, &color)))?;
                    }
                }
            }

            for &f0 in &self.reference_lines {
                chart.draw_series(LineSeries::new(vec![(f0, y_lo), (f0, y_hi)], &RED))?;
            }
        }

        root.present()?;
        info!("Bode diagram saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn series(color: PlotColor) -> BodeSeries {
        BodeSeries::new(
            "out",
            array![100.0, 1000.0, 10000.0],
            array![0.0, 12.0, -40.0],
            array![-0.1, -1.57, -3.0],
            SeriesStyle::new(Marker::Dot, color, LineStyle::Solid),
        )
        .unwrap()
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let result = BodeSeries::new(
            "bad",
            array![1.0, 2.0],
            array![0.0],
            array![0.0, 0.0],
            SeriesStyle::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_non_finite_points_are_skipped() {
        let series = BodeSeries::new(
            "ground",
            array![100.0, 1000.0],
            array![f64::NEG_INFINITY, -3.0],
            array![0.0, 0.0],
            SeriesStyle::default(),
        )
        .unwrap();
        assert_eq!(series.gain_points(), vec![(1000.0, -3.0)]);
        assert_eq!(series.phase_points().len(), 2);
    }

    #[test]
    fn test_ranges() {
        let mut diagram = BodeDiagram::new("Ranges");
        diagram.add_series(series(PlotColor::Blue)).add_reference_line(1591.5);
        assert_eq!(diagram.frequency_range(), Some((100.0, 10000.0)));
        assert_eq!(padded((0.0, 10.0)), (-0.5, 10.5));
        assert_eq!(padded((2.0, 2.0)), (1.0, 3.0));
    }

    #[test]
    fn test_empty_diagram_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BodeDiagram::new("Empty").save_svg(&dir.path().join("empty.svg")).is_err());
    }

    #[test]
    fn test_save_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bode.svg");
        let mut diagram = BodeDiagram::new("Bode Diagrams of RLC Filters");
        diagram
            .add_series(series(PlotColor::Blue))
            .add_series(series(PlotColor::Magenta))
            .add_reference_line(1591.5);
        diagram.save_svg(&path).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Bode Diagrams of RLC Filters"));
    }
}
