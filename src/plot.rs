use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::ExportError;
use crate::sweep::Sample;

const PADDING: f64 = 0.1;
const MIN_SPAN: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotPoint {
    pub temperature: f64,
    pub resistance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ResistancePlot {
    points: Vec<PlotPoint>,
}

fn padded(lo: f64, hi: f64) -> (f64, f64) {
    let margin = (hi - lo).max(MIN_SPAN) * PADDING;
    (lo - margin, hi + margin)
}

impl ResistancePlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: &Sample) {
        self.points.push(PlotPoint {
            temperature: sample.temperature,
            resistance: sample.resistance,
        });
    }

    pub fn points(&self) -> &[PlotPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    // 10 % margin around the points
    pub fn bounds(&self) -> Option<Bounds> {
        let first = self.points.first()?;
        let init = (first.temperature, first.temperature, first.resistance, first.resistance);
        let (t_lo, t_hi, r_lo, r_hi) = self.points.iter().fold(init, |(t_lo, t_hi, r_lo, r_hi), p| {
            (
                t_lo.min(p.temperature),
                t_hi.max(p.temperature),
                r_lo.min(p.resistance),
                r_hi.max(p.resistance),
            )
        });

        let (x_min, x_max) = padded(t_lo, t_hi);
        let (y_min, y_max) = padded(r_lo, r_hi);
        Some(Bounds { x_min, x_max, y_min, y_max })
    }

    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

pub fn status_line(sample: &Sample) -> String {
    format!(
        "[DATA] {:.3} V, {:.3} K, {:.3} Ohm",
        sample.voltage, sample.temperature, sample.resistance
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_padded() {
        let mut plot = ResistancePlot::new();
        assert!(plot.bounds().is_none());

        plot.push(&Sample::new(300.0, 0.110, 1.0e-3));
        plot.push(&Sample::new(310.0, 0.120, 1.0e-3));

        let b = plot.bounds().unwrap();
        assert!((b.x_min - 299.0).abs() < 1e-9);
        assert!((b.x_max - 311.0).abs() < 1e-9);
        assert!((b.y_min - 109.0).abs() < 1e-9);
        assert!((b.y_max - 121.0).abs() < 1e-9);
    }

    #[test]
    fn single_point_has_a_window() {
        let mut plot = ResistancePlot::new();
        plot.push(&Sample::new(77.0, 1.0, 1.0));
        let b = plot.bounds().unwrap();
        assert!(b.x_min < 77.0 && 77.0 < b.x_max);
        assert!(b.y_min < 1.0 && 1.0 < b.y_max);
    }

    #[test]
    fn status_text() {
        let sample = Sample::new(300.0, 0.125, 1.0e-3);
        assert_eq!(status_line(&sample), "[DATA] 0.125 V, 300.000 K, 125.000 Ohm");
    }

    #[test]
    fn export_writes_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.json");
        let mut plot = ResistancePlot::new();
        plot.push(&Sample::new(300.0, 2.0, 1.0));

        plot.export_json(&path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["points"][0]["temperature"], 300.0);
        assert_eq!(value["points"][0]["resistance"], 2.0);
    }
}
