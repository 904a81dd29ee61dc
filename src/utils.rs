
// Perform a 1-D least squared linear fit of resistance against temperature

use serde::Serialize;

use crate::sweep::Sample;

#[derive(Default)]
pub struct LinearFitProblem {
    pub points: Vec<(f64, f64)>
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFitProblem {

    // (temperature, resistance) of every sample
    pub fn from_samples(samples:&[Sample]) -> Self {
        Self{ points: samples.iter().map(|s| (s.temperature, s.resistance)).collect() }
    }

    pub fn solve(&self) -> Result<LinearFit, &'static str> {
        if self.points.len() < 2 {
            return Err("Singular least squares problem");
        }

        // Work on deviations from the mean so closely spaced temperatures keep their precision
        let n = self.points.len() as f64;
        let x_mean: f64 = self.points.iter().map(|(x, _)| *x).sum::<f64>() / n;
        let y_mean: f64 = self.points.iter().map(|(_, y)| *y).sum::<f64>() / n;
        let sxx: f64 = self.points.iter().map(|(x, _)| (*x - x_mean).powi(2)).sum();
        let sxy: f64 = self.points.iter().map(|(x, y)| (*x - x_mean) * (*y - y_mean)).sum();

        // Anything below the rounding noise of the mean means all x are equal
        let noise: f64 = n * (4.0 * f64::EPSILON * x_mean.abs().max(1.0)).powi(2);
        if !sxx.is_finite() || sxx <= noise {
            Err("Singular least squares problem")
        } else {
            let slope = sxy / sxx;
            Ok(LinearFit {
                slope,
                intercept: y_mean - slope*x_mean
            })
        }
    }

}

impl LinearFit {

    pub fn evaluate(&self, x:f64) -> f64 { self.slope*x + self.intercept }

    // Temperature coefficient of resistance relative to the fitted value at `reference` kelvin
    pub fn relative_slope(&self, reference:f64) -> Option<f64> {
        let r = self.evaluate(reference);
        if r == 0.0 { None } else { Some(self.slope / r) }
    }

}
