use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

pub const DEFAULT_TOLERANCE: f64 = 0.5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_POST_SAMPLE_PAUSE: Duration = Duration::from_secs(2);
pub const MAX_TARGETS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepConfig {
    // Amperes
    pub current: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub step: f64,
    // Reached once |reading - target| < tolerance
    pub tolerance: f64,
    pub poll_interval: Duration,
    pub post_sample_pause: Duration,
    // None waits forever
    pub max_settle_polls: Option<u32>,
}

impl SweepConfig {
    pub fn new(current: f64, min_temp: f64, max_temp: f64, step: f64) -> Self {
        Self {
            current,
            min_temp,
            max_temp,
            step,
            tolerance: DEFAULT_TOLERANCE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            post_sample_pause: DEFAULT_POST_SAMPLE_PAUSE,
            max_settle_polls: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_post_sample_pause(mut self, pause: Duration) -> Self {
        self.post_sample_pause = pause;
        self
    }

    pub fn with_max_settle_polls(mut self, polls: Option<u32>) -> Self {
        self.max_settle_polls = polls;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("current", self.current),
            ("min temperature", self.min_temp),
            ("max temperature", self.max_temp),
            ("step", self.step),
            ("tolerance", self.tolerance),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite(name));
            }
        }

        if self.current == 0.0 {
            return Err(ConfigError::ZeroCurrent);
        }
        if self.step <= 0.0 {
            return Err(ConfigError::NonPositiveStep(self.step));
        }
        if self.tolerance <= 0.0 {
            return Err(ConfigError::NonPositiveTolerance(self.tolerance));
        }
        if self.max_settle_polls == Some(0) {
            return Err(ConfigError::ZeroSettlePolls);
        }
        if self.max_temp <= self.min_temp {
            return Err(ConfigError::EmptyRange {
                min: self.min_temp,
                max: self.max_temp,
            });
        }

        let span = self.max_temp - self.min_temp;
        if self.step > span {
            return Err(ConfigError::StepExceedsRange {
                step: self.step,
                span,
            });
        }

        let count = (span / self.step).ceil();
        if count > MAX_TARGETS as f64 {
            return Err(ConfigError::TooManyTargets {
                count,
                limit: MAX_TARGETS,
            });
        }

        let mut previous = self.min_temp;
        for t in self.sequence().skip(1) {
            if t <= previous {
                return Err(ConfigError::StepTooSmall {
                    step: self.step,
                    at: previous,
                });
            }
            previous = t;
        }
        Ok(())
    }

    // min, min + step, ... strictly below max
    pub fn targets(&self) -> Result<Vec<f64>, ConfigError> {
        self.validate()?;
        Ok(self.sequence().collect())
    }

    // Multiply instead of accumulating so long sweeps do not drift
    fn sequence(&self) -> impl Iterator<Item = f64> + '_ {
        (0u64..)
            .map(move |i| self.min_temp + i as f64 * self.step)
            .take_while(move |t| *t < self.max_temp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn half_open_range() {
        let config = SweepConfig::new(1.0, 300.0, 310.0, 5.0);
        assert_eq!(config.targets().unwrap(), vec![300.0, 305.0]);

        let config = SweepConfig::new(1.0, 300.0, 310.5, 5.0);
        assert_eq!(config.targets().unwrap(), vec![300.0, 305.0, 310.0]);
    }

    #[test]
    fn step_equal_to_span_gives_one_target() {
        let config = SweepConfig::new(1.0, 77.0, 80.0, 3.0);
        assert_eq!(config.targets().unwrap(), vec![77.0]);
    }

    #[test]
    fn step_larger_than_range_is_rejected() {
        let config = SweepConfig::new(1.0, 300.0, 302.0, 5.0);
        assert_eq!(
            config.targets(),
            Err(ConfigError::StepExceedsRange { step: 5.0, span: 2.0 })
        );
    }

    #[test]
    fn degenerate_parameters_are_rejected() {
        assert_eq!(
            SweepConfig::new(1.0, 300.0, 300.0, 1.0).validate(),
            Err(ConfigError::EmptyRange { min: 300.0, max: 300.0 })
        );
        assert_eq!(
            SweepConfig::new(1.0, 300.0, 310.0, 0.0).validate(),
            Err(ConfigError::NonPositiveStep(0.0))
        );
        assert_eq!(
            SweepConfig::new(0.0, 300.0, 310.0, 1.0).validate(),
            Err(ConfigError::ZeroCurrent)
        );
        assert_eq!(
            SweepConfig::new(1.0, f64::NAN, 310.0, 1.0).validate(),
            Err(ConfigError::NotFinite("min temperature"))
        );
        assert_eq!(
            SweepConfig::new(1.0, 300.0, 310.0, 1.0).with_tolerance(0.0).validate(),
            Err(ConfigError::NonPositiveTolerance(0.0))
        );
    }

    #[test]
    fn step_below_float_resolution_is_rejected() {
        let config = SweepConfig::new(1.0, 300.0, 300.0 + 2e-13, 1e-14);
        assert!(matches!(
            config.targets(),
            Err(ConfigError::StepTooSmall { .. })
        ));
    }

    #[test]
    fn target_count_is_capped() {
        let config = SweepConfig::new(1.0, 0.0, 1000.0, 1e-5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyTargets { limit: MAX_TARGETS, .. })
        ));

        let config = SweepConfig::new(1.0, 0.0, 1250.0, 0.125);
        assert_eq!(config.targets().unwrap().len(), MAX_TARGETS);
    }

    #[test]
    fn zero_settle_polls_is_rejected() {
        let config = SweepConfig::new(1.0, 300.0, 310.0, 1.0).with_max_settle_polls(Some(0));
        assert_eq!(config.validate(), Err(ConfigError::ZeroSettlePolls));
        assert!(config.with_max_settle_polls(Some(1)).validate().is_ok());
    }

    proptest! {
        #[test]
        fn targets_are_increasing_and_inside_the_range(
            min in -300.0f64..1000.0,
            span in 0.01f64..500.0,
            fraction in 0.001f64..=1.0,
        ) {
            let max = min + span;
            let step = (max - min) * fraction;
            prop_assume!(step > 0.0 && step <= max - min);

            let targets = SweepConfig::new(1.0, min, max, step).targets().unwrap();
            prop_assert!(!targets.is_empty());
            prop_assert_eq!(targets[0], min);
            prop_assert!(targets.iter().all(|t| *t < max));
            prop_assert!(targets.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn oversized_steps_never_yield_targets(
            min in -300.0f64..1000.0,
            span in 0.01f64..500.0,
            excess in 0.001f64..100.0,
        ) {
            let config = SweepConfig::new(1.0, min, min + span, span + excess);
            let rejected = matches!(config.targets(), Err(ConfigError::StepExceedsRange { .. }));
            prop_assert!(rejected);
        }
    }
}
