use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Local};
use log::{debug, error, info};
use serde::Serialize;

use crate::devices::{TemperatureController, Voltmeter};
use crate::error::SweepError;

pub mod config;
pub mod settle;

pub use config::SweepConfig;
pub use settle::{wait_until_settled, Settled};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    // Settled reading, kelvin
    pub temperature: f64,
    pub voltage: f64,
    pub resistance: f64,
}

impl Sample {
    // `current` must be non-zero
    pub fn new(temperature: f64, voltage: f64, current: f64) -> Self {
        Self::at(Local::now(), temperature, voltage, current)
    }

    pub fn at(timestamp: DateTime<Local>, temperature: f64, voltage: f64, current: f64) -> Self {
        Self {
            timestamp,
            temperature,
            voltage,
            resistance: voltage / current,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepRun {
    pub targets: Vec<f64>,
    pub samples: Vec<Sample>,
    pub running: bool,
}

impl SweepRun {
    fn new(targets: Vec<f64>) -> Self {
        Self {
            samples: Vec::with_capacity(targets.len()),
            targets,
            running: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() == self.targets.len()
    }
}

#[derive(Debug)]
pub enum SweepStatus {
    Completed,
    Cancelled,
    // Samples taken before the failure are kept
    Failed(SweepError),
}

impl SweepStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, SweepStatus::Failed(_))
    }
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub run: SweepRun,
    pub status: SweepStatus,
}

pub trait SampleSink {
    fn on_sample(&mut self, sample: &Sample);
}

impl<F: FnMut(&Sample)> SampleSink for F {
    fn on_sample(&mut self, sample: &Sample) {
        self(sample)
    }
}

pub struct SweepController {
    config: SweepConfig,
    running: Arc<AtomicBool>,
}

impl SweepController {
    pub fn new(config: SweepConfig) -> Self {
        Self::with_running_flag(config, Arc::new(AtomicBool::new(true)))
    }

    pub fn with_running_flag(config: SweepConfig, running: Arc<AtomicBool>) -> Self {
        Self { config, running }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // Only an invalid configuration is an Err. Later failures land in the outcome status.
    pub fn run<T, V, S>(
        &self,
        thermo: &mut T,
        voltmeter: &mut V,
        sink: &mut S,
    ) -> Result<SweepOutcome, SweepError>
    where
        T: TemperatureController + ?Sized,
        V: Voltmeter + ?Sized,
        S: SampleSink + ?Sized,
    {
        let targets = self.config.targets()?;
        info!(
            "Sweeping {} target(s) from {} K to {} K in {} K steps at {} A",
            targets.len(),
            self.config.min_temp,
            self.config.max_temp,
            self.config.step,
            self.config.current
        );

        let mut run = SweepRun::new(targets);
        let status = self.sweep(&mut run, thermo, voltmeter, sink);
        run.running = false;

        match &status {
            SweepStatus::Completed => info!("Sweep completed with {} sample(s)", run.samples.len()),
            SweepStatus::Cancelled => info!("Sweep cancelled after {} sample(s)", run.samples.len()),
            SweepStatus::Failed(e) => error!("Sweep failed after {} sample(s): {}", run.samples.len(), e),
        }
        Ok(SweepOutcome { run, status })
    }

    fn sweep<T, V, S>(&self, run: &mut SweepRun, thermo: &mut T, voltmeter: &mut V, sink: &mut S) -> SweepStatus
    where
        T: TemperatureController + ?Sized,
        V: Voltmeter + ?Sized,
        S: SampleSink + ?Sized,
    {
        let count = run.targets.len();
        for idx in 0..count {
            if !self.is_running() {
                return SweepStatus::Cancelled;
            }

            let target = run.targets[idx];
            let sample = match self.visit(target, thermo, voltmeter) {
                Ok(Some(sample)) => sample,
                Ok(None) => return SweepStatus::Cancelled,
                Err(e) => return SweepStatus::Failed(e),
            };

            run.samples.push(sample.clone());
            sink.on_sample(&sample);

            if idx + 1 < count {
                thread::sleep(self.config.post_sample_pause);
            }
        }
        SweepStatus::Completed
    }

    // Sample one target, or None when cancelled while settling
    fn visit<T, V>(&self, target: f64, thermo: &mut T, voltmeter: &mut V) -> Result<Option<Sample>, SweepError>
    where
        T: TemperatureController + ?Sized,
        V: Voltmeter + ?Sized,
    {
        debug!("Setting target {} K", target);
        thermo.set_target(target)?;

        let settled = wait_until_settled(
            || thermo.temperature(),
            target,
            self.config.tolerance,
            self.config.poll_interval,
            self.config.max_settle_polls,
            &self.running,
        )?;

        let temperature = match settled {
            Settled::Reached { reading, polls } => {
                debug!("Settled at {} K after {} poll(s)", reading, polls);
                reading
            }
            Settled::Cancelled => return Ok(None),
        };

        let voltage = voltmeter.voltage()?;
        Ok(Some(Sample::new(temperature, voltage, self.config.current)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BusError, ConfigError};
    use std::time::Duration;

    // Reports exactly the last commanded target
    #[derive(Default)]
    struct ExactThermo {
        targets: Vec<f64>,
        reads: usize,
    }

    impl TemperatureController for ExactThermo {
        fn set_target(&mut self, kelvin: f64) -> Result<(), BusError> {
            self.targets.push(kelvin);
            Ok(())
        }
        fn temperature(&mut self) -> Result<f64, BusError> {
            self.reads += 1;
            self.targets
                .last()
                .copied()
                .ok_or_else(|| BusError::Protocol("no target".to_owned()))
        }
    }

    // Closes half the gap to the target at every reading
    struct LaggingThermo {
        current: f64,
        target: f64,
    }

    impl TemperatureController for LaggingThermo {
        fn set_target(&mut self, kelvin: f64) -> Result<(), BusError> {
            self.target = kelvin;
            Ok(())
        }
        fn temperature(&mut self) -> Result<f64, BusError> {
            self.current += (self.target - self.current) / 2.0;
            Ok(self.current)
        }
    }

    struct FixedVoltmeter {
        volts: f64,
        reads: usize,
        fail_on: Option<usize>,
    }

    impl FixedVoltmeter {
        fn new(volts: f64) -> Self {
            Self { volts, reads: 0, fail_on: None }
        }
    }

    impl Voltmeter for FixedVoltmeter {
        fn voltage(&mut self) -> Result<f64, BusError> {
            self.reads += 1;
            if self.fail_on == Some(self.reads) {
                return Err(BusError::Protocol("voltmeter went away".to_owned()));
            }
            Ok(self.volts)
        }
    }

    fn quick(config: SweepConfig) -> SweepConfig {
        config
            .with_poll_interval(Duration::ZERO)
            .with_post_sample_pause(Duration::ZERO)
    }

    #[test]
    fn two_step_scenario() {
        let controller = SweepController::new(quick(SweepConfig::new(1.0, 300.0, 310.0, 5.0)));
        let mut thermo = ExactThermo::default();
        let mut dvm = FixedVoltmeter::new(1.0);
        let mut notified = vec![];

        let outcome = controller
            .run(&mut thermo, &mut dvm, &mut |s: &Sample| notified.push(s.temperature))
            .unwrap();

        assert!(matches!(outcome.status, SweepStatus::Completed));
        let temps: Vec<f64> = outcome.run.samples.iter().map(|s| s.temperature).collect();
        let resistances: Vec<f64> = outcome.run.samples.iter().map(|s| s.resistance).collect();
        assert_eq!(temps, vec![300.0, 305.0]);
        assert_eq!(resistances, vec![1.0, 1.0]);
        assert_eq!(notified, temps);
        assert!(outcome.run.is_complete());
        assert!(!outcome.run.running);
    }

    #[test]
    fn oversized_step_touches_no_device() {
        let controller = SweepController::new(quick(SweepConfig::new(1.0, 300.0, 302.0, 5.0)));
        let mut thermo = ExactThermo::default();
        let mut dvm = FixedVoltmeter::new(1.0);
        let mut notified = 0;

        let result = controller.run(&mut thermo, &mut dvm, &mut |_: &Sample| notified += 1);

        assert!(matches!(
            result,
            Err(SweepError::Configuration(ConfigError::StepExceedsRange { .. }))
        ));
        assert!(thermo.targets.is_empty());
        assert_eq!(thermo.reads, 0);
        assert_eq!(dvm.reads, 0);
        assert_eq!(notified, 0);
    }

    #[test]
    fn each_target_is_commanded_once() {
        let controller = SweepController::new(quick(SweepConfig::new(2.0, 10.0, 20.0, 2.5)));
        let mut thermo = LaggingThermo { current: 0.0, target: 0.0 };
        let mut commanded = ExactThermo::default();
        let mut dvm = FixedVoltmeter::new(4.0);

        let outcome = controller.run(&mut thermo, &mut dvm, &mut |_: &Sample| ()).unwrap();
        controller.run(&mut commanded, &mut FixedVoltmeter::new(4.0), &mut |_: &Sample| ()).unwrap();

        assert_eq!(commanded.targets, vec![10.0, 12.5, 15.0, 17.5]);
        assert_eq!(commanded.reads, 4);
        assert_eq!(dvm.reads, 4);
        for (sample, target) in outcome.run.samples.iter().zip(&outcome.run.targets) {
            assert!((sample.temperature - target).abs() < 0.5);
            assert_eq!(sample.resistance, 2.0);
        }
    }

    #[test]
    fn lagging_controller_is_polled_until_settled() {
        let controller =
            SweepController::new(quick(SweepConfig::new(1.0, 300.0, 301.0, 1.0).with_tolerance(0.01)));
        let mut thermo = LaggingThermo { current: 280.0, target: 280.0 };
        let mut dvm = FixedVoltmeter::new(0.25);

        let outcome = controller.run(&mut thermo, &mut dvm, &mut |_: &Sample| ()).unwrap();

        assert_eq!(outcome.run.samples.len(), 1);
        assert!((outcome.run.samples[0].temperature - 300.0).abs() < 0.01);
        assert_eq!(dvm.reads, 1);
    }

    #[test]
    fn stop_takes_effect_at_next_target() {
        let controller = SweepController::new(quick(SweepConfig::new(1.0, 300.0, 310.0, 1.0)));
        let flag = controller.running_flag();
        let mut thermo = ExactThermo::default();
        let mut dvm = FixedVoltmeter::new(1.0);

        let outcome = controller
            .run(&mut thermo, &mut dvm, &mut |s: &Sample| {
                if s.temperature >= 302.0 {
                    flag.store(false, Ordering::SeqCst);
                }
            })
            .unwrap();

        assert!(matches!(outcome.status, SweepStatus::Cancelled));
        assert_eq!(outcome.run.samples.len(), 3);
        assert_eq!(thermo.targets.len(), 3);
        assert!(!outcome.run.is_complete());
    }

    #[test]
    fn stopped_before_start_produces_nothing() {
        let controller = SweepController::new(quick(SweepConfig::new(1.0, 300.0, 310.0, 1.0)));
        controller.stop();
        let mut thermo = ExactThermo::default();
        let mut dvm = FixedVoltmeter::new(1.0);

        let outcome = controller.run(&mut thermo, &mut dvm, &mut |_: &Sample| ()).unwrap();
        assert!(matches!(outcome.status, SweepStatus::Cancelled));
        assert!(outcome.run.samples.is_empty());
        assert!(thermo.targets.is_empty());
    }

    #[test]
    fn communication_error_keeps_earlier_samples() {
        let controller = SweepController::new(quick(SweepConfig::new(0.5, 300.0, 310.0, 2.0)));
        let mut thermo = ExactThermo::default();
        let mut dvm = FixedVoltmeter { fail_on: Some(3), ..FixedVoltmeter::new(1.0) };

        let outcome = controller.run(&mut thermo, &mut dvm, &mut |_: &Sample| ()).unwrap();

        assert!(outcome.status.is_failed());
        assert!(matches!(outcome.status, SweepStatus::Failed(SweepError::Communication(_))));
        let temps: Vec<f64> = outcome.run.samples.iter().map(|s| s.temperature).collect();
        assert_eq!(temps, vec![300.0, 302.0]);
        assert_eq!(outcome.run.samples[0].resistance, 2.0);
    }

    #[test]
    fn settle_timeout_ends_the_sweep() {
        let config = quick(SweepConfig::new(1.0, 300.0, 310.0, 5.0)).with_max_settle_polls(Some(4));
        let controller = SweepController::new(config);
        let mut thermo = LaggingThermo { current: 0.0, target: 0.0 };
        let mut dvm = FixedVoltmeter::new(1.0);

        let outcome = controller.run(&mut thermo, &mut dvm, &mut |_: &Sample| ()).unwrap();

        assert!(matches!(
            outcome.status,
            SweepStatus::Failed(SweepError::SettleTimeout { polls: 4, .. })
        ));
        assert!(outcome.run.samples.is_empty());
        assert_eq!(dvm.reads, 0);
    }

    #[test]
    fn resistance_is_voltage_over_current() {
        let sample = Sample::new(77.0, 0.015, 1.0e-3);
        assert!((sample.resistance - 15.0).abs() < 1e-12);
    }
}
