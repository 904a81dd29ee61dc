use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};

use crate::devices::{TemperatureController, Voltmeter};
use crate::error::SweepError;
use crate::sweep::{Sample, SampleSink, SweepConfig, SweepController, SweepOutcome};

pub const WORKER_THREAD_NAME: &str = "thermoprj-sweep";

// Finished is always the last event of a sweep
#[derive(Debug)]
pub enum SweepEvent {
    Sample(Sample),
    Finished(Result<SweepOutcome, SweepError>),
}

// Forwards samples over the event channel
struct EventSink(Sender<SweepEvent>);

impl SampleSink for EventSink {
    fn on_sample(&mut self, sample: &Sample) {
        if self.0.send(SweepEvent::Sample(sample.clone())).is_err() {
            debug!("Event receiver dropped, sample not delivered");
        }
    }
}

pub struct SweepWorker;

impl SweepWorker {
    // Configuration errors are returned before the thread is spawned
    pub fn start<T, V>(config: SweepConfig, thermo: T, voltmeter: V) -> Result<SweepHandle, SweepError>
    where
        T: TemperatureController + Send + 'static,
        V: Voltmeter + Send + 'static,
    {
        config.validate()?;

        let running = Arc::new(AtomicBool::new(true));
        let controller = SweepController::with_running_flag(config, Arc::clone(&running));
        let (sender, events) = unbounded::<SweepEvent>();

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut thermo = thermo;
                let mut voltmeter = voltmeter;
                let mut sink = EventSink(sender.clone());

                let result = controller.run(&mut thermo, &mut voltmeter, &mut sink);
                controller.stop();

                if sender.send(SweepEvent::Finished(result)).is_err() {
                    debug!("Event receiver dropped before the sweep finished");
                }
            })
            .map_err(|e| SweepError::Worker(format!("failed to spawn sweep thread: {}", e)))?;

        Ok(SweepHandle {
            events,
            running,
            handle: Some(handle),
        })
    }
}

pub struct SweepHandle {
    events: Receiver<SweepEvent>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn events(&self) -> &Receiver<SweepEvent> {
        &self.events
    }

    // Takes effect at the next target or between two settle polls
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn join(mut self) -> Result<(), SweepError> {
        join_worker(self.handle.take())
    }
}

fn join_worker(handle: Option<JoinHandle<()>>) -> Result<(), SweepError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| SweepError::Worker("sweep thread panicked".to_string())),
        None => Ok(()),
    }
}

// At most one sweep at a time. The slot is released once the finished event is drained.
#[derive(Default)]
pub struct Session {
    active: Option<SweepHandle>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn start<T, V>(&mut self, config: SweepConfig, thermo: T, voltmeter: V) -> Result<(), SweepError>
    where
        T: TemperatureController + Send + 'static,
        V: Voltmeter + Send + 'static,
    {
        if self.active.is_some() {
            return Err(SweepError::AlreadyRunning);
        }
        self.active = Some(SweepWorker::start(config, thermo, voltmeter)?);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(active) = &self.active {
            active.stop();
        }
    }

    pub fn running_flag(&self) -> Option<Arc<AtomicBool>> {
        self.active.as_ref().map(SweepHandle::running_flag)
    }

    // None when no sweep is active
    pub fn next_event(&mut self) -> Option<SweepEvent> {
        let received = self.active.as_ref()?.events.recv();
        Some(self.settle_event(received.ok()))
    }

    // Release the slot once the sweep is over. A closed channel without a
    // finished event means the worker died.
    fn settle_event(&mut self, received: Option<SweepEvent>) -> SweepEvent {
        let event = match received {
            Some(event @ SweepEvent::Sample(_)) => return event,
            Some(event) => event,
            None => SweepEvent::Finished(Err(SweepError::Worker(
                "sweep thread exited without reporting".to_string(),
            ))),
        };

        if let Some(mut active) = self.active.take() {
            if let Err(e) = join_worker(active.handle.take()) {
                warn!("{}", e);
            }
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;
    use crate::sweep::SweepStatus;
    use std::time::Duration;

    struct Exact(f64);

    impl TemperatureController for Exact {
        fn set_target(&mut self, kelvin: f64) -> Result<(), BusError> {
            self.0 = kelvin;
            Ok(())
        }
        fn temperature(&mut self) -> Result<f64, BusError> {
            Ok(self.0)
        }
    }

    // Every reading waits for the test to release it
    struct Gated {
        target: f64,
        gate: Receiver<()>,
    }

    impl TemperatureController for Gated {
        fn set_target(&mut self, kelvin: f64) -> Result<(), BusError> {
            self.target = kelvin;
            Ok(())
        }
        fn temperature(&mut self) -> Result<f64, BusError> {
            self.gate
                .recv()
                .map_err(|_| BusError::Protocol("gate closed".to_owned()))?;
            Ok(self.target)
        }
    }

    struct Volts(f64);

    impl Voltmeter for Volts {
        fn voltage(&mut self) -> Result<f64, BusError> {
            Ok(self.0)
        }
    }

    fn quick(min: f64, max: f64, step: f64) -> SweepConfig {
        SweepConfig::new(1.0, min, max, step)
            .with_poll_interval(Duration::ZERO)
            .with_post_sample_pause(Duration::ZERO)
    }

    fn drain(session: &mut Session) -> (Vec<Sample>, Result<SweepOutcome, SweepError>) {
        let mut samples = vec![];
        loop {
            match session.next_event().expect("session has no active sweep") {
                SweepEvent::Sample(s) => samples.push(s),
                SweepEvent::Finished(result) => return (samples, result),
            }
        }
    }

    #[test]
    fn samples_arrive_before_finished() {
        let mut session = Session::new();
        session.start(quick(300.0, 310.0, 5.0), Exact(0.0), Volts(2.0)).unwrap();

        let (samples, result) = drain(&mut session);
        let outcome = result.unwrap();

        assert!(matches!(outcome.status, SweepStatus::Completed));
        assert_eq!(samples, outcome.run.samples);
        assert_eq!(samples.len(), 2);
        assert!(!session.is_active());
        assert!(session.next_event().is_none());
    }

    #[test]
    fn configuration_errors_do_not_spawn() {
        let mut session = Session::new();
        let err = session.start(quick(300.0, 302.0, 5.0), Exact(0.0), Volts(1.0)).unwrap_err();
        assert!(matches!(err, SweepError::Configuration(_)));
        assert!(!session.is_active());
    }

    #[test]
    fn second_start_is_refused_until_drained() {
        let (open, gate) = unbounded();
        let mut session = Session::new();
        session
            .start(quick(300.0, 310.0, 5.0), Gated { target: 0.0, gate }, Volts(1.0))
            .unwrap();

        let again = session.start(quick(300.0, 310.0, 5.0), Exact(0.0), Volts(1.0));
        assert!(matches!(again, Err(SweepError::AlreadyRunning)));
        assert!(session.active.as_ref().unwrap().is_running());

        session.stop();
        open.send(()).unwrap();

        let (samples, result) = drain(&mut session);
        let outcome = result.unwrap();
        assert!(matches!(outcome.status, SweepStatus::Cancelled));
        assert!(samples.len() <= 1);

        session.start(quick(300.0, 310.0, 5.0), Exact(0.0), Volts(1.0)).unwrap();
        let (samples, _) = drain(&mut session);
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn device_failure_is_the_finished_event() {
        let (open, gate) = unbounded::<()>();
        drop(open);

        let handle = SweepWorker::start(quick(300.0, 310.0, 5.0), Gated { target: 0.0, gate }, Volts(1.0)).unwrap();
        let mut finished = None;
        for event in handle.events().iter() {
            if let SweepEvent::Finished(result) = event {
                finished = Some(result);
            }
        }

        let outcome = finished.expect("no finished event").unwrap();
        assert!(matches!(outcome.status, SweepStatus::Failed(SweepError::Communication(_))));
        assert!(outcome.run.samples.is_empty());
        handle.join().unwrap();
    }
}
