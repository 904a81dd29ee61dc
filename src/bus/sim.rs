// A temperature controller and a voltmeter wired to the same simulated sample

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{BoxedInstrument, Instrument, ResourceName, ResourceProvider};
use crate::error::BusError;

pub const THERMO_PORT: &str = "SIM-THERMO";
pub const VOLTMETER_HOST: &str = "sim-voltmeter";

#[derive(Debug, Clone)]
pub struct SimSettings {
    pub thermo_idn: String,
    pub voltmeter_idn: String,
    // Kelvin, before any target is set
    pub start_temperature: f64,
    // Fraction of the remaining gap to the target closed at every reading
    pub approach: f64,
    pub temperature_noise: f64,
    // Resistance at 273.15 K
    pub r0: f64,
    pub alpha: f64,
    pub current: f64,
    pub voltage_noise: f64,
    pub seed: u64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            thermo_idn: String::new(),
            voltmeter_idn: String::new(),
            start_temperature: 295.0,
            approach: 0.35,
            temperature_noise: 0.02,
            r0: 100.0,
            alpha: 0.00385,
            current: 1.0e-3,
            voltage_noise: 1.0e-6,
            seed: 0x7e57,
        }
    }
}

struct SimState {
    temperature: f64,
    target: Option<f64>,
    rng: StdRng,
}

impl SimState {
    fn noise(&mut self, amplitude: f64) -> f64 {
        if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> Result<MutexGuard<'_, SimState>, BusError> {
    state
        .lock()
        .map_err(|_| BusError::Protocol("simulator state poisoned".to_owned()))
}

pub struct SimulatedBus {
    settings: SimSettings,
    state: Shared,
}

impl SimulatedBus {
    pub fn new(settings: SimSettings) -> Self {
        let state = SimState {
            temperature: settings.start_temperature,
            target: None,
            rng: StdRng::seed_from_u64(settings.seed),
        };
        Self {
            settings,
            state: Arc::new(Mutex::new(state)),
        }
    }

    // Without noise
    pub fn temperature(&self) -> Result<f64, BusError> {
        Ok(lock(&self.state)?.temperature)
    }
}

impl ResourceProvider for SimulatedBus {
    fn list_resources(&self) -> Result<Vec<ResourceName>, BusError> {
        Ok(vec![ResourceName::serial(THERMO_PORT), ResourceName::lan(VOLTMETER_HOST)])
    }

    fn open_resource(&self, name: &ResourceName) -> Result<BoxedInstrument, BusError> {
        debug!("Opening simulated resource {}", name);
        match name {
            ResourceName::Serial { port } if port == THERMO_PORT => Ok(Box::new(SimThermostat {
                resource: name.to_string(),
                settings: self.settings.clone(),
                state: Arc::clone(&self.state),
                pending: None,
            })),
            ResourceName::Lan { host, .. } if host == VOLTMETER_HOST => Ok(Box::new(SimVoltmeter {
                resource: name.to_string(),
                settings: self.settings.clone(),
                state: Arc::clone(&self.state),
                pending: None,
            })),
            _ => Err(BusError::BadResource(name.to_string())),
        }
    }
}

fn take_pending(pending: &mut Option<String>, resource: &str) -> Result<String, BusError> {
    pending
        .take()
        .ok_or_else(|| BusError::Protocol(format!("{} has no response pending", resource)))
}

struct SimThermostat {
    resource: String,
    settings: SimSettings,
    state: Shared,
    pending: Option<String>,
}

impl Instrument for SimThermostat {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn write(&mut self, cmd: &str) -> Result<(), BusError> {
        let lower = cmd.trim().to_ascii_lowercase();
        if lower == "*idn?" {
            self.pending = Some(self.settings.thermo_idn.clone());
        } else if let Some(value) = lower.strip_prefix("pid4:temp:targ") {
            let target: f64 = value.trim().parse().map_err(|_| BusError::Malformed {
                command: cmd.to_owned(),
                response: String::new(),
            })?;
            lock(&self.state)?.target = Some(target);
        } else if lower == "meas:temp?" {
            let mut state = lock(&self.state)?;
            if let Some(target) = state.target {
                state.temperature += (target - state.temperature) * self.settings.approach;
            }
            let noise = state.noise(self.settings.temperature_noise);
            self.pending = Some(format!("{:.3}", state.temperature + noise));
        } else {
            return Err(BusError::Protocol(format!("{} does not understand '{}'", self.resource, cmd)));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<String, BusError> {
        take_pending(&mut self.pending, &self.resource)
    }
}

struct SimVoltmeter {
    resource: String,
    settings: SimSettings,
    state: Shared,
    pending: Option<String>,
}

impl Instrument for SimVoltmeter {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn write(&mut self, cmd: &str) -> Result<(), BusError> {
        let lower = cmd.trim().to_ascii_lowercase();
        if lower == "*idn?" {
            self.pending = Some(self.settings.voltmeter_idn.clone());
        } else if lower == "read?" {
            let mut state = lock(&self.state)?;
            let s = &self.settings;
            let resistance = s.r0 * (1.0 + s.alpha * (state.temperature - 273.15));
            let noise = state.noise(s.voltage_noise);
            self.pending = Some(format!("{:.9e}", s.current * resistance + noise));
        } else {
            return Err(BusError::Protocol(format!("{} does not understand '{}'", self.resource, cmd)));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<String, BusError> {
        take_pending(&mut self.pending, &self.resource)
    }
}
