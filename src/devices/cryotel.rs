
use std::thread;
use std::time::Duration;

use log::debug;

use crate::bus::Instrument;
use crate::error::BusError;
use super::{parse_number, Identity, TemperatureController};

// Cryotel Model 311 temperature controller. The sample stage is driven by PID loop 4.

pub const TARGET_CMD:&str      = "pid4:temp:targ";
pub const TEMPERATURE_CMD:&str = "meas:temp?";

pub struct Cryotel311<I: Instrument> {
	inst: I,
	tx_throttle_duration: Duration,
}

impl<I: Instrument> Cryotel311<I> {

	pub fn new(inst:I) -> Self { Self{ inst, tx_throttle_duration: Duration::ZERO } }

	// The controller drops commands that arrive back to back on slow serial links
	pub fn with_throttle(mut self, throttle:Duration) -> Self {
		self.tx_throttle_duration = throttle;
		self
	}

	pub fn identify(&mut self) -> Result<Identity, BusError> {
		Identity::query(&mut self.inst)
	}

	pub fn into_inner(self) -> I { self.inst }

	fn throttle(&self) {
		if !self.tx_throttle_duration.is_zero() { thread::sleep(self.tx_throttle_duration); }
	}

}

impl<I: Instrument> TemperatureController for Cryotel311<I> {

	fn set_target(&mut self, kelvin:f64) -> Result<(), BusError> {
		self.throttle();
		let cmd = format!("{} {:3.3}", TARGET_CMD, kelvin);
		debug!("{}: {}", self.inst.resource(), cmd);
		self.inst.write(&cmd)
	}

	fn temperature(&mut self) -> Result<f64, BusError> {
		self.throttle();
		let res = self.inst.query(TEMPERATURE_CMD)?;
		parse_number(TEMPERATURE_CMD, &res)
	}

}
