
use log::trace;

use crate::bus::Instrument;
use crate::error::BusError;
use super::{parse_number, Identity, Voltmeter};

// Prist V7-78/1 digital multimeter, used as a DC voltmeter

pub const READ_CMD:&str = "read?";

pub struct V778<I: Instrument> {
	inst: I,
	scale: f64,
}

impl<I: Instrument> V778<I> {

	pub fn new(inst:I) -> Self { Self{ inst, scale: 1.0 } }

	// Readings are multiplied by this factor, e.g. 1000 to report millivolts
	pub fn with_scale(mut self, scale:f64) -> Self {
		self.scale = scale;
		self
	}

	pub fn identify(&mut self) -> Result<Identity, BusError> {
		Identity::query(&mut self.inst)
	}

	pub fn into_inner(self) -> I { self.inst }

}

impl<I: Instrument> Voltmeter for V778<I> {

	fn voltage(&mut self) -> Result<f64, BusError> {
		let res = self.inst.query(READ_CMD)?;
		let volts = parse_number(READ_CMD, &res)? * self.scale;
		trace!("{}: {} V", self.inst.resource(), volts);
		Ok(volts)
	}

}
