
// Drivers for the instruments of the resistance sweep. Each wraps a bus Instrument and speaks
// its command set; the sweep only sees the TemperatureController and Voltmeter traits.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Serialize, Deserialize};

use crate::bus::Instrument;
use crate::error::BusError;

pub mod cryotel;
pub mod v778;

pub use cryotel::Cryotel311;
pub use v778::V778;

lazy_static! {
	static ref IDN_RE: Regex = Regex::new("^\\s*([^,]+),([^,]+),([^,]+),([^,\\s]+)").unwrap();
}

pub const IDN_CMD:&str = "*IDN?";

pub trait TemperatureController {
	fn set_target(&mut self, kelvin:f64) -> Result<(), BusError>;
	fn temperature(&mut self) -> Result<f64, BusError>;
}

pub trait Voltmeter {
	fn voltage(&mut self) -> Result<f64, BusError>;
}

impl<T: TemperatureController + ?Sized> TemperatureController for Box<T> {
	fn set_target(&mut self, kelvin:f64) -> Result<(), BusError> { (**self).set_target(kelvin) }
	fn temperature(&mut self) -> Result<f64, BusError> { (**self).temperature() }
}

impl<V: Voltmeter + ?Sized> Voltmeter for Box<V> {
	fn voltage(&mut self) -> Result<f64, BusError> { (**self).voltage() }
}

// Parsed answer to *IDN?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

fn cap(caps:&Captures, idx:usize) -> String {
	caps.get(idx).map(|m| m.as_str().trim().to_owned()).unwrap_or_default()
}

impl Identity {

	pub fn parse(idn:&str) -> Result<Self, BusError> {
		let caps = IDN_RE.captures(idn).ok_or_else(|| BusError::Malformed{ command: IDN_CMD.to_owned(), response: idn.to_owned() })?;
		Ok(Identity{ manufacturer: cap(&caps, 1), model: cap(&caps, 2), serial_num: cap(&caps, 3), fw_version: cap(&caps, 4) })
	}

	pub fn query<I: Instrument + ?Sized>(inst:&mut I) -> Result<Self, BusError> {
		let res = inst.query(IDN_CMD)?;
		Self::parse(&res)
	}

}

pub(crate) fn parse_number(command:&str, response:&str) -> Result<f64, BusError> {
	response.trim().parse::<f64>()
		.ok()
		.filter(|x| x.is_finite())
		.ok_or_else(|| BusError::Malformed{ command: command.to_owned(), response: response.to_owned() })
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::VecDeque;

	// Replays canned answers and records every command written
	struct Scripted {
		answers: VecDeque<String>,
		sent: Vec<String>,
	}

	impl Scripted {
		fn new(answers:&[&str]) -> Self {
			Self{ answers: answers.iter().map(|a| a.to_string()).collect(), sent: vec![] }
		}
	}

	impl Instrument for Scripted {
		fn resource(&self) -> &str { "ASRLscripted::INSTR" }
		fn write(&mut self, cmd:&str) -> Result<(), BusError> { self.sent.push(cmd.to_owned()); Ok(()) }
		fn read(&mut self) -> Result<String, BusError> {
			self.answers.pop_front().ok_or_else(|| BusError::Protocol("no answer".to_owned()))
		}
	}

	#[test]
	fn identity_fields_are_split() {
		let idn = Identity::parse("Prist,V7-78/1,TW00011505,03.07-01-04").unwrap();
		assert_eq!(idn.manufacturer, "Prist");
		assert_eq!(idn.model, "V7-78/1");
		assert_eq!(idn.serial_num, "TW00011505");
		assert_eq!(idn.fw_version, "03.07-01-04");

		let cryotel = Identity::parse("Cryotel,Model\\s311\\sTemperature\\sController,SN00135,2.7.4\r\n").unwrap();
		assert_eq!(cryotel.model, "Model\\s311\\sTemperature\\sController");
		assert_eq!(cryotel.fw_version, "2.7.4");
	}

	#[test]
	fn identity_needs_four_fields() {
		assert!(Identity::parse("JUNK").is_err());
	}

	#[test]
	fn cryotel_commands() {
		let mut thermo = Cryotel311::new(Scripted::new(&["301.250\r"]));
		thermo.set_target(301.25).unwrap();
		assert_eq!(thermo.temperature().unwrap(), 301.25);

		let inst = thermo.into_inner();
		assert_eq!(inst.sent, vec!["pid4:temp:targ 301.250".to_owned(), "meas:temp?".to_owned()]);
	}

	#[test]
	fn voltmeter_applies_scale() {
		let mut dvm = V778::new(Scripted::new(&["+1.2345E-03"])).with_scale(1000.0);
		assert!((dvm.voltage().unwrap() - 1.2345).abs() < 1e-12);
		assert_eq!(dvm.into_inner().sent, vec!["read?".to_owned()]);
	}

	#[test]
	fn garbage_readings_are_malformed() {
		let mut dvm = V778::new(Scripted::new(&["OVERLOAD"]));
		assert!(matches!(dvm.voltage(), Err(BusError::Malformed{ .. })));

		let mut thermo = Cryotel311::new(Scripted::new(&["nan"]));
		assert!(matches!(thermo.temperature(), Err(BusError::Malformed{ .. })));
	}
}
