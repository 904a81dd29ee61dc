use std::io::{self, BufRead, BufReader, Write};
use std::time::Duration;

use log::{debug, trace};
use serialport::{DataBits, Parity, SerialPort, StopBits};

use super::{strip_terminator, Instrument};
use crate::error::BusError;

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub timeout: Duration,
    /// Appended to every command written
    pub write_terminator: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            timeout: Duration::from_secs(2),
            write_terminator: "\r\n".to_owned(),
        }
    }
}

// Answers are read up to a line feed
pub struct SerialInstrument {
    resource: String,
    reader: BufReader<Box<dyn SerialPort>>,
    write_terminator: String,
}

impl SerialInstrument {
    pub fn open(port_name: &str, settings: &SerialSettings) -> Result<Self, BusError> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity)
            .timeout(settings.timeout)
            .open()?;

        debug!(
            "Opened {} at {} baud ({:?}, {:?}, {:?})",
            port_name, settings.baud_rate, settings.data_bits, settings.parity, settings.stop_bits
        );

        Ok(Self {
            resource: format!("ASRL{}::INSTR", port_name),
            reader: BufReader::new(port),
            write_terminator: settings.write_terminator.clone(),
        })
    }
}

impl Instrument for SerialInstrument {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn write(&mut self, cmd: &str) -> Result<(), BusError> {
        trace!("{} <- {}", self.resource, cmd);
        let port = self.reader.get_mut();
        port.write_all(cmd.as_bytes())?;
        port.write_all(self.write_terminator.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self) -> Result<String, BusError> {
        let mut raw: Vec<u8> = Vec::new();
        let n = self.reader.read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Err(BusError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial port closed",
            )));
        }

        let line = String::from_utf8(raw).map_err(|_| BusError::Utf8)?;
        trace!("{} -> {}", self.resource, line.trim_end());
        Ok(strip_terminator(&line).to_owned())
    }
}
