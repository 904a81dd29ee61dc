use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};

use crate::error::BusError;
use crate::vxi11;

pub mod lan;
pub mod serial;
pub mod sim;

pub use lan::LanInstrument;
pub use serial::{SerialInstrument, SerialSettings};

// Answers come back with the line terminator removed
pub trait Instrument {
    fn resource(&self) -> &str;

    fn write(&mut self, cmd: &str) -> Result<(), BusError>;

    fn read(&mut self) -> Result<String, BusError>;

    fn query(&mut self, cmd: &str) -> Result<String, BusError> {
        self.write(cmd)?;
        self.read()
    }
}

impl<I: Instrument + ?Sized> Instrument for Box<I> {
    fn resource(&self) -> &str {
        (**self).resource()
    }

    fn write(&mut self, cmd: &str) -> Result<(), BusError> {
        (**self).write(cmd)
    }

    fn read(&mut self) -> Result<String, BusError> {
        (**self).read()
    }

    fn query(&mut self, cmd: &str) -> Result<String, BusError> {
        (**self).query(cmd)
    }
}

pub type BoxedInstrument = Box<dyn Instrument + Send>;

pub(crate) fn strip_terminator(response: &str) -> &str {
    response.trim_end_matches(['\r', '\n'])
}

// TCPIP[n]::<host>[::<device>]::INSTR or ASRL<port>::INSTR
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceName {
    Lan { host: String, device: String },
    Serial { port: String },
}

impl ResourceName {
    pub fn lan(host: impl Into<String>) -> Self {
        ResourceName::Lan {
            host: host.into(),
            device: "inst0".to_owned(),
        }
    }

    pub fn serial(port: impl Into<String>) -> Self {
        ResourceName::Serial { port: port.into() }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Lan { host, device } => write!(f, "TCPIP::{}::{}::INSTR", host, device),
            ResourceName::Serial { port } => write!(f, "ASRL{}::INSTR", port),
        }
    }
}

impl FromStr for ResourceName {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || BusError::BadResource(s.to_owned());
        let parts: Vec<&str> = s.trim().split("::").collect();
        let (head, tail) = parts.split_first().ok_or_else(bad)?;
        if tail.last().map(|t| t.eq_ignore_ascii_case("INSTR")) != Some(true) {
            return Err(bad());
        }

        let upper = head.to_ascii_uppercase();
        if let Some(board) = upper.strip_prefix("TCPIP") {
            if !board.chars().all(|c| c.is_ascii_digit()) {
                return Err(bad());
            }
            match tail {
                [host, _] if !host.is_empty() => Ok(ResourceName::lan(*host)),
                [host, device, _] if !host.is_empty() && !device.is_empty() => Ok(ResourceName::Lan {
                    host: host.to_string(),
                    device: device.to_string(),
                }),
                _ => Err(bad()),
            }
        } else if upper.starts_with("ASRL") {
            let port = &head[4..];
            if port.is_empty() || tail.len() != 1 {
                return Err(bad());
            }
            Ok(ResourceName::serial(port))
        } else {
            Err(bad())
        }
    }
}

pub trait ResourceProvider {
    fn list_resources(&self) -> Result<Vec<ResourceName>, BusError>;

    fn open_resource(&self, name: &ResourceName) -> Result<BoxedInstrument, BusError>;
}

// Serial ports on this machine plus VXI-11 instruments on the LAN
#[derive(Debug, Clone)]
pub struct ResourceManager {
    serial: SerialSettings,
    lan_hosts: Vec<String>,
    discovery: Option<Duration>,
    lan_io_timeout: Duration,
}

impl ResourceManager {
    pub fn new(serial: SerialSettings) -> Self {
        Self {
            serial,
            lan_hosts: Vec::new(),
            discovery: None,
            lan_io_timeout: Duration::from_millis(vxi11::DEFAULT_IO_TIMEOUT_MS as u64),
        }
    }

    pub fn with_lan_hosts(mut self, hosts: Vec<String>) -> Self {
        self.lan_hosts = hosts;
        self
    }

    // Broadcast for VXI-11 instruments, waiting `wait` for answers
    pub fn with_discovery(mut self, wait: Option<Duration>) -> Self {
        self.discovery = wait;
        self
    }

    pub fn with_lan_io_timeout(mut self, timeout: Duration) -> Self {
        self.lan_io_timeout = timeout;
        self
    }
}

impl ResourceProvider for ResourceManager {
    fn list_resources(&self) -> Result<Vec<ResourceName>, BusError> {
        let mut resources: Vec<ResourceName> = serialport::available_ports()?
            .into_iter()
            .map(|p| ResourceName::serial(p.port_name))
            .collect();

        for host in &self.lan_hosts {
            let name = ResourceName::lan(host.as_str());
            if !resources.contains(&name) {
                resources.push(name);
            }
        }

        if let Some(wait) = self.discovery {
            match vxi11::discover(wait) {
                Ok(hosts) => {
                    for ip in hosts {
                        let name = ResourceName::lan(ip.to_string());
                        if !resources.contains(&name) {
                            resources.push(name);
                        }
                    }
                }
                Err(e) => warn!("VXI-11 discovery failed: {}", e),
            }
        }

        debug!("Listed {} bus resource(s)", resources.len());
        Ok(resources)
    }

    fn open_resource(&self, name: &ResourceName) -> Result<BoxedInstrument, BusError> {
        match name {
            ResourceName::Serial { port } => Ok(Box::new(SerialInstrument::open(port, &self.serial)?)),
            ResourceName::Lan { host, device } => {
                Ok(Box::new(LanInstrument::open(host, device, self.lan_io_timeout)?))
            }
        }
    }
}
