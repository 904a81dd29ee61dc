use std::str;
use std::time::Duration;

use log::{trace, warn};

use super::{strip_terminator, Instrument};
use crate::error::BusError;
use crate::vxi11::CoreClient;

pub struct LanInstrument {
    resource: String,
    core: CoreClient,
}

impl LanInstrument {
    pub fn open(host: &str, device: &str, io_timeout: Duration) -> Result<Self, BusError> {
        let mut core = CoreClient::new(host)?.with_io_timeout(io_timeout)?;
        core.create_link(device)?;

        Ok(Self {
            resource: format!("TCPIP::{}::{}::INSTR", host, device),
            core,
        })
    }

    // `core` must already hold a link
    pub fn from_core(resource: impl Into<String>, core: CoreClient) -> Self {
        Self {
            resource: resource.into(),
            core,
        }
    }
}

impl Instrument for LanInstrument {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn write(&mut self, cmd: &str) -> Result<(), BusError> {
        trace!("{} <- {}", self.resource, cmd);
        self.core.write(cmd.as_bytes())
    }

    fn read(&mut self) -> Result<String, BusError> {
        let raw = self.core.read()?;
        let text = str::from_utf8(&raw).map_err(|_| BusError::Utf8)?;
        trace!("{} -> {}", self.resource, text.trim_end());
        Ok(strip_terminator(text).to_owned())
    }
}

impl Drop for LanInstrument {
    fn drop(&mut self) {
        if self.core.link().is_some() {
            if let Err(e) = self.core.destroy_link() {
                warn!("Unable to destroy link for {}: {}", self.resource, e);
            }
        }
    }
}
