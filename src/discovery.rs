use log::{debug, info, warn};
use serde::Serialize;

use crate::bus::{BoxedInstrument, ResourceProvider};
use crate::devices::IDN_CMD;
use crate::error::{BusError, DeviceRole, SweepError};
use crate::settings::Settings;

pub struct DiscoveredDevices {
    pub thermo: BoxedInstrument,
    pub voltmeter: BoxedInstrument,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceListing {
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn answers(expected: &str, answer: &str) -> bool {
    expected.trim() == answer.trim()
}

// Resources whose *IDN? answer matches neither setting are closed again
pub fn identify<P: ResourceProvider + ?Sized>(
    provider: &P,
    settings: &Settings,
) -> Result<DiscoveredDevices, SweepError> {
    let resources = provider.list_resources().map_err(SweepError::BusUnavailable)?;
    info!("Identifying instruments among {} resource(s)", resources.len());

    let mut thermo: Option<BoxedInstrument> = None;
    let mut voltmeter: Option<BoxedInstrument> = None;

    for name in resources {
        if thermo.is_some() && voltmeter.is_some() {
            break;
        }

        let mut device = match provider.open_resource(&name) {
            Ok(device) => device,
            Err(e) => {
                warn!("Skipping {}: cannot open ({})", name, e);
                continue;
            }
        };

        let answer = match device.query(IDN_CMD) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Skipping {}: no identification ({})", name, e);
                continue;
            }
        };
        debug!("{} identifies as {:?}", name, answer);

        if answers(&settings.thermo, &answer) {
            if thermo.is_none() {
                info!("Temperature controller found at {}", name);
                thermo = Some(device);
            } else {
                warn!("Second temperature controller at {} ignored", name);
            }
        } else if answers(&settings.voltmeter, &answer) {
            if voltmeter.is_none() {
                info!("Voltmeter found at {}", name);
                voltmeter = Some(device);
            } else {
                warn!("Second voltmeter at {} ignored", name);
            }
        }
    }

    let thermo = thermo.ok_or(SweepError::DeviceNotFound {
        role: DeviceRole::TemperatureController,
    })?;
    let voltmeter = voltmeter.ok_or(SweepError::DeviceNotFound {
        role: DeviceRole::Voltmeter,
    })?;

    Ok(DiscoveredDevices { thermo, voltmeter })
}

pub fn survey<P: ResourceProvider + ?Sized>(provider: &P) -> Result<Vec<ResourceListing>, BusError> {
    let listings = provider
        .list_resources()?
        .into_iter()
        .map(|name| {
            let result = provider
                .open_resource(&name)
                .and_then(|mut device| device.query(IDN_CMD));
            let (identification, error) = match result {
                Ok(answer) => (Some(answer), None),
                Err(e) => (None, Some(e.to_string())),
            };
            ResourceListing {
                resource: name.to_string(),
                identification,
                error,
            }
        })
        .collect();
    Ok(listings)
}
