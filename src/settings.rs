use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::error::SettingsError;

pub const SETTINGS_FILENAME: &str = "thermoprj_settings.txt";

pub const DEFAULT_THERMO_IDN: &str = "Cryotel,Model\\s311\\sTemperature\\sController,SN00135,2.7.4";
pub const DEFAULT_VOLTMETER_IDN: &str = "Prist,V7-78/1,TW00011505,03.07-01-04";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub thermo: String,
    pub voltmeter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thermo: DEFAULT_THERMO_IDN.to_owned(),
            voltmeter: DEFAULT_VOLTMETER_IDN.to_owned(),
        }
    }
}

impl Settings {
    // A missing or unusable file is rewritten with the defaults
    pub fn retrieve(path: &Path) -> Result<Settings, SettingsError> {
        match fs::read(path) {
            Ok(bytes) => match String::from_utf8(bytes).ok().and_then(|text| Self::parse(&text)) {
                Some(settings) => return Ok(settings),
                None => warn!("Settings file {} is malformed, restoring defaults", path.display()),
            },
            Err(e) => info!("No usable settings file at {} ({}), writing defaults", path.display(), e),
        }

        let settings = Settings::default();
        settings.save(path)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        fs::write(path, self.render()).map_err(|source| SettingsError {
            path: path.to_path_buf(),
            source,
        })
    }

    fn render(&self) -> String {
        format!("{}\n{}\n", self.thermo.trim_end(), self.voltmeter.trim_end())
    }

    fn parse(text: &str) -> Option<Settings> {
        let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
        let thermo = lines.next().filter(|l| !l.trim().is_empty())?;
        let voltmeter = lines.next().filter(|l| !l.trim().is_empty())?;
        Some(Settings {
            thermo: thermo.to_owned(),
            voltmeter: voltmeter.to_owned(),
        })
    }
}
