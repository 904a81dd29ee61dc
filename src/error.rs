use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("VXI-11 device error {code}: {message}")]
    Device { code: i32, message: &'static str },

    #[error("malformed response to '{command}': {response:?}")]
    Malformed { command: String, response: String },

    #[error("invalid resource name '{0}'")]
    BadResource(String),

    #[error("response is not valid UTF-8")]
    Utf8,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be a finite number")]
    NotFinite(&'static str),

    #[error("current must be non-zero")]
    ZeroCurrent,

    #[error("step must be positive, got {0}")]
    NonPositiveStep(f64),

    #[error("tolerance must be positive, got {0}")]
    NonPositiveTolerance(f64),

    #[error("temperature range is empty: min {min} is not below max {max}")]
    EmptyRange { min: f64, max: f64 },

    #[error("step {step} is larger than the range {span}")]
    StepExceedsRange { step: f64, span: f64 },

    // Adding the step no longer changes the temperature at this magnitude
    #[error("step {step} is below the resolution of temperatures near {at}")]
    StepTooSmall { step: f64, at: f64 },

    #[error("sweep would have {count} targets, at most {limit} are allowed")]
    TooManyTargets { count: f64, limit: usize },

    #[error("settle poll limit must be at least 1")]
    ZeroSettlePolls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    TemperatureController,
    Voltmeter,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::TemperatureController => write!(f, "temperature controller"),
            DeviceRole::Voltmeter => write!(f, "voltmeter"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("{role} not found on the instrument bus")]
    DeviceNotFound { role: DeviceRole },

    // Resources could not be enumerated at all
    #[error("instrument bus unavailable: {0}")]
    BusUnavailable(#[source] BusError),

    #[error("communication error: {0}")]
    Communication(#[from] BusError),

    #[error("temperature did not settle at {target} K after {polls} polls (last reading {last} K)")]
    SettleTimeout { target: f64, polls: u32, last: f64 },

    #[error("a sweep is already running")]
    AlreadyRunning,

    #[error("sweep worker failed: {0}")]
    Worker(String),
}

impl SweepError {
    pub fn is_device_not_found(&self) -> bool {
        matches!(self, SweepError::DeviceNotFound { .. } | SweepError::BusUnavailable(_))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to write settings file {path}: {source}")]
pub struct SettingsError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum DataLogError {
    #[error("data log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
