//! # thermoprj
//!
//! Sweeps a temperature controller through a range of targets, reads a
//! voltmeter at every settled point and reports the sample resistance.
//!
//! ```bash
//! # 300 K to 350 K in 5 K steps at 1 mA, controller on a serial port,
//! # voltmeter on the LAN
//! thermoprj sweep --current 0.001 --min 300 --max 350 --step 5 --host 192.168.1.20
//!
//! # Dry run against simulated instruments
//! thermoprj -v sweep --current 0.001 --min 300 --max 310 --step 2 --simulate
//!
//! # What is on the bus
//! thermoprj list --discover
//! ```

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use serialport::{DataBits, Parity, StopBits};

use thermoprj::bus::sim::{SimSettings, SimulatedBus};
use thermoprj::bus::{ResourceManager, ResourceProvider, SerialSettings};
use thermoprj::datalog::{DataLog, DATA_FILENAME};
use thermoprj::devices::{Cryotel311, V778};
use thermoprj::discovery::{identify, survey};
use thermoprj::plot::{status_line, ResistancePlot};
use thermoprj::settings::{Settings, SETTINGS_FILENAME};
use thermoprj::sweep::{config, SweepConfig, SweepOutcome, SweepStatus};
use thermoprj::utils::LinearFitProblem;
use thermoprj::vxi11;
use thermoprj::worker::{Session, SweepEvent};

/// Resistance versus temperature sweeps with a Cryotel controller and a
/// Prist voltmeter
#[derive(Parser)]
#[command(name = "thermoprj")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// File holding the expected identification strings
    #[arg(long, global = true, value_name = "FILE", default_value = SETTINGS_FILENAME)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a temperature sweep
    Sweep(SweepArgs),

    /// List bus resources and how they identify themselves
    List {
        #[command(flatten)]
        bus: BusArgs,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or change the expected identification strings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings
    Show,

    /// Replace one or both identification strings
    Set {
        /// Answer of the temperature controller to *IDN?
        #[arg(long)]
        thermo: Option<String>,

        /// Answer of the voltmeter to *IDN?
        #[arg(long)]
        voltmeter: Option<String>,
    },
}

#[derive(Args)]
struct SweepArgs {
    /// Excitation current through the sample, in amperes
    #[arg(long, allow_hyphen_values = true)]
    current: f64,

    /// First target temperature, in kelvin
    #[arg(long, allow_hyphen_values = true)]
    min: f64,

    /// End of the range (exclusive), in kelvin
    #[arg(long, allow_hyphen_values = true)]
    max: f64,

    /// Temperature step, in kelvin
    #[arg(long)]
    step: f64,

    /// A target counts as reached within this many kelvin
    #[arg(long, default_value_t = config::DEFAULT_TOLERANCE)]
    tolerance: f64,

    /// Pause between two temperature readings while settling, in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    poll_ms: u64,

    /// Pause after every sample, in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_POST_SAMPLE_PAUSE.as_millis() as u64)]
    pause_ms: u64,

    /// Fail when a target has not settled after this many readings (default: wait forever)
    #[arg(long)]
    max_polls: Option<u32>,

    /// Factor applied to every voltmeter reading
    #[arg(long, default_value_t = 1.0)]
    voltage_scale: f64,

    /// Minimum delay between two commands to the temperature controller, in milliseconds
    #[arg(long, default_value_t = 0)]
    throttle_ms: u64,

    /// Sample log, appended to
    #[arg(long, value_name = "FILE", default_value = DATA_FILENAME)]
    data: PathBuf,

    /// Also write the plotted points to this JSON file
    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,

    #[command(flatten)]
    bus: BusArgs,
}

#[derive(Args)]
struct BusArgs {
    /// VXI-11 instrument to include, by host name or IP address (repeatable)
    #[arg(long = "host", value_name = "HOST")]
    hosts: Vec<String>,

    /// Broadcast for VXI-11 instruments on the local network
    #[arg(long)]
    discover: bool,

    /// How long to wait for discovery answers, in milliseconds
    #[arg(long, default_value_t = 1000)]
    discover_ms: u64,

    /// VXI-11 I/O timeout, in milliseconds
    #[arg(long, default_value_t = vxi11::DEFAULT_IO_TIMEOUT_MS as u64)]
    lan_timeout_ms: u64,

    /// Serial baud rate
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    #[arg(long, value_enum, default_value_t = DataBitsArg::Eight)]
    data_bits: DataBitsArg,

    #[arg(long, value_enum, default_value_t = StopBitsArg::One)]
    stop_bits: StopBitsArg,

    #[arg(long, value_enum, default_value_t = ParityArg::None)]
    parity: ParityArg,

    /// Use simulated instruments instead of the real buses
    #[arg(long)]
    simulate: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DataBitsArg {
    #[value(name = "5")]
    Five,
    #[value(name = "6")]
    Six,
    #[value(name = "7")]
    Seven,
    #[value(name = "8")]
    Eight,
}

#[derive(Clone, Copy, ValueEnum)]
enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

#[derive(Clone, Copy, ValueEnum)]
enum ParityArg {
    None,
    Odd,
    Even,
}

impl BusArgs {
    fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud,
            data_bits: match self.data_bits {
                DataBitsArg::Five => DataBits::Five,
                DataBitsArg::Six => DataBits::Six,
                DataBitsArg::Seven => DataBits::Seven,
                DataBitsArg::Eight => DataBits::Eight,
            },
            stop_bits: match self.stop_bits {
                StopBitsArg::One => StopBits::One,
                StopBitsArg::Two => StopBits::Two,
            },
            parity: match self.parity {
                ParityArg::None => Parity::None,
                ParityArg::Odd => Parity::Odd,
                ParityArg::Even => Parity::Even,
            },
            ..SerialSettings::default()
        }
    }

    fn provider(&self, settings: &Settings, current: Option<f64>) -> Box<dyn ResourceProvider> {
        if self.simulate {
            info!("Using simulated instruments");
            let defaults = SimSettings::default();
            return Box::new(SimulatedBus::new(SimSettings {
                thermo_idn: settings.thermo.clone(),
                voltmeter_idn: settings.voltmeter.clone(),
                current: current.unwrap_or(defaults.current),
                ..defaults
            }));
        }

        let discovery = self.discover.then(|| Duration::from_millis(self.discover_ms));
        Box::new(
            ResourceManager::new(self.serial_settings())
                .with_lan_hosts(self.hosts.clone())
                .with_discovery(discovery)
                .with_lan_io_timeout(Duration::from_millis(self.lan_timeout_ms)),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Sweep(args) => run_sweep(&cli.settings, args),
        Commands::List { bus, json } => run_list(&cli.settings, &bus, json),
        Commands::Settings { action } => run_settings(&cli.settings, action),
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    Settings::retrieve(path).with_context(|| format!("Cannot load settings from {}", path.display()))
}

fn run_sweep(settings_path: &Path, args: SweepArgs) -> Result<()> {
    let config = SweepConfig::new(args.current, args.min, args.max, args.step)
        .with_tolerance(args.tolerance)
        .with_poll_interval(Duration::from_millis(args.poll_ms))
        .with_post_sample_pause(Duration::from_millis(args.pause_ms))
        .with_max_settle_polls(args.max_polls);
    config.validate().context("Invalid sweep parameters")?;

    let settings = load_settings(settings_path)?;
    let provider = args.bus.provider(&settings, Some(args.current));
    let found = identify(provider.as_ref(), &settings).context("Instruments not found")?;

    let mut thermo = Cryotel311::new(found.thermo).with_throttle(Duration::from_millis(args.throttle_ms));
    let mut voltmeter = V778::new(found.voltmeter).with_scale(args.voltage_scale);
    match thermo.identify() {
        Ok(id) => info!("Temperature controller: {} {} (SN {}, firmware {})", id.manufacturer, id.model, id.serial_num, id.fw_version),
        Err(e) => warn!("Temperature controller identity unreadable: {}", e),
    }
    match voltmeter.identify() {
        Ok(id) => info!("Voltmeter: {} {} (SN {}, firmware {})", id.manufacturer, id.model, id.serial_num, id.fw_version),
        Err(e) => warn!("Voltmeter identity unreadable: {}", e),
    }

    let mut datalog = DataLog::open(&args.data)
        .with_context(|| format!("Cannot open data file {}", args.data.display()))?;
    let mut plot = ResistancePlot::new();
    let mut session = Session::new();

    session.start(config, thermo, voltmeter)?;
    if let Some(flag) = session.running_flag() {
        watch_stdin(flag);
    }
    println!("Sweep started, logging to {}. Type 'stop' and Enter to cancel.", datalog.path().display());

    let mut log_failure = None;
    let result = loop {
        match session.next_event() {
            Some(SweepEvent::Sample(sample)) => {
                println!("{}", status_line(&sample));
                plot.push(&sample);
                if log_failure.is_none() {
                    if let Err(e) = datalog.append(&sample) {
                        error!("Writing {} failed, stopping the sweep: {}", datalog.path().display(), e);
                        session.stop();
                        log_failure = Some(e);
                    }
                }
            }
            Some(SweepEvent::Finished(result)) => break result,
            None => bail!("Sweep ended without reporting a result"),
        }
    };
    let outcome = result.context("Sweep could not run")?;

    print_summary(&outcome, &plot);

    if let Some(path) = &args.json {
        plot.export_json(path)
            .with_context(|| format!("Cannot export plot to {}", path.display()))?;
        info!("Plot points written to {}", path.display());
    }
    if let Some(e) = log_failure {
        return Err(e).context("Data log incomplete");
    }
    match outcome.status {
        SweepStatus::Failed(e) => Err(e).context("Sweep failed"),
        SweepStatus::Completed | SweepStatus::Cancelled => Ok(()),
    }
}

// Typing `stop` (or `q`) on stdin clears the running flag
fn watch_stdin(flag: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name("thermoprj-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim().to_ascii_lowercase().as_str() {
                    "stop" | "q" | "quit" => {
                        flag.store(false, Ordering::SeqCst);
                        eprintln!("Stopping after the current target...");
                        break;
                    }
                    "" => {}
                    other => eprintln!("Unknown command '{}', type 'stop' to cancel", other),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("No stop control on stdin: {}", e);
    }
}

fn print_summary(outcome: &SweepOutcome, plot: &ResistancePlot) {
    let run = &outcome.run;
    let status = match &outcome.status {
        SweepStatus::Completed => "completed".to_string(),
        SweepStatus::Cancelled => "cancelled".to_string(),
        SweepStatus::Failed(e) => format!("failed ({})", e),
    };
    println!("Sweep {}: {} of {} target(s) sampled", status, run.samples.len(), run.targets.len());

    if let Some(b) = plot.bounds() {
        println!("  T: {:.3} .. {:.3} K, R: {:.3} .. {:.3} Ohm", b.x_min, b.x_max, b.y_min, b.y_max);
    }

    match LinearFitProblem::from_samples(&run.samples).solve() {
        Ok(fit) => {
            println!("  R(T) = {:.6} Ohm/K * T + {:.6} Ohm", fit.slope, fit.intercept);
            if let Some(first) = run.samples.first() {
                if let Some(alpha) = fit.relative_slope(first.temperature) {
                    println!("  Temperature coefficient at {:.3} K: {:.6e} 1/K", first.temperature, alpha);
                }
            }
        }
        Err(e) => info!("No linear fit: {}", e),
    }
}

fn run_list(settings_path: &Path, bus: &BusArgs, json: bool) -> Result<()> {
    let settings = load_settings(settings_path)?;
    let provider = bus.provider(&settings, None);
    let listing = survey(provider.as_ref()).context("Cannot enumerate bus resources")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if listing.is_empty() {
        println!("No resources found");
    }
    for entry in &listing {
        let answer = match (&entry.identification, &entry.error) {
            (Some(idn), _) => idn.trim().to_string(),
            (None, Some(e)) => format!("<{}>", e),
            (None, None) => String::new(),
        };
        let role = match entry.identification.as_deref().map(str::trim) {
            Some(idn) if idn == settings.thermo.trim() => " [temperature controller]",
            Some(idn) if idn == settings.voltmeter.trim() => " [voltmeter]",
            _ => "",
        };
        println!("{:<36} {}{}", entry.resource, answer, role);
    }
    Ok(())
}

fn run_settings(path: &Path, action: SettingsAction) -> Result<()> {
    let mut settings = load_settings(path)?;
    match action {
        SettingsAction::Show => {}
        SettingsAction::Set { thermo, voltmeter } => {
            if thermo.is_none() && voltmeter.is_none() {
                bail!("Nothing to set, pass --thermo and/or --voltmeter");
            }
            if let Some(thermo) = thermo {
                settings.thermo = thermo;
            }
            if let Some(voltmeter) = voltmeter {
                settings.voltmeter = voltmeter;
            }
            settings.save(path)?;
            info!("Settings saved to {}", path.display());
        }
    }
    println!("Settings file: {}", path.display());
    println!("  temperature controller: {}", settings.thermo);
    println!("  voltmeter:              {}", settings.voltmeter);
    Ok(())
}
