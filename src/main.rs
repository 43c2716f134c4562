//! `uw-pyrometer`: read and configure a UW pyrometer board from the shell.
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uw_pyrometer::adapters::serial_adapter::SerialPortLink;
use uw_pyrometer::adapters::{open_serial_link, SerialSettings};
use uw_pyrometer::autogain::GainAutoTuner;
use uw_pyrometer::config::Settings;
use uw_pyrometer::hardware::{Pyrometer, PyrometerHandle};
use uw_pyrometer::measurement::{
    CompletionSignal, Quantity, SampleMode, SampleProgress, Sampler, SamplerConfig,
};
use uw_pyrometer::physics::CalibrationRecord;
use uw_pyrometer::protocol::{DeviceAddress, GainPair};

type BoardHandle = PyrometerHandle<SerialPortLink>;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "UW pyrometer board tool")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging, wire bytes included
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Connection {
    /// Serial port the board is attached to
    serial_path: String,

    /// Board address
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=254))]
    device_id: u8,
}

#[derive(Args, Debug)]
struct Acquisition {
    /// Polling interval in seconds
    #[arg(short, long)]
    interval: Option<f64>,

    /// Number of samples to collect; 0 runs until interrupted. Defaults to the averaging window
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// Number of points to average over
    #[arg(short, long)]
    average: Option<usize>,

    /// Show values before the averaging window has filled
    #[arg(long)]
    show_prelim: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report the voltage for thermopile, thermistor, and reference at the ADC
    MeasureAdc {
        #[command(flatten)]
        connection: Connection,
        #[command(flatten)]
        acquisition: Acquisition,
    },
    /// Set the gain by changing the amplifier feedback potentiometers
    Gain {
        #[command(flatten)]
        connection: Connection,
        /// Thermopile potentiometer setting
        thermopile: u8,
        /// Thermistor potentiometer setting
        thermistor: u8,
        /// Send to every board on the line
        #[arg(short, long)]
        broadcast: bool,
    },
    /// Report the thermistor temperature and thermopile power
    MeasurePhysical {
        #[command(flatten)]
        connection: Connection,
        #[command(flatten)]
        acquisition: Acquisition,
        /// YAML calibration file
        #[arg(short = 'k', long)]
        calibration: Option<PathBuf>,
        /// Fixed gains (thermopile thermistor); auto-gain when omitted
        #[arg(short, long, num_args = 2, value_names = ["THERMOPILE", "THERMISTOR"])]
        gains: Option<Vec<u8>>,
        /// Show the thermopile pre-amplifier voltage instead of power
        #[arg(short = 'V', long)]
        voltage: bool,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "uw_pyrometer=debug" } else { "uw_pyrometer=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Command::MeasureAdc {
            connection,
            acquisition,
        } => {
            apply_acquisition(&mut settings, &acquisition)?;
            let pyrometer = open(&connection, &settings, None)?;
            sample(&pyrometer, &settings, SampleMode::Adc, acquisition.show_prelim, false).await
        }
        Command::Gain {
            connection,
            thermopile,
            thermistor,
            broadcast,
        } => {
            let pyrometer = open(&connection, &settings, None)?;
            pyrometer
                .set_gains(GainPair::new(thermopile, thermistor), broadcast)
                .await
                .context("Failed to set gains")?;
            info!("Gains set to ({}, {})", thermopile, thermistor);
            Ok(())
        }
        Command::MeasurePhysical {
            connection,
            acquisition,
            calibration,
            gains,
            voltage,
        } => {
            apply_acquisition(&mut settings, &acquisition)?;
            let calibration = calibration
                .map(|path| {
                    CalibrationRecord::from_yaml(&path)
                        .with_context(|| format!("Failed to load calibration {}", path.display()))
                })
                .transpose()?;
            let pyrometer = open(&connection, &settings, calibration)?;
            match gains.as_deref() {
                Some(&[thermopile, thermistor]) => {
                    println!("Setting gain");
                    pyrometer
                        .set_gains(GainPair::new(thermopile, thermistor), false)
                        .await?;
                }
                _ => {
                    println!("Auto gain");
                    let tuner = GainAutoTuner::from_settings(&settings.autogain);
                    let outcome = tuner.run_shared(&pyrometer, None).await?;
                    println!("Gains: {}", outcome.gains);
                }
            }
            sample(&pyrometer, &settings, SampleMode::Physical, acquisition.show_prelim, voltage)
                .await
        }
        Command::ShowConfig => {
            print!("{}", settings.to_toml_string()?);
            Ok(())
        }
    }
}

fn apply_acquisition(settings: &mut Settings, acquisition: &Acquisition) -> Result<()> {
    if let Some(interval) = acquisition.interval {
        anyhow::ensure!(interval > 0.0, "Interval must be positive");
        let interval = Duration::try_from_secs_f64(interval)
            .with_context(|| format!("Interval {} s is out of range", interval))?;
        settings.sampling.interval_ms = u64::try_from(interval.as_millis().max(1))
            .context("Interval does not fit in milliseconds")?;
    }
    if let Some(average) = acquisition.average {
        settings.sampling.average = average;
    }
    if acquisition.samples.is_some() {
        settings.sampling.samples = acquisition.samples;
    }
    settings.validate()?;
    Ok(())
}

fn open(
    connection: &Connection,
    settings: &Settings,
    calibration: Option<CalibrationRecord>,
) -> Result<BoardHandle> {
    let address = DeviceAddress::new(connection.device_id)?;
    let link = open_serial_link(&SerialSettings::from_link(&connection.serial_path, &settings.link))
        .with_context(|| format!("Failed to open {}", connection.serial_path))?;
    Ok(PyrometerHandle::new(Pyrometer::new(
        link,
        address,
        settings.link.read_timeout(),
        calibration,
    )))
}

async fn sample(
    pyrometer: &BoardHandle,
    settings: &Settings,
    mode: SampleMode,
    show_prelim: bool,
    voltage: bool,
) -> Result<()> {
    let sampler = Sampler::new(SamplerConfig::from_settings(&settings.sampling, mode))?;
    let signal = CompletionSignal::new();

    let ctrl_c = {
        let signal = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal.set();
            }
        })
    };

    let shown: &[Quantity] = match (mode, voltage) {
        (SampleMode::Adc, _) => mode.quantities(),
        (SampleMode::Physical, false) => &[Quantity::Temperature, Quantity::Power],
        (SampleMode::Physical, true) => &[Quantity::ThermistorVoltage, Quantity::ThermopileVoltage],
    };
    let print = |progress: &SampleProgress| {
        if !progress.window_filled && !show_prelim {
            return;
        }
        let separator = if progress.window_filled { ":" } else { "*:" };
        println!();
        for &quantity in shown {
            if let Some(value) = progress.averages.get(quantity) {
                let label = format!("{}{}", quantity, separator);
                println!("{:<13} {}", label, format_value(quantity, value));
            }
        }
    };

    let result = sampler.run_with_progress(pyrometer, &signal, print).await;
    ctrl_c.abort();
    let summary = result?;
    info!("{} samples taken, {} retried", summary.taken, summary.retries);
    Ok(())
}

fn format_value(quantity: Quantity, value: f64) -> String {
    match quantity {
        Quantity::Temperature => format!("{:>9.1} C", value),
        Quantity::Power => format!("{:>9.2} uW", value),
        Quantity::ThermopileVoltage => format!("{:>9.1} uV", value * 1e6),
        _ => format!("{:>9.2} V", value),
    }
}
