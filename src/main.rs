mod decode;
mod report;
mod sensor;

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Local;
use env_logger::Env;
use log::{debug, warn};
use rusb::{Context, Device, UsbContext};
use structopt::clap::ErrorKind;
use structopt::StructOpt;

use report::Format;
use sensor::Sensor;

#[derive(StructOpt)]
#[structopt(name = "temperusb", about = "Read TEMPerUSB v1.4 thermometers")]
struct Opt {
    /// Verbose diagnostic output
    #[structopt(short)]
    verbose: bool,

    /// Output only in Celsius
    #[structopt(short)]
    celsius: bool,

    /// Output only in Fahrenheit
    #[structopt(short, conflicts_with = "celsius")]
    fahrenheit: bool,

    /// Output for mrtg integration
    #[structopt(short)]
    mrtg: bool,

    /// Add a delta of n.n degrees Celsius (may be negative)
    #[structopt(short = "a")]
    delta: Option<Option<f64>>,

    /// Show only device n
    #[structopt(short = "d")]
    device: Option<Option<usize>>,

    /// Loop every n seconds, default value is 5
    #[structopt(short = "l")]
    interval: Option<Option<u64>>,
}

/// Immutable run configuration, parsed once at startup.
struct Config {
    verbose: bool,
    mrtg: bool,
    format: Format,
    device: Option<usize>,
    delta: f64,
    interval: Option<Duration>,
}

impl From<Opt> for Config {
    fn from(opt: Opt) -> Config {
        let format = if opt.fahrenheit {
            Format::Fahrenheit
        } else if opt.celsius {
            Format::Celsius
        } else {
            Format::Full
        };
        Config {
            verbose: opt.verbose,
            mrtg: opt.mrtg,
            format,
            device: opt.device.flatten(),
            delta: opt.delta.flatten().unwrap_or(0.0),
            interval: opt.interval.map(|s| Duration::from_secs(s.unwrap_or(5))),
        }
    }
}

fn main() -> Result<()> {
    let opt = match Opt::from_iter_safe(std::env::args()) {
        Ok(opt) => opt,
        Err(e) => {
            if e.kind == ErrorKind::HelpDisplayed {
                println!("{}", e.message);
            } else {
                eprintln!("{}", e.message);
            }
            std::process::exit(1);
        }
    };
    let config = Config::from(opt);

    let filter = if config.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to install interrupt handler")?;

    let mut usb = Context::new().context("failed to initialize usb context")?;
    usb.set_log_level(if config.verbose {
        rusb::LogLevel::Debug
    } else {
        rusb::LogLevel::Info
    });

    // The stop flag is only observed here, so an in-flight poll always
    // completes and releases its device before the loop exits.
    while !stop.load(Ordering::SeqCst) {
        poll_once(&usb, &config)?;
        match config.interval {
            Some(interval) => thread::sleep(interval),
            None => break,
        }
    }
    Ok(())
}

/// Enumerate the bus and read every matched sensor, strictly one at a time.
fn poll_once(usb: &Context, config: &Config) -> Result<()> {
    let devices = usb.devices().context("failed to list usb devices")?;
    let mut ordinal = 0;
    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!("skipping device without readable descriptor: {}", e);
                continue;
            }
        };
        debug!(
            "VendorID: {:04x} ProductID: {:04x}",
            descriptor.vendor_id(),
            descriptor.product_id()
        );
        if !sensor::is_sensor(&descriptor) {
            continue;
        }
        debug!("device {} recognized", ordinal);

        // Filtered-out devices still count towards the ordinal so that -d
        // always refers to the same physical unit.
        let index = ordinal;
        ordinal += 1;
        if config.device.map_or(false, |wanted| wanted != index) {
            continue;
        }

        // A failed exchange yields no reading; the remaining devices are
        // still polled.
        if let Err(e) = poll_device(&device, index, config) {
            warn!("device {}: {:#}", index, e);
        }
    }
    Ok(())
}

fn poll_device(device: &Device<Context>, index: usize, config: &Config) -> Result<()> {
    let sensor = Sensor::open(device)?;
    let report = sensor.read_report()?;
    let celsius = decode::celsius(decode::raw16(&report), config.delta);

    let now = Local::now();
    let line = if config.mrtg {
        report::mrtg(celsius, config.format, now)
    } else {
        report::plain(celsius, config.format, index, now)
    };
    print!("{}", line);
    io::stdout().flush().context("failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::from(Opt::from_iter_safe(args).unwrap())
    }

    #[test]
    fn defaults_to_a_single_run_over_all_devices() {
        let config = parse(&["temperusb"]);
        assert!(!config.verbose);
        assert!(!config.mrtg);
        assert_eq!(config.format, Format::Full);
        assert_eq!(config.device, None);
        assert_eq!(config.delta, 0.0);
        assert_eq!(config.interval, None);
    }

    #[test]
    fn loop_without_value_defaults_to_five_seconds() {
        assert_eq!(
            parse(&["temperusb", "-l"]).interval,
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            parse(&["temperusb", "-l", "30"]).interval,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn delta_defaults_to_zero() {
        assert_eq!(parse(&["temperusb", "-a"]).delta, 0.0);
        assert_eq!(parse(&["temperusb", "-a", "1.5"]).delta, 1.5);
    }

    #[test]
    fn device_filter_is_optional() {
        assert_eq!(parse(&["temperusb", "-d", "1"]).device, Some(1));
        assert_eq!(parse(&["temperusb", "-d"]).device, None);
    }

    #[test]
    fn unit_flags_select_the_format() {
        assert_eq!(parse(&["temperusb", "-c"]).format, Format::Celsius);
        assert_eq!(parse(&["temperusb", "-f"]).format, Format::Fahrenheit);
        assert_eq!(parse(&["temperusb", "-f", "-m"]).format, Format::Fahrenheit);
    }

    #[test]
    fn rejects_non_numeric_arguments() {
        assert!(Opt::from_iter_safe(&["temperusb", "-d", "x"]).is_err());
        assert!(Opt::from_iter_safe(&["temperusb", "-l", "x"]).is_err());
        assert!(Opt::from_iter_safe(&["temperusb", "-a", "x"]).is_err());
    }

    #[test]
    fn rejects_conflicting_units_and_stray_arguments() {
        assert!(Opt::from_iter_safe(&["temperusb", "-c", "-f"]).is_err());
        assert!(Opt::from_iter_safe(&["temperusb", "stray"]).is_err());
    }
}
