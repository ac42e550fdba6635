//! Rendering of decoded readings for stdout.

use chrono::{DateTime, Local};

use crate::decode::fahrenheit;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Format {
    Full,
    Celsius,
    Fahrenheit,
}

/// One reading as a plain line. The Celsius/Fahrenheit only variants drop
/// the timestamp so the output can be consumed by scripts.
pub fn plain(celsius: f64, format: Format, device: usize, at: DateTime<Local>) -> String {
    match format {
        Format::Celsius => format!("{:.2}\n", celsius),
        Format::Fahrenheit => format!("{:.2}\n", fahrenheit(celsius)),
        Format::Full => format!(
            "{} Device {} Temperature {:.2}F {:.2}C\n",
            at.format("%Y/%m/%d %H:%M:%S"),
            device,
            fahrenheit(celsius),
            celsius
        ),
    }
}

/// The four line mrtg external script protocol: the value twice, the local
/// time as HH:MM, then the device name.
pub fn mrtg(celsius: f64, format: Format, at: DateTime<Local>) -> String {
    let value = match format {
        Format::Fahrenheit => fahrenheit(celsius),
        Format::Celsius | Format::Full => celsius,
    };
    format!("{0:.2}\n{0:.2}\n{1}\npcsensor\n", value, at.format("%H:%M"))
}
