//! Command-line surface of the `ble-serial-bridge` binary.

use clap::ArgAction;
use std::time::Duration;

use crate::config::{BridgeConfig, ScanFilter, Timing, DEFAULT_BAUD_RATE, DEFAULT_DEVICE_NAME};
use crate::diagnostics::Verbosity;
use crate::error::Result;

/// Relay notifications from a BLE multimeter to a serial port.
#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Bluetooth adapter to use, e.g. `hci0` (default: first adapter)
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Device address; when omitted the device is found by scanning for `--name`
    #[arg(short, long)]
    pub address: Option<String>,

    /// Serial port (or pty) to write received bytes to
    #[arg(short, long)]
    pub port: String,

    /// Serial port bit-rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// Increase diagnostic output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Decrease diagnostic output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// Advertised local name identifying the device while scanning
    #[arg(long, default_value = DEFAULT_DEVICE_NAME)]
    pub name: String,

    /// Scan window in seconds
    #[arg(long, default_value = "1", value_parser = parse_seconds)]
    pub scan_timeout: Duration,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10", value_parser = parse_seconds)]
    pub connect_timeout: Duration,

    /// How long to wait for each notification, in seconds
    #[arg(long, default_value = "1", value_parser = parse_seconds)]
    pub wait_timeout: Duration,

    /// Pause between failed discovery or connection attempts, in seconds
    #[arg(long, default_value = "0.5", value_parser = parse_seconds)]
    pub retry_delay: Duration,
}

impl Cli {
    /// Build and validate the bridge configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidParameter`] for an empty address or
    /// any value [`BridgeConfig::validate`] rejects.
    pub fn into_config(self) -> Result<BridgeConfig> {
        let mut config = BridgeConfig::new(self.port);
        config.interface = self.interface;
        config.address = self.address.as_deref().map(str::parse).transpose()?;
        config.scan_filter = ScanFilter::local_name(self.name);
        config.baud_rate = self.baud;
        config.verbosity = Verbosity::from_flags(Verbosity::SUMMARY, self.verbose, self.quiet);
        config.timing = Timing {
            scan_timeout: self.scan_timeout,
            connect_timeout: self.connect_timeout,
            notification_wait: self.wait_timeout,
            retry_delay: self.retry_delay,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Parse a non-negative number of seconds, fractions allowed.
fn parse_seconds(s: &str) -> std::result::Result<Duration, String> {
    let seconds: f64 = s
        .parse()
        .map_err(|_| format!("`{}` is not a number of seconds", s))?;
    Duration::try_from_secs_f64(seconds).map_err(|_| format!("`{}` is out of range", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Cli::try_parse_from(["ble-serial-bridge", "-p", "/dev/ttyS0"])
            .unwrap()
            .into_config()
            .unwrap();

        assert_eq!(config.port, "/dev/ttyS0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.interface, None);
        assert_eq!(config.address, None);
        assert_eq!(config.verbosity, Verbosity::SUMMARY);
        assert_eq!(config.scan_filter, ScanFilter::local_name("BDM"));
        assert_eq!(config.timing, Timing::default());
    }

    #[test]
    fn test_port_is_required() {
        let err = Cli::try_parse_from(["ble-serial-bridge", "-a", "AA:BB:CC:DD:EE:FF"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_verbosity_flags_subtract() {
        let cli = Cli::try_parse_from(["ble-serial-bridge", "-p", "x", "-vvv", "-q"]).unwrap();
        assert_eq!(cli.into_config().unwrap().verbosity, Verbosity::TRACE);

        let cli = Cli::try_parse_from(["ble-serial-bridge", "-p", "x", "-qq"]).unwrap();
        assert_eq!(cli.into_config().unwrap().verbosity.level(), -1);
    }

    #[test]
    fn test_explicit_target_and_timing() {
        let cli = Cli::try_parse_from([
            "ble-serial-bridge",
            "--port",
            "/tmp/ttyBLE",
            "--address",
            "aa:bb:cc:dd:ee:ff",
            "--interface",
            "hci1",
            "--baud",
            "9600",
            "--retry-delay",
            "0.25",
            "--wait-timeout",
            "2",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();

        assert_eq!(config.address.unwrap().as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.interface.as_deref(), Some("hci1"));
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timing.retry_delay, Duration::from_millis(250));
        assert_eq!(config.timing.notification_wait, Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["ble-serial-bridge", "-p", "x", "--retry-delay", "-1"]).is_err());
        assert!(Cli::try_parse_from(["ble-serial-bridge", "-p", "x", "--scan-timeout", "soon"]).is_err());

        let cli = Cli::try_parse_from(["ble-serial-bridge", "-p", "x", "--retry-delay", "0"]).unwrap();
        assert!(cli.into_config().is_err());

        let cli = Cli::try_parse_from(["ble-serial-bridge", "-p", "x", "-a", " "]).unwrap();
        assert!(cli.into_config().is_err());
    }
}
