//! This module implements the CLI interface.
use std::path::PathBuf;

use clap::Parser;
use usbdcd::device::usb::{constants::MAX_DEVICE_ADDRESS, hardware::HardwareOptions};

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
pub struct Cli {
    /// Enable verbose logging. Can be specified multiple times to
    /// increase verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// The address the simulated host assigns with SET_ADDRESS.
    #[arg(
        long,
        default_value_t = 5,
        value_parser = clap::value_parser!(u8).range(1..=i64::from(MAX_DEVICE_ADDRESS))
    )]
    pub address: u8,

    /// Keep the controller at full speed instead of negotiating high
    /// speed during bus reset.
    #[arg(long)]
    pub full_speed: bool,

    /// Write the traffic seen by the upstream stack into this PCAP file.
    /// Omit this option to disable capturing.
    #[arg(long, value_name = "FILE")]
    pub pcap: Option<PathBuf>,
}

impl Cli {
    pub const fn hardware_options(&self) -> HardwareOptions {
        HardwareOptions {
            enable_high_speed: !self.full_speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["usbdcd"]).unwrap();

        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.address, 5);
        assert!(cli.hardware_options().enable_high_speed);
        assert!(cli.pcap.is_none());
    }

    #[test]
    fn flags() {
        let cli = Cli::try_parse_from([
            "usbdcd",
            "-vv",
            "--address",
            "42",
            "--full-speed",
            "--pcap",
            "/tmp/usb.pcap",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.address, 42);
        assert!(!cli.hardware_options().enable_high_speed);
        assert_eq!(cli.pcap, Some(PathBuf::from("/tmp/usb.pcap")));
    }

    #[test]
    fn address_must_be_assignable() {
        assert!(Cli::try_parse_from(["usbdcd", "--address", "0"]).is_err());
        assert!(Cli::try_parse_from(["usbdcd", "--address", "128"]).is_err());
    }
}
