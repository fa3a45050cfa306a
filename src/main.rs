mod cli;
mod enumerate;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use usbdcd::device::usb::capture::UsbCapture;

fn main() -> Result<()> {
    let args = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;
    tracing_log::LogTracer::init().context("Failed to forward log records to tracing")?;

    let mut capture = args
        .pcap
        .as_deref()
        .map(|path| {
            UsbCapture::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))
        })
        .transpose()?;

    let summary = enumerate::run(args.hardware_options(), args.address, capture.as_mut())?;

    if let Some(capture) = capture {
        if let Some(result) = capture.into_inner() {
            result.context("Failed to write the PCAP file")?;
        }
    }

    info!(
        "Enumerated device {:04x}:{:04x} at address {} ({:?})",
        summary.vendor_id, summary.product_id, summary.address, summary.state
    );

    Ok(())
}
