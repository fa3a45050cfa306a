//! # USB Device Controller Driver
//!
//! This crate bridges a USB device peripheral's event-driven register
//! interface to a fixed upstream device-controller-driver contract. See
//! [`device::usb::dcd::DeviceController`] for a starting point.
//!
//! It should never depend on a particular USB stack or board support
//! package. Hardware is reached through [`device::usb::hardware::UsbHardware`]
//! and the upstream stack through [`device::usb::event::EventSink`].

#![deny(missing_docs)]
#![deny(rustdoc::all)]
#![deny(clippy::must_use_candidate)]
#![deny(missing_debug_implementations)]

pub mod device;
