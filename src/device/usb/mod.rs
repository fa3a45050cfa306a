//! # USB Device Controller
//!
//! The transfer engine lives in [`dcd`]. It consumes register-level
//! primitives through the [`hardware::UsbHardware`] trait and reports bus
//! conditions, setup packets and transfer completions to an
//! [`event::EventSink`].
//!
//! ## Example
//!
//! ```rust
//! use usbdcd::device::usb::{
//!     dcd::DeviceController,
//!     endpoint::{EndpointAddress, TransferBuffer},
//!     event::DcdEvent,
//!     hardware::HardwareOptions,
//!     simulated::SimulatedController,
//! };
//!
//! let mut dcd = DeviceController::new(
//!     SimulatedController::new(),
//!     Vec::<DcdEvent>::new(),
//!     HardwareOptions::default(),
//! );
//! dcd.initialize().expect("controller bring-up failed");
//!
//! let reply = [0x12, 0x01];
//! dcd.submit_transfer(EndpointAddress::new_in(0), TransferBuffer::In(&reply), reply.len())
//!     .unwrap();
//!
//! assert_eq!(dcd.hardware_mut().host_read_in(0), Some(reply.to_vec()));
//! dcd.handle_interrupt();
//! ```

pub mod capture;
pub mod constants;
pub mod dcd;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod hardware;
pub mod setup;
pub mod simulated;
