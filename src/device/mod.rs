//! # Device Code
//!
//! Everything that talks to (or pretends to be) the USB peripheral.

pub mod interrupt_line;
pub mod usb;
