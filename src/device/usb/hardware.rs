//! # Controller Hardware Interface
//!
//! This module contains the register-level primitives the transfer engine
//! needs from a device controller. See [`UsbHardware`].

use std::fmt::Debug;

use super::{
    error::HardwareError,
    event::{BusEvent, HardwareEvent},
    setup::SetupPacket,
};

/// Options for bringing up the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareOptions {
    /// Negotiate high speed (480 Mbps) during reset. Otherwise the
    /// controller stays at full speed.
    pub enable_high_speed: bool,
}

impl Default for HardwareOptions {
    fn default() -> Self {
        Self {
            enable_high_speed: true,
        }
    }
}

/// The interface a device controller has to implement to be driven by the
/// transfer engine.
///
/// All methods are plain register accesses. None of them may block or wait
/// for bus activity; completion of anything that involves the host is
/// reported later through [`UsbHardware::next_event`].
///
/// Endpoint arguments are endpoint numbers. Each endpoint has one FIFO per
/// direction.
pub trait UsbHardware: Debug {
    /// Enable clocks and power, reset the peripheral and configure it.
    fn init(&mut self, options: &HardwareOptions) -> Result<(), HardwareError>;

    /// Acknowledge a latched bus event without handling it.
    fn clear_event(&mut self, event: BusEvent) -> Result<(), HardwareError>;

    /// Let a bus event raise the controller interrupt.
    fn enable_event(&mut self, event: BusEvent) -> Result<(), HardwareError>;

    /// Take the next pending event and clear its interrupt flag.
    ///
    /// Returns `None` once nothing is pending anymore. Only enabled bus
    /// events are reported; transfer completions are always reported.
    fn next_event(&mut self) -> Option<HardwareEvent>;

    /// Enable the D+ pull-up so the host sees the device.
    fn connect(&mut self) -> Result<(), HardwareError>;

    /// Disable the D+ pull-up.
    fn disconnect(&mut self) -> Result<(), HardwareError>;

    /// Signal remote wakeup (resume K-state) to the host.
    fn remote_wakeup(&mut self) -> Result<(), HardwareError>;

    /// Set the STALL condition on both directions of an endpoint.
    fn stall(&mut self, endpoint: u8) -> Result<(), HardwareError>;

    /// Clear the STALL condition of an endpoint.
    fn unstall(&mut self, endpoint: u8) -> Result<(), HardwareError>;

    /// Program the function address register.
    fn set_function_address(&mut self, address: u8) -> Result<(), HardwareError>;

    /// Read the latched setup packet.
    fn read_setup(&mut self) -> Result<SetupPacket, HardwareError>;

    /// Load an IN FIFO and arm it for transmission.
    ///
    /// An empty `data` arms a zero-length packet.
    fn write_endpoint(&mut self, endpoint: u8, data: &[u8]) -> Result<(), HardwareError>;

    /// Arm an OUT FIFO to receive up to `length` bytes.
    fn arm_endpoint(&mut self, endpoint: u8, length: usize) -> Result<(), HardwareError>;

    /// Flush both FIFOs of an endpoint and clear its completion flags.
    ///
    /// Whatever the FIFOs held is lost. No completion is reported for it
    /// afterwards.
    fn abort_endpoint(&mut self, endpoint: u8) -> Result<(), HardwareError>;

    /// Drain a completed OUT FIFO into `buffer`.
    ///
    /// Returns the number of bytes copied.
    fn read_endpoint(&mut self, endpoint: u8, buffer: &mut [u8]) -> Result<usize, HardwareError>;
}
