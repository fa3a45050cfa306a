//! # USB Constants
//!
//! This module collects USB related constants. All definitions are derived
//! from Chapter 9 of the "Universal Serial Bus Specification Revision 2.0",
//! except for the controller limits, which describe the MAX32690 device
//! controller.

// Allow missing docs to avoid duplicating the USB spec for all constants.
#![allow(missing_docs)]

/// The size of a setup packet in bytes.
pub const SETUP_PACKET_SIZE: usize = 8;

/// The highest address a device can be assigned with SET_ADDRESS.
pub const MAX_DEVICE_ADDRESS: u8 = 127;

/// Limits of the device controller.
pub mod controller {
    /// Number of endpoints the controller implements, including EP0.
    pub const MAX_ENDPOINTS: usize = 12;

    /// Maximum packet size of the default control endpoint.
    pub const EP0_MAX_PACKET_SIZE: u16 = 64;
}

/// Fields of the `bmRequestType` byte.
pub mod request_type {
    /// Data phase direction: device-to-host.
    pub const DIR_IN: u8 = 0x80;
    pub const DIR_MASK: u8 = 0x80;

    pub const TYPE_MASK: u8 = 0x60;
    pub const TYPE_STANDARD: u8 = 0x00;
    pub const TYPE_CLASS: u8 = 0x20;
    pub const TYPE_VENDOR: u8 = 0x40;

    pub const RECIPIENT_MASK: u8 = 0x1f;
    pub const RECIPIENT_DEVICE: u8 = 0x00;
    pub const RECIPIENT_INTERFACE: u8 = 0x01;
    pub const RECIPIENT_ENDPOINT: u8 = 0x02;
    pub const RECIPIENT_OTHER: u8 = 0x03;
}

/// Standard request codes (`bRequest`), Table 9-4.
pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_DESCRIPTOR: u8 = 0x07;
    pub const GET_CONFIGURATION: u8 = 0x08;
    pub const SET_CONFIGURATION: u8 = 0x09;
}

/// Descriptor types, Table 9-5.
pub mod descriptor_type {
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const STRING: u8 = 0x03;
}

/// Layout of an endpoint address byte.
pub mod endpoint_address {
    /// Bit 7 set means IN (device-to-host).
    pub const DIR_IN: u8 = 0x80;
    pub const NUMBER_MASK: u8 = 0x0f;
}
