//! # Error Types
//!
//! Register-level failures ([`HardwareError`]) and how they surface from
//! the two fallible engine entry points: bring-up ([`InitError`]) and
//! transfer submission ([`SubmitError`]).

use thiserror::Error;

use super::endpoint::{Direction, EndpointAddress};
use super::event::BusEvent;

/// A register-level primitive did not succeed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    /// The endpoint FIFO still holds an unfinished transfer.
    #[error("endpoint FIFO is busy")]
    Busy,
    /// The endpoint answers every token with STALL.
    #[error("endpoint {0} is stalled")]
    Stalled(u8),
    /// The endpoint number is not implemented by the controller.
    #[error("endpoint {0} does not exist")]
    NoSuchEndpoint(u8),
    /// A setup packet was requested, but none is latched.
    #[error("no setup packet is latched")]
    NoSetupPacket,
    /// Any other error the controller reports.
    #[error("controller reported failure")]
    Failed,
}

/// Controller bring-up failed.
///
/// Initialization errors are fatal. There is no partially initialized
/// state to recover from; the engine stays unconfigured.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// `initialize` was called twice.
    #[error("controller is already initialized")]
    AlreadyInitialized,
    /// Clocks, power or the peripheral reset failed.
    #[error("failed to power up the controller")]
    Controller(#[source] HardwareError),
    /// Clearing or enabling one of the bus events failed.
    #[error("failed to register for {event:?} events")]
    Event {
        /// The event that could not be set up.
        event: BusEvent,
        /// What the controller reported.
        #[source]
        source: HardwareError,
    },
    /// The pull-up could not be enabled.
    #[error("failed to enable the pull-up")]
    Connect(#[source] HardwareError),
}

/// A transfer could not be started.
///
/// None of these are fatal. Retrying is up to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The engine has not been initialized.
    #[error("controller is not initialized")]
    NotInitialized,
    /// The endpoint number is beyond what the controller implements.
    #[error("{0} does not exist on this controller")]
    InvalidEndpoint(EndpointAddress),
    /// An IN endpoint was handed an OUT buffer or vice versa.
    #[error("{endpoint} cannot use a buffer meant for {buffer:?} transfers")]
    DirectionMismatch {
        /// The endpoint the transfer was submitted to.
        endpoint: EndpointAddress,
        /// The direction the buffer was created for.
        buffer: Direction,
    },
    /// The requested length does not fit into the buffer.
    #[error("requested {requested} bytes but the buffer holds {capacity}")]
    BufferTooSmall {
        /// Requested transfer length.
        requested: usize,
        /// Size of the buffer.
        capacity: usize,
    },
    /// The single request slot of the endpoint direction is taken.
    #[error("{0} already has a transfer in flight")]
    EndpointBusy(EndpointAddress),
    /// The controller did not accept the start.
    #[error("controller refused to start the transfer")]
    Hardware(#[from] HardwareError),
}
