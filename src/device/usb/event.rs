//! # Events
//!
//! Two kinds of events pass through the transfer engine:
//!
//! - [`HardwareEvent`]s arrive from the controller interrupt,
//! - [`DcdEvent`]s are what the engine reports upstream through an
//!   [`EventSink`].

use std::fmt::Debug;
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::warn;

use super::{constants::SETUP_PACKET_SIZE, endpoint::EndpointAddress};

/// The bus-level conditions the controller can raise an interrupt for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusEvent {
    /// The host started a bus reset (BRST).
    BusReset,
    /// Bus activity / start of frame (DPACT).
    StartOfFrame,
    /// The bus has been idle long enough to suspend (SUSP).
    Suspend,
    /// A setup packet has been latched (SUDAV).
    SetupAvailable,
    /// The bus reset finished (BRSTDN).
    BusResetDone,
    /// Resume signaling finished (RWUDN).
    Wakeup,
    /// VBUS went away (NOVBUS).
    NoVbus,
    /// VBUS is present (VBUS).
    Vbus,
}

impl BusEvent {
    /// Every bus event, in the order the engine registers them.
    pub const ALL: [Self; 8] = [
        Self::BusReset,
        Self::StartOfFrame,
        Self::Suspend,
        Self::SetupAvailable,
        Self::BusResetDone,
        Self::Wakeup,
        Self::NoVbus,
        Self::Vbus,
    ];
}

/// An event as the interrupt handler sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    /// A bus-level condition.
    Bus(BusEvent),
    /// An endpoint FIFO finished moving data.
    TransferComplete {
        /// The endpoint and direction that completed.
        endpoint: EndpointAddress,
        /// The byte count the controller reports.
        count: usize,
    },
}

impl From<BusEvent> for HardwareEvent {
    fn from(event: BusEvent) -> Self {
        Self::Bus(event)
    }
}

/// The outcome of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferResult {
    /// All data moved as requested (or a short OUT packet ended it).
    Success,
    /// The transfer finished, but the data cannot be trusted.
    Failed,
}

/// Signals for the upstream USB stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcdEvent {
    /// The host issued a bus reset.
    BusReset,
    /// A start-of-frame was observed.
    StartOfFrame,
    /// The bus is suspended.
    Suspend,
    /// Bus activity resumed after a suspend.
    Resume,
    /// The device was disconnected.
    Unplugged,
    /// A new control request, in wire layout.
    SetupReceived([u8; SETUP_PACKET_SIZE]),
    /// An IN or OUT transfer finished.
    TransferComplete {
        /// The endpoint the transfer was submitted to.
        endpoint: EndpointAddress,
        /// How many bytes moved.
        length: usize,
        /// How it went.
        result: TransferResult,
    },
}

/// The upstream half of the driver.
///
/// The engine calls [`EventSink::signal`] from interrupt context, so
/// implementations must return quickly and must not call back into the
/// engine. Stacks that need to do real work should hand the event over to
/// their task context, e.g. with a [`ChannelSink`].
pub trait EventSink: Debug {
    /// Deliver one event.
    fn signal(&mut self, event: DcdEvent);
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn signal(&mut self, event: DcdEvent) {
        (**self).signal(event);
    }
}

/// Recording sink. Mostly useful for tests.
impl EventSink for Vec<DcdEvent> {
    fn signal(&mut self, event: DcdEvent) {
        self.push(event);
    }
}

/// A sink that defers processing to whoever holds the matching
/// [`Receiver`].
///
/// Sending never blocks. Events sent after the receiver is gone are
/// dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<DcdEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its queue.
    #[must_use]
    pub fn new() -> (Self, Receiver<DcdEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn signal(&mut self, event: DcdEvent) {
        if self.sender.send(event).is_err() {
            warn!("dropping {:?}, nobody is listening", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_hands_over_in_order() {
        let (mut sink, receiver) = ChannelSink::new();

        sink.signal(DcdEvent::BusReset);
        sink.signal(DcdEvent::Suspend);

        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![DcdEvent::BusReset, DcdEvent::Suspend]
        );
    }

    #[test]
    fn channel_sink_survives_a_dropped_receiver() {
        let (mut sink, receiver) = ChannelSink::new();
        drop(receiver);

        sink.signal(DcdEvent::Unplugged);
    }

    #[test]
    fn boxed_sinks_forward() {
        let mut sink: Box<dyn EventSink> = Box::new(ChannelSink::new().0);

        // The receiver is already gone, so this only must not panic.
        sink.signal(DcdEvent::StartOfFrame);
    }
}
