//! # Endpoint Transfer Bookkeeping
//!
//! This module offers the per-endpoint request table of the transfer
//! engine.

use std::fmt;

use super::constants::{controller::MAX_ENDPOINTS, endpoint_address};

/// The direction of a transfer, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host-to-device.
    Out = 0,
    /// Device-to-host.
    In = 1,
}

impl Direction {
    const fn slot(self) -> usize {
        self as usize
    }
}

/// An endpoint number together with a direction.
///
/// The byte representation (see [`EndpointAddress::raw`]) follows the USB
/// convention: bit 7 is the direction, bits 3:0 the endpoint number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    number: u8,
    direction: Direction,
}

impl EndpointAddress {
    /// Create an address from its parts.
    ///
    /// Bits of `number` above the endpoint number field are discarded.
    #[must_use]
    pub const fn new(number: u8, direction: Direction) -> Self {
        Self {
            number: number & endpoint_address::NUMBER_MASK,
            direction,
        }
    }

    /// Shorthand for an IN endpoint address.
    #[must_use]
    pub const fn new_in(number: u8) -> Self {
        Self::new(number, Direction::In)
    }

    /// Shorthand for an OUT endpoint address.
    #[must_use]
    pub const fn new_out(number: u8) -> Self {
        Self::new(number, Direction::Out)
    }

    /// The endpoint number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.number
    }

    /// The transfer direction.
    #[must_use]
    pub const fn direction(self) -> Direction {
        self.direction
    }

    /// The USB byte representation of the address.
    #[must_use]
    pub const fn raw(self) -> u8 {
        match self.direction {
            Direction::In => self.number | endpoint_address::DIR_IN,
            Direction::Out => self.number,
        }
    }

    /// Whether this is one half of the default control endpoint.
    #[must_use]
    pub const fn is_control(self) -> bool {
        self.number == 0
    }
}

impl From<u8> for EndpointAddress {
    fn from(raw: u8) -> Self {
        let direction = if raw & endpoint_address::DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        };

        Self::new(raw, direction)
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::In => "IN",
            Direction::Out => "OUT",
        };
        write!(f, "EP{} {}", self.number, dir)
    }
}

/// The caller's memory a transfer moves data from or to.
///
/// The engine only borrows it. The borrow ends when the request
/// completes or is discarded.
#[derive(Debug)]
pub enum TransferBuffer<'b> {
    /// Data to send to the host.
    In(&'b [u8]),
    /// Space for data received from the host.
    Out(&'b mut [u8]),
}

impl TransferBuffer<'_> {
    /// The direction this buffer can serve.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self {
            Self::In(_) => Direction::In,
            Self::Out(_) => Direction::Out,
        }
    }

    /// The capacity of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::In(data) => data.len(),
            Self::Out(data) => data.len(),
        }
    }

    /// Whether the buffer has no room at all (zero-length packets).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One pending data movement on one endpoint.
#[derive(Debug)]
pub struct TransferRequest<'b> {
    /// Where the transfer happens.
    pub endpoint: EndpointAddress,
    /// The caller's buffer.
    pub buffer: TransferBuffer<'b>,
    /// How many bytes the caller asked for.
    pub requested: usize,
    /// How many bytes actually moved. Only meaningful on completion.
    pub actual: usize,
}

impl<'b> TransferRequest<'b> {
    /// Create a request that has not moved any data yet.
    #[must_use]
    pub fn new(endpoint: EndpointAddress, buffer: TransferBuffer<'b>, requested: usize) -> Self {
        Self {
            endpoint,
            buffer,
            requested,
            actual: 0,
        }
    }
}

/// A request slot was already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOccupied {}

/// The pending request table.
///
/// The controller has a single request slot per endpoint and direction, so
/// the table is a fixed arena indexed by endpoint number. Slots are only
/// filled when empty; a filled slot can only be emptied by taking the
/// request out or by clearing the whole table.
#[derive(Debug)]
pub struct EndpointTable<'b> {
    slots: [[Option<TransferRequest<'b>>; 2]; MAX_ENDPOINTS],
}

impl Default for EndpointTable<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'b> EndpointTable<'b> {
    /// Create a table without any pending requests.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| [None, None]),
        }
    }

    /// Whether the controller has an endpoint with this number.
    #[must_use]
    pub const fn contains(endpoint: EndpointAddress) -> bool {
        (endpoint.number() as usize) < MAX_ENDPOINTS
    }

    fn slot(&self, endpoint: EndpointAddress) -> Option<&Option<TransferRequest<'b>>> {
        self.slots
            .get(endpoint.number() as usize)
            .map(|pair| &pair[endpoint.direction().slot()])
    }

    fn slot_mut(&mut self, endpoint: EndpointAddress) -> Option<&mut Option<TransferRequest<'b>>> {
        self.slots
            .get_mut(endpoint.number() as usize)
            .map(|pair| &mut pair[endpoint.direction().slot()])
    }

    /// Whether a request is pending on the endpoint.
    #[must_use]
    pub fn is_pending(&self, endpoint: EndpointAddress) -> bool {
        self.slot(endpoint).is_some_and(Option::is_some)
    }

    /// Put a request into its slot.
    ///
    /// Never overwrites a pending request; the rejected request is handed
    /// back instead.
    pub fn insert(
        &mut self,
        request: TransferRequest<'b>,
    ) -> Result<(), (SlotOccupied, TransferRequest<'b>)> {
        let Some(slot) = self.slot_mut(request.endpoint) else {
            return Err((SlotOccupied {}, request));
        };
        if slot.is_some() {
            return Err((SlotOccupied {}, request));
        }

        *slot = Some(request);
        Ok(())
    }

    /// Remove and return the pending request of an endpoint.
    pub fn take(&mut self, endpoint: EndpointAddress) -> Option<TransferRequest<'b>> {
        self.slot_mut(endpoint).and_then(Option::take)
    }

    /// Drop every pending request and return how many there were.
    pub fn clear(&mut self) -> usize {
        self.slots
            .iter_mut()
            .flatten()
            .filter_map(Option::take)
            .count()
    }

    /// The number of pending requests.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots.iter().flatten().filter(|slot| slot.is_some()).count()
    }
}
