//! # Simulated Device Controller
//!
//! An in-memory controller implementing [`UsbHardware`]. Besides the
//! device-side register primitives it offers a host-side API (the
//! `host_*` methods) that plays the part of the bus: latching setup
//! packets, collecting IN data, delivering OUT data and raising bus events.
//!
//! Failures can be injected with [`SimulatedController::inject_fault`].

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::{
    constants::controller::MAX_ENDPOINTS,
    endpoint::EndpointAddress,
    error::HardwareError,
    event::{BusEvent, HardwareEvent},
    hardware::{HardwareOptions, UsbHardware},
    setup::SetupPacket,
};

/// A one-shot failure of a register primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// [`UsbHardware::init`] fails.
    Init,
    /// Enabling this event fails.
    EnableEvent(BusEvent),
    /// [`UsbHardware::connect`] fails.
    Connect,
    /// [`UsbHardware::read_setup`] fails.
    ReadSetup,
    /// Starting the next transfer fails.
    StartTransfer,
    /// [`UsbHardware::set_function_address`] fails.
    SetAddress,
}

/// An OUT FIFO.
#[derive(Debug, Clone, Default)]
struct OutFifo {
    /// Maximum accepted length when armed.
    armed: Option<usize>,
    /// Received and not yet drained data.
    data: Vec<u8>,
}

/// The simulated controller. See the module documentation.
#[derive(Debug, Clone, Default)]
pub struct SimulatedController {
    options: Option<HardwareOptions>,
    connected: bool,
    function_address: u8,
    /// History of every function address write.
    address_writes: Vec<u8>,
    enabled_events: Vec<BusEvent>,
    pending: VecDeque<HardwareEvent>,
    setup: Option<SetupPacket>,
    stalled: [bool; MAX_ENDPOINTS],
    in_fifos: [Option<Vec<u8>>; MAX_ENDPOINTS],
    out_fifos: [OutFifo; MAX_ENDPOINTS],
    remote_wakeups: usize,
    faults: Vec<Fault>,
}

impl SimulatedController {
    /// Create a powered-down controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next use of a primitive fail.
    pub fn inject_fault(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        self.faults
            .iter()
            .position(|f| *f == fault)
            .map(|pos| self.faults.remove(pos))
            .is_some()
    }

    fn check_endpoint(endpoint: u8) -> Result<usize, HardwareError> {
        let index = usize::from(endpoint);
        if index < MAX_ENDPOINTS {
            Ok(index)
        } else {
            Err(HardwareError::NoSuchEndpoint(endpoint))
        }
    }

    fn check_start(&mut self, endpoint: u8) -> Result<usize, HardwareError> {
        let index = Self::check_endpoint(endpoint)?;

        if self.take_fault(Fault::StartTransfer) {
            return Err(HardwareError::Failed);
        }
        if self.stalled[index] {
            return Err(HardwareError::Stalled(endpoint));
        }

        Ok(index)
    }

    /// Abort everything the FIFOs hold, including completions nobody has
    /// picked up yet.
    fn flush_fifos(&mut self) {
        self.in_fifos = Default::default();
        self.out_fifos = Default::default();
        self.pending
            .retain(|event| !matches!(event, HardwareEvent::TransferComplete { .. }));
    }

    /// Options the controller was initialized with, if any.
    #[must_use]
    pub const fn options(&self) -> Option<HardwareOptions> {
        self.options
    }

    /// Whether the pull-up is enabled.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// The current content of the function address register.
    #[must_use]
    pub const fn function_address(&self) -> u8 {
        self.function_address
    }

    /// Every value ever written to the function address register.
    #[must_use]
    pub fn address_writes(&self) -> &[u8] {
        &self.address_writes
    }

    /// Whether the bus event is enabled.
    #[must_use]
    pub fn is_event_enabled(&self, event: BusEvent) -> bool {
        self.enabled_events.contains(&event)
    }

    /// Whether the endpoint is stalled.
    #[must_use]
    pub fn is_stalled(&self, endpoint: u8) -> bool {
        self.stalled.get(usize::from(endpoint)).copied().unwrap_or(false)
    }

    /// How often remote wakeup was signaled.
    #[must_use]
    pub const fn remote_wakeups(&self) -> usize {
        self.remote_wakeups
    }

    /// Whether the controller would raise its interrupt.
    #[must_use]
    pub fn interrupt_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Raise a bus event. Events that are not enabled are dropped.
    pub fn host_raise(&mut self, event: BusEvent) {
        if self.is_event_enabled(event) {
            trace!("raising {:?}", event);
            self.pending.push_back(event.into());
        } else {
            trace!("{:?} is not enabled, dropping it", event);
        }
    }

    /// Drive a bus reset.
    ///
    /// Like real hardware, the controller aborts all transfers and falls
    /// back to address 0. Raises both edges of the reset.
    pub fn host_bus_reset(&mut self) {
        self.flush_fifos();
        self.function_address = 0;
        self.host_raise(BusEvent::BusReset);
        self.host_raise(BusEvent::BusResetDone);
    }

    /// Latch a setup packet and raise [`BusEvent::SetupAvailable`].
    ///
    /// A setup packet ends whatever control transfer was going on, so the
    /// EP0 FIFOs lose their content. Completions already raised stay.
    pub fn host_setup(&mut self, packet: SetupPacket) {
        self.in_fifos[0] = None;
        self.out_fifos[0] = OutFifo::default();
        self.setup = Some(packet);
        self.host_raise(BusEvent::SetupAvailable);
    }

    /// Collect the data of an armed IN FIFO.
    ///
    /// Queues the matching transfer completion. Returns `None` if the
    /// FIFO is not armed, which the host would see as a NAK.
    pub fn host_read_in(&mut self, endpoint: u8) -> Option<Vec<u8>> {
        let data = self.in_fifos.get_mut(usize::from(endpoint))?.take()?;

        self.pending.push_back(HardwareEvent::TransferComplete {
            endpoint: EndpointAddress::new_in(endpoint),
            count: data.len(),
        });

        Some(data)
    }

    /// Deliver data into an armed OUT FIFO.
    ///
    /// Queues the matching transfer completion with the full count the
    /// host sent. Returns `false` if the FIFO is not armed (NAK).
    pub fn host_write_out(&mut self, endpoint: u8, data: &[u8]) -> bool {
        let Some(fifo) = self.out_fifos.get_mut(usize::from(endpoint)) else {
            return false;
        };
        if fifo.armed.take().is_none() {
            return false;
        }

        fifo.data = data.to_vec();
        self.pending.push_back(HardwareEvent::TransferComplete {
            endpoint: EndpointAddress::new_out(endpoint),
            count: data.len(),
        });

        true
    }
}

impl UsbHardware for SimulatedController {
    fn init(&mut self, options: &HardwareOptions) -> Result<(), HardwareError> {
        if self.take_fault(Fault::Init) {
            return Err(HardwareError::Failed);
        }

        debug!("powering up with {:?}", options);
        *self = Self {
            options: Some(*options),
            faults: std::mem::take(&mut self.faults),
            ..Self::default()
        };

        Ok(())
    }

    fn clear_event(&mut self, event: BusEvent) -> Result<(), HardwareError> {
        self.pending.retain(|pending| *pending != HardwareEvent::Bus(event));
        Ok(())
    }

    fn enable_event(&mut self, event: BusEvent) -> Result<(), HardwareError> {
        if self.take_fault(Fault::EnableEvent(event)) {
            return Err(HardwareError::Failed);
        }
        if !self.enabled_events.contains(&event) {
            self.enabled_events.push(event);
        }
        Ok(())
    }

    fn next_event(&mut self) -> Option<HardwareEvent> {
        self.pending.pop_front()
    }

    fn connect(&mut self) -> Result<(), HardwareError> {
        if self.take_fault(Fault::Connect) {
            return Err(HardwareError::Failed);
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), HardwareError> {
        self.connected = false;
        self.flush_fifos();
        Ok(())
    }

    fn remote_wakeup(&mut self) -> Result<(), HardwareError> {
        self.remote_wakeups += 1;
        Ok(())
    }

    fn stall(&mut self, endpoint: u8) -> Result<(), HardwareError> {
        let index = Self::check_endpoint(endpoint)?;
        self.stalled[index] = true;
        Ok(())
    }

    fn unstall(&mut self, endpoint: u8) -> Result<(), HardwareError> {
        let index = Self::check_endpoint(endpoint)?;
        self.stalled[index] = false;
        Ok(())
    }

    fn set_function_address(&mut self, address: u8) -> Result<(), HardwareError> {
        if self.take_fault(Fault::SetAddress) {
            return Err(HardwareError::Failed);
        }
        self.function_address = address;
        self.address_writes.push(address);
        Ok(())
    }

    fn read_setup(&mut self) -> Result<SetupPacket, HardwareError> {
        if self.take_fault(Fault::ReadSetup) {
            return Err(HardwareError::Failed);
        }
        self.setup.take().ok_or(HardwareError::NoSetupPacket)
    }

    fn write_endpoint(&mut self, endpoint: u8, data: &[u8]) -> Result<(), HardwareError> {
        let index = self.check_start(endpoint)?;
        let fifo = &mut self.in_fifos[index];

        if fifo.is_some() {
            return Err(HardwareError::Busy);
        }
        *fifo = Some(data.to_vec());

        Ok(())
    }

    fn arm_endpoint(&mut self, endpoint: u8, length: usize) -> Result<(), HardwareError> {
        let index = self.check_start(endpoint)?;
        let fifo = &mut self.out_fifos[index];

        if fifo.armed.is_some() {
            return Err(HardwareError::Busy);
        }
        fifo.armed = Some(length);
        fifo.data.clear();

        Ok(())
    }

    fn abort_endpoint(&mut self, endpoint: u8) -> Result<(), HardwareError> {
        let index = Self::check_endpoint(endpoint)?;

        trace!("aborting EP{}", endpoint);
        self.in_fifos[index] = None;
        self.out_fifos[index] = OutFifo::default();
        self.pending.retain(|event| match event {
            HardwareEvent::TransferComplete { endpoint: ep, .. } => ep.number() != endpoint,
            HardwareEvent::Bus(_) => true,
        });

        Ok(())
    }

    fn read_endpoint(&mut self, endpoint: u8, buffer: &mut [u8]) -> Result<usize, HardwareError> {
        let index = Self::check_endpoint(endpoint)?;
        let data = std::mem::take(&mut self.out_fifos[index].data);
        let count = data.len().min(buffer.len());

        buffer[..count].copy_from_slice(&data[..count]);

        Ok(count)
    }
}
