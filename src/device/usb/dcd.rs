//! The USB device transfer engine.
//!
//! [`DeviceController`] sits between a device controller ([`UsbHardware`])
//! and an upstream USB stack ([`EventSink`]). It translates controller
//! interrupts into upstream signals and keeps the single in-flight request
//! per endpoint and direction until the controller reports completion.
//!
//! ## SET_ADDRESS
//!
//! The function address must not change before the zero-length status
//! stage of SET_ADDRESS has been acknowledged, otherwise the handshake goes
//! out with the new address and the host gives up on enumeration.
//! [`DeviceController::set_address`] therefore only records the address.
//! The register is written by the completion handler of the next EP0 IN
//! transfer, before that completion is reported upstream.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::device::interrupt_line::{InterruptLine, SoftInterruptLine};

use super::{
    constants::{controller::MAX_ENDPOINTS, MAX_DEVICE_ADDRESS},
    endpoint::{Direction, EndpointAddress, EndpointTable, TransferBuffer, TransferRequest},
    error::{HardwareError, InitError, SubmitError},
    event::{BusEvent, DcdEvent, EventSink, HardwareEvent, TransferResult},
    hardware::{HardwareOptions, UsbHardware},
};

/// The device state as far as the engine tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// `initialize` has not succeeded yet.
    Unconfigured,
    /// Attached and at the default address.
    Connected,
    /// A SET_ADDRESS has taken effect.
    Addressed,
    /// The bus is suspended.
    Suspended,
}

/// Counters for errors that are not reported to anybody.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    /// Setup-available events whose packet could not be read.
    pub setup_read_failures: usize,
    /// Completions without a matching pending request.
    pub spurious_completions: usize,
    /// Deferred address writes the controller refused.
    pub address_write_failures: usize,
    /// The most recent of the errors above.
    pub last_error: Option<HardwareError>,
}

/// The USB device transfer engine.
///
/// `'b` is the lifetime of the buffers handed to
/// [`DeviceController::submit_transfer`].
#[derive(Debug)]
pub struct DeviceController<'b, H: UsbHardware, S: EventSink> {
    /// The controller registers.
    hardware: H,

    /// Where upstream signals go.
    sink: S,

    /// Options for `initialize`.
    options: HardwareOptions,

    /// Gates the controller interrupt.
    interrupt_line: Arc<dyn InterruptLine>,

    /// One request slot per endpoint and direction.
    endpoints: EndpointTable<'b>,

    state: DeviceState,

    /// State to return to when the bus resumes.
    resume_state: DeviceState,

    /// Address to program once the EP0 status stage completes.
    pending_address: Option<u8>,

    /// A bus reset has been signaled and BRSTDN is still outstanding.
    reset_signaled: bool,

    errors: ErrorCounters,
}

impl<'b, H: UsbHardware, S: EventSink> DeviceController<'b, H, S> {
    /// Create an unconfigured engine.
    ///
    /// Nothing touches the hardware before [`DeviceController::initialize`].
    #[must_use]
    pub fn new(hardware: H, sink: S, options: HardwareOptions) -> Self {
        Self {
            hardware,
            sink,
            options,
            interrupt_line: Arc::new(SoftInterruptLine::new()),
            endpoints: EndpointTable::new(),
            state: DeviceState::Unconfigured,
            resume_state: DeviceState::Unconfigured,
            pending_address: None,
            reset_signaled: false,
            errors: ErrorCounters::default(),
        }
    }

    /// Configure the interrupt line of the controller.
    pub fn connect_irq(&mut self, irq: Arc<dyn InterruptLine>) {
        self.interrupt_line = irq;
    }

    /// The current device state.
    #[must_use]
    pub const fn state(&self) -> DeviceState {
        self.state
    }

    /// The address waiting for its status stage, if any.
    #[must_use]
    pub const fn pending_address(&self) -> Option<u8> {
        self.pending_address
    }

    /// Errors that were counted instead of reported.
    #[must_use]
    pub const fn error_counters(&self) -> ErrorCounters {
        self.errors
    }

    /// Whether a request is in flight on the endpoint.
    #[must_use]
    pub fn is_pending(&self, endpoint: EndpointAddress) -> bool {
        self.endpoints.is_pending(endpoint)
    }

    /// Access the controller.
    #[must_use]
    pub const fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Access the controller mutably.
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    /// Access the upstream sink.
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Access the upstream sink mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Bring up the controller.
    ///
    /// Powers the controller, registers for every [`BusEvent`] and enables
    /// the pull-up. Any failure is fatal: the engine stays
    /// [`DeviceState::Unconfigured`] and the caller is expected to abort
    /// device bring-up.
    pub fn initialize(&mut self) -> Result<(), InitError> {
        if self.state != DeviceState::Unconfigured {
            return Err(InitError::AlreadyInitialized);
        }

        info!("initializing USB device controller");

        self.hardware
            .init(&self.options)
            .map_err(InitError::Controller)?;

        for event in BusEvent::ALL {
            self.hardware
                .clear_event(event)
                .and_then(|()| self.hardware.enable_event(event))
                .map_err(|source| InitError::Event { event, source })?;
        }

        self.hardware.connect().map_err(InitError::Connect)?;

        self.state = DeviceState::Connected;
        debug!("controller is up and connected");

        Ok(())
    }

    /// Allow the controller interrupt.
    pub fn enable_interrupts(&self) {
        self.interrupt_line.enable();
    }

    /// Block the controller interrupt.
    pub fn disable_interrupts(&self) {
        self.interrupt_line.disable();
    }

    /// Run `f` with the controller interrupt masked.
    ///
    /// The previous mask state is restored afterwards.
    fn with_interrupt_masked<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_enabled = self.interrupt_line.is_enabled();
        self.interrupt_line.disable();

        let result = f(self);

        if was_enabled {
            self.interrupt_line.enable();
        }
        result
    }

    /// Set STALL on an endpoint. Stalling twice is harmless.
    pub fn stall(&mut self, endpoint: EndpointAddress) -> Result<(), HardwareError> {
        trace!("stalling {}", endpoint);
        self.hardware.stall(endpoint.number())
    }

    /// Clear STALL on an endpoint.
    pub fn clear_stall(&mut self, endpoint: EndpointAddress) -> Result<(), HardwareError> {
        trace!("clearing stall on {}", endpoint);
        self.hardware.unstall(endpoint.number())
    }

    /// Record the address assigned by SET_ADDRESS.
    ///
    /// The address is programmed when the status stage (the next EP0 IN
    /// completion) has gone out. Addresses beyond 127 are ignored.
    pub fn set_address(&mut self, address: u8) {
        if address > MAX_DEVICE_ADDRESS {
            warn!("ignoring invalid device address {}", address);
            return;
        }

        debug!("deferring address {} until the status stage completes", address);
        self.pending_address = Some(address);
    }

    /// Signal remote wakeup to the host.
    pub fn remote_wakeup(&mut self) -> Result<(), HardwareError> {
        debug!("signaling remote wakeup");
        self.hardware.remote_wakeup()
    }

    /// Enable the pull-up.
    pub fn connect(&mut self) -> Result<(), HardwareError> {
        self.hardware.connect()
    }

    /// Disable the pull-up and tell upstream the device is gone.
    pub fn disconnect(&mut self) -> Result<(), HardwareError> {
        self.hardware.disconnect()?;
        self.reset_signaled = false;
        self.sink.signal(DcdEvent::Unplugged);
        Ok(())
    }

    /// Start a transfer.
    ///
    /// `length` bytes of `buffer` are sent (IN) or received (OUT). The
    /// buffer stays borrowed until the matching completion is signaled or
    /// the request is discarded. Never blocks.
    ///
    /// At most one request can be in flight per endpoint and direction. A
    /// second submission is rejected with [`SubmitError::EndpointBusy`] and
    /// leaves the first one alone.
    pub fn submit_transfer(
        &mut self,
        endpoint: EndpointAddress,
        buffer: TransferBuffer<'b>,
        length: usize,
    ) -> Result<(), SubmitError> {
        if self.state == DeviceState::Unconfigured {
            return Err(SubmitError::NotInitialized);
        }
        if !EndpointTable::contains(endpoint) {
            return Err(SubmitError::InvalidEndpoint(endpoint));
        }
        if buffer.direction() != endpoint.direction() {
            return Err(SubmitError::DirectionMismatch {
                endpoint,
                buffer: buffer.direction(),
            });
        }
        if length > buffer.len() {
            return Err(SubmitError::BufferTooSmall {
                requested: length,
                capacity: buffer.len(),
            });
        }

        let result =
            self.with_interrupt_masked(|dcd| dcd.start_transfer(endpoint, buffer, length));

        match &result {
            Ok(()) => trace!("started {} byte transfer on {}", length, endpoint),
            Err(err) => debug!("transfer on {} not started: {}", endpoint, err),
        }
        result
    }

    fn start_transfer(
        &mut self,
        endpoint: EndpointAddress,
        buffer: TransferBuffer<'b>,
        length: usize,
    ) -> Result<(), SubmitError> {
        if self.endpoints.is_pending(endpoint) {
            return Err(SubmitError::EndpointBusy(endpoint));
        }

        match &buffer {
            TransferBuffer::In(data) => self
                .hardware
                .write_endpoint(endpoint.number(), &data[..length])?,
            TransferBuffer::Out(_) => self.hardware.arm_endpoint(endpoint.number(), length)?,
        }

        self.endpoints
            .insert(TransferRequest::new(endpoint, buffer, length))
            .map_err(|_| SubmitError::EndpointBusy(endpoint))
    }

    /// Forget every in-flight request without reporting it.
    ///
    /// Used on the hard shutdown path. The buffers are released and the
    /// FIFOs of the affected endpoints are flushed, the same as a
    /// disconnect would do. Completions the controller raised for the
    /// discarded requests are dropped with them, so a later request on
    /// the same endpoint only ever sees its own completion.
    pub fn close_all_endpoints(&mut self) {
        let dropped = self.with_interrupt_masked(|dcd| {
            (0..MAX_ENDPOINTS as u8)
                .map(|number| dcd.discard_endpoint(number))
                .sum::<usize>()
        });

        if dropped > 0 {
            debug!("discarded {} pending transfers", dropped);
        }
    }

    /// The interrupt service entry: handle everything the controller has
    /// pending.
    pub fn handle_interrupt(&mut self) {
        while let Some(event) = self.hardware.next_event() {
            self.on_hardware_event(event);
        }
    }

    /// Handle a single controller event.
    ///
    /// Runs in interrupt context and never blocks.
    pub fn on_hardware_event(&mut self, event: HardwareEvent) {
        if self.state == DeviceState::Unconfigured {
            warn!("ignoring {:?} on an unconfigured controller", event);
            return;
        }

        trace!("handling {:?}", event);

        match event {
            HardwareEvent::Bus(BusEvent::BusReset) => self.bus_reset(),
            HardwareEvent::Bus(BusEvent::BusResetDone) => {
                // Resets are edge-triggered. Only report one if BRST
                // slipped by.
                if !self.reset_signaled {
                    self.bus_reset();
                }
                self.reset_signaled = false;
            }
            HardwareEvent::Bus(BusEvent::StartOfFrame) => {
                self.resume();
                self.sink.signal(DcdEvent::StartOfFrame);
            }
            HardwareEvent::Bus(BusEvent::Suspend) => {
                if self.state != DeviceState::Suspended {
                    self.resume_state = self.state;
                    self.state = DeviceState::Suspended;
                }
                self.sink.signal(DcdEvent::Suspend);
            }
            HardwareEvent::Bus(BusEvent::SetupAvailable) => self.setup_available(),
            HardwareEvent::Bus(BusEvent::Wakeup) => self.resume(),
            HardwareEvent::Bus(BusEvent::NoVbus) => {
                info!("VBUS lost");
                self.reset_signaled = false;
                self.discard_transfers();
                self.sink.signal(DcdEvent::Unplugged);
            }
            HardwareEvent::Bus(BusEvent::Vbus) => debug!("VBUS present"),
            HardwareEvent::TransferComplete { endpoint, count } => {
                self.transfer_complete(endpoint, count)
            }
        }
    }

    fn bus_reset(&mut self) {
        debug!("bus reset");

        self.reset_signaled = true;
        self.pending_address = None;
        self.state = DeviceState::Connected;
        self.discard_transfers();

        self.sink.signal(DcdEvent::BusReset);
    }

    fn discard_transfers(&mut self) {
        let dropped = self.endpoints.clear();
        if dropped > 0 {
            debug!("controller aborted {} pending transfers", dropped);
        }
    }

    /// Drop the requests of one endpoint and flush its FIFOs. Returns how
    /// many requests were dropped.
    fn discard_endpoint(&mut self, number: u8) -> usize {
        let dropped = [EndpointAddress::new_in(number), EndpointAddress::new_out(number)]
            .into_iter()
            .filter(|endpoint| self.endpoints.take(*endpoint).is_some())
            .count();

        if dropped > 0 {
            if let Err(err) = self.hardware.abort_endpoint(number) {
                warn!("failed to abort EP{}: {}", number, err);
                self.errors.last_error = Some(err);
            }
        }
        dropped
    }

    fn resume(&mut self) {
        if self.state == DeviceState::Suspended {
            debug!("bus resumed");
            self.state = self.resume_state;
            self.sink.signal(DcdEvent::Resume);
        }
    }

    fn setup_available(&mut self) {
        let packet = match self.hardware.read_setup() {
            Ok(packet) => packet,
            Err(err) => {
                // The host retries the control transfer after its timeout.
                warn!("failed to read setup packet: {}", err);
                self.errors.setup_read_failures += 1;
                self.errors.last_error = Some(err);
                return;
            }
        };

        // A setup packet ends any previous control transfer.
        if self.pending_address.take().is_some() {
            debug!("new control transfer cancels the pending SET_ADDRESS");
        }
        if self.discard_endpoint(0) > 0 {
            debug!("new control transfer aborts the previous one");
        }

        trace!("setup {:?}", packet);
        self.sink.signal(DcdEvent::SetupReceived(packet.to_bytes()));
    }

    fn transfer_complete(&mut self, endpoint: EndpointAddress, count: usize) {
        let Some(mut request) = self.endpoints.take(endpoint) else {
            warn!("{} completed without a pending transfer", endpoint);
            self.errors.spurious_completions += 1;
            return;
        };

        let requested = request.requested;
        let result = match &mut request.buffer {
            TransferBuffer::In(_) => {
                request.actual = count.min(requested);
                if count == requested {
                    TransferResult::Success
                } else {
                    TransferResult::Failed
                }
            }
            TransferBuffer::Out(buffer) => {
                let space = &mut buffer[..requested];
                match self.hardware.read_endpoint(endpoint.number(), space) {
                    Ok(copied) => {
                        request.actual = copied;
                        if count <= requested {
                            TransferResult::Success
                        } else {
                            warn!(
                                "{} received {} bytes, expected at most {}",
                                endpoint, count, requested
                            );
                            TransferResult::Failed
                        }
                    }
                    Err(err) => {
                        warn!("failed to drain {}: {}", endpoint, err);
                        TransferResult::Failed
                    }
                }
            }
        };

        if endpoint.is_control() && endpoint.direction() == Direction::In {
            if result == TransferResult::Success {
                self.apply_pending_address();
            } else if let Some(address) = self.pending_address.take() {
                warn!("status stage failed, not switching to address {}", address);
            }
        }

        trace!("{} finished with {:?}, {} bytes", endpoint, result, request.actual);
        self.sink.signal(DcdEvent::TransferComplete {
            endpoint,
            length: request.actual,
            result,
        });
    }

    fn apply_pending_address(&mut self) {
        let Some(address) = self.pending_address.take() else {
            return;
        };

        match self.hardware.set_function_address(address) {
            Ok(()) => {
                info!("device address is now {}", address);
                self.state = if address == 0 {
                    DeviceState::Connected
                } else {
                    DeviceState::Addressed
                };
            }
            Err(err) => {
                warn!("failed to program address {}: {}", address, err);
                self.errors.address_write_failures += 1;
                self.errors.last_error = Some(err);
            }
        }
    }
}
