//! A simulated enumeration.
//!
//! The host side drives a [`SimulatedController`] the way a real host
//! would during the first steps of enumeration. The device side is a
//! minimal control handler sitting on the upstream end of the engine. It
//! consumes [`DcdEvent`]s from a channel, outside of the interrupt
//! handler, and records them if asked to.

use std::fmt::Debug;
use std::io::Write;
use std::sync::mpsc::Receiver;

use anyhow::{bail, ensure, Context, Result};
use tracing::{debug, info, warn};
use usbdcd::device::usb::{
    capture::UsbCapture,
    constants::{controller::EP0_MAX_PACKET_SIZE, descriptor_type, request, request_type},
    dcd::{DeviceController, DeviceState},
    endpoint::{EndpointAddress, TransferBuffer},
    event::{ChannelSink, DcdEvent, EventSink, TransferResult},
    hardware::{HardwareOptions, UsbHardware},
    setup::SetupPacket,
    simulated::SimulatedController,
};

const VENDOR_ID: u16 = 0x0b6a;
const PRODUCT_ID: u16 = 0x003c;

/// The device descriptor the control handler answers with.
const DEVICE_DESCRIPTOR: [u8; 18] = [
    18,                      // bLength
    descriptor_type::DEVICE, // bDescriptorType
    0x00,                    // bcdUSB 2.00
    0x02,
    0x00, // bDeviceClass
    0x00, // bDeviceSubClass
    0x00, // bDeviceProtocol
    EP0_MAX_PACKET_SIZE as u8, // bMaxPacketSize0
    VENDOR_ID.to_le_bytes()[0],
    VENDOR_ID.to_le_bytes()[1],
    PRODUCT_ID.to_le_bytes()[0],
    PRODUCT_ID.to_le_bytes()[1],
    0x00, // bcdDevice 1.00
    0x01,
    0, // iManufacturer
    0, // iProduct
    0, // iSerialNumber
    1, // bNumConfigurations
];

/// What the host learned about the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub address: u8,
    pub state: DeviceState,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// The upstream control-request handler.
#[derive(Debug, Default)]
struct ControlHandler {
    /// An IN data stage is in flight and its OUT status stage still needs
    /// to be armed.
    status_pending: bool,
}

impl ControlHandler {
    fn handle<H: UsbHardware, S: EventSink>(
        &mut self,
        dcd: &mut DeviceController<'_, H, S>,
        event: DcdEvent,
    ) -> Result<()> {
        match event {
            DcdEvent::SetupReceived(bytes) => self.setup(dcd, SetupPacket::from(bytes)),
            DcdEvent::TransferComplete {
                endpoint,
                length,
                result,
            } => {
                debug!("{} completed {} bytes", endpoint, length);
                ensure!(
                    result == TransferResult::Success,
                    "transfer on {} ended with {:?}",
                    endpoint,
                    result
                );

                if endpoint == EndpointAddress::new_in(0) && std::mem::take(&mut self.status_pending)
                {
                    dcd.submit_transfer(EndpointAddress::new_out(0), TransferBuffer::Out(&mut []), 0)
                        .context("Failed to arm the status stage")?;
                }
                Ok(())
            }
            DcdEvent::BusReset | DcdEvent::Unplugged => {
                self.status_pending = false;
                Ok(())
            }
            other => {
                debug!("ignoring {:?}", other);
                Ok(())
            }
        }
    }

    fn setup<H: UsbHardware, S: EventSink>(
        &mut self,
        dcd: &mut DeviceController<'_, H, S>,
        packet: SetupPacket,
    ) -> Result<()> {
        self.status_pending = false;

        if let Some(address) = packet.set_address_target() {
            dcd.set_address(address);
            return dcd
                .submit_transfer(EndpointAddress::new_in(0), TransferBuffer::In(&[]), 0)
                .context("Failed to queue the SET_ADDRESS status stage");
        }

        let is_get_device_descriptor = packet.request_type
            == request_type::DIR_IN | request_type::TYPE_STANDARD | request_type::RECIPIENT_DEVICE
            && packet.request == request::GET_DESCRIPTOR
            && packet.value >> 8 == u16::from(descriptor_type::DEVICE);

        if is_get_device_descriptor {
            let length = DEVICE_DESCRIPTOR.len().min(usize::from(packet.length));
            dcd.submit_transfer(
                EndpointAddress::new_in(0),
                TransferBuffer::In(&DEVICE_DESCRIPTOR[..length]),
                length,
            )
            .context("Failed to queue the device descriptor")?;
            self.status_pending = true;
            return Ok(());
        }

        warn!("stalling unsupported request {:?}", packet);
        dcd.stall(EndpointAddress::new_in(0))
            .context("Failed to stall EP0")
    }
}

/// The engine as the binary runs it.
type Engine<'b> = DeviceController<'b, SimulatedController, ChannelSink>;

/// The task side: the upstream handler and an optional recorder.
#[derive(Debug)]
struct Upstream<'c, W: Write + Debug> {
    handler: ControlHandler,
    receiver: Receiver<DcdEvent>,
    capture: Option<&'c mut UsbCapture<W>>,
}

impl<W: Write + Debug> Upstream<'_, W> {
    /// Run the interrupt handler, then process what it signaled.
    fn service(&mut self, dcd: &mut Engine<'_>) -> Result<()> {
        dcd.handle_interrupt();

        for event in self.receiver.try_iter() {
            if let Some(capture) = self.capture.as_deref_mut() {
                capture.record(&event);
            }
            self.handler.handle(dcd, event)?;
        }
        Ok(())
    }
}

/// Enumerate a simulated device up to reading its device descriptor.
pub fn run<W: Write + Debug>(
    options: HardwareOptions,
    address: u8,
    capture: Option<&mut UsbCapture<W>>,
) -> Result<Summary> {
    let (sink, receiver) = ChannelSink::new();
    let mut upstream = Upstream {
        handler: ControlHandler::default(),
        receiver,
        capture,
    };
    let mut dcd: Engine<'_> = DeviceController::new(SimulatedController::new(), sink, options);

    dcd.initialize()
        .context("Failed to bring up the device controller")?;
    dcd.enable_interrupts();

    info!("Resetting the bus");
    dcd.hardware_mut().host_bus_reset();
    upstream.service(&mut dcd)?;

    info!("Assigning address {}", address);
    dcd.hardware_mut().host_setup(SetupPacket {
        request_type: request_type::TYPE_STANDARD | request_type::RECIPIENT_DEVICE,
        request: request::SET_ADDRESS,
        value: u16::from(address),
        index: 0,
        length: 0,
    });
    upstream.service(&mut dcd)?;

    ensure!(
        dcd.hardware().function_address() == 0,
        "address changed before the status stage"
    );
    if dcd.hardware_mut().host_read_in(0).is_none() {
        bail!("device did not acknowledge SET_ADDRESS");
    }
    upstream.service(&mut dcd)?;

    let assigned = dcd.hardware().function_address();
    ensure!(
        assigned == address,
        "device is at address {} instead of {}",
        assigned,
        address
    );

    info!("Reading the device descriptor");
    dcd.hardware_mut().host_setup(SetupPacket {
        request_type: request_type::DIR_IN
            | request_type::TYPE_STANDARD
            | request_type::RECIPIENT_DEVICE,
        request: request::GET_DESCRIPTOR,
        value: u16::from(descriptor_type::DEVICE) << 8,
        index: 0,
        length: DEVICE_DESCRIPTOR.len() as u16,
    });
    upstream.service(&mut dcd)?;

    let descriptor = dcd
        .hardware_mut()
        .host_read_in(0)
        .context("device did not send its descriptor")?;
    upstream.service(&mut dcd)?;

    ensure!(
        dcd.hardware_mut().host_write_out(0, &[]),
        "device did not arm the status stage"
    );
    upstream.service(&mut dcd)?;

    ensure!(
        descriptor.len() == DEVICE_DESCRIPTOR.len()
            && descriptor[1] == descriptor_type::DEVICE,
        "malformed device descriptor {:02x?}",
        descriptor
    );

    Ok(Summary {
        address: assigned,
        state: dcd.state(),
        vendor_id: u16::from_le_bytes([descriptor[8], descriptor[9]]),
        product_id: u16::from_le_bytes([descriptor[10], descriptor[11]]),
    })
}
