//! # Traffic Capture
//!
//! [`CaptureSink`] records what the engine reports upstream as a PCAP
//! stream in the Linux usbmon format (`LINKTYPE_USB_LINUX`), so a session
//! can be inspected with Wireshark. Setup packets become submissions,
//! transfer completions become completions.
//!
//! The sink only sees events, not transfer buffers, so records carry
//! lengths but no payload.

use std::fmt::Debug;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::{
    constants::SETUP_PACKET_SIZE,
    endpoint::EndpointAddress,
    event::{DcdEvent, EventSink, TransferResult},
    setup::SetupPacket,
};

const LINKTYPE_USB_LINUX: u32 = 189;
const PCAP_MAGIC: u32 = 0xa1b2c3d4;
const SNAPLEN: u32 = 65_535;

/// Size of the usbmon header in front of every packet.
pub const USBMON_HEADER_SIZE: usize = 48;

mod usbmon {
    #![allow(missing_docs)]

    pub const EVENT_SUBMIT: u8 = b'S';
    pub const EVENT_COMPLETE: u8 = b'C';

    pub const TRANSFER_CONTROL: u8 = 2;
    pub const TRANSFER_BULK: u8 = 3;

    /// The setup field is valid.
    pub const SETUP_PRESENT: u8 = 0;
    /// The setup field is not relevant.
    pub const SETUP_ABSENT: u8 = b'-';
    /// No payload follows the header.
    pub const DATA_ABSENT: u8 = b'<';

    pub const STATUS_OK: i32 = 0;
    pub const STATUS_EPROTO: i32 = -71;
}

/// Timestamp of a packet in seconds and microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamp {
    /// Seconds since the epoch.
    pub seconds: u32,
    /// Sub-second part.
    pub microseconds: u32,
}

impl From<SystemTime> for Timestamp {
    fn from(value: SystemTime) -> Self {
        let duration = value.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            seconds: duration.as_secs() as u32,
            microseconds: duration.subsec_micros(),
        }
    }
}

/// The usbmon header of one captured packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct UsbPacketMeta {
    pub id: u64,
    pub event_type: u8,
    pub transfer_type: u8,
    pub endpoint_address: u8,
    pub device_address: u8,
    pub bus_number: u16,
    pub setup_flag: u8,
    pub data_flag: u8,
    pub status: i32,
    pub urb_len: u32,
    pub data_len: u32,
    pub setup: [u8; SETUP_PACKET_SIZE],
}

impl UsbPacketMeta {
    /// Serialize the header as usbmon lays it out (little endian).
    #[must_use]
    pub fn header_bytes(&self, timestamp: Timestamp) -> [u8; USBMON_HEADER_SIZE] {
        let mut header = [0u8; USBMON_HEADER_SIZE];
        header[0..8].copy_from_slice(&self.id.to_le_bytes());
        header[8] = self.event_type;
        header[9] = self.transfer_type;
        header[10] = self.endpoint_address;
        header[11] = self.device_address;
        header[12..14].copy_from_slice(&self.bus_number.to_le_bytes());
        header[14] = self.setup_flag;
        header[15] = self.data_flag;
        header[16..24].copy_from_slice(&i64::from(timestamp.seconds).to_le_bytes());
        header[24..28].copy_from_slice(&(timestamp.microseconds as i32).to_le_bytes());
        header[28..32].copy_from_slice(&self.status.to_le_bytes());
        header[32..36].copy_from_slice(&self.urb_len.to_le_bytes());
        header[36..40].copy_from_slice(&self.data_len.to_le_bytes());
        header[40..48].copy_from_slice(&self.setup);
        header
    }
}

/// Writes PCAP records to any byte sink.
#[derive(Debug)]
pub struct PcapWriter<W: Write> {
    writer: W,
}

impl<W: Write> PcapWriter<W> {
    /// Write the PCAP global header and return the writer.
    pub fn new(mut writer: W) -> io::Result<Self> {
        writer.write_all(&PCAP_MAGIC.to_le_bytes())?;
        writer.write_all(&2u16.to_le_bytes())?;
        writer.write_all(&4u16.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(&SNAPLEN.to_le_bytes())?;
        writer.write_all(&LINKTYPE_USB_LINUX.to_le_bytes())?;
        Ok(Self { writer })
    }

    /// Append one packet record.
    pub fn write_packet(
        &mut self,
        timestamp: Timestamp,
        meta: &UsbPacketMeta,
        payload: &[u8],
    ) -> io::Result<()> {
        let header = meta.header_bytes(timestamp);
        let incl_len = (header.len() + payload.len()) as u32;

        self.writer.write_all(&timestamp.seconds.to_le_bytes())?;
        self.writer.write_all(&timestamp.microseconds.to_le_bytes())?;
        self.writer.write_all(&incl_len.to_le_bytes())?;
        self.writer.write_all(&incl_len.to_le_bytes())?;
        self.writer.write_all(&header)?;
        self.writer.write_all(payload)
    }

    /// Flush and give the byte sink back.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Records [`DcdEvent`]s into a PCAP stream.
///
/// Recording means file I/O, so this belongs on the task side of the
/// driver: feed it the events received from a
/// [`ChannelSink`](super::event::ChannelSink), not from within the
/// interrupt handler.
///
/// Capturing is best effort. The first write error is logged and
/// capturing stops.
#[derive(Debug)]
pub struct UsbCapture<W: Write + Debug> {
    writer: Option<PcapWriter<W>>,
    next_id: u64,

    /// Device address as the captured SET_ADDRESS traffic suggests.
    device_address: u8,
    pending_address: Option<u8>,
}

impl UsbCapture<BufWriter<File>> {
    /// Capture into a newly created file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        debug!("capturing USB traffic into {}", path.display());
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write + Debug> UsbCapture<W> {
    /// Capture into `writer`. Fails if the PCAP header cannot be written.
    pub fn new(writer: W) -> io::Result<Self> {
        Ok(Self {
            writer: Some(PcapWriter::new(writer)?),
            next_id: 0,
            device_address: 0,
            pending_address: None,
        })
    }

    /// Whether packets are still being recorded.
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.writer.is_some()
    }

    /// Stop capturing. Returns the flushed byte sink, unless capturing
    /// failed earlier.
    pub fn into_inner(self) -> Option<io::Result<W>> {
        self.writer.map(PcapWriter::into_inner)
    }

    /// Record one event. Bus conditions only update the address tracking.
    pub fn record(&mut self, event: &DcdEvent) {
        match *event {
            DcdEvent::SetupReceived(bytes) => self.record_setup(bytes),
            DcdEvent::TransferComplete {
                endpoint,
                length,
                result,
            } => self.record_completion(endpoint, length, result),
            DcdEvent::BusReset | DcdEvent::Unplugged => {
                self.device_address = 0;
                self.pending_address = None;
            }
            DcdEvent::StartOfFrame | DcdEvent::Suspend | DcdEvent::Resume => (),
        }
    }

    fn write(&mut self, meta: UsbPacketMeta) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let meta = UsbPacketMeta {
            id: self.next_id,
            device_address: self.device_address,
            ..meta
        };
        self.next_id += 1;

        if let Err(error) = writer.write_packet(SystemTime::now().into(), &meta, &[]) {
            warn!("Disabling USB PCAP capture after write error: {}", error);
            self.writer = None;
        }
    }

    fn record_setup(&mut self, bytes: [u8; SETUP_PACKET_SIZE]) {
        let packet = SetupPacket::from_bytes(&bytes);
        self.pending_address = packet.set_address_target();

        let endpoint = if packet.is_device_to_host() {
            EndpointAddress::new_in(0)
        } else {
            EndpointAddress::new_out(0)
        };

        self.write(UsbPacketMeta {
            event_type: usbmon::EVENT_SUBMIT,
            transfer_type: usbmon::TRANSFER_CONTROL,
            endpoint_address: endpoint.raw(),
            setup_flag: usbmon::SETUP_PRESENT,
            data_flag: usbmon::DATA_ABSENT,
            status: usbmon::STATUS_OK,
            urb_len: u32::from(packet.length),
            setup: bytes,
            ..UsbPacketMeta::default()
        });
    }

    fn record_completion(
        &mut self,
        endpoint: EndpointAddress,
        length: usize,
        result: TransferResult,
    ) {
        let transfer_type = if endpoint.is_control() {
            usbmon::TRANSFER_CONTROL
        } else {
            usbmon::TRANSFER_BULK
        };
        let status = match result {
            TransferResult::Success => usbmon::STATUS_OK,
            TransferResult::Failed => usbmon::STATUS_EPROTO,
        };

        self.write(UsbPacketMeta {
            event_type: usbmon::EVENT_COMPLETE,
            transfer_type,
            endpoint_address: endpoint.raw(),
            setup_flag: usbmon::SETUP_ABSENT,
            data_flag: usbmon::DATA_ABSENT,
            status,
            urb_len: length as u32,
            ..UsbPacketMeta::default()
        });

        // Records from here on carry the new address.
        if endpoint == EndpointAddress::new_in(0) && result == TransferResult::Success {
            if let Some(address) = self.pending_address.take() {
                self.device_address = address;
            }
        }
    }
}

/// An [`EventSink`] decorator that records every event it forwards.
///
/// This writes to `W` from within [`EventSink::signal`], so it is only
/// suitable for hosted debugging setups where the engine does not run in
/// a real interrupt handler. Otherwise record on the receiving side with
/// [`UsbCapture`].
#[derive(Debug)]
pub struct CaptureSink<S: EventSink, W: Write + Debug> {
    inner: S,
    capture: UsbCapture<W>,
}

impl<S: EventSink, W: Write + Debug> CaptureSink<S, W> {
    /// Wrap `inner`, recording through `capture`.
    #[must_use]
    pub fn new(inner: S, capture: UsbCapture<W>) -> Self {
        Self { inner, capture }
    }

    /// Whether packets are still being recorded.
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.capture.is_capturing()
    }

    /// Unwrap into the wrapped sink and the capture.
    pub fn into_inner(self) -> (S, UsbCapture<W>) {
        (self.inner, self.capture)
    }
}

impl<S: EventSink, W: Write + Debug> EventSink for CaptureSink<S, W> {
    fn signal(&mut self, event: DcdEvent) {
        self.capture.record(&event);
        self.inner.signal(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLOBAL_HEADER_SIZE: usize = 24;
    const RECORD_SIZE: usize = 16 + USBMON_HEADER_SIZE;

    fn records(bytes: &[u8]) -> Vec<&[u8]> {
        bytes[GLOBAL_HEADER_SIZE..].chunks(RECORD_SIZE).collect()
    }

    #[test]
    fn global_header_describes_usbmon() {
        let bytes = PcapWriter::new(Vec::<u8>::new()).unwrap().into_inner().unwrap();

        assert_eq!(bytes.len(), GLOBAL_HEADER_SIZE);
        assert_eq!(bytes[0..4], [0xd4, 0xc3, 0xb2, 0xa1]);
        assert_eq!(bytes[4..8], [2, 0, 4, 0]);
        assert_eq!(bytes[16..20], 65_535u32.to_le_bytes());
        assert_eq!(bytes[20..24], 189u32.to_le_bytes());
    }

    #[test]
    fn header_layout() {
        let meta = UsbPacketMeta {
            id: 0x0102,
            event_type: b'C',
            transfer_type: 3,
            endpoint_address: 0x81,
            device_address: 5,
            bus_number: 1,
            setup_flag: b'-',
            data_flag: b'<',
            status: -32,
            urb_len: 64,
            data_len: 0,
            setup: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        let timestamp = Timestamp {
            seconds: 10,
            microseconds: 20,
        };

        let header = meta.header_bytes(timestamp);

        assert_eq!(header[0..8], 0x0102u64.to_le_bytes());
        assert_eq!(header[8..12], [b'C', 3, 0x81, 5]);
        assert_eq!(header[12..14], [1, 0]);
        assert_eq!(header[14..16], [b'-', b'<']);
        assert_eq!(header[16..24], 10i64.to_le_bytes());
        assert_eq!(header[24..28], 20i32.to_le_bytes());
        assert_eq!(header[28..32], (-32i32).to_le_bytes());
        assert_eq!(header[32..36], 64u32.to_le_bytes());
        assert_eq!(header[40..48], [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn setup_and_completions_are_recorded() {
        let mut capture = UsbCapture::new(Vec::<u8>::new()).unwrap();
        let setup = [0x00, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00];
        let events = [
            DcdEvent::SetupReceived(setup),
            DcdEvent::StartOfFrame,
            DcdEvent::TransferComplete {
                endpoint: EndpointAddress::new_in(0),
                length: 0,
                result: TransferResult::Success,
            },
            DcdEvent::TransferComplete {
                endpoint: EndpointAddress::new_out(2),
                length: 12,
                result: TransferResult::Failed,
            },
        ];

        for event in &events {
            capture.record(event);
        }

        let bytes = capture.into_inner().unwrap().unwrap();

        let records = records(&bytes);
        assert_eq!(records.len(), 3);

        let setup_record = &records[0][16..];
        assert_eq!(setup_record[8..12], [b'S', 2, 0x00, 0]);
        assert_eq!(setup_record[40..48], setup);

        let status_record = &records[1][16..];
        assert_eq!(status_record[0..8], 1u64.to_le_bytes());
        assert_eq!(status_record[8..12], [b'C', 2, 0x80, 0]);

        // SET_ADDRESS took effect with the status stage.
        let out_record = &records[2][16..];
        assert_eq!(out_record[8..12], [b'C', 3, 0x02, 7]);
        assert_eq!(out_record[28..32], (-71i32).to_le_bytes());
        assert_eq!(out_record[32..36], 12u32.to_le_bytes());
    }

    #[derive(Debug, Default)]
    struct BrokenPipe {
        writes: usize,
    }

    impl Write for BrokenPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // Let the global header through.
            if self.writes >= 7 {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.writes += 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_errors_stop_capturing_but_not_forwarding() {
        let capture = UsbCapture::new(BrokenPipe::default()).unwrap();
        let mut sink = CaptureSink::new(Vec::<DcdEvent>::new(), capture);

        sink.signal(DcdEvent::SetupReceived([0x80, 6, 0, 1, 0, 0, 18, 0]));
        assert!(!sink.is_capturing());

        sink.signal(DcdEvent::Suspend);

        let (upstream, capture) = sink.into_inner();
        assert!(capture.into_inner().is_none());
        assert_eq!(
            upstream,
            [
                DcdEvent::SetupReceived([0x80, 6, 0, 1, 0, 0, 18, 0]),
                DcdEvent::Suspend
            ]
        );
    }

    #[test]
    fn sink_forwards_what_it_records() {
        let capture = UsbCapture::new(Vec::<u8>::new()).unwrap();
        let mut sink = CaptureSink::new(Vec::<DcdEvent>::new(), capture);
        let event = DcdEvent::TransferComplete {
            endpoint: EndpointAddress::new_in(1),
            length: 8,
            result: TransferResult::Success,
        };

        sink.signal(event);
        sink.signal(DcdEvent::Resume);

        let (upstream, capture) = sink.into_inner();
        assert_eq!(upstream, [event, DcdEvent::Resume]);

        let bytes = capture.into_inner().unwrap().unwrap();
        assert_eq!(records(&bytes).len(), 1);
    }

    #[test]
    fn failed_status_stage_keeps_the_address() {
        let mut capture = UsbCapture::new(Vec::<u8>::new()).unwrap();

        capture.record(&DcdEvent::SetupReceived([0x00, 0x05, 0x09, 0, 0, 0, 0, 0]));
        capture.record(&DcdEvent::TransferComplete {
            endpoint: EndpointAddress::new_in(0),
            length: 0,
            result: TransferResult::Failed,
        });
        capture.record(&DcdEvent::TransferComplete {
            endpoint: EndpointAddress::new_in(1),
            length: 0,
            result: TransferResult::Success,
        });

        let bytes = capture.into_inner().unwrap().unwrap();
        assert_eq!(records(&bytes)[2][16 + 11], 0);
    }
}
