//! # Setup Packets
//!
//! The eight-byte header of every control transfer. For documentation of
//! the fields, see Section "9.3 USB Device Requests" in the USB 2.0
//! specification.

use super::constants::{request, request_type, MAX_DEVICE_ADDRESS, SETUP_PACKET_SIZE};

/// A control request as the controller latched it from the bus.
///
/// Controllers keep the fields in their own register layout. Use
/// [`SetupPacket::to_bytes`] to obtain the protocol byte layout that the
/// upstream stack expects; it never depends on the host's endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupPacket {
    /// `bmRequestType`
    pub request_type: u8,
    /// `bRequest`
    pub request: u8,
    /// `wValue`
    pub value: u16,
    /// `wIndex`
    pub index: u16,
    /// `wLength`
    pub length: u16,
}

impl SetupPacket {
    /// Serialize into the packed wire layout.
    ///
    /// The order is request type, request, value (low, high), index (low,
    /// high) and length (low, high).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SETUP_PACKET_SIZE] {
        let mut bytes = [0; SETUP_PACKET_SIZE];

        bytes[0] = self.request_type;
        bytes[1] = self.request;
        bytes[2..4].copy_from_slice(&self.value.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.index.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.length.to_le_bytes());

        bytes
    }

    /// Parse the packed wire layout.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; SETUP_PACKET_SIZE]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Whether the data phase (if any) moves data from device to host.
    #[must_use]
    pub const fn is_device_to_host(&self) -> bool {
        self.request_type & request_type::DIR_MASK == request_type::DIR_IN
    }

    /// Whether this is a standard request addressed to the device itself.
    #[must_use]
    pub const fn is_standard_device_request(&self) -> bool {
        self.request_type & request_type::TYPE_MASK == request_type::TYPE_STANDARD
            && self.request_type & request_type::RECIPIENT_MASK
                == request_type::RECIPIENT_DEVICE
    }

    /// Return the requested address if this is a well-formed SET_ADDRESS.
    #[must_use]
    pub fn set_address_target(&self) -> Option<u8> {
        if !self.is_standard_device_request()
            || self.is_device_to_host()
            || self.request != request::SET_ADDRESS
            || self.length != 0
        {
            return None;
        }

        u8::try_from(self.value)
            .ok()
            .filter(|address| *address <= MAX_DEVICE_ADDRESS)
    }
}

impl From<[u8; SETUP_PACKET_SIZE]> for SetupPacket {
    fn from(bytes: [u8; SETUP_PACKET_SIZE]) -> Self {
        Self::from_bytes(&bytes)
    }
}

impl From<SetupPacket> for [u8; SETUP_PACKET_SIZE] {
    fn from(packet: SetupPacket) -> Self {
        packet.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set_address(address: u16) -> SetupPacket {
        SetupPacket {
            request_type: 0x00,
            request: request::SET_ADDRESS,
            value: address,
            index: 0,
            length: 0,
        }
    }

    #[test]
    fn get_descriptor_is_packed_little_endian() {
        let packet = SetupPacket {
            request_type: 0x80,
            request: request::GET_DESCRIPTOR,
            value: 0x0100,
            index: 0x0409,
            length: 0x0012,
        };

        assert_eq!(
            packet.to_bytes(),
            [0x80, 0x06, 0x00, 0x01, 0x09, 0x04, 0x12, 0x00]
        );
        assert!(packet.is_device_to_host());
    }

    #[test]
    fn set_address_is_recognized() {
        assert_eq!(set_address(5).set_address_target(), Some(5));
        assert_eq!(set_address(127).set_address_target(), Some(127));
    }

    #[test]
    fn malformed_set_address_is_ignored() {
        // Out of range.
        assert_eq!(set_address(128).set_address_target(), None);

        // Wrong recipient.
        let to_interface = SetupPacket {
            request_type: 0x01,
            ..set_address(5)
        };
        assert_eq!(to_interface.set_address_target(), None);

        // Class request with the same code.
        let class = SetupPacket {
            request_type: 0x20,
            ..set_address(5)
        };
        assert_eq!(class.set_address_target(), None);

        // SET_ADDRESS has no data stage.
        let with_data = SetupPacket {
            length: 1,
            ..set_address(5)
        };
        assert_eq!(with_data.set_address_target(), None);
    }

    proptest! {
        #[test]
        fn byte_layout_follows_field_order(kind: u8, code: u8, value: u16, index: u16, length: u16) {
            let packet = SetupPacket { request_type: kind, request: code, value, index, length };
            let bytes = packet.to_bytes();

            prop_assert_eq!(bytes[0], kind);
            prop_assert_eq!(bytes[1], code);
            prop_assert_eq!(bytes[2], value as u8);
            prop_assert_eq!(bytes[3], (value >> 8) as u8);
            prop_assert_eq!(bytes[4], index as u8);
            prop_assert_eq!(bytes[5], (index >> 8) as u8);
            prop_assert_eq!(bytes[6], length as u8);
            prop_assert_eq!(bytes[7], (length >> 8) as u8);
        }

        #[test]
        fn parsing_inverts_packing(bytes: [u8; 8]) {
            prop_assert_eq!(SetupPacket::from_bytes(&bytes).to_bytes(), bytes);
        }
    }
}
