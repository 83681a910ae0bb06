//! Bit-exact wire header (`spec.md` §6 "Wire-level invariants").
//!
//! All multi-byte integers on the wire are little-endian; a single
//! sender-endianness flag in the header lets a big-endian sender mark its
//! packets so the receiver can flip them back (Open Question (c): resolved
//! by standardizing little-endian plus one flip marker, never per-field
//! flags).

use std::fmt;

/// Fixed-size header prefixed to every protocol message, independent of the
/// CE signature block that follows the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub msg_type: u32,
    pub sender_id: u32,
    pub length: u16,
    pub ack_len: u16,
    pub sequence_on_link: u32,
    pub control_link_id: u32,
    pub sender_is_big_endian: bool,
}

/// `type(4) + sender_id(4) + length(2) + ack_len(2) + sequence_on_link(4) +
/// control_link_id(4) + endianness_flag(1)`.
pub const WIRE_HEADER_LEN: usize = 4 + 4 + 2 + 2 + 4 + 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("wire header truncated: got {got} bytes, need {WIRE_HEADER_LEN}")]
    Truncated { got: usize },
}

impl WireHeader {
    /// Encodes the header, always writing fields little-endian on the wire
    /// with `sender_is_big_endian` recording the sender's native order.
    pub fn to_bytes(self) -> [u8; WIRE_HEADER_LEN] {
        let mut out = [0u8; WIRE_HEADER_LEN];
        out[0..4].copy_from_slice(&self.msg_type.to_le_bytes());
        out[4..8].copy_from_slice(&self.sender_id.to_le_bytes());
        out[8..10].copy_from_slice(&self.length.to_le_bytes());
        out[10..12].copy_from_slice(&self.ack_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.sequence_on_link.to_le_bytes());
        out[16..20].copy_from_slice(&self.control_link_id.to_le_bytes());
        out[20] = u8::from(self.sender_is_big_endian);
        out
    }

    /// Decodes a header, flipping multi-byte fields back to native order if
    /// the sender marked itself big-endian.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < WIRE_HEADER_LEN {
            return Err(WireError::Truncated { got: bytes.len() });
        }
        let sender_is_big_endian = bytes[20] != 0;
        let read_u32 = |slice: &[u8]| -> u32 {
            let raw: [u8; 4] = slice.try_into().unwrap();
            if sender_is_big_endian {
                u32::from_be_bytes(raw)
            } else {
                u32::from_le_bytes(raw)
            }
        };
        let read_u16 = |slice: &[u8]| -> u16 {
            let raw: [u8; 2] = slice.try_into().unwrap();
            if sender_is_big_endian {
                u16::from_be_bytes(raw)
            } else {
                u16::from_le_bytes(raw)
            }
        };
        Ok(Self {
            msg_type: read_u32(&bytes[0..4]),
            sender_id: read_u32(&bytes[4..8]),
            length: read_u16(&bytes[8..10]),
            ack_len: read_u16(&bytes[10..12]),
            sequence_on_link: read_u32(&bytes[12..16]),
            control_link_id: read_u32(&bytes[16..20]),
            sender_is_big_endian,
        })
    }
}

impl fmt::Display for WireHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} sender={} len={} ack_len={} link_seq={} link={}",
            self.msg_type,
            self.sender_id,
            self.length,
            self.ack_len,
            self.sequence_on_link,
            self.control_link_id
        )
    }
}

/// Left-zero-pads a big-endian modular integer to exactly `n` bytes
/// (`spec.md` §6: threshold shares and combined signatures).
pub fn be_pad(value_be: &[u8], n: usize) -> Option<[u8; 128]> {
    if n != 128 || value_be.len() > n {
        return None;
    }
    let mut out = [0u8; 128];
    out[n - value_be.len()..].copy_from_slice(value_be);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_header_round_trips() {
        let header = WireHeader {
            msg_type: 7,
            sender_id: 3,
            length: 512,
            ack_len: 4,
            sequence_on_link: 99,
            control_link_id: 1,
            sender_is_big_endian: false,
        };
        let bytes = header.to_bytes();
        assert_eq!(WireHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn big_endian_sender_flips_back_to_native_fields() {
        let mut bytes = [0u8; WIRE_HEADER_LEN];
        bytes[0..4].copy_from_slice(&42u32.to_be_bytes());
        bytes[4..8].copy_from_slice(&1u32.to_be_bytes());
        bytes[8..10].copy_from_slice(&10u16.to_be_bytes());
        bytes[10..12].copy_from_slice(&0u16.to_be_bytes());
        bytes[12..16].copy_from_slice(&1u32.to_be_bytes());
        bytes[16..20].copy_from_slice(&0u32.to_be_bytes());
        bytes[20] = 1;
        let header = WireHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.msg_type, 42);
        assert_eq!(header.sender_id, 1);
        assert!(header.sender_is_big_endian);
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(matches!(
            WireHeader::from_bytes(&[0u8; 4]),
            Err(WireError::Truncated { got: 4 })
        ));
    }
}
