//! Double Ratchet message header — wire format (spec §6):
//!
//! ```text
//!  0        32        36        40
//!  +--------+---------+---------+
//!  | dh_pub |   pn    |    n    |
//!  +--------+---------+---------+
//! ```
//!
//! 32 bytes `dh_pub` (X25519), 4 bytes `pn` (u32 BE), 4 bytes `n` (u32 BE).
//! The header is covered by AEAD associated data, never encrypted itself
//! — grounded on `dl_crypto::ratchet::RatchetHeader`, re-expressed as a
//! fixed binary layout instead of base64-in-JSON per spec §6.

use crate::error::SessionError;

pub const HEADER_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetHeader {
    pub dh_pub: [u8; 32],
    pub pn: u32,
    pub n: u32,
}

impl RatchetHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..32].copy_from_slice(&self.dh_pub);
        buf[32..36].copy_from_slice(&self.pn.to_be_bytes());
        buf[36..40].copy_from_slice(&self.n.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.len() != HEADER_LEN {
            return Err(SessionError::InvalidHeader(format!(
                "expected {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut dh_pub = [0u8; 32];
        dh_pub.copy_from_slice(&bytes[..32]);
        let pn = u32::from_be_bytes(bytes[32..36].try_into().unwrap());
        let n = u32::from_be_bytes(bytes[36..40].try_into().unwrap());
        Ok(Self { dh_pub, pn, n })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_through_wire_bytes() {
        let header = RatchetHeader {
            dh_pub: [7u8; 32],
            pn: 12,
            n: 345,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = RatchetHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        let result = RatchetHeader::from_bytes(&[0u8; 39]);
        assert!(matches!(result, Err(SessionError::InvalidHeader(_))));
    }
}
