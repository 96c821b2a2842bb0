//! Modbus TCP framing
//!
//! Frame: [Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][PDU(N)].
//! The length field counts the unit id plus the PDU.

use bytes::{BufMut, BytesMut};

use crate::error::{CurtailError, Result};

/// MBAP prefix read before the length is known: Transaction ID + Protocol ID + Length + Unit ID
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU size per Modbus specification (RS485 ADU 256 - address 1 - CRC 2)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Maximum number of registers for FC03/FC04: (253 - 2) / 2
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of registers for FC16: (253 - 6) / 2
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// MBAP (Modbus Application Protocol) header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    /// Always 0 for Modbus
    pub protocol_id: u16,
    /// Byte count of unit id + PDU
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Header for a response carrying `pdu_length` bytes
    pub fn reply(&self, pdu_length: usize) -> Self {
        Self {
            transaction_id: self.transaction_id,
            protocol_id: 0,
            length: (pdu_length + 1) as u16,
            unit_id: self.unit_id,
        }
    }

    /// Parse and validate a header
    pub fn from_bytes(data: &[u8; MBAP_HEADER_LEN]) -> Result<Self> {
        let transaction_id = u16::from_be_bytes([data[0], data[1]]);
        let protocol_id = u16::from_be_bytes([data[2], data[3]]);
        let length = u16::from_be_bytes([data[4], data[5]]);
        let unit_id = data[6];

        if protocol_id != 0 {
            return Err(CurtailError::io(format!("Invalid protocol ID: {}", protocol_id)));
        }
        // At least unit id + function code
        if length < 2 || usize::from(length) > MAX_MBAP_LENGTH {
            return Err(CurtailError::io(format!("Invalid TCP frame length: {}", length)));
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }

    /// Bytes of PDU that follow the header
    pub fn pdu_length(&self) -> usize {
        usize::from(self.length) - 1
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.transaction_id);
        buf.put_u16(self.protocol_id);
        buf.put_u16(self.length);
        buf.put_u8(self.unit_id);
    }
}

/// Assemble a complete ADU
pub fn encode_frame(request: &MbapHeader, pdu: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    request.reply(pdu.len()).encode(&mut buf);
    buf.put_slice(pdu);
    buf
}
