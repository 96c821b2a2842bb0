//! Modbus PDU parsing and response encoding

use bytes::{Buf, BufMut, BytesMut};

use super::frame::{MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};
use crate::error::{CurtailError, Result};
use crate::registers::Bank;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Decoded register request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Read {
        bank: Bank,
        address: u16,
        count: u16,
    },
    Write {
        bank: Bank,
        address: u16,
        words: Vec<u16>,
        /// FC06 rather than FC16
        single: bool,
    },
}

impl Request {
    /// Parse a request PDU (function code first)
    pub fn parse(pdu: &[u8]) -> Result<Self> {
        let mut buf = pdu;
        if !buf.has_remaining() {
            return Err(CurtailError::illegal_value("empty PDU"));
        }
        let function = buf.get_u8();

        match function {
            READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS => {
                ensure_len(buf, 4, function)?;
                let address = buf.get_u16();
                let count = buf.get_u16();
                if count == 0 || count > MAX_READ_REGISTERS {
                    return Err(CurtailError::illegal_value(format!(
                        "read quantity {} (1-{})",
                        count, MAX_READ_REGISTERS
                    )));
                }
                let bank = if function == READ_HOLDING_REGISTERS {
                    Bank::Holding
                } else {
                    Bank::Input
                };
                Ok(Request::Read {
                    bank,
                    address,
                    count,
                })
            },
            WRITE_SINGLE_REGISTER => {
                ensure_len(buf, 4, function)?;
                let address = buf.get_u16();
                let value = buf.get_u16();
                Ok(Request::Write {
                    bank: Bank::Holding,
                    address,
                    words: vec![value],
                    single: true,
                })
            },
            WRITE_MULTIPLE_REGISTERS => {
                if buf.remaining() < 5 {
                    return Err(CurtailError::illegal_value(format!(
                        "FC{:02X} body too short: {} bytes",
                        function,
                        buf.remaining()
                    )));
                }
                let address = buf.get_u16();
                let count = buf.get_u16();
                let byte_count = buf.get_u8();
                if count == 0 || count > MAX_WRITE_REGISTERS {
                    return Err(CurtailError::illegal_value(format!(
                        "write quantity {} (1-{})",
                        count, MAX_WRITE_REGISTERS
                    )));
                }
                if usize::from(byte_count) != usize::from(count) * 2
                    || buf.remaining() != usize::from(byte_count)
                {
                    return Err(CurtailError::illegal_value(format!(
                        "byte count {} does not match quantity {} ({} data bytes)",
                        byte_count,
                        count,
                        buf.remaining()
                    )));
                }
                let words = (0..count).map(|_| buf.get_u16()).collect();
                Ok(Request::Write {
                    bank: Bank::Holding,
                    address,
                    words,
                    single: false,
                })
            },
            other => Err(CurtailError::IllegalFunction(other)),
        }
    }
}

fn ensure_len(buf: &[u8], expected: usize, function: u8) -> Result<()> {
    if buf.len() != expected {
        return Err(CurtailError::illegal_value(format!(
            "FC{:02X} body must be {} bytes, got {}",
            function,
            expected,
            buf.len()
        )));
    }
    Ok(())
}

/// Response to a register request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Read { function: u8, words: Vec<u16> },
    WriteSingle { address: u16, value: u16 },
    WriteMultiple { address: u16, count: u16 },
    Exception { function: u8, code: u8 },
}

impl Response {
    /// Exception response for a failed request
    pub fn exception(function: u8, err: &CurtailError) -> Self {
        Response::Exception {
            function,
            // Anything that is not a protocol-layer error is a device failure
            code: err.exception_code().unwrap_or(0x04),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(8);
        match self {
            Response::Read { function, words } => {
                buf.put_u8(*function);
                buf.put_u8((words.len() * 2) as u8);
                for word in words {
                    buf.put_u16(*word);
                }
            },
            Response::WriteSingle { address, value } => {
                buf.put_u8(WRITE_SINGLE_REGISTER);
                buf.put_u16(*address);
                buf.put_u16(*value);
            },
            Response::WriteMultiple { address, count } => {
                buf.put_u8(WRITE_MULTIPLE_REGISTERS);
                buf.put_u16(*address);
                buf.put_u16(*count);
            },
            Response::Exception { function, code } => {
                buf.put_u8(function | EXCEPTION_FLAG);
                buf.put_u8(*code);
            },
        }
        buf
    }
}
