//! Modbus TCP access to the register map

pub mod frame;
pub mod pdu;
pub mod server;

pub use pdu::{Request, Response};
pub use server::{dispatch, process_pdu, ModbusGateway};
