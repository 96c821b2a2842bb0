//! Modbus TCP gateway
//!
//! Passive slave: listens for masters, answers register requests against the
//! shared `RegisterMap`, never initiates traffic. Each connection runs in its
//! own task; concurrent masters are serialized by the map's lock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use errors::{ServiceError, ServiceResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::frame::{encode_frame, MbapHeader, MBAP_HEADER_LEN};
use super::pdu::{
    Request, Response, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS, WRITE_MULTIPLE_REGISTERS,
    WRITE_SINGLE_REGISTER,
};
use crate::error::{CurtailError, Result};
use crate::registers::{Bank, DecodedPoint, RegisterMap};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Longest wait for the PDU once its MBAP header has arrived
const FRAME_BODY_TIMEOUT: Duration = Duration::from_secs(5);

/// Modbus TCP server bound to one listening socket
pub struct ModbusGateway {
    listener: TcpListener,
    map: Arc<RegisterMap>,
}

impl ModbusGateway {
    /// Bind the listening socket; failure here aborts startup
    pub async fn bind(bind_address: &str, map: Arc<RegisterMap>) -> ServiceResult<Self> {
        let listener =
            TcpListener::bind(bind_address)
                .await
                .map_err(|e| ServiceError::BindFailed {
                    endpoint: bind_address.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(Self { listener, map })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the token is cancelled
    pub async fn serve(self, token: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Modbus gateway listening on {}", addr),
            Err(e) => warn!("Modbus gateway listening (address unknown: {})", e),
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Modbus gateway stopped accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Master connected: {}", peer);
                        let map = Arc::clone(&self.map);
                        let token = token.child_token();
                        tokio::spawn(async move {
                            match handle_connection(stream, &map, &token).await {
                                Ok(()) => info!("Master disconnected: {}", peer),
                                Err(e) => warn!("Connection {} closed: {}", peer, e),
                            }
                        });
                    },
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    },
                },
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    map: &RegisterMap,
    token: &CancellationToken,
) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("TCP_NODELAY not set: {}", e);
    }

    loop {
        let mut header = [0u8; MBAP_HEADER_LEN];
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            read = stream.read_exact(&mut header) => match read {
                Ok(_) => {},
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            },
        }

        let header = MbapHeader::from_bytes(&header)?;
        let mut pdu = vec![0u8; header.pdu_length()];
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            read = tokio::time::timeout(FRAME_BODY_TIMEOUT, stream.read_exact(&mut pdu)) => match read {
                Ok(read) => {
                    read?;
                },
                Err(_) => {
                    return Err(CurtailError::io(format!(
                        "PDU of {} bytes not received within {:?}",
                        header.pdu_length(),
                        FRAME_BODY_TIMEOUT
                    )))
                },
            },
        }

        let response = process_pdu(map, &pdu);
        stream
            .write_all(&encode_frame(&header, &response.encode()))
            .await?;
    }
}

/// Turn one request PDU into a response, exception responses included
pub fn process_pdu(map: &RegisterMap, pdu: &[u8]) -> Response {
    let function = pdu.first().copied().unwrap_or_default();
    match Request::parse(pdu).and_then(|request| dispatch(map, &request)) {
        Ok(response) => response,
        Err(err) => {
            warn!("Rejected FC{:02X}: {}", function, err);
            Response::exception(function, &err)
        },
    }
}

fn read_function(bank: Bank) -> u8 {
    match bank {
        Bank::Holding => READ_HOLDING_REGISTERS,
        Bank::Input => READ_INPUT_REGISTERS,
    }
}

fn check_address(map: &RegisterMap, address: u16, count: u16) -> Result<()> {
    let end = u32::from(address) + u32::from(count);
    if end > u32::from(map.layout().register_count()) {
        return Err(CurtailError::IllegalDataAddress { address, count });
    }
    Ok(())
}

fn summarize(points: &[DecodedPoint]) -> String {
    points
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Apply a parsed request to the register map
pub fn dispatch(map: &RegisterMap, request: &Request) -> Result<Response> {
    match request {
        Request::Read {
            bank,
            address,
            count,
        } => {
            check_address(map, *address, *count)?;
            let words = map.read(*bank, *address, *count)?;
            let decoded = map.decode(*bank, *address, &words)?;
            debug!(
                bank = %bank,
                address = *address,
                words = ?words,
                "Master read: {}",
                summarize(&decoded)
            );
            Ok(Response::Read {
                function: read_function(*bank),
                words,
            })
        },
        Request::Write {
            bank,
            address,
            words,
            single,
        } => {
            let function = if *single {
                WRITE_SINGLE_REGISTER
            } else {
                WRITE_MULTIPLE_REGISTERS
            };
            if *bank == Bank::Input {
                return Err(CurtailError::IllegalFunction(function));
            }
            let count = words.len() as u16;
            check_address(map, *address, count)?;
            map.write(*bank, *address, words)?;
            let decoded = map.decode(*bank, *address, words)?;
            info!(
                bank = %bank,
                address = *address,
                words = ?words,
                "Master write: {}",
                summarize(&decoded)
            );
            Ok(if *single {
                Response::WriteSingle {
                    address: *address,
                    value: words.first().copied().unwrap_or_default(),
                }
            } else {
                Response::WriteMultiple {
                    address: *address,
                    count,
                }
            })
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::config::RegisterConfig;
    use crate::registers::encode_f32;

    fn map() -> RegisterMap {
        RegisterMap::from_config(&RegisterConfig::default()).unwrap()
    }

    #[test]
    #[traced_test]
    fn test_write_setpoint_and_read_echo() {
        let map = map();
        let response = process_pdu(
            &map,
            &[0x10, 0x00, 0x0A, 0x00, 0x02, 0x04, 0x43, 0x96, 0x00, 0x00],
        );
        assert_eq!(
            response,
            Response::WriteMultiple {
                address: 10,
                count: 2
            }
        );
        assert!(logs_contain("Master write: setpoint=300"));

        let response = process_pdu(&map, &[0x04, 0x00, 0x0A, 0x00, 0x02]);
        assert_eq!(
            response,
            Response::Read {
                function: 0x04,
                words: vec![0x4396, 0x0000]
            }
        );
    }

    #[test]
    fn test_single_register_write() {
        let map = map();
        let response = process_pdu(&map, &[0x06, 0x00, 0x0C, 0x00, 0x01]);
        assert_eq!(
            response,
            Response::WriteSingle {
                address: 12,
                value: 1
            }
        );
        assert!(map.read_bit(Bank::Holding, 12, 0).unwrap());
    }

    #[test]
    fn test_input_write_is_illegal_function() {
        let map = map();
        let before = map.snapshot(Bank::Input);
        let request = Request::Write {
            bank: Bank::Input,
            address: 0,
            words: encode_f32(1.0).to_vec(),
            single: false,
        };
        assert_eq!(
            dispatch(&map, &request).unwrap_err(),
            CurtailError::IllegalFunction(WRITE_MULTIPLE_REGISTERS)
        );
        assert_eq!(map.snapshot(Bank::Input), before);
    }

    #[test]
    fn test_address_beyond_register_count() {
        let map = map();
        let response = process_pdu(&map, &[0x03, 0x00, 0x0E, 0x00, 0x01]);
        assert_eq!(
            response,
            Response::Exception {
                function: 0x03,
                code: 0x02
            }
        );
        let response = process_pdu(&map, &[0x06, 0x00, 0x14, 0x00, 0x01]);
        assert_eq!(response.encode().as_ref(), &[0x86, 0x02]);
    }

    #[test]
    fn test_undefined_and_split_spans() {
        let map = map();
        // HOLDING 0 is within the register count but undefined
        let response = process_pdu(&map, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(response.encode().as_ref(), &[0x83, 0x02]);

        // Single-word write into the second half of the setpoint
        let response = process_pdu(&map, &[0x06, 0x00, 0x0B, 0x12, 0x34]);
        assert_eq!(response.encode().as_ref(), &[0x86, 0x02]);
        assert_eq!(map.snapshot(Bank::Holding), vec![0; 14]);
    }

    #[test]
    fn test_four_word_write_rejected_without_mutation() {
        let map = map();
        let response = process_pdu(
            &map,
            &[0x10, 0x00, 0x0A, 0x00, 0x04, 0x08, 0x43, 0x96, 0, 0, 0, 1, 0, 0],
        );
        assert_eq!(response.encode().as_ref(), &[0x90, 0x02]);
        assert_eq!(map.snapshot(Bank::Holding), vec![0; 14]);
        assert_eq!(map.read(Bank::Input, 10, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_unsupported_function_code() {
        let map = map();
        let response = process_pdu(&map, &[0x05, 0x00, 0x0C, 0xFF, 0x00]);
        assert_eq!(response.encode().as_ref(), &[0x85, 0x01]);
    }

    #[test]
    fn test_malformed_quantity() {
        let map = map();
        let response = process_pdu(&map, &[0x04, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(response.encode().as_ref(), &[0x84, 0x03]);
    }
}
