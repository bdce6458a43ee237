//! Transports shared by every instrument driver.
//!
//! Drivers never talk to a port or socket directly. They are generic over
//! [`DeviceInterface`], which moves raw bytes in and out of an instrument,
//! so the same driver runs over RS-232, a TCP socket, or a scripted
//! [`MockDevice`] in tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ConnectionConfig;
use crate::error::{InstrumentError, InstrumentResult};

pub mod mock_device;
pub mod serial_device;
pub mod tcpip_device;

pub use mock_device::MockDevice;
pub use serial_device::SerialDevice;
pub use tcpip_device::TcpIpDevice;

/// Ways an instrument can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMethod {
    /// RS-232 or USB virtual COM port.
    Serial,
    /// Raw TCP socket.
    TcpIp,
    /// VISA resource, recognised but not implemented.
    Visa,
}

impl fmt::Display for ConnectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Serial => "serial",
            Self::TcpIp => "TCP/IP",
            Self::Visa => "VISA",
        };
        f.write_str(name)
    }
}

/// Byte-level link to an instrument.
///
/// `send_command` writes the whole buffer and returns the number of bytes
/// written. `receive_output` is transport specific: line-oriented transports
/// return one line, stream transports return a single read of at most
/// `length` bytes.
#[async_trait]
pub trait DeviceInterface: Send {
    /// Write `data` to the instrument.
    async fn send_command(&mut self, data: &[u8]) -> InstrumentResult<usize>;

    /// Read a reply, or the next piece of one.
    async fn receive_output(&mut self, length: usize) -> InstrumentResult<Vec<u8>>;
}

#[async_trait]
impl<T: DeviceInterface + ?Sized> DeviceInterface for Box<T> {
    async fn send_command(&mut self, data: &[u8]) -> InstrumentResult<usize> {
        (**self).send_command(data).await
    }

    async fn receive_output(&mut self, length: usize) -> InstrumentResult<Vec<u8>> {
        (**self).receive_output(length).await
    }
}

/// Build the transport described by a connection block.
///
/// TCP connections are established here. Serial ports are opened lazily on
/// first use.
pub async fn open_device(
    connection: &ConnectionConfig,
) -> InstrumentResult<Box<dyn DeviceInterface>> {
    match connection.method {
        ConnectionMethod::Serial => {
            let serial = connection.serial.clone().ok_or_else(|| {
                InstrumentError::InvalidArgument(
                    "serial connection without a 'serial' block".to_string(),
                )
            })?;
            info!(port = %serial.port, baud_rate = serial.baud_rate, "Using serial transport");
            Ok(Box::new(SerialDevice::new(serial)))
        }
        ConnectionMethod::TcpIp => {
            let tcp = connection.tcp.as_ref().ok_or_else(|| {
                InstrumentError::InvalidArgument(
                    "tcpip connection without a 'tcp' block".to_string(),
                )
            })?;
            let device = TcpIpDevice::connect_with_config(tcp).await?;
            Ok(Box::new(device))
        }
        method @ ConnectionMethod::Visa => {
            Err(InstrumentError::UnsupportedCommunicationMethod(method))
        }
    }
}
