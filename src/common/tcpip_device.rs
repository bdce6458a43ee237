//! TCP/IP socket transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::common::DeviceInterface;
use crate::config::TcpConfig;
use crate::error::{InstrumentError, InstrumentResult};

/// Instrument reached through a TCP socket.
///
/// Unlike [`SerialDevice`](super::SerialDevice) the connection is made up
/// front. `receive_output(length)` performs one socket read of at most
/// `length` bytes.
pub struct TcpIpDevice {
    stream: TcpStream,
    peer: String,
    timeout: Duration,
}

impl TcpIpDevice {
    /// Connect with the default one second timeout.
    pub async fn connect(host: &str, port: u16) -> InstrumentResult<Self> {
        Self::connect_with_config(&TcpConfig::new(host, port)).await
    }

    /// Connect using the host, port and timeout of a config block.
    pub async fn connect_with_config(config: &TcpConfig) -> InstrumentResult<Self> {
        let timeout = config.timeout();
        let address = (config.host.as_str(), config.port);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| InstrumentError::Timeout(timeout))??;
        stream.set_nodelay(true)?;

        info!("Connected to instrument at {}", config);
        Ok(Self {
            stream,
            peer: config.to_string(),
            timeout,
        })
    }

    /// `host:port` of the instrument.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Connect and read timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl DeviceInterface for TcpIpDevice {
    async fn send_command(&mut self, data: &[u8]) -> InstrumentResult<usize> {
        self.stream.write_all(data).await?;
        debug!("[{}] Sent: {}", self.peer, String::from_utf8_lossy(data).trim_end());
        Ok(data.len())
    }

    async fn receive_output(&mut self, length: usize) -> InstrumentResult<Vec<u8>> {
        let mut buffer = vec![0u8; length.max(1)];
        let read = tokio::time::timeout(self.timeout, self.stream.read(&mut buffer))
            .await
            .map_err(|_| InstrumentError::Timeout(self.timeout))??;

        if read == 0 {
            return Err(InstrumentError::UnexpectedEof);
        }

        buffer.truncate(read);
        debug!("[{}] Received: {}", self.peer, String::from_utf8_lossy(&buffer).trim_end());
        Ok(buffer)
    }
}
