//! RS-232 / USB-serial transport.
//!
//! Wraps the `serialport` crate. The blocking port is shared behind
//! `Arc<Mutex<..>>` and every read or write runs on Tokio's blocking pool so
//! drivers stay async.
//!
//! The port is opened on first use, not at construction, so an instrument
//! object can be built before the adapter is plugged in.

use std::time::Duration;

use async_trait::async_trait;

use crate::common::DeviceInterface;
use crate::config::SerialConfig;
use crate::error::{InstrumentError, InstrumentResult};

#[cfg(feature = "serial")]
use {
    crate::config::{FlowControl, SerialParity},
    serialport::SerialPort,
    std::sync::Arc,
    tokio::sync::Mutex,
    tracing::{debug, info},
};

/// Poll interval of the underlying port. The overall read deadline comes
/// from [`SerialConfig::timeout_ms`].
#[cfg(feature = "serial")]
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Line-oriented serial device.
///
/// `receive_output` returns everything up to and including the first `\n`.
pub struct SerialDevice {
    config: SerialConfig,

    #[cfg(feature = "serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialDevice {
    /// Remember the settings; the port is opened on first use.
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "serial")]
            port: None,
        }
    }

    /// Line settings.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Overall deadline of one `receive_output`.
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Whether the port has been opened.
    #[cfg(feature = "serial")]
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Always `false` without the `serial` feature.
    #[cfg(not(feature = "serial"))]
    pub fn is_open(&self) -> bool {
        false
    }

    /// Open the port if it is not open yet.
    #[cfg(feature = "serial")]
    pub fn open(&mut self) -> InstrumentResult<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(PORT_POLL_TIMEOUT)
            .data_bits(data_bits(self.config.data_bits)?)
            .parity(parity(self.config.parity))
            .stop_bits(stop_bits(self.config.stop_bits)?)
            .flow_control(flow_control(self.config.flow_control))
            .open()?;

        info!(
            "Serial port '{}' opened at {} baud",
            self.config.port, self.config.baud_rate
        );
        self.port = Some(Arc::new(Mutex::new(port)));
        Ok(())
    }

    /// Fails with `FeatureNotEnabled` without the `serial` feature.
    #[cfg(not(feature = "serial"))]
    pub fn open(&mut self) -> InstrumentResult<()> {
        Err(InstrumentError::FeatureNotEnabled("serial".to_string()))
    }

    /// Release the port. The next command reopens it.
    pub fn close(&mut self) {
        #[cfg(feature = "serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.config.port);
            }
        }
    }

    #[cfg(feature = "serial")]
    fn port(&mut self) -> InstrumentResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.open()?;
        self.port.clone().ok_or(InstrumentError::NotConnected)
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl DeviceInterface for SerialDevice {
    async fn send_command(&mut self, data: &[u8]) -> InstrumentResult<usize> {
        let port = self.port()?;
        let payload = data.to_vec();

        tokio::task::spawn_blocking(move || -> InstrumentResult<usize> {
            use std::io::Write;

            let mut port_guard = port.blocking_lock();
            port_guard.write_all(&payload)?;
            port_guard.flush()?;

            debug!("Sent serial command: {}", String::from_utf8_lossy(&payload).trim_end());
            Ok(payload.len())
        })
        .await
        .map_err(|e| InstrumentError::Io(std::io::Error::other(e)))?
    }

    async fn receive_output(&mut self, _length: usize) -> InstrumentResult<Vec<u8>> {
        let port = self.port()?;
        let timeout = self.config.timeout();

        tokio::task::spawn_blocking(move || -> InstrumentResult<Vec<u8>> {
            use std::io::Read;

            let mut port_guard = port.blocking_lock();
            let mut response = Vec::new();
            let mut buffer = [0u8; 1];
            let start = std::time::Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Err(InstrumentError::Timeout(timeout));
                }

                match port_guard.read(&mut buffer) {
                    Ok(0) => return Err(InstrumentError::UnexpectedEof),
                    Ok(_) => {
                        response.push(buffer[0]);
                        if buffer[0] == b'\n' {
                            break;
                        }
                    }
                    // Port timeout is shorter than our overall timeout
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            debug!("Received serial response: {}", String::from_utf8_lossy(&response).trim_end());
            Ok(response)
        })
        .await
        .map_err(|e| InstrumentError::Io(std::io::Error::other(e)))?
    }
}

#[cfg(not(feature = "serial"))]
#[async_trait]
impl DeviceInterface for SerialDevice {
    async fn send_command(&mut self, _data: &[u8]) -> InstrumentResult<usize> {
        Err(InstrumentError::FeatureNotEnabled("serial".to_string()))
    }

    async fn receive_output(&mut self, _length: usize) -> InstrumentResult<Vec<u8>> {
        Err(InstrumentError::FeatureNotEnabled("serial".to_string()))
    }
}

#[cfg(feature = "serial")]
fn data_bits(bits: u8) -> InstrumentResult<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(InstrumentError::InvalidArgument(format!(
            "unsupported data bits: {}",
            other
        ))),
    }
}

#[cfg(feature = "serial")]
fn stop_bits(bits: u8) -> InstrumentResult<serialport::StopBits> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        other => Err(InstrumentError::InvalidArgument(format!(
            "unsupported stop bits: {}",
            other
        ))),
    }
}

#[cfg(feature = "serial")]
fn parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Odd => serialport::Parity::Odd,
        SerialParity::Even => serialport::Parity::Even,
    }
}

#[cfg(feature = "serial")]
fn flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Software => serialport::FlowControl::Software,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_device_creation() {
        let device = SerialDevice::new(SerialConfig::new("/dev/ttyUSB0", 9600));
        assert_eq!(device.config().port, "/dev/ttyUSB0");
        assert_eq!(device.config().baud_rate, 9600);
        assert_eq!(device.timeout(), Duration::from_secs(1));
        assert!(!device.is_open());
    }

    #[test]
    fn test_close_without_open_is_noop() {
        let mut device = SerialDevice::new(SerialConfig::new("COM3", 115200));
        device.close();
        assert!(!device.is_open());
    }

    #[cfg(feature = "serial")]
    #[tokio::test]
    async fn test_send_to_missing_port_fails() {
        let mut device = SerialDevice::new(SerialConfig::new("/dev/instrumentrs-missing", 9600));
        assert!(device.send_command(b"*IDN?\n").await.is_err());
        assert!(!device.is_open());
    }

    #[cfg(feature = "serial")]
    #[test]
    fn test_line_setting_conversion() {
        assert_eq!(data_bits(7).unwrap(), serialport::DataBits::Seven);
        assert!(data_bits(9).is_err());
        assert_eq!(stop_bits(2).unwrap(), serialport::StopBits::Two);
        assert!(stop_bits(3).is_err());
        assert_eq!(parity(SerialParity::Even), serialport::Parity::Even);
        assert_eq!(flow_control(FlowControl::Software), serialport::FlowControl::Software);
    }

    #[cfg(not(feature = "serial"))]
    #[tokio::test]
    async fn test_feature_disabled() {
        let mut device = SerialDevice::new(SerialConfig::new("/dev/ttyUSB0", 9600));
        let result = device.send_command(b"*IDN?\n").await;
        assert!(matches!(result, Err(InstrumentError::FeatureNotEnabled(_))));
    }
}
