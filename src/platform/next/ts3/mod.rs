//! NEXT / Neways TS3 test-fixture controller
//!
//! The TS3 sits in a test fixture and switches DUT power, reads and drives
//! I/O pins on its extension modules and bridges UART and I2C ports. It is
//! reached over TCP/IP.
//!
//! Every request is one CRC-protected frame (see [`frame`]) and every
//! request gets exactly one reply: an ACK, a NACK carrying a
//! [`NackReason`], or a query reply echoing the command id.
//!
//! # Example Usage
//!
//! ```no_run
//! use instrumentrs::common::TcpIpDevice;
//! use instrumentrs::platform::next::ts3::Ts3;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let socket = TcpIpDevice::connect("192.168.1.50", 5000).await?;
//!     let mut ts3 = Ts3::new(socket);
//!
//!     ts3.poll_device().await?;
//!     if ts3.get_dut_present().await? {
//!         ts3.set_dut_power(true, true, false).await?;
//!     }
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::common::DeviceInterface;
use crate::error::{InstrumentError, InstrumentResult};

pub mod frame;

pub use frame::{NackReason, Ts3Response};

use frame::{decode_response, encode_command, ACK, MAX_FRAME_LEN, RESPONSE_BUFFER_LEN};

/// Settling time after switching DUT power.
pub const DUT_POWER_SETTLE: Duration = Duration::from_millis(500);

/// Slack on top of the fixture-side timeout of a pin wait.
const PIN_WAIT_MARGIN: Duration = Duration::from_secs(1);

const PIN_WAIT_POLL: Duration = Duration::from_millis(10);

/// Number of extension module slots reported by `get_external_modules`.
pub const MODULE_SLOTS: usize = 16;

macro_rules! args {
    ($($arg:expr),+ $(,)?) => {
        [$($arg.to_string()),+]
    };
}

/// Serial line settings for [`Ts3::uart_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartSettings {
    /// Line speed in baud.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: u8,
    /// Stop bits per character.
    pub stop_bits: u8,
    /// Parity code as the fixture firmware numbers it (5 = none).
    pub parity: u8,
}

impl Default for UartSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: 5,
        }
    }
}

/// One side of a differential analog measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnalogInput {
    /// Extension module, 0 is the main board.
    pub module: u8,
    /// Input pin on that module.
    pub pin: u8,
    /// Input range code.
    pub range: u8,
}

/// Driver for the TS3 fixture controller
pub struct Ts3<D> {
    device: D,
}

impl<D: DeviceInterface> Ts3<D> {
    /// Wrap an open transport. Nothing is sent until the first command.
    pub fn new(device: D) -> Self {
        Self { device }
    }

    /// The underlying transport.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Give the transport back.
    pub fn into_inner(self) -> D {
        self.device
    }

    // ========================================================================
    // System
    // ========================================================================

    /// Check that the unit is alive. It answers with an ACK.
    pub async fn poll_device(&mut self) -> InstrumentResult<()> {
        self.transact(&args!("10"), ACK).await?;
        Ok(())
    }

    /// Firmware version as `("<major>.<minor>", <build>)`.
    pub async fn get_version(&mut self) -> InstrumentResult<(String, String)> {
        let response = self.transact(&args!("13"), "13").await?;
        Ok((
            format!("{}.{}", response.field(2)?, response.field(3)?),
            response.field(4)?.to_string(),
        ))
    }

    /// Reset the processor.
    pub async fn reset_device(&mut self) -> InstrumentResult<()> {
        self.transact(&args!("14"), ACK).await?;
        Ok(())
    }

    /// Article number and product name.
    pub async fn get_product_id(&mut self) -> InstrumentResult<(String, String)> {
        let response = self.transact(&args!("15"), "15").await?;
        pair(&response)
    }

    /// Source repository information of the firmware build.
    pub async fn get_svn(&mut self) -> InstrumentResult<(String, String)> {
        let response = self.transact(&args!("16"), "16").await?;
        pair(&response)
    }

    // ========================================================================
    // Power
    // ========================================================================

    /// Switch one of the major supplies on or off.
    pub async fn set_supply(&mut self, supply: bool, on: bool) -> InstrumentResult<()> {
        self.transact(&args!("22", flag(supply), flag(on)), ACK).await?;
        Ok(())
    }

    /// Switch the buzzer on or off.
    pub async fn set_buzzer(&mut self, on: bool) -> InstrumentResult<()> {
        self.transact(&args!("23", flag(on)), ACK).await?;
        Ok(())
    }

    /// Set the DUT power relays, then wait [`DUT_POWER_SETTLE`].
    pub async fn set_dut_power(
        &mut self,
        power: bool,
        enable: bool,
        overrule: bool,
    ) -> InstrumentResult<()> {
        self.transact(&args!("24", flag(power), flag(enable), flag(overrule)), ACK)
            .await?;
        tokio::time::sleep(DUT_POWER_SETTLE).await;
        Ok(())
    }

    /// State of the DUT detection switch.
    pub async fn get_dut_present(&mut self) -> InstrumentResult<bool> {
        self.transact(&args!("25"), "25").await?.flag(2)
    }

    /// Whether major supply `supply` is switched on.
    pub async fn get_power_supply(&mut self, supply: u8) -> InstrumentResult<bool> {
        self.transact(&args!("26", supply), "26").await?.flag(2)
    }

    /// DUT power relay states as `(power, enable)`.
    pub async fn get_dut_power(&mut self) -> InstrumentResult<(bool, bool)> {
        let response = self.transact(&args!("27"), "27").await?;
        Ok((response.flag(2)?, response.flag(3)?))
    }

    // ========================================================================
    // I/O pins
    // ========================================================================

    /// Drive a digital output pin or relay.
    pub async fn set_dig_output_pin(
        &mut self,
        module: u8,
        pin: u8,
        value: bool,
    ) -> InstrumentResult<()> {
        self.transact(&args!("40", module, pin, flag(value)), ACK).await?;
        Ok(())
    }

    /// Level of a digital input pin.
    pub async fn get_dig_input_pin(&mut self, module: u8, pin: u8) -> InstrumentResult<bool> {
        self.transact(&args!("41", module, pin), "41").await?.flag(2)
    }

    /// Drive an analog output pin, in volts.
    pub async fn set_ana_output_pin(
        &mut self,
        module: u8,
        pin: u8,
        value: f64,
    ) -> InstrumentResult<()> {
        let value = float_arg(value, "analog output value")?;
        self.transact(&args!("42", module, pin, value), ACK).await?;
        Ok(())
    }

    /// Read an analog input pin in the given range.
    pub async fn get_ana_input_pin(
        &mut self,
        module: u8,
        pin: u8,
        range: u8,
    ) -> InstrumentResult<f64> {
        self.transact(&args!("43", module, pin, range), "43")
            .await?
            .parse_field(2)
    }

    /// PWM output on the main board. `duty_cycle` is in percent.
    pub async fn set_pwm_pin(&mut self, frequency: u32, duty_cycle: u8) -> InstrumentResult<()> {
        if duty_cycle > 100 {
            return Err(InstrumentError::InvalidArgument(format!(
                "duty cycle {}% is above 100%",
                duty_cycle
            )));
        }
        self.transact(&args!("44", frequency, duty_cycle), ACK).await?;
        Ok(())
    }

    /// Wait on the fixture for a pin to reach `high`.
    ///
    /// The fixture answers once the level is seen or `timeout` expires, so
    /// the reply is awaited for `timeout` plus a margin rather than the
    /// transport timeout. The fixture counts whole seconds; a fractional
    /// timeout is rounded up.
    pub async fn get_user_highlow_input_pin(
        &mut self,
        module: u8,
        pin: u8,
        high: bool,
        timeout: Duration,
    ) -> InstrumentResult<bool> {
        let seconds = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        let request = args!("45", module, pin, flag(high), seconds);
        self.send(&request).await?;

        let deadline = Instant::now() + Duration::from_secs(seconds) + PIN_WAIT_MARGIN;
        loop {
            match self.receive("45").await {
                Err(InstrumentError::Timeout(_)) if Instant::now() < deadline => {
                    debug!("TS3 pin wait still pending");
                    tokio::time::sleep(PIN_WAIT_POLL).await;
                }
                result => return result?.flag(2),
            }
        }
    }

    /// Read two analog inputs `delay_ms` apart and return `a - b`.
    pub async fn get_diff_ana_input_pin(
        &mut self,
        a: AnalogInput,
        delay_ms: u32,
        b: AnalogInput,
    ) -> InstrumentResult<f64> {
        let request = args!(
            "46",
            a.module,
            a.pin,
            a.range,
            delay_ms,
            b.module,
            b.pin,
            b.range,
        );
        self.transact(&request, "46").await?.parse_field(2)
    }

    // ========================================================================
    // UART / I2C bridges
    // ========================================================================

    /// Transmit `message` on a UART port.
    pub async fn uart_txd(
        &mut self,
        module: u8,
        port: u8,
        message: &str,
    ) -> InstrumentResult<()> {
        self.transact(&args!("100", module, port, message), ACK).await?;
        Ok(())
    }

    /// Everything a UART port has received since the last read.
    pub async fn uart_rxd(&mut self, module: u8, port: u8) -> InstrumentResult<String> {
        let response = self.transact(&args!("101", module, port), "101").await?;
        Ok(response.field(2)?.to_string())
    }

    /// Configure a UART port.
    pub async fn uart_set(
        &mut self,
        module: u8,
        port: u8,
        settings: UartSettings,
    ) -> InstrumentResult<()> {
        let request = args!(
            "102",
            module,
            port,
            settings.baud_rate,
            settings.data_bits,
            settings.stop_bits,
            settings.parity,
        );
        self.transact(&request, ACK).await?;
        Ok(())
    }

    /// Drop any bytes buffered on a UART port.
    pub async fn uart_flush(&mut self, module: u8, port: u8) -> InstrumentResult<()> {
        self.transact(&args!("103", module, port), ACK).await?;
        Ok(())
    }

    /// Write `message` to the I2C device at `address`.
    pub async fn i2c_txd(
        &mut self,
        module: u8,
        port: u8,
        address: u8,
        message: &str,
    ) -> InstrumentResult<()> {
        self.transact(&args!("140", module, port, address, message), ACK)
            .await?;
        Ok(())
    }

    /// Write `message` to an I2C device and read back `n_bytes`.
    pub async fn i2c_rxd(
        &mut self,
        module: u8,
        port: u8,
        address: u8,
        n_bytes: u16,
        message: &str,
    ) -> InstrumentResult<String> {
        let request = args!("141", module, port, address, n_bytes, message);
        let response = self.transact(&request, "141").await?;
        Ok(response.field(2)?.to_string())
    }

    // ========================================================================
    // Fixture configuration
    // ========================================================================

    /// Date the fixture was configured.
    pub async fn get_date(&mut self) -> InstrumentResult<NaiveDateTime> {
        let response = self.transact(&args!("80"), "80").await?;
        let year: i32 = response.parse_field(2)?;
        let [month, day, hour, minute, second]: [u32; 5] = [
            response.parse_field(3)?,
            response.parse_field(4)?,
            response.parse_field(5)?,
            response.parse_field(6)?,
            response.parse_field(7)?,
        ];
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second));
        date.ok_or_else(|| {
            InstrumentError::MalformedResponse(format!(
                "TS3 date is not a valid calendar date: {}",
                response.fields().join(";")
            ))
        })
    }

    /// Store the configuration date, `None` meaning the local time now.
    pub async fn set_date(&mut self, date: Option<NaiveDateTime>) -> InstrumentResult<()> {
        let date = date.unwrap_or_else(|| Local::now().naive_local());
        let request = args!(
            "81",
            date.year(),
            date.month(),
            date.day(),
            date.hour(),
            date.minute(),
            date.second(),
        );
        self.transact(&request, ACK).await?;
        Ok(())
    }

    /// Name of the user that configured the fixture.
    pub async fn get_user(&mut self) -> InstrumentResult<String> {
        let response = self.transact(&args!("82"), "82").await?;
        Ok(response.field(2)?.to_string())
    }

    /// Store the name of the user configuring the fixture.
    pub async fn set_user(&mut self, username: &str) -> InstrumentResult<()> {
        self.transact(&args!("83", username), ACK).await?;
        Ok(())
    }

    /// Name of the test script the fixture should run.
    pub async fn get_script_filename(&mut self) -> InstrumentResult<String> {
        let response = self.transact(&args!("84"), "84").await?;
        Ok(response.field(2)?.to_string())
    }

    /// Store the test script name.
    pub async fn set_script_filename(&mut self, filename: &str) -> InstrumentResult<()> {
        self.transact(&args!("85", filename), ACK).await?;
        Ok(())
    }

    /// Project number and class of the article this fixture tests.
    pub async fn get_id(&mut self) -> InstrumentResult<(String, String)> {
        let response = self.transact(&args!("86"), "86").await?;
        pair(&response)
    }

    /// Store project number and class.
    pub async fn set_id(&mut self, project: u32, class: u32) -> InstrumentResult<()> {
        self.transact(&args!("87", project, class), ACK).await?;
        Ok(())
    }

    /// Detected extension modules, one entry per slot.
    pub async fn get_external_modules(&mut self) -> InstrumentResult<Vec<String>> {
        let response = self.transact(&args!("88"), "88").await?;
        let slots = response.fields().get(2..2 + MODULE_SLOTS).ok_or_else(|| {
            InstrumentError::MalformedResponse(format!(
                "TS3 module list has {} fields, expected {}",
                response.fields().len().saturating_sub(2),
                MODULE_SLOTS
            ))
        })?;
        Ok(slots.to_vec())
    }

    /// Type and version of the module in slot `module`.
    pub async fn get_external_module_details(
        &mut self,
        module: u8,
    ) -> InstrumentResult<(String, String)> {
        let response = self.transact(&args!("89", module), "89").await?;
        pair(&response)
    }

    // ========================================================================
    // Firmware update
    // ========================================================================

    /// Send one Motorola HEX line. The fixture decodes it into RAM.
    pub async fn firmware_line(&mut self, line: &str) -> InstrumentResult<()> {
        self.transact(&args!("200", line.trim_end()), ACK).await?;
        Ok(())
    }

    /// Copy the received image to flash and restart.
    ///
    /// The ACK comes before the fixture drops off the link.
    pub async fn perform_flash(&mut self) -> InstrumentResult<()> {
        self.transact(&args!("201"), ACK).await?;
        Ok(())
    }

    // ========================================================================
    // Wire helpers
    // ========================================================================

    async fn transact(
        &mut self,
        request: &[String],
        expected: &str,
    ) -> InstrumentResult<Ts3Response> {
        self.send(request).await?;
        self.receive(expected).await
    }

    async fn send(&mut self, request: &[String]) -> InstrumentResult<()> {
        let frame = encode_command(request)?;
        debug!("TS3 <- {}", String::from_utf8_lossy(&frame).trim_end());
        self.device.send_command(&frame).await?;
        Ok(())
    }

    /// Collect one reply frame. A socket may deliver it in pieces.
    async fn receive(&mut self, expected: &str) -> InstrumentResult<Ts3Response> {
        let mut raw: Vec<u8> = Vec::new();
        while !matches!(raw.last(), Some(b'\r' | b'\n')) {
            if raw.len() > MAX_FRAME_LEN {
                return Err(InstrumentError::MalformedResponse(format!(
                    "TS3 reply exceeds {} bytes without a terminator",
                    MAX_FRAME_LEN
                )));
            }
            raw.extend(self.device.receive_output(RESPONSE_BUFFER_LEN).await?);
        }
        debug!("TS3 -> {}", String::from_utf8_lossy(&raw).trim_end());
        decode_response(&raw, expected).map_err(|err| {
            if let InstrumentError::Ts3Nack(reason) = &err {
                warn!("TS3 rejected command expecting {}: {}", expected, reason);
            }
            err
        })
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Floats always carry a fractional part on the wire (`12.0`, not `12`).
fn float_arg(value: f64, what: &str) -> InstrumentResult<String> {
    if value.is_finite() {
        Ok(format!("{:?}", value))
    } else {
        Err(InstrumentError::InvalidArgument(format!(
            "{} must be finite, got {}",
            what, value
        )))
    }
}

fn pair(response: &Ts3Response) -> InstrumentResult<(String, String)> {
    Ok((response.field(2)?.to_string(), response.field(3)?.to_string()))
}
