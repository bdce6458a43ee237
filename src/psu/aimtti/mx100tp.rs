//! AIM-TTi MX100TP triple-output power supply driver
//!
//! Reference: MX100T & MX100TP instruction manual, remote operation chapter.
//!
//! Protocol Overview:
//! - Format: ASCII commands terminated by `\n`
//! - Addressing: output number `<N>` (1-3) embedded in the command mnemonic
//! - Replies: one line terminated by `\r\n` (`<RMT>`), only for queries and
//!   the few commands documented as returning a line
//!
//! The instrument speaks the same command set over USB-serial, LAN and GPIB.
//! The driver only needs a [`DeviceInterface`], so any transport works.
//!
//! # Example Usage
//!
//! ```no_run
//! use instrumentrs::common::SerialDevice;
//! use instrumentrs::config::SerialConfig;
//! use instrumentrs::psu::aimtti::Mx100tp;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let serial = SerialDevice::new(SerialConfig::new("/dev/ttyUSB0", 9600));
//!     let mut psu = Mx100tp::new(serial);
//!
//!     psu.set_channel_voltage(1, 5.0).await?;
//!     psu.set_channel_current_limit(1, 0.5).await?;
//!     psu.enable_channel(1).await?;
//!     println!("Output 1: {:.3} V", psu.get_channel_voltage(1).await?);
//!     Ok(())
//! }
//! ```

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::debug;

use super::types::{
    Damping, Identification, InterfaceLock, MultiAction, NetConfig, ProtectionState, TrackingMode,
};
use crate::common::DeviceInterface;
use crate::error::{InstrumentError, InstrumentResult};
use crate::psu::PowerSupply;

/// Output numbers of the MX100TP.
pub const CHANNELS: RangeInclusive<u8> = 1..=3;

/// Save/recall store indices.
pub const MEMORY_STORES: RangeInclusive<u8> = 0..=49;

const TERMINATOR: &str = "\n";

const READ_CHUNK: usize = 256;

/// Longest reply line accepted before giving up on the terminator.
const MAX_REPLY_LEN: usize = 4096;

/// Driver for the AIM-TTi MX100TP
pub struct Mx100tp<D> {
    device: D,
}

impl<D: DeviceInterface> Mx100tp<D> {
    /// Wrap an already configured transport.
    pub fn new(device: D) -> Self {
        Self { device }
    }

    /// The underlying transport.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Give the transport back, e.g. to close a serial port.
    pub fn into_inner(self) -> D {
        self.device
    }

    // ========================================================================
    // Instrument function commands
    // ========================================================================

    /// `V<N> <NRF>`: set output N to `volts`.
    pub async fn set_channel_voltage(&mut self, channel: u8, volts: f64) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        let volts = check_finite(volts, "voltage")?;
        self.write(&format!("V{} {}", channel, volts)).await
    }

    /// `V<N>V <NRF>`: set output N to `volts` with verify.
    pub async fn set_channel_voltage_with_verify(
        &mut self,
        channel: u8,
        volts: f64,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        let volts = check_finite(volts, "voltage")?;
        self.write(&format!("V{}V {}", channel, volts)).await
    }

    /// `OVP<N> <NRF>`: over voltage protection trip point in volts.
    pub async fn set_channel_over_voltage_protection(
        &mut self,
        channel: u8,
        volts: f64,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        let volts = check_finite(volts, "OVP trip point")?;
        self.write(&format!("OVP{} {}", channel, volts)).await
    }

    /// `OVP<N> ON|OFF`
    pub async fn toggle_channel_over_voltage_protection(
        &mut self,
        channel: u8,
        state: ProtectionState,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("OVP{} {}", channel, state)).await
    }

    /// `I<N> <NRF>`: current limit in amps.
    pub async fn set_channel_current_limit(
        &mut self,
        channel: u8,
        amps: f64,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        let amps = check_finite(amps, "current limit")?;
        self.write(&format!("I{} {}", channel, amps)).await
    }

    /// `OCP<N> <NRF>`: over current protection trip point in amps.
    pub async fn set_channel_over_current_protection(
        &mut self,
        channel: u8,
        amps: f64,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        let amps = check_finite(amps, "OCP trip point")?;
        self.write(&format!("OCP{} {}", channel, amps)).await
    }

    /// `OCP<N> ON|OFF`
    pub async fn toggle_channel_over_current_protection(
        &mut self,
        channel: u8,
        state: ProtectionState,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("OCP{} {}", channel, state)).await
    }

    /// `DAMPING<N> <CPD>`
    pub async fn set_channel_current_measurement_averaging(
        &mut self,
        channel: u8,
        damping: Damping,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("DAMPING{} {}", channel, damping)).await
    }

    /// `V<N>?`, reply `V<N> <NR2>`.
    pub async fn get_channel_voltage_setpoint(&mut self, channel: u8) -> InstrumentResult<f64> {
        let command = format!("V{}?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_setpoint(&command, &response)
    }

    /// `I<N>?`, reply `I<N> <NR2>`.
    pub async fn get_channel_current_limit_setpoint(
        &mut self,
        channel: u8,
    ) -> InstrumentResult<f64> {
        let command = format!("I{}?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_setpoint(&command, &response)
    }

    /// `OVP<N>?`, reply `VP<N> <NR2>`. `None` when protection is disabled.
    pub async fn get_channel_over_voltage_setpoint(
        &mut self,
        channel: u8,
    ) -> InstrumentResult<Option<f64>> {
        let command = format!("OVP{}?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_trip_setpoint(&command, &response)
    }

    /// `OCP<N>?`, reply `CP<N> <NR2>`. `None` when protection is disabled.
    pub async fn get_channel_over_current_setpoint(
        &mut self,
        channel: u8,
    ) -> InstrumentResult<Option<f64>> {
        let command = format!("OCP{}?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_trip_setpoint(&command, &response)
    }

    /// `V<N>O?`: output readback voltage, reply `<NR2>V`.
    pub async fn get_channel_voltage(&mut self, channel: u8) -> InstrumentResult<f64> {
        let command = format!("V{}O?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_readback(&command, &response, 'V')
    }

    /// `I<N>O?`: output readback current, reply `<NR2>A`.
    pub async fn get_channel_current(&mut self, channel: u8) -> InstrumentResult<f64> {
        let command = format!("I{}O?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_readback(&command, &response, 'A')
    }

    /// `DELTAV<N> <NRF>`
    pub async fn set_channel_voltage_stepsize(
        &mut self,
        channel: u8,
        volts: f64,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        let volts = check_finite(volts, "voltage step")?;
        self.write(&format!("DELTAV{} {}", channel, volts)).await
    }

    /// `DELTAI<N> <NRF>`
    pub async fn set_channel_current_stepsize(
        &mut self,
        channel: u8,
        amps: f64,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        let amps = check_finite(amps, "current step")?;
        self.write(&format!("DELTAI{} {}", channel, amps)).await
    }

    /// `DELTAV<N>?`, reply `DELTAV<N> <NR2>`.
    pub async fn get_channel_voltage_stepsize(&mut self, channel: u8) -> InstrumentResult<f64> {
        let command = format!("DELTAV{}?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_setpoint(&command, &response)
    }

    /// `DELTAI<N>?`, reply `DELTAI<N> <NR2>`.
    pub async fn get_channel_current_stepsize(&mut self, channel: u8) -> InstrumentResult<f64> {
        let command = format!("DELTAI{}?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_setpoint(&command, &response)
    }

    /// `INCV<N>`
    pub async fn increase_channel_voltage(&mut self, channel: u8) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("INCV{}", channel)).await
    }

    /// `INCV<N>V`: increment with verify. Returns the instrument's reply line.
    pub async fn increase_channel_voltage_with_verify(
        &mut self,
        channel: u8,
    ) -> InstrumentResult<String> {
        let channel = check_channel(channel)?;
        self.query(&format!("INCV{}V", channel)).await
    }

    /// `DECV<N>`
    pub async fn decrease_channel_voltage(&mut self, channel: u8) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("DECV{}", channel)).await
    }

    /// `DECV<N>V`: decrement with verify. Returns the instrument's reply line.
    pub async fn decrease_channel_voltage_with_verify(
        &mut self,
        channel: u8,
    ) -> InstrumentResult<String> {
        let channel = check_channel(channel)?;
        self.query(&format!("DECV{}V", channel)).await
    }

    /// `INCI<N>`
    pub async fn increase_channel_current(&mut self, channel: u8) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("INCI{}", channel)).await
    }

    /// `DECI<N>`
    pub async fn decrease_channel_current(&mut self, channel: u8) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("DECI{}", channel)).await
    }

    /// `OP<N> 0|1`
    pub async fn set_channel(&mut self, channel: u8, on: bool) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("OP{} {}", channel, u8::from(on))).await
    }

    /// `OP<N> 1`
    pub async fn enable_channel(&mut self, channel: u8) -> InstrumentResult<()> {
        self.set_channel(channel, true).await
    }

    /// `OP<N> 0`
    pub async fn disable_channel(&mut self, channel: u8) -> InstrumentResult<()> {
        self.set_channel(channel, false).await
    }

    /// `OP<N>?`: `true` when the output is on.
    pub async fn get_channel_status(&mut self, channel: u8) -> InstrumentResult<bool> {
        let command = format!("OP{}?", check_channel(channel)?);
        let response = self.query(&command).await?;
        parse_flag(&command, &response)
    }

    /// `OPALL 0|1`
    ///
    /// Switches all outputs together unless the Multi-On/Multi-Off settings
    /// sequence or omit some of them.
    pub async fn set_all(&mut self, on: bool) -> InstrumentResult<()> {
        self.write(&format!("OPALL {}", u8::from(on))).await
    }

    /// `OPALL 1`
    pub async fn enable_all(&mut self) -> InstrumentResult<()> {
        self.set_all(true).await
    }

    /// `OPALL 0`
    pub async fn disable_all(&mut self) -> InstrumentResult<()> {
        self.set_all(false).await
    }

    /// `TRIPRST`: attempt to clear all trip conditions.
    pub async fn reset_trip(&mut self) -> InstrumentResult<()> {
        self.write("TRIPRST").await
    }

    /// `VRANGE<N> <NRF>`
    ///
    /// | output | 1 | 2 | 3 |
    /// |---|---|---|---|
    /// | 1 | 16V/6A | 35V/3A | – |
    /// | 2 | 35V/3A | 16V/6A | 35V/6A |
    /// | 3 | 35V/3A | 70V/1.5A | 70V/3A |
    pub async fn set_channel_voltage_range(
        &mut self,
        channel: u8,
        range: u8,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        let valid = voltage_ranges(channel);
        if !valid.contains(&range) {
            return Err(InstrumentError::InvalidArgument(format!(
                "voltage range {} is not valid for output {} (expected {}-{})",
                range,
                channel,
                valid.start(),
                valid.end()
            )));
        }
        self.write(&format!("VRANGE{} {}", channel, range)).await
    }

    /// `VRANGE<N>?`
    pub async fn get_channel_voltage_range(&mut self, channel: u8) -> InstrumentResult<u8> {
        let command = format!("VRANGE{}?", check_channel(channel)?);
        self.query_parse(&command).await
    }

    /// `CONFIG <NRF>`
    pub async fn set_voltage_tracking_mode(&mut self, mode: TrackingMode) -> InstrumentResult<()> {
        self.write(&format!("CONFIG {}", mode as u8)).await
    }

    /// `CONFIG?`
    pub async fn get_voltage_tracking_mode(&mut self) -> InstrumentResult<TrackingMode> {
        let response = self.query("CONFIG?").await?;
        response
            .parse::<u8>()
            .ok()
            .and_then(|code| TrackingMode::try_from(code).ok())
            .ok_or_else(|| InstrumentError::invalid_response("CONFIG?", &response))
    }

    /// `ONDELAY<N> <NRF>`: Multi-On delay in milliseconds.
    pub async fn set_channel_on_delay(
        &mut self,
        channel: u8,
        delay_ms: u32,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("ONDELAY{} {}", channel, delay_ms)).await
    }

    /// `OFFDELAY<N> <NRF>`: Multi-Off delay in milliseconds.
    pub async fn set_channel_off_delay(
        &mut self,
        channel: u8,
        delay_ms: u32,
    ) -> InstrumentResult<()> {
        let channel = check_channel(channel)?;
        self.write(&format!("OFFDELAY{} {}", channel, delay_ms)).await
    }

    /// `ONACTION<N> <CPD>`. Returns the instrument's reply line.
    pub async fn set_channel_on_action(
        &mut self,
        channel: u8,
        action: MultiAction,
    ) -> InstrumentResult<String> {
        let channel = check_channel(channel)?;
        self.query(&format!("ONACTION{} {}", channel, action)).await
    }

    /// `OFFACTION<N> <CPD>`. Returns the instrument's reply line.
    pub async fn set_channel_off_action(
        &mut self,
        channel: u8,
        action: MultiAction,
    ) -> InstrumentResult<String> {
        let channel = check_channel(channel)?;
        self.query(&format!("OFFACTION{} {}", channel, action)).await
    }

    /// `SAV<N> <NRF>`: save one output's settings. Returns the reply line.
    pub async fn save_channel_settings(
        &mut self,
        channel: u8,
        store: u8,
    ) -> InstrumentResult<String> {
        let channel = check_channel(channel)?;
        let store = check_store(store)?;
        self.query(&format!("SAV{} {}", channel, store)).await
    }

    /// `RCL<N> <NRF>`: recall one output's settings. Returns the reply line.
    pub async fn recall_channel_settings(
        &mut self,
        channel: u8,
        store: u8,
    ) -> InstrumentResult<String> {
        let channel = check_channel(channel)?;
        let store = check_store(store)?;
        self.query(&format!("RCL{} {}", channel, store)).await
    }

    // ========================================================================
    // Common commands
    // ========================================================================

    /// `*IDN?`
    pub async fn get_instrument_identification(&mut self) -> InstrumentResult<Identification> {
        let response = self.query("*IDN?").await?;
        response.parse()
    }

    /// `*RST`: factory defaults. Save/recall stores and remote interface
    /// settings are kept.
    pub async fn factory_reset(&mut self) -> InstrumentResult<()> {
        self.write("*RST").await
    }

    /// `*SAV <NRF>`: save all three outputs.
    pub async fn save_settings(&mut self, store: u8) -> InstrumentResult<()> {
        let store = check_store(store)?;
        self.write(&format!("*SAV {}", store)).await
    }

    /// `*RCL <NRF>`: recall all three outputs.
    pub async fn recall_settings(&mut self, store: u8) -> InstrumentResult<()> {
        let store = check_store(store)?;
        self.write(&format!("*RCL {}", store)).await
    }

    /// `*OPC`
    pub async fn set_operation_complete_bit(&mut self) -> InstrumentResult<()> {
        self.write("*OPC").await
    }

    /// `*OPC?`: always `1` since commands execute sequentially.
    pub async fn get_operation_complete_status(&mut self) -> InstrumentResult<bool> {
        let response = self.query("*OPC?").await?;
        parse_flag("*OPC?", &response)
    }

    /// `*WAI`: no-op on this instrument.
    pub async fn wait_for_complete(&mut self) -> InstrumentResult<()> {
        self.write("*WAI").await
    }

    /// `*TST?`: the unit has no self test and always answers 0.
    pub async fn self_test(&mut self) -> InstrumentResult<u8> {
        self.query_parse("*TST?").await
    }

    /// `*TRG`: ignored by this instrument.
    pub async fn trigger(&mut self) -> InstrumentResult<()> {
        self.write("*TRG").await
    }

    // ========================================================================
    // Status commands
    // ========================================================================

    /// `*CLS`
    pub async fn clear_status(&mut self) -> InstrumentResult<()> {
        self.write("*CLS").await
    }

    /// `LSR<N>?`: read and clear a Limit Status Register.
    pub async fn query_and_clear_limit_status_register(
        &mut self,
        register: u8,
    ) -> InstrumentResult<u8> {
        let register = check_channel(register)?;
        self.query_parse(&format!("LSR{}?", register)).await
    }

    /// `LSE<N> <NRF>`
    pub async fn set_limit_status_enable_register(
        &mut self,
        register: u8,
        value: u8,
    ) -> InstrumentResult<()> {
        let register = check_channel(register)?;
        self.write(&format!("LSE{} {}", register, value)).await
    }

    /// `LSE<N>?`
    pub async fn get_limit_status_enable_register(&mut self, register: u8) -> InstrumentResult<u8> {
        let register = check_channel(register)?;
        self.query_parse(&format!("LSE{}?", register)).await
    }

    /// `EER?`: read and clear the Execution Error Register.
    pub async fn query_and_clear_execution_error_register(&mut self) -> InstrumentResult<u16> {
        self.query_parse("EER?").await
    }

    /// `QER?`: read and clear the Query Error Register.
    pub async fn query_and_clear_query_error_register(&mut self) -> InstrumentResult<u16> {
        self.query_parse("QER?").await
    }

    /// `*STB?`
    pub async fn get_status_byte(&mut self) -> InstrumentResult<u8> {
        self.query_parse("*STB?").await
    }

    /// `*SRE <NRF>`
    pub async fn set_service_request_enable_register(&mut self, value: u8) -> InstrumentResult<()> {
        self.write(&format!("*SRE {}", value)).await
    }

    /// `*SRE?`
    pub async fn get_service_request_enable_register(&mut self) -> InstrumentResult<u8> {
        self.query_parse("*SRE?").await
    }

    /// `*PRE <NRF>`
    pub async fn set_parallel_poll_enable_register(&mut self, value: u8) -> InstrumentResult<()> {
        self.write(&format!("*PRE {}", value)).await
    }

    /// `*PRE?`
    pub async fn get_parallel_poll_enable_register(&mut self) -> InstrumentResult<u8> {
        self.query_parse("*PRE?").await
    }

    /// `*IST?`: IEEE 488.2 `ist` local message.
    pub async fn get_ist_state(&mut self) -> InstrumentResult<bool> {
        let response = self.query("*IST?").await?;
        parse_flag("*IST?", &response)
    }

    // ========================================================================
    // Interface management commands
    // ========================================================================

    /// `LOCAL`: any later command restores remote state.
    pub async fn go_to_local(&mut self) -> InstrumentResult<()> {
        self.write("LOCAL").await
    }

    /// `IFLOCK 0|1`
    ///
    /// A denied request shows up as execution error 200 in `EER?`.
    pub async fn set_interface_lock(&mut self, locked: bool) -> InstrumentResult<()> {
        self.write(&format!("IFLOCK {}", u8::from(locked))).await
    }

    /// `IFLOCK?`
    pub async fn get_interface_lock(&mut self) -> InstrumentResult<InterfaceLock> {
        let response = self.query("IFLOCK?").await?;
        response
            .parse::<i8>()
            .ok()
            .and_then(|code| InterfaceLock::try_from(code).ok())
            .ok_or_else(|| InstrumentError::invalid_response("IFLOCK?", &response))
    }

    /// `ADDRESS?`: GPIB bus address.
    pub async fn get_interface_address(&mut self) -> InstrumentResult<u8> {
        self.query_parse("ADDRESS?").await
    }

    /// `IPADDR?`
    pub async fn get_ip_address(&mut self) -> InstrumentResult<Ipv4Addr> {
        self.query_parse("IPADDR?").await
    }

    /// `NETMASK?`
    pub async fn get_netmask(&mut self) -> InstrumentResult<Ipv4Addr> {
        self.query_parse("NETMASK?").await
    }

    /// `NETCONFIG?`
    pub async fn get_netconfig(&mut self) -> InstrumentResult<NetConfig> {
        let response = self.query("NETCONFIG?").await?;
        response
            .parse()
            .map_err(|_| InstrumentError::invalid_response("NETCONFIG?", &response))
    }

    /// `NETCONFIG <CPD>`
    pub async fn set_netconfig(&mut self, config: NetConfig) -> InstrumentResult<()> {
        self.write(&format!("NETCONFIG {}", config)).await
    }

    /// `IPADDR <QUAD>`: static address used when configured as STATIC.
    pub async fn set_ip_address(&mut self, address: Ipv4Addr) -> InstrumentResult<()> {
        self.write(&format!("IPADDR {}", address)).await
    }

    /// `NETMASK <QUAD>`
    pub async fn set_netmask(&mut self, netmask: Ipv4Addr) -> InstrumentResult<()> {
        self.write(&format!("NETMASK {}", netmask)).await
    }

    // ========================================================================
    // Wire helpers
    // ========================================================================

    async fn write(&mut self, command: &str) -> InstrumentResult<()> {
        debug!("MX100TP <- {}", command);
        let line = format!("{}{}", command, TERMINATOR);
        self.device.send_command(line.as_bytes()).await?;
        Ok(())
    }

    /// Send `command` and collect the reply line.
    ///
    /// Serial transports hand back a whole line per read, sockets may split
    /// it, so reads repeat until the line feed arrives.
    async fn query(&mut self, command: &str) -> InstrumentResult<String> {
        self.write(command).await?;
        let mut raw = Vec::new();
        while !raw.ends_with(b"\n") {
            if raw.len() > MAX_REPLY_LEN {
                return Err(InstrumentError::invalid_response(
                    command,
                    &String::from_utf8_lossy(&raw),
                ));
            }
            raw.extend(self.device.receive_output(READ_CHUNK).await?);
        }
        let response = String::from_utf8_lossy(&raw).trim().to_string();
        debug!("MX100TP -> {}", response);
        Ok(response)
    }

    async fn query_parse<T: FromStr>(&mut self, command: &str) -> InstrumentResult<T> {
        let response = self.query(command).await?;
        response
            .parse()
            .map_err(|_| InstrumentError::invalid_response(command, &response))
    }
}

#[async_trait]
impl<D: DeviceInterface> PowerSupply for Mx100tp<D> {
    fn channels(&self) -> RangeInclusive<u8> {
        CHANNELS
    }

    async fn identify(&mut self) -> InstrumentResult<String> {
        Ok(self.get_instrument_identification().await?.to_string())
    }

    async fn set_voltage(&mut self, channel: u8, volts: f64) -> InstrumentResult<()> {
        self.set_channel_voltage(channel, volts).await
    }

    async fn set_current_limit(&mut self, channel: u8, amps: f64) -> InstrumentResult<()> {
        self.set_channel_current_limit(channel, amps).await
    }

    async fn read_voltage(&mut self, channel: u8) -> InstrumentResult<f64> {
        self.get_channel_voltage(channel).await
    }

    async fn read_current(&mut self, channel: u8) -> InstrumentResult<f64> {
        self.get_channel_current(channel).await
    }

    async fn set_output(&mut self, channel: u8, on: bool) -> InstrumentResult<()> {
        self.set_channel(channel, on).await
    }

    async fn output_enabled(&mut self, channel: u8) -> InstrumentResult<bool> {
        self.get_channel_status(channel).await
    }

    async fn all_outputs_off(&mut self) -> InstrumentResult<()> {
        self.disable_all().await
    }
}

fn check_channel(channel: u8) -> InstrumentResult<u8> {
    if CHANNELS.contains(&channel) {
        Ok(channel)
    } else {
        Err(InstrumentError::InvalidArgument(format!(
            "output {} does not exist (MX100TP has outputs 1-3)",
            channel
        )))
    }
}

fn check_store(store: u8) -> InstrumentResult<u8> {
    if MEMORY_STORES.contains(&store) {
        Ok(store)
    } else {
        Err(InstrumentError::InvalidArgument(format!(
            "memory store {} out of range. 0-49 inclusive is allowed",
            store
        )))
    }
}

fn check_finite(value: f64, what: &str) -> InstrumentResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(InstrumentError::InvalidArgument(format!("{} must be finite, got {}", what, value)))
    }
}

fn voltage_ranges(channel: u8) -> RangeInclusive<u8> {
    if channel == 1 {
        1..=2
    } else {
        1..=3
    }
}

/// `V1 12.000` / `DELTAI2 0.010` -> value after the echoed mnemonic.
fn parse_setpoint(command: &str, response: &str) -> InstrumentResult<f64> {
    last_token(response)
        .parse()
        .map_err(|_| InstrumentError::invalid_response(command, response))
}

/// `VP1 35.000` / `CP1 OFF`
fn parse_trip_setpoint(command: &str, response: &str) -> InstrumentResult<Option<f64>> {
    let value = last_token(response);
    if value.eq_ignore_ascii_case("OFF") {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| InstrumentError::invalid_response(command, response))
}

/// `12.345V` / `0.250A`
fn parse_readback(command: &str, response: &str, unit: char) -> InstrumentResult<f64> {
    response
        .strip_suffix(unit)
        .unwrap_or(response)
        .trim()
        .parse()
        .map_err(|_| InstrumentError::invalid_response(command, response))
}

fn parse_flag(command: &str, response: &str) -> InstrumentResult<bool> {
    match response.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(InstrumentError::invalid_response(command, response)),
    }
}

fn last_token(response: &str) -> &str {
    response.rsplit(' ').next().unwrap_or(response).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MockDevice;

    fn psu() -> (Mx100tp<MockDevice>, MockDevice) {
        let mock = MockDevice::new();
        (Mx100tp::new(mock.clone()), mock)
    }

    #[test]
    fn test_parse_setpoint() {
        assert_eq!(parse_setpoint("V1?", "V1 12.000").unwrap(), 12.0);
        assert_eq!(parse_setpoint("DELTAI2?", "DELTAI2 0.010").unwrap(), 0.01);
        assert!(parse_setpoint("V1?", "V1 abc").is_err());
    }

    #[test]
    fn test_parse_trip_setpoint_off() {
        assert_eq!(parse_trip_setpoint("OVP1?", "VP1 OFF").unwrap(), None);
        assert_eq!(parse_trip_setpoint("OCP3?", "CP3 3.300").unwrap(), Some(3.3));
    }

    #[test]
    fn test_parse_readback() {
        assert_eq!(parse_readback("V1O?", "12.345V", 'V').unwrap(), 12.345);
        assert_eq!(parse_readback("I1O?", "0.250A", 'A').unwrap(), 0.25);
        assert!(parse_readback("I1O?", "A", 'A').is_err());
    }

    #[test]
    fn test_voltage_ranges_per_output() {
        assert_eq!(voltage_ranges(1), 1..=2);
        assert_eq!(voltage_ranges(3), 1..=3);
    }

    #[tokio::test]
    async fn test_set_voltage_command() {
        let (mut psu, mock) = psu();
        psu.set_channel_voltage(2, 12.5).await.unwrap();
        assert_eq!(mock.last_command().as_deref(), Some("V2 12.5\n"));
    }

    #[tokio::test]
    async fn test_invalid_channel_sends_nothing() {
        let (mut psu, mock) = psu();
        assert!(psu.set_channel_voltage(0, 1.0).await.is_err());
        assert!(psu.enable_channel(4).await.is_err());
        assert!(mock.sent_commands().is_empty());
    }

    #[tokio::test]
    async fn test_nan_rejected() {
        let (mut psu, mock) = psu();
        let result = psu.set_channel_current_limit(1, f64::NAN).await;
        assert!(matches!(result, Err(InstrumentError::InvalidArgument(_))));
        assert!(mock.sent_commands().is_empty());
    }

    #[tokio::test]
    async fn test_voltage_range_validation() {
        let (mut psu, mock) = psu();
        assert!(psu.set_channel_voltage_range(1, 3).await.is_err());
        psu.set_channel_voltage_range(2, 3).await.unwrap();
        assert_eq!(mock.sent_commands(), vec!["VRANGE2 3\n"]);
    }

    #[tokio::test]
    async fn test_readback_voltage() {
        let (mut psu, mock) = psu();
        mock.push_response("5.002V\r\n");
        assert_eq!(psu.get_channel_voltage(1).await.unwrap(), 5.002);
        assert_eq!(mock.last_command().as_deref(), Some("V1O?\n"));
    }

    #[tokio::test]
    async fn test_split_reply_is_reassembled() {
        let (mut psu, mock) = psu();
        mock.push_response("12.3");
        mock.push_response("45V\r\n");
        assert_eq!(psu.get_channel_voltage(2).await.unwrap(), 12.345);
        assert_eq!(mock.pending_responses(), 0);
    }

    #[tokio::test]
    async fn test_unterminated_reply_is_capped() {
        let (mut psu, mock) = psu();
        for _ in 0..20 {
            mock.push_response("0".repeat(READ_CHUNK));
        }
        let result = psu.get_channel_voltage(1).await;
        assert!(matches!(
            result,
            Err(InstrumentError::InvalidResponse { ref command, .. }) if command == "V1O?"
        ));
        // The cap is hit before the queue runs dry.
        assert!(mock.pending_responses() > 0);
    }

    #[tokio::test]
    async fn test_bad_reply_is_invalid_response() {
        let (mut psu, mock) = psu();
        mock.push_response("ERR\r\n");
        let result = psu.get_status_byte().await;
        assert!(matches!(
            result,
            Err(InstrumentError::InvalidResponse { ref command, ref response })
                if command == "*STB?" && response == "ERR"
        ));
    }

    #[tokio::test]
    async fn test_power_supply_trait() {
        let (mut psu, mock) = psu();
        mock.push_response("1\r\n");
        let supply: &mut dyn PowerSupply = &mut psu;
        assert_eq!(supply.channels(), 1..=3);
        supply.set_output(3, true).await.unwrap();
        assert!(supply.output_enabled(3).await.unwrap());
        supply.all_outputs_off().await.unwrap();
        assert_eq!(mock.sent_commands(), vec!["OP3 1\n", "OP3?\n", "OPALL 0\n"]);
    }
}
