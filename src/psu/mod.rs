//! Power supply units.
//!
//! Each vendor driver exposes its full command set as inherent methods and
//! also implements [`PowerSupply`], the small capability trait that generic
//! code (the CLI, bench scripts) programs against.

use std::ops::RangeInclusive;

use async_trait::async_trait;

use crate::error::InstrumentResult;

pub mod aimtti;

/// Capability trait for programmable multi-output power supplies.
///
/// Channels are numbered the way the front panel numbers them.
#[async_trait]
pub trait PowerSupply: Send {
    /// Valid output numbers.
    fn channels(&self) -> RangeInclusive<u8>;

    /// Human readable identification string.
    async fn identify(&mut self) -> InstrumentResult<String>;

    /// Voltage setpoint.
    async fn set_voltage(&mut self, channel: u8, volts: f64) -> InstrumentResult<()>;

    /// Current limit setpoint.
    async fn set_current_limit(&mut self, channel: u8, amps: f64) -> InstrumentResult<()>;

    /// Measured output voltage.
    async fn read_voltage(&mut self, channel: u8) -> InstrumentResult<f64>;

    /// Measured output current.
    async fn read_current(&mut self, channel: u8) -> InstrumentResult<f64>;

    /// Switch one output.
    async fn set_output(&mut self, channel: u8, on: bool) -> InstrumentResult<()>;

    /// Whether the output is switched on.
    async fn output_enabled(&mut self, channel: u8) -> InstrumentResult<bool>;

    /// Switch every output off.
    async fn all_outputs_off(&mut self) -> InstrumentResult<()>;
}
