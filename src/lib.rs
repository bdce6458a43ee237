//! Drivers for lab and production-test instruments.
//!
//! Every driver is generic over a [`common::DeviceInterface`], the byte
//! transport to the instrument. Pick the transport that matches how the
//! instrument is wired up, hand it to the driver and call its methods:
//!
//! ```no_run
//! use instrumentrs::common::SerialDevice;
//! use instrumentrs::config::SerialConfig;
//! use instrumentrs::psu::aimtti::Mx100tp;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut psu = Mx100tp::new(SerialDevice::new(SerialConfig::new("/dev/ttyUSB0", 9600)));
//!     psu.set_channel_voltage(1, 12.0).await?;
//!     psu.enable_channel(1).await?;
//!     Ok(())
//! }
//! ```
//!
//! Supported instruments:
//! - [`psu::aimtti::Mx100tp`]: AIM-TTi MX100TP triple-output power supply
//! - [`platform::next::ts3::Ts3`]: NEXT / Neways TS3 test-fixture controller

pub mod common;
pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod psu;

pub use error::{InstrumentError, InstrumentResult};
