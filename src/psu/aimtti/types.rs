//! Parameter and reply types for the MX100TP command set.

use std::fmt;
use std::str::FromStr;

use crate::error::InstrumentError;

/// `<CPD>` argument for the OVP/OCP enable commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionState {
    /// `ON`
    On,
    /// `OFF`
    Off,
}

impl From<bool> for ProtectionState {
    fn from(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

impl fmt::Display for ProtectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "ON",
            Self::Off => "OFF",
        })
    }
}

/// Current meter averaging (`DAMPING<N>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Damping {
    /// `ON`
    On,
    /// `OFF`
    Off,
    /// `LOW`
    Low,
    /// `MED`
    Medium,
    /// `HIGH`
    High,
}

impl fmt::Display for Damping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Low => "LOW",
            Self::Medium => "MED",
            Self::High => "HIGH",
        })
    }
}

/// Multi-On / Multi-Off action of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiAction {
    /// Switch together with the others.
    Quick,
    /// Not switched by Multi-On/Multi-Off.
    Never,
    /// Switch after the output's own delay.
    Delay,
}

impl fmt::Display for MultiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quick => "QUICK",
            Self::Never => "NEVER",
            Self::Delay => "DELAY",
        })
    }
}

/// Voltage tracking mode (`CONFIG`), see section 9.1 of the manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// Outputs are independent.
    None = 0,
    /// Tracking mode 1.
    Mode1 = 1,
    /// Tracking mode 2.
    Mode2 = 2,
    /// Tracking mode 3.
    Mode3 = 3,
}

impl TryFrom<u8> for TrackingMode {
    type Error = InstrumentError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Mode1),
            2 => Ok(Self::Mode2),
            3 => Ok(Self::Mode3),
            other => Err(InstrumentError::InvalidArgument(format!(
                "tracking mode {} is not 0-3",
                other
            ))),
        }
    }
}

/// First means by which the LAN interface looks for an IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetConfig {
    /// `DHCP`
    Dhcp,
    /// `AUTO`, link-local addressing.
    Auto,
    /// `STATIC`
    Static,
}

impl fmt::Display for NetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dhcp => "DHCP",
            Self::Auto => "AUTO",
            Self::Static => "STATIC",
        })
    }
}

impl FromStr for NetConfig {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DHCP" => Ok(Self::Dhcp),
            "AUTO" => Ok(Self::Auto),
            "STATIC" => Ok(Self::Static),
            other => Err(InstrumentError::InvalidArgument(format!(
                "unknown network configuration '{}'",
                other
            ))),
        }
    }
}

/// Reply to `IFLOCK?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceLock {
    /// No interface holds the lock.
    Unlocked,
    /// This interface owns the lock.
    Owned,
    /// Held by another interface, or disabled from the web interface.
    Unavailable,
}

impl TryFrom<i8> for InterfaceLock {
    type Error = InstrumentError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unlocked),
            1 => Ok(Self::Owned),
            -1 => Ok(Self::Unavailable),
            other => Err(InstrumentError::InvalidArgument(format!(
                "interface lock state {} is not -1, 0 or 1",
                other
            ))),
        }
    }
}

/// Parsed `*IDN?` reply: `<NAME>, <model>, <serial>, <version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    /// Manufacturer name.
    pub manufacturer: String,
    /// Model name.
    pub model: String,
    /// Serial number.
    pub serial: String,
    /// Firmware versions.
    pub version: String,
}

impl FromStr for Identification {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().splitn(4, ',').map(str::trim).collect();
        match parts.as_slice() {
            [manufacturer, model, serial, version] => Ok(Self {
                manufacturer: manufacturer.to_string(),
                model: model.to_string(),
                serial: serial.to_string(),
                version: version.to_string(),
            }),
            _ => Err(InstrumentError::invalid_response("*IDN?", s)),
        }
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.manufacturer, self.model, self.serial, self.version
        )
    }
}
