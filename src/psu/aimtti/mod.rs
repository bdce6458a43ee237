//! AIM-TTi (Thurlby Thandar Instruments) power supplies.

pub mod mx100tp;
pub mod types;

pub use mx100tp::Mx100tp;
pub use types::{
    Damping, Identification, InterfaceLock, MultiAction, NetConfig, ProtectionState, TrackingMode,
};
