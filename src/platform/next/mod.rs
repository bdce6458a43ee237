//! NEXT / Neways test platforms.

pub mod ts3;

pub use ts3::Ts3;
