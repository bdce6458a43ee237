//! Test platforms and fixture controllers, grouped by vendor.

pub mod next;
