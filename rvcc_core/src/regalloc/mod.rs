//! Register allocation (spec §4.5.1): linear scan over per-function live intervals,
//! run once per register class (int, float).

pub mod linear_scan;

pub use linear_scan::allocate_function;
