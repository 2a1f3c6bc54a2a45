pub mod cadence;
pub mod common;
pub mod config;
pub mod pending;
pub mod push;
pub mod simulate;
