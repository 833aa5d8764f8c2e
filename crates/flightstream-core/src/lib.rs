#![doc = include_str!("../README.md")]

mod common;
pub mod log;

pub use common::*;
// Public re-export so downstream crates can access `ferroid` via
// `flightstream_core::ferroid`
pub use ferroid;
