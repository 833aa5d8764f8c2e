#![doc = include_str!("../README.md")]

pub mod server;

pub use flightstream_core;
