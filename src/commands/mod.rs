// src/commands/mod.rs
//! Command handlers for the tsm-migrate CLI

mod convert;
pub mod progress;

pub use convert::cmd_convert;
