#![doc = "Configuration model, error types, and time helpers shared across the TRDP PD engine workspace."]

pub mod config;
pub mod error;
pub mod time;

pub use config::*;
pub use error::*;
pub use time::*;
