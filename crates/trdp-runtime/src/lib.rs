#![doc = "PD runtime for the TRDP engine: codec, scheduler, RX pipeline, and the Engine facade."]

mod codec;
mod engine;
mod runtime;
mod scheduler;

pub use codec::{decode, encode, DecodedField};
pub use engine::{Engine, EngineState, PdSnapshot};
pub use runtime::{InterfaceRuntime, PdRuntime};
pub use scheduler::{Scheduler, TICK_PERIOD};
