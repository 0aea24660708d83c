#![doc = "Two-pass XML configuration loader for the TRDP PD engine."]

mod loader;
mod name_scan;

pub use loader::load_from_xml;
