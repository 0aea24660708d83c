//! Immutable configuration model produced by the XML loader.
//!
//! Every type here is deep-copied into the engine at `load_config` time
//! and is never mutated afterwards; mutable per-telegram state lives in
//! `PdRuntime` (defined alongside the engine, not here).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The element types the codec knows how to encode/decode.
///
/// Anything the loader doesn't recognize becomes `Opaque`, carrying the
/// raw type string so a config dump can still report what was in the
/// XML. The codec refuses `Opaque` elements - floating-point, string,
/// and nested-dataset payloads are out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    /// Single byte, 1 if nonzero else 0.
    Bool8,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 16-bit integer, big-endian on the wire.
    Uint16,
    /// Signed 16-bit integer, big-endian on the wire.
    Int16,
    /// Unsigned 32-bit integer, big-endian on the wire.
    Uint32,
    /// Signed 32-bit integer, big-endian on the wire.
    Int32,
    /// A type name the loader didn't recognize.
    Opaque(String),
}

impl ElementType {
    /// Parse a dataset element type name as it appears in the XML.
    #[must_use]
    pub fn from_xml_name(name: &str) -> Self {
        match name {
            "BOOL8" => Self::Bool8,
            "UINT8" => Self::Uint8,
            "INT8" => Self::Int8,
            "UINT16" => Self::Uint16,
            "INT16" => Self::Int16,
            "UINT32" => Self::Uint32,
            "INT32" => Self::Int32,
            other => Self::Opaque(other.to_string()),
        }
    }

    /// Wire width in bytes for one scalar instance of this type, or
    /// `None` for `Opaque` (the codec emits/consumes no bytes for it).
    #[must_use]
    pub fn wire_width(&self) -> Option<usize> {
        match self {
            Self::Bool8 | Self::Uint8 | Self::Int8 => Some(1),
            Self::Uint16 | Self::Int16 => Some(2),
            Self::Uint32 | Self::Int32 => Some(4),
            Self::Opaque(_) => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool8 => write!(f, "BOOL8"),
            Self::Uint8 => write!(f, "UINT8"),
            Self::Int8 => write!(f, "INT8"),
            Self::Uint16 => write!(f, "UINT16"),
            Self::Int16 => write!(f, "INT16"),
            Self::Uint32 => write!(f, "UINT32"),
            Self::Int32 => write!(f, "INT32"),
            Self::Opaque(name) => write!(f, "{name}"),
        }
    }
}

/// One field within a [`Dataset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetElement {
    /// Field name. Uniqueness within a dataset is expected but not
    /// enforced by the loader (see DESIGN.md open questions).
    pub name: String,
    /// Wire type.
    pub element_type: ElementType,
    /// 0 means scalar; N > 0 means a fixed array of N elements.
    pub array_size: u32,
}

impl DatasetElement {
    /// Number of repetitions this element occupies on the wire.
    #[must_use]
    pub fn repetitions(&self) -> u32 {
        if self.array_size == 0 {
            1
        } else {
            self.array_size
        }
    }
}

/// A typed record schema, addressed by numeric `dataset_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Numeric dataset identifier.
    pub id: u32,
    /// Human-readable dataset name.
    pub name: String,
    /// Ordered list of fields; wire layout follows this order.
    pub elements: Vec<DatasetElement>,
}

/// A network interface the engine binds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDef {
    /// Interface name, used to key `InterfaceRuntime` lookups.
    pub name: String,
    /// Network identifier from the XML (opaque to the engine).
    pub network_id: u32,
    /// Dotted-quad host IP this interface binds to.
    pub host_ip: String,
    /// Default PD flags for telegrams on this interface that don't
    /// declare their own.
    pub pd_defaults: PdDefaultFlags,
}

/// Direction of a PD telegram relative to the loading host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// This host emits the telegram.
    Source,
    /// This host receives the telegram.
    Sink,
    /// This host both emits and receives the telegram.
    #[default]
    SourceSink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Sink => write!(f, "sink"),
            Self::SourceSink => write!(f, "source_sink"),
        }
    }
}

/// One PD telegram definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdTelegramDef {
    /// Telegram name, resolved from the XML's textual name pass.
    pub name: String,
    /// Communication identifier; unique within `interface_name`.
    pub com_id: u32,
    /// The dataset this telegram's payload is shaped by.
    pub dataset_id: u32,
    /// Direction relative to the host the config was loaded for.
    pub direction: Direction,
    /// Transmission period in microseconds. 0 disables periodic TX.
    pub cycle_us: u64,
    /// Whether per-element byte-swapping applies (out of codec scope;
    /// the codec is always big-endian regardless of this flag).
    pub marshall: bool,
    /// Name of the owning interface.
    pub interface_name: String,
}

/// Advisory device-level metadata parsed from `<device-configuration>`.
///
/// Not consumed by any runtime behaviour; kept so a config dump isn't
/// missing information a real inspector would want.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Declared memory size in bytes, if present in the XML.
    pub memory_size: Option<u32>,
    /// Whether debug output was enabled in the source configuration.
    pub debug_enabled: bool,
}

/// Per-interface default PD flags not otherwise modeled on
/// [`PdTelegramDef`]. Only `marshall` (carried on the telegram itself)
/// affects codec behaviour; the rest are metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdDefaultFlags {
    /// Default marshalling flag for telegrams on this interface that
    /// don't declare their own.
    pub marshall: bool,
}

/// The immutable, deep-copied configuration produced by the loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigModel {
    /// Host this configuration was resolved for.
    pub host_name: String,
    /// Advisory device metadata.
    pub device: DeviceConfig,
    /// All configured interfaces.
    pub interfaces: Vec<InterfaceDef>,
    /// All configured datasets.
    pub datasets: Vec<Dataset>,
    /// All configured PD telegrams.
    pub telegrams: Vec<PdTelegramDef>,
}

impl ConfigModel {
    /// Find a dataset by id.
    #[must_use]
    pub fn dataset(&self, dataset_id: u32) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.id == dataset_id)
    }

    /// Find an interface by name.
    #[must_use]
    pub fn interface(&self, name: &str) -> Option<&InterfaceDef> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}
