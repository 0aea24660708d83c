//! Structural XML pass: walks the upstream TRDP-flavoured schema with
//! `quick_xml`'s pull parser and assembles a [`ConfigModel`], deferring
//! telegram names to the textual pass in `name_scan`.
//!
//! Schema shape assumed (attribute names only, order is irrelevant):
//!
//! ```xml
//! <trdp-config>
//!   <device-configuration memory-size="65536" debug="true"/>
//!   <bus-interface-list>
//!     <bus-interface name="eth0" network-id="1" host-ip="10.0.0.1">
//!       <pd-com-parameter marshall="false"/>
//!       <telegram com-id="1001" dataset-id="10" type="SOURCE" cycle-us="10000" name="...">
//!         <source><uri host="A" host2=""/></source>
//!         <destination><uri host="B"/></destination>
//!       </telegram>
//!     </bus-interface>
//!   </bus-interface-list>
//!   <data-set-list>
//!     <data-set id="10" name="StatusSet">
//!       <element name="a" type="UINT16" array-size="0"/>
//!     </data-set>
//!   </data-set-list>
//! </trdp-config>
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs;
use std::path::Path;

use tracing::debug;

use trdp_common::{
    ConfigError, ConfigModel, Dataset, DatasetElement, DeviceConfig, Direction, ElementType,
    InterfaceDef, PdDefaultFlags, PdTelegramDef,
};

use crate::name_scan::scan_telegram_names;

/// One `<telegram>`'s structural data, before direction resolution and
/// before the name pass has supplied a name.
struct ExchangeDef {
    com_id: u32,
    dataset_id: u32,
    interface_name: String,
    cycle_us: u64,
    marshall: bool,
    declared_type: Option<Direction>,
    source_hosts: Vec<String>,
    dest_hosts: Vec<String>,
}

/// Load and validate an XML configuration, resolving telegram direction
/// relative to `host_name`.
///
/// See `trdp-config`'s crate docs for the two-pass design: this
/// function drives the structural pass directly and calls
/// [`scan_telegram_names`] for the textual name pass.
pub fn load_from_xml(xml_path: &Path, host_name: &str) -> Result<ConfigModel, ConfigError> {
    let raw = fs::read_to_string(xml_path).map_err(|e| {
        ConfigError::ParseFailure(format!("cannot open {}: {e}", xml_path.display()))
    })?;

    let telegram_names = scan_telegram_names(&raw);

    let mut reader = Reader::from_str(&raw);
    reader.trim_text(true);

    let mut device = DeviceConfig::default();
    let mut interfaces = Vec::new();
    let mut datasets = Vec::new();
    let mut exchanges = Vec::new();

    let mut cur_interface: Option<InterfaceDef> = None;
    let mut cur_dataset: Option<Dataset> = None;
    let mut cur_exchange: Option<ExchangeDef> = None;
    let mut in_source = false;
    let mut in_destination = false;

    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ConfigError::ParseFailure(format!("XML syntax error: {e}")))?;

        match event {
            Event::Eof => break,
            Event::Empty(e) => {
                open_tag(
                    &e,
                    &mut device,
                    &mut cur_interface,
                    &mut cur_dataset,
                    &mut cur_exchange,
                    in_source,
                    in_destination,
                )?;
                close_tag(
                    e.local_name().as_ref(),
                    &mut interfaces,
                    &mut datasets,
                    &mut exchanges,
                    &mut cur_interface,
                    &mut cur_dataset,
                    &mut cur_exchange,
                    &mut in_source,
                    &mut in_destination,
                );
            }
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                open_tag(
                    &e,
                    &mut device,
                    &mut cur_interface,
                    &mut cur_dataset,
                    &mut cur_exchange,
                    in_source,
                    in_destination,
                )?;
                if name == b"source" {
                    in_source = true;
                } else if name == b"destination" {
                    in_destination = true;
                }
            }
            Event::End(e) => {
                close_tag(
                    e.local_name().as_ref(),
                    &mut interfaces,
                    &mut datasets,
                    &mut exchanges,
                    &mut cur_interface,
                    &mut cur_dataset,
                    &mut cur_exchange,
                    &mut in_source,
                    &mut in_destination,
                );
            }
            _ => {}
        }
        buf.clear();
    }

    if interfaces.is_empty() {
        return Err(ConfigError::SectionMissing("bus-interface-list".into()));
    }
    if datasets.is_empty() {
        return Err(ConfigError::SectionMissing("data-set-list".into()));
    }

    let telegrams = exchanges
        .into_iter()
        .map(|ex| {
            let direction = resolve_direction(&ex, host_name);
            let name = telegram_names
                .get(&ex.com_id)
                .cloned()
                .unwrap_or_else(|| format!("telegram-{}", ex.com_id));
            PdTelegramDef {
                name,
                com_id: ex.com_id,
                dataset_id: ex.dataset_id,
                direction,
                cycle_us: ex.cycle_us,
                marshall: ex.marshall,
                interface_name: ex.interface_name,
            }
        })
        .collect();

    debug!(
        host_name,
        interfaces = interfaces.len(),
        datasets = datasets.len(),
        telegrams = telegrams.len(),
        path = %xml_path.display(),
        "loaded configuration"
    );

    Ok(ConfigModel {
        host_name: host_name.to_string(),
        device,
        interfaces,
        datasets,
        telegrams,
    })
}

/// Direction resolution per `host_name`, per the engine's host-aware
/// rule: source-URI hit, destination-URI hit, both, or fall back to
/// the exchange's declared type (unset falls back to `SourceSink`).
fn resolve_direction(ex: &ExchangeDef, host_name: &str) -> Direction {
    let is_source = ex.source_hosts.iter().any(|h| h == host_name);
    let is_sink = ex.dest_hosts.iter().any(|h| h == host_name);
    match (is_source, is_sink) {
        (true, true) => Direction::SourceSink,
        (true, false) => Direction::Source,
        (false, true) => Direction::Sink,
        (false, false) => ex.declared_type.unwrap_or_default(),
    }
}

#[allow(clippy::too_many_arguments)]
fn open_tag(
    e: &BytesStart,
    device: &mut DeviceConfig,
    cur_interface: &mut Option<InterfaceDef>,
    cur_dataset: &mut Option<Dataset>,
    cur_exchange: &mut Option<ExchangeDef>,
    in_source: bool,
    in_destination: bool,
) -> Result<(), ConfigError> {
    match e.local_name().as_ref() {
        b"device-configuration" => {
            device.memory_size = attr(e, b"memory-size").and_then(|v| v.parse().ok());
            device.debug_enabled = attr(e, b"debug").is_some_and(|v| v == "true" || v == "1");
        }
        b"bus-interface" => {
            let name = required_attr(e, "bus-interface", "name")?;
            let network_id = required_u32(e, "bus-interface", "network-id")?;
            let host_ip = required_attr(e, "bus-interface", "host-ip")?;
            *cur_interface = Some(InterfaceDef {
                name,
                network_id,
                host_ip,
                pd_defaults: PdDefaultFlags::default(),
            });
        }
        b"pd-com-parameter" => {
            if let Some(interface) = cur_interface.as_mut() {
                interface.pd_defaults.marshall =
                    attr(e, b"marshall").is_some_and(|v| v == "true" || v == "1");
            }
        }
        b"telegram" => {
            let interface_name = cur_interface
                .as_ref()
                .ok_or_else(|| ConfigError::SectionMissing("bus-interface".into()))?
                .name
                .clone();
            let defaults_marshall = cur_interface
                .as_ref()
                .map(|i| i.pd_defaults.marshall)
                .unwrap_or_default();

            let com_id = required_u32(e, "telegram", "com-id")?;
            let dataset_id = required_u32(e, "telegram", "dataset-id")?;
            let cycle_us = attr(e, b"cycle-us")
                .map(|v| parse_u64(&v, "telegram", "cycle-us"))
                .transpose()?
                .unwrap_or(0);
            let declared_type = attr(e, b"type").and_then(|v| match v.as_str() {
                "SOURCE" => Some(Direction::Source),
                "SINK" => Some(Direction::Sink),
                "SOURCESINK" | "SOURCE_SINK" => Some(Direction::SourceSink),
                _ => None,
            });
            let marshall = attr(e, b"marshall")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults_marshall);

            *cur_exchange = Some(ExchangeDef {
                com_id,
                dataset_id,
                interface_name,
                cycle_us,
                marshall,
                declared_type,
                source_hosts: Vec::new(),
                dest_hosts: Vec::new(),
            });
        }
        b"uri" => {
            let host = attr(e, b"host");
            let host2 = attr(e, b"host2");
            if let Some(exchange) = cur_exchange.as_mut() {
                let hosts = if in_source {
                    &mut exchange.source_hosts
                } else if in_destination {
                    &mut exchange.dest_hosts
                } else {
                    return Ok(());
                };
                hosts.extend(host);
                hosts.extend(host2);
            }
        }
        b"data-set" => {
            let id = required_u32(e, "data-set", "id")?;
            let name = required_attr(e, "data-set", "name")?;
            *cur_dataset = Some(Dataset {
                id,
                name,
                elements: Vec::new(),
            });
        }
        b"element" => {
            let name = required_attr(e, "element", "name")?;
            let type_name = required_attr(e, "element", "type")?;
            let array_size = attr(e, b"array-size")
                .map(|v| parse_u32(&v, "element", "array-size"))
                .transpose()?
                .unwrap_or(0);
            if let Some(dataset) = cur_dataset.as_mut() {
                dataset.elements.push(DatasetElement {
                    name,
                    element_type: ElementType::from_xml_name(&type_name),
                    array_size,
                });
            }
        }
        _ => {}
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn close_tag(
    local_name: &[u8],
    interfaces: &mut Vec<InterfaceDef>,
    datasets: &mut Vec<Dataset>,
    exchanges: &mut Vec<ExchangeDef>,
    cur_interface: &mut Option<InterfaceDef>,
    cur_dataset: &mut Option<Dataset>,
    cur_exchange: &mut Option<ExchangeDef>,
    in_source: &mut bool,
    in_destination: &mut bool,
) {
    match local_name {
        b"bus-interface" => {
            if let Some(interface) = cur_interface.take() {
                interfaces.push(interface);
            }
        }
        b"telegram" => {
            if let Some(exchange) = cur_exchange.take() {
                exchanges.push(exchange);
            }
        }
        b"data-set" => {
            if let Some(dataset) = cur_dataset.take() {
                datasets.push(dataset);
            }
        }
        b"source" => *in_source = false,
        b"destination" => *in_destination = false,
        _ => {}
    }
}

fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| a.unescape_value().unwrap_or_default().into_owned())
}

fn required_attr(e: &BytesStart, element: &str, attribute: &str) -> Result<String, ConfigError> {
    attr(e, attribute.as_bytes()).ok_or_else(|| ConfigError::MalformedAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
        reason: "required attribute missing".to_string(),
    })
}

fn required_u32(e: &BytesStart, element: &str, attribute: &str) -> Result<u32, ConfigError> {
    let raw = required_attr(e, element, attribute)?;
    parse_u32(&raw, element, attribute)
}

fn parse_u32(raw: &str, element: &str, attribute: &str) -> Result<u32, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::MalformedAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
            reason: format!("not a valid unsigned integer: {raw}"),
        })
}

fn parse_u64(raw: &str, element: &str, attribute: &str) -> Result<u64, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::MalformedAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
            reason: format!("not a valid unsigned integer: {raw}"),
        })
}
