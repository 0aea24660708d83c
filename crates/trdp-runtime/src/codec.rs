//! Big-endian binary codec for dataset payloads.
//!
//! Encoding produces `tx_payload` bytes from a named field map; decoding
//! walks a received payload back into named, typed field values. Both
//! directions are driven by a [`Dataset`]'s element order - the codec
//! never looks at element names to reorder anything.

use std::collections::HashMap;

use trdp_common::{Dataset, ElementType};

/// One decoded field: its name, declared type, and one value per array
/// slot (`values.len() == 1` for scalars).
///
/// Signed types are sign-extended into `i64`; `BOOL8` values are
/// normalized to `0`/`1`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DecodedField {
    /// Field name, as declared in the dataset.
    pub name: String,
    /// Declared wire type.
    pub element_type: ElementType,
    /// One value per repetition (`array_size` slots, or one for scalars).
    pub values: Vec<i64>,
}

/// Encode `values` against `dataset`'s element order into a big-endian
/// byte buffer.
///
/// Missing field names default to `0.0`. A scalar `array_size` of 0 is
/// treated as a single repetition; `array_size > 1` broadcasts the same
/// named value to every slot (see DESIGN.md open question 1). `Opaque`
/// elements emit no bytes. Values outside the target width truncate to
/// its low bits - this is a documented boundary behaviour, not an
/// error.
#[must_use]
pub fn encode(dataset: &Dataset, values: &HashMap<String, f64>) -> Vec<u8> {
    let mut buf = Vec::new();
    for element in &dataset.elements {
        let value = values.get(&element.name).copied().unwrap_or(0.0);
        for _ in 0..element.repetitions() {
            encode_value(value, &element.element_type, &mut buf);
        }
    }
    buf
}

fn encode_value(value: f64, element_type: &ElementType, out: &mut Vec<u8>) {
    let truncated = value as i64;
    match element_type {
        ElementType::Bool8 => out.push(if value != 0.0 { 1 } else { 0 }),
        ElementType::Uint8 => out.push(truncated as u8),
        ElementType::Int8 => out.push(truncated as i8 as u8),
        ElementType::Uint16 => out.extend_from_slice(&(truncated as u16).to_be_bytes()),
        ElementType::Int16 => out.extend_from_slice(&(truncated as i16).to_be_bytes()),
        ElementType::Uint32 => out.extend_from_slice(&(truncated as u32).to_be_bytes()),
        ElementType::Int32 => out.extend_from_slice(&(truncated as i32).to_be_bytes()),
        ElementType::Opaque(_) => {}
    }
}

/// Decode `payload` against `dataset`'s element order.
///
/// Walks elements in declared order; if the payload runs out before an
/// element's repetitions can be fully read, decoding stops and returns
/// the fields successfully decoded so far rather than erroring. An
/// `Opaque` element also stops decoding at that point - the codec has
/// no wire width to advance by.
#[must_use]
pub fn decode(dataset: &Dataset, payload: &[u8]) -> Vec<DecodedField> {
    let mut fields = Vec::new();
    let mut offset = 0usize;

    for element in &dataset.elements {
        let Some(width) = element.element_type.wire_width() else {
            break;
        };
        let reps = element.repetitions() as usize;
        let needed = width * reps;
        if offset + needed > payload.len() {
            break;
        }

        let mut values = Vec::with_capacity(reps);
        for i in 0..reps {
            let start = offset + i * width;
            values.push(decode_value(&payload[start..start + width], &element.element_type));
        }
        offset += needed;

        fields.push(DecodedField {
            name: element.name.clone(),
            element_type: element.element_type.clone(),
            values,
        });
    }

    fields
}

fn decode_value(bytes: &[u8], element_type: &ElementType) -> i64 {
    match element_type {
        ElementType::Bool8 => i64::from(bytes[0] != 0),
        ElementType::Uint8 => i64::from(bytes[0]),
        ElementType::Int8 => i64::from(bytes[0] as i8),
        ElementType::Uint16 => i64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        ElementType::Int16 => i64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
        ElementType::Uint32 => i64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        ElementType::Int32 => i64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        ElementType::Opaque(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trdp_common::DatasetElement;

    fn dataset() -> Dataset {
        Dataset {
            id: 1,
            name: "StatusSet".into(),
            elements: vec![
                DatasetElement {
                    name: "a".into(),
                    element_type: ElementType::Uint16,
                    array_size: 0,
                },
                DatasetElement {
                    name: "b".into(),
                    element_type: ElementType::Int8,
                    array_size: 0,
                },
            ],
        }
    }

    #[test]
    fn encode_round_trip_scenario() {
        let ds = dataset();
        let values = HashMap::from([("a".to_string(), 258.0), ("b".to_string(), -1.0)]);
        assert_eq!(encode(&ds, &values), vec![0x01, 0x02, 0xFF]);
    }

    #[test]
    fn decode_scenario() {
        let ds = dataset();
        let decoded = decode(&ds, &[0x00, 0x05, 0x80]);
        assert_eq!(
            decoded,
            vec![
                DecodedField {
                    name: "a".into(),
                    element_type: ElementType::Uint16,
                    values: vec![5],
                },
                DecodedField {
                    name: "b".into(),
                    element_type: ElementType::Int8,
                    values: vec![-128],
                },
            ]
        );
    }

    #[test]
    fn missing_field_defaults_to_zero() {
        let ds = dataset();
        let values = HashMap::new();
        assert_eq!(encode(&ds, &values), vec![0x00, 0x00, 0x00]);
    }

    #[test]
    fn truncates_out_of_range_values() {
        let ds = Dataset {
            id: 2,
            name: "Narrow".into(),
            elements: vec![DatasetElement {
                name: "x".into(),
                element_type: ElementType::Uint8,
                array_size: 0,
            }],
        };
        let values = HashMap::from([("x".to_string(), 300.0)]);
        assert_eq!(encode(&ds, &values), vec![300u32 as u8]);
    }

    #[test]
    fn array_broadcasts_scalar_to_every_slot() {
        let ds = Dataset {
            id: 3,
            name: "Arr".into(),
            elements: vec![DatasetElement {
                name: "x".into(),
                element_type: ElementType::Uint8,
                array_size: 3,
            }],
        };
        let values = HashMap::from([("x".to_string(), 7.0)]);
        assert_eq!(encode(&ds, &values), vec![7, 7, 7]);
    }

    #[test]
    fn truncated_payload_returns_partial_decode() {
        let ds = dataset();
        // Only one byte available - not enough for "a" (UINT16).
        let decoded = decode(&ds, &[0x00]);
        assert!(decoded.is_empty());
    }

    #[test]
    fn truncated_payload_mid_dataset_returns_prefix() {
        let ds = dataset();
        // "a" fully present, "b" missing entirely.
        let decoded = decode(&ds, &[0x00, 0x05]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "a");
    }

    #[test]
    fn opaque_element_stops_decoding() {
        let ds = Dataset {
            id: 4,
            name: "Mixed".into(),
            elements: vec![
                DatasetElement {
                    name: "a".into(),
                    element_type: ElementType::Uint8,
                    array_size: 0,
                },
                DatasetElement {
                    name: "b".into(),
                    element_type: ElementType::Opaque("FLOAT64".into()),
                    array_size: 0,
                },
                DatasetElement {
                    name: "c".into(),
                    element_type: ElementType::Uint8,
                    array_size: 0,
                },
            ],
        };
        let decoded = decode(&ds, &[1, 2, 3]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "a");
    }

    #[test]
    fn bool8_normalizes_nonzero_to_one() {
        let ds = Dataset {
            id: 5,
            name: "Flags".into(),
            elements: vec![DatasetElement {
                name: "flag".into(),
                element_type: ElementType::Bool8,
                array_size: 0,
            }],
        };
        let decoded = decode(&ds, &[0x2A]);
        assert_eq!(decoded[0].values, vec![1]);
    }
}
