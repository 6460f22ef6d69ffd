use crate::error::{TagMapError, TagMapResult};
use crate::types::{AddressWindow, DataType, Field, Region, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Stateless conversions between typed values and the device's flat word
/// layout.
///
/// Words are big-endian; 32-bit values are assembled from two words in
/// little-endian word order (low word first). This is a fixed device
/// convention and must be preserved exactly for interoperability. Strings are
/// laid out byte-sequentially across words with no word reordering.
pub struct RegisterCodec;

impl RegisterCodec {
    /// Validate a value against a field's declared type and return it in
    /// normalized form. Integer values widen implicitly into float fields;
    /// every other mismatch is rejected.
    pub fn validate(field: &Field, value: &Value) -> TagMapResult<Value> {
        match (field.data_type, value) {
            (DataType::Bool, Value::Bool(_))
            | (DataType::Int16, Value::Int16(_))
            | (DataType::Int32, Value::Int32(_))
            | (DataType::Float32, Value::Float32(_)) => Ok(value.clone()),
            (DataType::Float32, Value::Int16(v)) => Ok(Value::Float32(*v as f32)),
            (DataType::Float32, Value::Int32(v)) => Ok(Value::Float32(*v as f32)),
            (DataType::Str { length }, Value::Str(s)) => {
                if s.len() > length {
                    return Err(TagMapError::StringTooLong {
                        tag: field.name.clone(),
                        length: s.len(),
                        max: length,
                    });
                }
                Ok(value.clone())
            }
            _ => Err(TagMapError::TypeMismatch {
                tag: field.name.clone(),
                expected: field.data_type.to_string(),
                actual: value.type_name(),
            }),
        }
    }

    /// Encode a normalized value into the field's register layout.
    ///
    /// Strings are right-padded with spaces to the declared length; an odd
    /// declared length leaves the final half-word as a zero fill byte.
    pub fn encode(field: &Field, value: &Value) -> TagMapResult<Vec<u16>> {
        let words = match (field.data_type, value) {
            (DataType::Bool, Value::Bool(b)) => vec![u16::from(*b)],
            (DataType::Int16, Value::Int16(v)) => vec![*v as u16],
            (DataType::Int32, Value::Int32(v)) => split_low_word_first(v.to_be_bytes()),
            (DataType::Float32, Value::Float32(v)) => split_low_word_first(v.to_be_bytes()),
            (DataType::Str { length }, Value::Str(s)) => {
                if s.len() > length {
                    return Err(TagMapError::StringTooLong {
                        tag: field.name.clone(),
                        length: s.len(),
                        max: length,
                    });
                }
                let mut bytes = s.as_bytes().to_vec();
                bytes.resize(length, b' ');
                let mut words = Vec::with_capacity(length.div_ceil(2));
                let mut chunks = bytes.chunks_exact(2);
                for pair in &mut chunks {
                    words.push(u16::from_be_bytes([pair[0], pair[1]]));
                }
                if let [last] = chunks.remainder() {
                    words.push(u16::from_be_bytes([*last, 0]));
                }
                words
            }
            _ => {
                return Err(TagMapError::TypeMismatch {
                    tag: field.name.clone(),
                    expected: field.data_type.to_string(),
                    actual: value.type_name(),
                })
            }
        };
        Ok(words)
    }

    /// Decode one field from the words at the cursor position, returning the
    /// value and the number of words consumed.
    ///
    /// `words` must hold at least `field.data_type.register_span()` entries;
    /// the window walkers guarantee this.
    pub fn decode(field: &Field, words: &[u16]) -> (Value, usize) {
        match field.data_type {
            DataType::Bool => (Value::Bool(words[0] != 0), 1),
            DataType::Int16 => (Value::Int16(words[0] as i16), 1),
            DataType::Int32 => (Value::Int32(i32::from_be_bytes(join_low_word_first(words))), 2),
            DataType::Float32 => (
                Value::Float32(f32::from_be_bytes(join_low_word_first(words))),
                2,
            ),
            DataType::Str { length } => {
                let span = field.data_type.register_span();
                let mut bytes = Vec::with_capacity(span * 2);
                for w in &words[..span] {
                    bytes.extend_from_slice(&w.to_be_bytes());
                }
                // Content is exactly `length` bytes; an odd length leaves one
                // trailing fill byte that carries nothing.
                bytes.truncate(length);
                while bytes.last() == Some(&0) {
                    bytes.pop();
                }
                let text = match String::from_utf8(bytes) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(tag = %field.name, "invalid bytes in string field, decoding lossily");
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    }
                };
                (Value::Str(text), span)
            }
        }
    }

    /// Walk a register window's words and decode every field the catalog maps
    /// into it. Addresses the catalog does not name advance the cursor by
    /// exactly one word; they are holes the device reserves.
    pub fn decode_window(
        region: Region,
        window: AddressWindow,
        words: &[u16],
        index: &BTreeMap<u32, Field>,
    ) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        let mut cursor = 0usize;
        let mut address = region.address_at(window.offset);
        let end = address + window.count as u32;
        while address < end && cursor < words.len() {
            match index.get(&address) {
                Some(field) => {
                    let span = field.data_type.register_span();
                    if cursor + span > words.len() {
                        warn!(tag = %field.name, "window truncated mid-field, stopping decode");
                        break;
                    }
                    let (value, consumed) = Self::decode(field, &words[cursor..cursor + span]);
                    out.insert(field.name.clone(), value);
                    cursor += consumed;
                    address += consumed as u32;
                }
                None => {
                    cursor += 1;
                    address += 1;
                }
            }
        }
        out
    }

    /// Walk a discrete window's bits: one bit per address, holes advance the
    /// cursor by one bit.
    pub fn decode_bits(
        region: Region,
        window: AddressWindow,
        bits: &[bool],
        index: &BTreeMap<u32, Field>,
    ) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for (i, bit) in bits.iter().enumerate().take(window.count as usize) {
            let address = region.address_at(window.offset) + i as u32;
            if let Some(field) = index.get(&address) {
                out.insert(field.name.clone(), Value::Bool(*bit));
            }
        }
        out
    }
}

/// Split a 32-bit big-endian byte image into two words, low word first.
fn split_low_word_first(bytes: [u8; 4]) -> Vec<u16> {
    let high = u16::from_be_bytes([bytes[0], bytes[1]]);
    let low = u16::from_be_bytes([bytes[2], bytes[3]]);
    vec![low, high]
}

/// Reassemble a 32-bit big-endian byte image from two words, low word first.
fn join_low_word_first(words: &[u16]) -> [u8; 4] {
    let high = words[1].to_be_bytes();
    let low = words[0].to_be_bytes();
    [high[0], high[1], low[0], low[1]]
}
