use crate::error::{TagMapError, TagMapResult};
use crate::types::{DataType, Field};
use csv::ReaderBuilder;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Loader for the delimited tag export produced by the PLC programming
/// software. The export names every declared point; only rows that carry a
/// protocol address become fields.
pub struct TagCatalog;

const COL_NAME: &str = "Tag Name";
const COL_START: &str = "MODBUS Start Address";
const COL_END: &str = "MODBUS End Address";
const COL_SYSTEM_ID: &str = "System ID";
const COL_DATA_TYPE: &str = "Data Type";
const COL_CHARS: &str = "Number of Characters";
const COL_COMMENT: &str = "Comment";

impl TagCatalog {
    /// Load and validate a tag catalog from a file path.
    pub fn load(path: impl AsRef<Path>) -> TagMapResult<BTreeMap<String, Field>> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|e| {
            TagMapError::MalformedCatalog(format!(
                "cannot read tag file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::parse(&raw)
    }

    /// Load a catalog from any reader, e.g. an in-memory fixture.
    pub fn from_reader(mut reader: impl Read) -> TagMapResult<BTreeMap<String, Field>> {
        let mut raw = String::new();
        reader
            .read_to_string(&mut raw)
            .map_err(|e| TagMapError::MalformedCatalog(format!("cannot read tag source: {e}")))?;
        Self::parse(&raw)
    }

    /// Parse a catalog from its raw text.
    ///
    /// The first line is the header, possibly prefixed by a `## ` marker that
    /// is stripped before parsing. Rows without an assigned start address are
    /// skipped. Later duplicate tag names overwrite earlier ones.
    pub fn parse(raw: &str) -> TagMapResult<BTreeMap<String, Field>> {
        let (header, body) = raw.split_once('\n').unwrap_or((raw, ""));
        let header = header.trim_start_matches(['#', ' ']);
        let cleaned = format!("{header}\n{body}");

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_reader(cleaned.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| TagMapError::MalformedCatalog(format!("unreadable header row: {e}")))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h.trim() == name);
        let required = |name: &str| {
            column(name)
                .ok_or_else(|| TagMapError::MalformedCatalog(format!("missing column '{name}'")))
        };

        let name_col = required(COL_NAME)?;
        let start_col = required(COL_START)?;
        let end_col = required(COL_END)?;
        let id_col = required(COL_SYSTEM_ID)?;
        let type_col = column(COL_DATA_TYPE);
        let chars_col = column(COL_CHARS);
        let comment_col = column(COL_COMMENT);

        let mut tags = BTreeMap::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| TagMapError::MalformedCatalog(format!("unreadable row: {e}")))?;
            let cell = |i: usize| record.get(i).unwrap_or("").trim();

            // Not every declared point is mapped to a protocol address.
            let start_raw = cell(start_col);
            if start_raw.is_empty() {
                continue;
            }
            let name = cell(name_col).to_string();
            let start = parse_address(&name, start_raw)?;
            let end = parse_address(&name, cell(end_col))?;
            if end < start {
                return Err(TagMapError::MalformedCatalog(format!(
                    "{name}: end address {end} precedes start address {start}"
                )));
            }

            let system_id = cell(id_col).to_string();
            let code = type_col
                .map(|i| cell(i))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    system_id
                        .split('-')
                        .next()
                        .unwrap_or_default()
                        .to_string()
                });
            let chars: usize = chars_col
                .map(|i| cell(i))
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);

            let data_type = match code.as_str() {
                "AIF32" | "F32" => DataType::Float32,
                "AIS32" | "S32" => DataType::Int32,
                "C" | "DI" | "DO" | "SBR" | "MST" => DataType::Bool,
                "SWR" | "SWRW" => DataType::Int16,
                "STR" | "SSTR" => {
                    if chars == 0 {
                        // Strings without a declared length have no fixed span
                        // on the wire and cannot be addressed.
                        debug!(tag = %name, "dropping string tag without declared length");
                        continue;
                    }
                    DataType::Str { length: chars }
                }
                _ => {
                    return Err(TagMapError::UnsupportedType {
                        system_id,
                        code,
                    })
                }
            };

            let comment = comment_col
                .map(|i| cell(i))
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            tags.insert(
                name.clone(),
                Field {
                    name,
                    start,
                    end,
                    data_type,
                    system_id,
                    comment,
                },
            );
        }
        Ok(tags)
    }
}

fn parse_address(tag: &str, raw: &str) -> TagMapResult<u32> {
    raw.parse().map_err(|_| {
        TagMapError::MalformedCatalog(format!("{tag}: non-numeric address '{raw}'"))
    })
}
