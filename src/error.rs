use crate::types::Region;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type TagMapResult<T> = Result<T, TagMapError>;

/// Error taxonomy for tag-addressed Modbus access.
///
/// Construction-time errors (`MalformedCatalog`, `UnsupportedType`,
/// `AddressSpanExceeded`) are fatal: no partial [`crate::RegisterMap`] is ever
/// produced. Validation errors (`UnsupportedTag`, `TypeMismatch`,
/// `StringTooLong`, `UnwritableRegion`) are reported before any device I/O.
/// Transport errors (`Timeout`, `Connection`, `DeviceException`) occur per
/// physical request; retry policy belongs to the caller.
#[derive(Error, Debug)]
pub enum TagMapError {
    /// The tag source is unusable: a required column is absent, an address is
    /// non-numeric, or the file cannot be read at all.
    #[error("malformed tag catalog: {0}")]
    MalformedCatalog(String),

    /// A row's type code has no known mapping.
    #[error("'{system_id}' has unsupported data type code '{code}'")]
    UnsupportedType { system_id: String, code: String },

    /// A region's minimal covering span exceeds the device's hard limit.
    #[error("address span of {span} exceeds the 2000-address device limit in the {region} region")]
    AddressSpanExceeded { region: Region, span: u32 },

    /// `set()` referenced names absent from the catalog. Nothing was written.
    #[error("unknown tags: {}", .0.join(", "))]
    UnsupportedTag(Vec<String>),

    /// A value's runtime type does not match the field's declared type.
    #[error("expected {tag} to be {expected}, got {actual}")]
    TypeMismatch {
        tag: String,
        expected: String,
        actual: &'static str,
    },

    /// A string value exceeds the field's declared character length.
    #[error("value for {tag} is {length} chars, max {max}")]
    StringTooLong {
        tag: String,
        length: usize,
        max: usize,
    },

    /// The field's address falls in a read-only region.
    #[error("{tag} at address {address} is not in a writeable region")]
    UnwritableRegion { tag: String, address: u32 },

    /// A physical request did not complete in time. The connection is flagged
    /// closed; the next request reconnects before proceeding.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying transport reported a lost or broken connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The device answered with a protocol exception response.
    #[error("device exception on {op}: {code}")]
    DeviceException { op: &'static str, code: String },
}
