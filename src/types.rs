use serde::Deserialize;
use std::fmt;

/// One of the four disjoint Modbus address spaces, identified by the absolute
/// address prefix ranges used by the device's tag export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// Discrete outputs, addresses 1..=65535.
    Coil,
    /// Discrete inputs, addresses 100001..=165535.
    DiscreteInput,
    /// Input registers, addresses 300001..=365535.
    InputRegister,
    /// Holding registers, addresses 400001..=465535.
    HoldingRegister,
}

impl Region {
    /// Classify an absolute 1-based address into its region, or `None` when
    /// the address falls outside every known prefix range.
    pub fn classify(address: u32) -> Option<Region> {
        match address {
            1..=65_535 => Some(Region::Coil),
            100_001..=165_535 => Some(Region::DiscreteInput),
            300_001..=365_535 => Some(Region::InputRegister),
            400_001..=465_535 => Some(Region::HoldingRegister),
            _ => None,
        }
    }

    /// Absolute address immediately below the region's first valid address.
    pub fn base(self) -> u32 {
        match self {
            Region::Coil => 0,
            Region::DiscreteInput => 100_000,
            Region::InputRegister => 300_000,
            Region::HoldingRegister => 400_000,
        }
    }

    /// Whether reads of this region return one bit per address.
    pub fn is_discrete(self) -> bool {
        matches!(self, Region::Coil | Region::DiscreteInput)
    }

    /// 0-based protocol offset of an absolute address within this region.
    pub fn offset_of(self, address: u32) -> u16 {
        (address - self.base() - 1) as u16
    }

    /// Absolute address of a 0-based protocol offset within this region.
    pub fn address_at(self, offset: u16) -> u32 {
        self.base() + 1 + offset as u32
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Region::Coil => "coil",
            Region::DiscreteInput => "discrete input",
            Region::InputRegister => "input register",
            Region::HoldingRegister => "holding register",
        };
        f.write_str(s)
    }
}

/// Declared type of a field, as resolved from the tag catalog.
///
/// Fixed-length strings carry their declared character length so the codec
/// can derive the register span without consulting the catalog again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int16,
    Int32,
    Float32,
    Str { length: usize },
}

impl DataType {
    /// Number of 16-bit registers a value of this type occupies.
    ///
    /// A fixed string of odd length still occupies a whole trailing register;
    /// its final byte carries no content.
    pub fn register_span(self) -> usize {
        match self {
            DataType::Bool | DataType::Int16 => 1,
            DataType::Int32 | DataType::Float32 => 2,
            DataType::Str { length } => length.div_ceil(2).max(1),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => f.write_str("bool"),
            DataType::Int16 => f.write_str("int16"),
            DataType::Int32 => f.write_str("int32"),
            DataType::Float32 => f.write_str("float32"),
            DataType::Str { length } => write!(f, "string[{length}]"),
        }
    }
}

/// A strongly-typed runtime value for a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Float32(f32),
    Str(String),
}

impl Value {
    /// Human-readable name of the value's runtime type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Float32(_) => "float32",
            Value::Str(_) => "string",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
        }
    }
}

/// A named, typed, addressed unit of device memory as declared in the tag
/// catalog. Addresses are absolute and 1-based; `end >= start` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub data_type: DataType,
    pub system_id: String,
    pub comment: Option<String>,
}

impl Field {
    /// Region this field belongs to, inferred from its start address.
    pub fn region(&self) -> Option<Region> {
        Region::classify(self.start)
    }
}

/// The minimal contiguous span within a region that covers all fields mapped
/// into it. `offset` is 0-based relative to the region's first address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressWindow {
    pub offset: u16,
    pub count: u16,
}

/// Outcome of one physical write intent issued by `set()`. A block coil write
/// covers several tags with one acknowledgement; register and single-coil
/// writes carry exactly one tag each.
#[derive(Debug)]
pub struct WriteAck {
    pub tags: Vec<String>,
    pub result: crate::error::TagMapResult<()>,
}

/// Tunable request parameters. The chunk limits default to the protocol frame
/// maxima and only ever need lowering, e.g. for devices with smaller buffers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagMapConfig {
    /// Per physical request timeout in milliseconds.
    #[serde(default = "TagMapConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum registers per physical request.
    #[serde(default = "TagMapConfig::default_max_register_chunk")]
    pub max_register_chunk: u16,
    /// Maximum bits per physical request.
    #[serde(default = "TagMapConfig::default_max_bit_chunk")]
    pub max_bit_chunk: u16,
}

impl TagMapConfig {
    fn default_timeout_ms() -> u64 {
        1000
    }

    fn default_max_register_chunk() -> u16 {
        125
    }

    fn default_max_bit_chunk() -> u16 {
        2000
    }
}

impl Default for TagMapConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            max_register_chunk: Self::default_max_register_chunk(),
            max_bit_chunk: Self::default_max_bit_chunk(),
        }
    }
}
