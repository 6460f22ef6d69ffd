//! Symbolic tag access to PLC memory over Modbus TCP.
//!
//! Client software addresses controller memory by tag name instead of raw
//! register numbers. The tag export produced by the PLC programming software
//! is loaded once into a [`RegisterMap`], which plans the minimum set of
//! protocol-legal read windows covering all tags and exposes bulk
//! [`get`](RegisterMap::get) / [`set`](RegisterMap::set) operations.
//!
//! The field protocol itself is delegated to tokio-modbus behind the
//! [`Transport`] trait, so tests (or simulators) can inject an in-memory
//! implementation instead of a network client.
//!
//! ```no_run
//! use modbus_tagmap::{RegisterMap, TagMapConfig, TcpTransport, Value};
//! use std::collections::HashMap;
//!
//! # async fn demo() -> Result<(), modbus_tagmap::TagMapError> {
//! let transport = TcpTransport::new("192.168.0.10:502".parse().unwrap());
//! let plc = RegisterMap::new(Box::new(transport), "tags.csv", TagMapConfig::default())?;
//! plc.set(HashMap::from([("FI-101".to_string(), Value::Float32(20.0))]))
//!     .await?;
//! let values = plc.get().await?;
//! # Ok(())
//! # }
//! ```

mod catalog;
mod codec;
mod error;
mod map;
mod planner;
mod sequencer;
mod transport;
mod types;

pub use catalog::TagCatalog;
pub use codec::RegisterCodec;
pub use error::{TagMapError, TagMapResult};
pub use map::RegisterMap;
pub use planner::{AddressPlan, AddressPlanner, MAX_REGION_SPAN};
pub use sequencer::TransportSequencer;
pub use transport::{TcpTransport, Transport};
pub use types::{AddressWindow, DataType, Field, Region, TagMapConfig, Value, WriteAck};
