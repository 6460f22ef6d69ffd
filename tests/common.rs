#![allow(dead_code)]

use async_trait::async_trait;
use modbus_tagmap::{DataType, Field, Region, TagMapError, TagMapResult, Transport};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// One physical call as seen by the transport, for asserting on request
/// shapes and ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Disconnect,
    ReadBits {
        region: Region,
        offset: u16,
        count: u16,
    },
    ReadWords {
        region: Region,
        offset: u16,
        count: u16,
    },
    WriteCoil {
        offset: u16,
        value: bool,
    },
    WriteCoils {
        offset: u16,
        count: u16,
    },
    WriteRegisters {
        offset: u16,
        count: u16,
    },
}

/// Backing store and fault knobs for the in-memory transport.
#[derive(Default)]
pub struct MemoryState {
    pub coils: HashMap<u16, bool>,
    pub discrete_inputs: HashMap<u16, bool>,
    pub input_registers: HashMap<u16, u16>,
    pub holding_registers: HashMap<u16, u16>,
    pub calls: Vec<Call>,
    /// Answer register reads with a device exception response.
    pub fail_register_reads: bool,
    /// Answer register writes with a device exception response.
    pub fail_register_writes: bool,
    /// Delay every data request by this long, to provoke timeouts.
    pub stall: Option<Duration>,
}

impl MemoryState {
    pub fn calls_of<F: Fn(&Call) -> bool>(&self, pred: F) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

/// In-memory stand-in for the Modbus client: local storage instead of remote
/// communication. Clones share state so tests can inspect and seed it after
/// handing a clone to the map.
#[derive(Clone, Default)]
pub struct MemoryTransport(pub Arc<Mutex<MemoryState>>);

impl MemoryTransport {
    fn record(&self, call: Call) {
        self.0.lock().unwrap().calls.push(call);
    }

    async fn stall(&self) {
        let stall = self.0.lock().unwrap().stall;
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> TagMapResult<()> {
        self.record(Call::Connect);
        Ok(())
    }

    async fn disconnect(&mut self) -> TagMapResult<()> {
        self.record(Call::Disconnect);
        Ok(())
    }

    async fn read_bits(
        &mut self,
        region: Region,
        offset: u16,
        count: u16,
    ) -> TagMapResult<Vec<bool>> {
        self.record(Call::ReadBits {
            region,
            offset,
            count,
        });
        self.stall().await;
        let state = self.0.lock().unwrap();
        let store = match region {
            Region::Coil => &state.coils,
            Region::DiscreteInput => &state.discrete_inputs,
            _ => panic!("register region passed to read_bits"),
        };
        Ok((0..count)
            .map(|i| store.get(&(offset + i)).copied().unwrap_or(false))
            .collect())
    }

    async fn read_words(
        &mut self,
        region: Region,
        offset: u16,
        count: u16,
    ) -> TagMapResult<Vec<u16>> {
        self.record(Call::ReadWords {
            region,
            offset,
            count,
        });
        self.stall().await;
        let state = self.0.lock().unwrap();
        if state.fail_register_reads {
            return Err(TagMapError::DeviceException {
                op: "read_holding_registers",
                code: "IllegalDataAddress".to_string(),
            });
        }
        let store = match region {
            Region::InputRegister => &state.input_registers,
            Region::HoldingRegister => &state.holding_registers,
            _ => panic!("discrete region passed to read_words"),
        };
        Ok((0..count)
            .map(|i| store.get(&(offset + i)).copied().unwrap_or(0))
            .collect())
    }

    async fn write_coil(&mut self, offset: u16, value: bool) -> TagMapResult<()> {
        self.record(Call::WriteCoil { offset, value });
        self.stall().await;
        self.0.lock().unwrap().coils.insert(offset, value);
        Ok(())
    }

    async fn write_coils(&mut self, offset: u16, values: &[bool]) -> TagMapResult<()> {
        self.record(Call::WriteCoils {
            offset,
            count: values.len() as u16,
        });
        self.stall().await;
        let mut state = self.0.lock().unwrap();
        for (i, value) in values.iter().enumerate() {
            state.coils.insert(offset + i as u16, *value);
        }
        Ok(())
    }

    async fn write_registers(&mut self, offset: u16, words: &[u16]) -> TagMapResult<()> {
        self.record(Call::WriteRegisters {
            offset,
            count: words.len() as u16,
        });
        self.stall().await;
        let mut state = self.0.lock().unwrap();
        if state.fail_register_writes {
            return Err(TagMapError::DeviceException {
                op: "write_multiple_registers",
                code: "IllegalDataAddress".to_string(),
            });
        }
        for (i, word) in words.iter().enumerate() {
            state.holding_registers.insert(offset + i as u16, *word);
        }
        Ok(())
    }
}

/// The three-tag fixture used across the end-to-end tests: a coil, a float
/// and an 8-char string.
pub const SCENARIO_CSV: &str = "\
## Tag Name,System ID,Data Type,MODBUS Start Address,MODBUS End Address,Number of Characters,Comment
AV-101,DO-100,DO,1,1,,air valve
FI-101,AIF32-200,AIF32,400001,400002,,flow indicator
GAS-101,STR-300,STR,400019,400022,8,gas name
";

pub fn field(name: &str, start: u32, data_type: DataType) -> Field {
    let end = start + data_type.register_span() as u32 - 1;
    Field {
        name: name.to_string(),
        start,
        end,
        data_type,
        system_id: String::new(),
        comment: None,
    }
}

pub fn tag_map(fields: Vec<Field>) -> BTreeMap<String, Field> {
    fields.into_iter().map(|f| (f.name.clone(), f)).collect()
}
