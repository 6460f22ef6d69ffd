use crate::error::{TagMapError, TagMapResult};
use crate::transport::Transport;
use crate::types::{AddressWindow, Field, Region, TagMapConfig, WriteAck};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Serializes all physical requests onto a single transport handle.
///
/// The protocol ignores a request sent while it is processing another, so at
/// most one request may ever be in flight. Any number of logical callers may
/// invoke concurrently; their physical requests queue on the internal mutex
/// and execute strictly one after another. A request, once issued, is never
/// cancelled mid-flight.
///
/// Reads and writes larger than the per-frame limits are chunked into
/// multiple physical calls and reassembled in address order. A timeout flags
/// the connection closed; reconnection is a precondition of the next request.
pub struct TransportSequencer {
    transport: Mutex<Box<dyn Transport>>,
    open: AtomicBool,
    timeout: Duration,
    max_register_chunk: u16,
    max_bit_chunk: u16,
}

enum Request<'a> {
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
        values: &'a [bool],
    },
    WriteRegisters {
        offset: u16,
        words: &'a [u16],
    },
}

enum Response {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Ack,
}

impl TransportSequencer {
    pub fn new(transport: Box<dyn Transport>, config: &TagMapConfig) -> Self {
        Self {
            transport: Mutex::new(transport),
            open: AtomicBool::new(false),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            max_register_chunk: config.max_register_chunk.max(1),
            max_bit_chunk: config.max_bit_chunk.max(1),
        }
    }

    /// Ensure the transport is connected. Idempotent; used both for the
    /// explicit warm-up and as the reconnect precondition of every request.
    pub async fn connect(&self) -> TagMapResult<()> {
        let mut transport = self.transport.lock().await;
        self.ensure_open(&mut transport).await
    }

    /// Close the connection. The next request reconnects.
    pub async fn close(&self) -> TagMapResult<()> {
        let mut transport = self.transport.lock().await;
        self.open.store(false, Ordering::Release);
        transport.disconnect().await
    }

    async fn ensure_open(&self, transport: &mut Box<dyn Transport>) -> TagMapResult<()> {
        if self.open.load(Ordering::Acquire) {
            return Ok(());
        }
        transport.connect().await?;
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Issue one physical request under the single-flight lock, with the
    /// timeout applied to the request-and-response as a whole.
    async fn execute(&self, request: Request<'_>) -> TagMapResult<Response> {
        let mut transport = self.transport.lock().await;
        self.ensure_open(&mut transport).await?;

        let call = async {
            match request {
                Request::ReadBits {
                    region,
                    offset,
                    count,
                } => transport
                    .read_bits(region, offset, count)
                    .await
                    .map(Response::Bits),
                Request::ReadWords {
                    region,
                    offset,
                    count,
                } => transport
                    .read_words(region, offset, count)
                    .await
                    .map(Response::Words),
                Request::WriteCoil { offset, value } => {
                    transport.write_coil(offset, value).await.map(|_| Response::Ack)
                }
                Request::WriteCoils { offset, values } => transport
                    .write_coils(offset, values)
                    .await
                    .map(|_| Response::Ack),
                Request::WriteRegisters { offset, words } => transport
                    .write_registers(offset, words)
                    .await
                    .map(|_| Response::Ack),
            }
        };

        match timeout(self.timeout, call).await {
            Ok(result) => {
                if matches!(result, Err(TagMapError::Connection(_))) {
                    self.open.store(false, Ordering::Release);
                }
                result
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "request timed out, connection flagged closed");
                self.open.store(false, Ordering::Release);
                Err(TagMapError::Timeout(self.timeout))
            }
        }
    }

    /// Read a discrete window, chunked by the per-frame bit limit.
    ///
    /// A device exception degrades the whole window to an empty result;
    /// reads favor availability over completeness.
    pub async fn read_bits(
        &self,
        region: Region,
        window: AddressWindow,
    ) -> TagMapResult<Vec<bool>> {
        match self.read_bits_inner(region, window).await {
            Ok(bits) => Ok(bits),
            Err(TagMapError::DeviceException { op, code }) => {
                warn!(%region, op, code, "device exception on read, returning empty window");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_bits_inner(
        &self,
        region: Region,
        window: AddressWindow,
    ) -> TagMapResult<Vec<bool>> {
        let mut bits = Vec::with_capacity(window.count as usize);
        let mut offset = window.offset;
        let mut remaining = window.count;
        while remaining > 0 {
            let take = remaining.min(self.max_bit_chunk);
            match self
                .execute(Request::ReadBits {
                    region,
                    offset,
                    count: take,
                })
                .await?
            {
                Response::Bits(chunk) => bits.extend(chunk),
                _ => unreachable!(),
            }
            offset += take;
            remaining -= take;
        }
        Ok(bits)
    }

    /// Read a register window, chunked by the per-frame word limit.
    ///
    /// A chunk is shrunk by one word whenever the cut would fall inside a
    /// multi-word field, so no value is ever split across two physical
    /// requests. A device exception degrades the whole window to an empty
    /// result.
    pub async fn read_words(
        &self,
        region: Region,
        window: AddressWindow,
        index: &BTreeMap<u32, Field>,
    ) -> TagMapResult<Vec<u16>> {
        let mut words = Vec::with_capacity(window.count as usize);
        let mut offset = window.offset;
        let mut remaining = window.count;
        while remaining > 0 {
            let mut take = remaining.min(self.max_register_chunk);
            if take < remaining {
                take = shrink_to_field_boundary(region, index, offset, take);
            }
            let result = self
                .execute(Request::ReadWords {
                    region,
                    offset,
                    count: take,
                })
                .await;
            match result {
                Ok(Response::Words(chunk)) => words.extend(chunk),
                Ok(_) => unreachable!(),
                Err(TagMapError::DeviceException { op, code }) => {
                    warn!(%region, op, code, "device exception on read, returning empty window");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            }
            offset += take;
            remaining -= take;
        }
        Ok(words)
    }

    /// Write a block of holding registers, chunked by the per-frame limit.
    pub async fn write_registers(&self, offset: u16, words: &[u16]) -> TagMapResult<()> {
        let mut offset = offset;
        for chunk in words.chunks(self.max_register_chunk as usize) {
            self.execute(Request::WriteRegisters {
                offset,
                words: chunk,
            })
            .await?;
            offset += chunk.len() as u16;
        }
        Ok(())
    }

    /// Apply a set of discrete-output changes, choosing between per-coil
    /// writes and one read-merge-write of the whole block.
    ///
    /// A single changed value always becomes a single-coil write. A sparse
    /// coil layout (`discontinuous` set) forces per-coil writes regardless of
    /// count, since a block write would clobber addresses the catalog does
    /// not name. Otherwise the current block is read, the changes merged in,
    /// and the block written back whole, trading one extra read for fewer
    /// total calls.
    pub async fn write_discrete_outputs(
        &self,
        window: AddressWindow,
        changes: &[(String, u16, bool)],
        discontinuous: bool,
    ) -> Vec<WriteAck> {
        if changes.len() == 1 || discontinuous {
            let mut acks = Vec::with_capacity(changes.len());
            for (tag, offset, value) in changes {
                let result = self
                    .execute(Request::WriteCoil {
                        offset: *offset,
                        value: *value,
                    })
                    .await
                    .map(|_| ());
                acks.push(WriteAck {
                    tags: vec![tag.clone()],
                    result,
                });
            }
            return acks;
        }

        let tags: Vec<String> = changes.iter().map(|(tag, _, _)| tag.clone()).collect();
        let result = self.merge_write_block(window, changes).await;
        vec![WriteAck { tags, result }]
    }

    async fn merge_write_block(
        &self,
        window: AddressWindow,
        changes: &[(String, u16, bool)],
    ) -> TagMapResult<()> {
        // The merge needs the real current state, so a device exception here
        // is an error rather than a degraded empty read.
        let mut bits = self.read_bits_inner(Region::Coil, window).await?;
        if bits.len() < window.count as usize {
            return Err(TagMapError::Connection(format!(
                "short coil read: got {} of {} bits",
                bits.len(),
                window.count
            )));
        }
        bits.truncate(window.count as usize);
        for (_, offset, value) in changes {
            bits[(offset - window.offset) as usize] = *value;
        }
        debug!(count = bits.len(), "writing merged coil block");
        let mut offset = window.offset;
        for chunk in bits.chunks(self.max_bit_chunk as usize) {
            self.execute(Request::WriteCoils {
                offset,
                values: chunk,
            })
            .await?;
            offset += chunk.len() as u16;
        }
        Ok(())
    }
}

/// Shrink a chunk so its cut never falls inside a multi-word field: the field
/// starting at or before the last included register must also end there.
fn shrink_to_field_boundary(
    region: Region,
    index: &BTreeMap<u32, Field>,
    offset: u16,
    mut take: u16,
) -> u16 {
    while take > 1 {
        let last_included = region.address_at(offset) + take as u32 - 1;
        let straddles = index
            .range(..=last_included)
            .next_back()
            .map(|(_, field)| field.start <= last_included && field.end > last_included)
            .unwrap_or(false);
        if !straddles {
            break;
        }
        take -= 1;
    }
    take
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn field(name: &str, start: u32, data_type: DataType) -> Field {
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

    #[test]
    fn chunk_shrinks_when_field_straddles_cut() {
        // A float at 400005..400006 straddles a cut after 5 registers.
        let fi = field("FI-1", 400_005, DataType::Float32);
        let index: BTreeMap<u32, Field> = [(fi.start, fi)].into_iter().collect();
        let take = shrink_to_field_boundary(Region::HoldingRegister, &index, 0, 5);
        assert_eq!(take, 4);
    }

    #[test]
    fn chunk_unchanged_when_cut_lands_between_fields() {
        let a = field("A", 400_001, DataType::Float32);
        let b = field("B", 400_003, DataType::Float32);
        let index: BTreeMap<u32, Field> =
            [(a.start, a), (b.start, b)].into_iter().collect();
        assert_eq!(
            shrink_to_field_boundary(Region::HoldingRegister, &index, 0, 4),
            4
        );
        assert_eq!(
            shrink_to_field_boundary(Region::HoldingRegister, &index, 0, 2),
            2
        );
    }

    #[test]
    fn oversized_field_cannot_shrink_below_one_word() {
        let s = field("S", 400_001, DataType::Str { length: 20 });
        let index: BTreeMap<u32, Field> = [(s.start, s)].into_iter().collect();
        assert_eq!(
            shrink_to_field_boundary(Region::HoldingRegister, &index, 0, 3),
            1
        );
    }
}
