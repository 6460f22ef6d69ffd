use crate::error::{TagMapError, TagMapResult};
use crate::types::Region;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio_modbus::client::{tcp, Client as _, Context, Reader, Writer};
use tokio_modbus::ExceptionCode;
use tracing::debug;

/// Capability interface over the field-protocol client.
///
/// The sequencer owns exactly one implementation and serializes every call;
/// implementations never see concurrent requests. Addresses are 0-based
/// protocol offsets within a region. Frame construction, CRC/TCP framing and
/// socket handling live entirely below this trait.
#[async_trait]
pub trait Transport: Send {
    /// Establish (or re-establish) the connection, dropping any broken one.
    async fn connect(&mut self) -> TagMapResult<()>;

    /// Close the connection. Best-effort; a later request reconnects.
    async fn disconnect(&mut self) -> TagMapResult<()>;

    /// Read `count` bits from a discrete region.
    async fn read_bits(&mut self, region: Region, offset: u16, count: u16)
        -> TagMapResult<Vec<bool>>;

    /// Read `count` words from a register region.
    async fn read_words(&mut self, region: Region, offset: u16, count: u16)
        -> TagMapResult<Vec<u16>>;

    /// Write a single coil.
    async fn write_coil(&mut self, offset: u16, value: bool) -> TagMapResult<()>;

    /// Write a contiguous block of coils.
    async fn write_coils(&mut self, offset: u16, values: &[bool]) -> TagMapResult<()>;

    /// Write a contiguous block of holding registers.
    async fn write_registers(&mut self, offset: u16, words: &[u16]) -> TagMapResult<()>;
}

/// Modbus TCP client transport backed by tokio-modbus.
pub struct TcpTransport {
    addr: SocketAddr,
    ctx: Option<Context>,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, ctx: None }
    }

    fn context(&mut self) -> TagMapResult<&mut Context> {
        self.ctx
            .as_mut()
            .ok_or_else(|| TagMapError::Connection("not connected".to_string()))
    }
}

/// Collapse the tokio-modbus double result: transport failures become
/// `Connection`, device exception responses become `DeviceException`.
fn flatten<T>(
    op: &'static str,
    res: Result<Result<T, ExceptionCode>, tokio_modbus::Error>,
) -> TagMapResult<T> {
    match res {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(code)) => Err(TagMapError::DeviceException {
            op,
            code: format!("{code:?}"),
        }),
        Err(e) => Err(TagMapError::Connection(e.to_string())),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> TagMapResult<()> {
        if let Some(mut old) = self.ctx.take() {
            let _ = old.disconnect().await;
        }
        debug!(addr = %self.addr, "connecting");
        let ctx = tcp::connect(self.addr)
            .await
            .map_err(|e| TagMapError::Connection(e.to_string()))?;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn disconnect(&mut self) -> TagMapResult<()> {
        if let Some(mut ctx) = self.ctx.take() {
            let _ = ctx.disconnect().await;
        }
        Ok(())
    }

    async fn read_bits(
        &mut self,
        region: Region,
        offset: u16,
        count: u16,
    ) -> TagMapResult<Vec<bool>> {
        let ctx = self.context()?;
        let mut bits = match region {
            Region::Coil => flatten("read_coils", ctx.read_coils(offset, count).await)?,
            Region::DiscreteInput => flatten(
                "read_discrete_inputs",
                ctx.read_discrete_inputs(offset, count).await,
            )?,
            // The sequencer routes register regions to read_words.
            Region::InputRegister | Region::HoldingRegister => {
                unreachable!("register region passed to read_bits")
            }
        };
        // Responses are padded to a whole byte of bits.
        bits.truncate(count as usize);
        Ok(bits)
    }

    async fn read_words(
        &mut self,
        region: Region,
        offset: u16,
        count: u16,
    ) -> TagMapResult<Vec<u16>> {
        let ctx = self.context()?;
        match region {
            Region::InputRegister => flatten(
                "read_input_registers",
                ctx.read_input_registers(offset, count).await,
            ),
            Region::HoldingRegister => flatten(
                "read_holding_registers",
                ctx.read_holding_registers(offset, count).await,
            ),
            Region::Coil | Region::DiscreteInput => {
                unreachable!("discrete region passed to read_words")
            }
        }
    }

    async fn write_coil(&mut self, offset: u16, value: bool) -> TagMapResult<()> {
        let ctx = self.context()?;
        flatten("write_single_coil", ctx.write_single_coil(offset, value).await)
    }

    async fn write_coils(&mut self, offset: u16, values: &[bool]) -> TagMapResult<()> {
        let ctx = self.context()?;
        flatten(
            "write_multiple_coils",
            ctx.write_multiple_coils(offset, values).await,
        )
    }

    async fn write_registers(&mut self, offset: u16, words: &[u16]) -> TagMapResult<()> {
        let ctx = self.context()?;
        flatten(
            "write_multiple_registers",
            ctx.write_multiple_registers(offset, words).await,
        )
    }
}
