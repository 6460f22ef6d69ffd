use crate::catalog::TagCatalog;
use crate::codec::RegisterCodec;
use crate::error::{TagMapError, TagMapResult};
use crate::planner::{AddressPlan, AddressPlanner};
use crate::sequencer::TransportSequencer;
use crate::transport::Transport;
use crate::types::{Field, Region, TagMapConfig, Value, WriteAck};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::instrument;

/// Facade over catalog, planner, codec and sequencer: symbolic access to
/// device memory by tag name.
///
/// Built once from the tag source; the field set, windows and reverse index
/// are fixed for the map's lifetime. One instance owns one logical
/// connection; running several instances against the same physical device is
/// the caller's responsibility to avoid.
pub struct RegisterMap {
    tags: BTreeMap<String, Field>,
    index: BTreeMap<u32, Field>,
    plan: AddressPlan,
    sequencer: TransportSequencer,
}

impl RegisterMap {
    /// Build a map from a tag export file and an injected transport.
    ///
    /// Fails fast on an unusable catalog or an address span over the device
    /// limit; no partial map is produced. Performs no device I/O — the
    /// connection is established by [`connect`](Self::connect) or lazily by
    /// the first request.
    pub fn new(
        transport: Box<dyn Transport>,
        tag_source: impl AsRef<Path>,
        config: TagMapConfig,
    ) -> TagMapResult<Self> {
        let tags = TagCatalog::load(tag_source)?;
        Self::from_tags(transport, tags, config)
    }

    /// Build a map from an already-parsed catalog.
    pub fn from_tags(
        transport: Box<dyn Transport>,
        tags: BTreeMap<String, Field>,
        config: TagMapConfig,
    ) -> TagMapResult<Self> {
        let plan = AddressPlanner::plan(tags.values())?;
        let index = tags.values().map(|f| (f.start, f.clone())).collect();
        Ok(Self {
            tags,
            index,
            plan,
            sequencer: TransportSequencer::new(transport, &config),
        })
    }

    /// Warm up the connection. Optional; the first request connects on
    /// demand. Idempotent.
    pub async fn connect(&self) -> TagMapResult<()> {
        self.sequencer.connect().await
    }

    /// Close the connection. A later request reconnects.
    pub async fn close(&self) -> TagMapResult<()> {
        self.sequencer.close().await
    }

    /// All tags and their configuration. No device I/O.
    pub fn get_tags(&self) -> &BTreeMap<String, Field> {
        &self.tags
    }

    /// Read every configured region once and return the union of all tag
    /// values, typed per field.
    ///
    /// A region the device refuses to read (exception response) contributes
    /// nothing rather than failing the whole call.
    #[instrument(level = "debug", skip_all)]
    pub async fn get(&self) -> TagMapResult<HashMap<String, Value>> {
        let mut out = HashMap::with_capacity(self.tags.len());
        for region in [Region::Coil, Region::DiscreteInput] {
            if let Some(window) = self.plan.windows.get(&region) {
                let bits = self.sequencer.read_bits(region, *window).await?;
                out.extend(RegisterCodec::decode_bits(region, *window, &bits, &self.index));
            }
        }
        for region in [Region::InputRegister, Region::HoldingRegister] {
            if let Some(window) = self.plan.windows.get(&region) {
                let words = self
                    .sequencer
                    .read_words(region, *window, &self.index)
                    .await?;
                out.extend(RegisterCodec::decode_window(
                    region,
                    *window,
                    &words,
                    &self.index,
                ));
            }
        }
        Ok(out)
    }

    /// Write the given tag values to the device.
    ///
    /// Every name and value is validated before any I/O; a validation failure
    /// writes nothing. Once validated, writes proceed per field in address
    /// order and a failure on one write does not roll back ones already sent;
    /// each outcome is reported in the returned acknowledgements.
    #[instrument(level = "debug", skip_all, fields(count = values.len()))]
    pub async fn set(&self, values: HashMap<String, Value>) -> TagMapResult<Vec<WriteAck>> {
        let mut unknown: Vec<String> = values
            .keys()
            .filter(|name| !self.tags.contains_key(*name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(TagMapError::UnsupportedTag(unknown));
        }

        // Validation phase: everything type-checks and encodes before any
        // device I/O.
        let mut coil_changes: BTreeMap<u16, (String, bool)> = BTreeMap::new();
        let mut register_writes: Vec<(u32, String, Vec<u16>)> = Vec::new();
        for (name, value) in &values {
            let field = &self.tags[name];
            let normalized = RegisterCodec::validate(field, value)?;
            match field.region() {
                Some(Region::Coil) => {
                    let Value::Bool(bit) = normalized else {
                        unreachable!("coil field validated to non-bool")
                    };
                    coil_changes.insert(Region::Coil.offset_of(field.start), (name.clone(), bit));
                }
                Some(Region::HoldingRegister) => {
                    let words = RegisterCodec::encode(field, &normalized)?;
                    register_writes.push((field.start, name.clone(), words));
                }
                _ => {
                    return Err(TagMapError::UnwritableRegion {
                        tag: name.clone(),
                        address: field.start,
                    })
                }
            }
        }
        register_writes.sort_by_key(|(start, _, _)| *start);

        // Write phase.
        let mut acks = Vec::with_capacity(values.len());
        if !coil_changes.is_empty() {
            // A coil field implies a planned coil window.
            let window = self.plan.windows[&Region::Coil];
            let changes: Vec<(String, u16, bool)> = coil_changes
                .into_iter()
                .map(|(offset, (tag, bit))| (tag, offset, bit))
                .collect();
            acks.extend(
                self.sequencer
                    .write_discrete_outputs(window, &changes, self.plan.discontinuous_coils)
                    .await,
            );
        }
        for (start, tag, words) in register_writes {
            let offset = Region::HoldingRegister.offset_of(start);
            let result = self.sequencer.write_registers(offset, &words).await;
            acks.push(WriteAck {
                tags: vec![tag],
                result,
            });
        }
        Ok(acks)
    }
}
