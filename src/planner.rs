use crate::error::{TagMapError, TagMapResult};
use crate::types::{AddressWindow, Field, Region};
use std::collections::{BTreeSet, HashMap};

/// Hard device limit on the address span a single region window may cover.
pub const MAX_REGION_SPAN: u32 = 2000;

/// Per-region read windows derived from the catalog, plus the coil layout
/// flag consumed by the write strategy.
#[derive(Debug, Clone, Default)]
pub struct AddressPlan {
    pub windows: HashMap<Region, AddressWindow>,
    /// Set when the coil region has holes: the window covers more addresses
    /// than the catalog names. Sparse coil layouts cannot be safely
    /// read-modify-written as one contiguous block.
    pub discontinuous_coils: bool,
}

/// Computes the minimal per-region windows covering every field, honoring the
/// device's maximum-span limit. Pure; performs no I/O.
pub struct AddressPlanner;

struct Running {
    offset: u32,
    count: u32,
}

impl AddressPlanner {
    /// Plan one window per populated region.
    ///
    /// Every field contributes its start and end address. The first address
    /// seen in a region fixes the window's base offset; each subsequent
    /// address extends the count. Addresses outside every known prefix range
    /// are ignored.
    pub fn plan<'a>(fields: impl IntoIterator<Item = &'a Field>) -> TagMapResult<AddressPlan> {
        let mut addresses: Vec<u32> = fields
            .into_iter()
            .flat_map(|f| [f.start, f.end])
            .collect();
        addresses.sort_unstable();

        let mut running: HashMap<Region, Running> = HashMap::new();
        let mut coil_addresses: BTreeSet<u32> = BTreeSet::new();
        for address in addresses {
            let Some(region) = Region::classify(address) else {
                continue;
            };
            if region == Region::Coil {
                coil_addresses.insert(address);
            }
            let relative = address - region.base();
            running
                .entry(region)
                .and_modify(|r| r.count = relative - r.offset)
                .or_insert(Running {
                    offset: relative - 1,
                    count: 1,
                });
        }

        let mut windows = HashMap::with_capacity(running.len());
        for (region, r) in running {
            if r.count > MAX_REGION_SPAN {
                return Err(TagMapError::AddressSpanExceeded {
                    region,
                    span: r.count,
                });
            }
            windows.insert(
                region,
                AddressWindow {
                    offset: r.offset as u16,
                    count: r.count as u16,
                },
            );
        }

        let discontinuous_coils = windows
            .get(&Region::Coil)
            .map(|w| coil_addresses.len() != w.count as usize)
            .unwrap_or(false);

        Ok(AddressPlan {
            windows,
            discontinuous_coils,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn field(name: &str, start: u32, end: u32, data_type: DataType) -> Field {
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
    fn windows_cover_lowest_to_highest_address() {
        let fields = vec![
            field("AV-101", 1, 1, DataType::Bool),
            field("FI-101", 400_001, 400_002, DataType::Float32),
            field("GAS-101", 400_019, 400_022, DataType::Str { length: 8 }),
        ];
        let plan = AddressPlanner::plan(&fields).unwrap();
        assert_eq!(
            plan.windows[&Region::Coil],
            AddressWindow { offset: 0, count: 1 }
        );
        assert_eq!(
            plan.windows[&Region::HoldingRegister],
            AddressWindow {
                offset: 0,
                count: 22
            }
        );
        assert!(!plan.discontinuous_coils);
    }

    #[test]
    fn span_over_limit_fails_regardless_of_field_count() {
        let fields = vec![
            field("A", 400_001, 400_001, DataType::Int16),
            field("B", 402_500, 402_500, DataType::Int16),
        ];
        let err = AddressPlanner::plan(&fields).unwrap_err();
        match err {
            TagMapError::AddressSpanExceeded { region, span } => {
                assert_eq!(region, Region::HoldingRegister);
                assert_eq!(span, 2500);
            }
            other => panic!("unexpected error: {other}"),
        }

        // A single wide field over the limit fails just the same.
        let fields = vec![field("W", 100_001, 102_500, DataType::Int16)];
        let err = AddressPlanner::plan(&fields).unwrap_err();
        assert!(matches!(
            err,
            TagMapError::AddressSpanExceeded {
                region: Region::DiscreteInput,
                ..
            }
        ));
    }

    #[test]
    fn sparse_coils_set_discontinuity_flag() {
        let fields = vec![
            field("C1", 1, 1, DataType::Bool),
            field("C2", 2, 2, DataType::Bool),
            field("C5", 5, 5, DataType::Bool),
        ];
        let plan = AddressPlanner::plan(&fields).unwrap();
        assert_eq!(
            plan.windows[&Region::Coil],
            AddressWindow { offset: 0, count: 5 }
        );
        assert!(plan.discontinuous_coils);

        let fields = vec![
            field("C1", 1, 1, DataType::Bool),
            field("C2", 2, 2, DataType::Bool),
            field("C3", 3, 3, DataType::Bool),
        ];
        let plan = AddressPlanner::plan(&fields).unwrap();
        assert!(!plan.discontinuous_coils);
    }

    #[test]
    fn out_of_range_addresses_are_ignored() {
        let fields = vec![
            field("ODD", 999_999, 999_999, DataType::Int16),
            field("OK", 300_010, 300_010, DataType::Int16),
        ];
        let plan = AddressPlanner::plan(&fields).unwrap();
        assert_eq!(plan.windows.len(), 1);
        assert_eq!(
            plan.windows[&Region::InputRegister],
            AddressWindow { offset: 9, count: 1 }
        );
    }

    #[test]
    fn empty_catalog_plans_no_windows() {
        let plan = AddressPlanner::plan(std::iter::empty()).unwrap();
        assert!(plan.windows.is_empty());
        assert!(!plan.discontinuous_coils);
    }
}
