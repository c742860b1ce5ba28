//! Measurement unit hierarchy
//!
//! Every unit is defined in terms of a parent unit through `base_unit_equivalent`
//! (1 unit = equivalent x 1 parent). Chains end at a unit flagged `is_base_unit`.
//! The graph is loaded once per transaction and resolved by plain iteration.

use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, EntityTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

use crate::entities::measurement::{self, AdjustType, Entity as MeasurementEntity};
use crate::entities::measurement_range::{self, Entity as MeasurementRangeEntity};
use crate::errors::ServiceError;
use crate::services::company_settings::checked_decimal_limit;

/// Inclusive upper bound bucket used by `AdjustType::BucketedRange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl CustomRange {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    /// Ranges are half-open: `(min, max]`.
    pub fn contains(&self, quantity: Decimal) -> bool {
        quantity > self.min && quantity <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementUnit {
    pub id: i64,
    pub symbol: String,
    pub is_base_unit: bool,
    pub base_unit_id: Option<i64>,
    pub base_unit_equivalent: Decimal,
    pub decimal_limit_qty: Option<u32>,
    pub adjust_type: AdjustType,
    pub step_wise_range: Option<Decimal>,
    /// Sorted by `min`.
    pub custom_ranges: Vec<CustomRange>,
}

impl MeasurementUnit {
    /// A base unit with nearest-step adjustment and no step configured.
    pub fn base(id: i64, symbol: impl Into<String>) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            is_base_unit: true,
            base_unit_id: None,
            base_unit_equivalent: Decimal::ONE,
            decimal_limit_qty: None,
            adjust_type: AdjustType::NearestStep,
            step_wise_range: None,
            custom_ranges: Vec::new(),
        }
    }

    /// A unit defined as `equivalent` x 1 `parent`.
    pub fn derived(id: i64, symbol: impl Into<String>, parent: i64, equivalent: Decimal) -> Self {
        Self {
            is_base_unit: false,
            base_unit_id: Some(parent),
            base_unit_equivalent: equivalent,
            ..Self::base(id, symbol)
        }
    }

    pub fn with_decimal_limit(mut self, limit: u32) -> Self {
        self.decimal_limit_qty = Some(limit);
        self
    }

    pub fn with_step(mut self, step: Decimal) -> Self {
        self.adjust_type = AdjustType::NearestStep;
        self.step_wise_range = Some(step);
        self
    }

    pub fn with_ranges(mut self, mut ranges: Vec<CustomRange>) -> Self {
        ranges.sort_by(|a, b| a.min.cmp(&b.min));
        self.adjust_type = AdjustType::BucketedRange;
        self.custom_ranges = ranges;
        self
    }
}

/// Cumulative factor from a unit to the base of its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseResolution {
    pub factor: Decimal,
    pub base_unit_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MeasurementGraph {
    units: HashMap<i64, MeasurementUnit>,
}

impl MeasurementGraph {
    pub fn new(units: impl IntoIterator<Item = MeasurementUnit>) -> Self {
        Self {
            units: units.into_iter().map(|u| (u.id, u)).collect(),
        }
    }

    /// Builds the graph from persisted rows.
    pub fn from_models(
        measurements: Vec<measurement::Model>,
        ranges: Vec<measurement_range::Model>,
    ) -> Result<Self, ServiceError> {
        let mut ranges_by_unit: HashMap<i64, Vec<measurement_range::Model>> = HashMap::new();
        for range in ranges {
            ranges_by_unit
                .entry(range.measurement_id)
                .or_default()
                .push(range);
        }

        let mut units = Vec::with_capacity(measurements.len());
        for model in measurements {
            let adjust_type = model.adjust_type().ok_or_else(|| {
                ServiceError::ConfigurationError(format!(
                    "measurement {} has unknown adjust type '{}'",
                    model.id, model.adjust_type
                ))
            })?;
            let decimal_limit_qty = model
                .decimal_limit_qty
                .map(|limit| checked_decimal_limit(limit, &format!("measurement {}", model.id)))
                .transpose()?;

            let mut custom_ranges: Vec<CustomRange> = ranges_by_unit
                .remove(&model.id)
                .unwrap_or_default()
                .into_iter()
                .map(|r| CustomRange::new(r.min_quantity, r.max_quantity))
                .collect();
            custom_ranges.sort_by(|a, b| a.min.cmp(&b.min));

            units.push(MeasurementUnit {
                id: model.id,
                symbol: model.symbol,
                is_base_unit: model.is_base_unit,
                base_unit_id: model.base_unit_id,
                base_unit_equivalent: model.base_unit_equivalent,
                decimal_limit_qty,
                adjust_type,
                step_wise_range: model.step_wise_range,
                custom_ranges,
            });
        }

        Ok(Self::new(units))
    }

    /// Loads every measurement and custom range, then validates all chains.
    #[instrument(skip(db))]
    pub async fn load<C: ConnectionTrait>(db: &C) -> Result<Self, ServiceError> {
        let measurements = MeasurementEntity::find()
            .order_by_asc(measurement::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let ranges = MeasurementRangeEntity::find()
            .order_by_asc(measurement_range::Column::MeasurementId)
            .order_by_asc(measurement_range::Column::SortOrder)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let graph = Self::from_models(measurements, ranges)?;
        graph.validate()?;
        debug!(units = graph.units.len(), "Loaded measurement graph");
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, unit_id: i64) -> Result<&MeasurementUnit, ServiceError> {
        self.units
            .get(&unit_id)
            .ok_or(ServiceError::UnknownMeasurement(unit_id))
    }

    /// Walks the parent chain, multiplying equivalents until a base unit is reached.
    pub fn resolve_to_base(&self, unit_id: i64) -> Result<BaseResolution, ServiceError> {
        let mut current = self.unit(unit_id)?;
        let mut factor = Decimal::ONE;
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(current.id) {
                return Err(ServiceError::ConfigurationError(format!(
                    "measurement {} has a cyclic parent chain through {}",
                    unit_id, current.id
                )));
            }

            if current.is_base_unit {
                return Ok(BaseResolution {
                    factor,
                    base_unit_id: current.id,
                });
            }

            if current.base_unit_equivalent <= Decimal::ZERO {
                return Err(ServiceError::ConfigurationError(format!(
                    "measurement {} has non-positive base unit equivalent {}",
                    current.id, current.base_unit_equivalent
                )));
            }

            let parent_id = current.base_unit_id.ok_or_else(|| {
                ServiceError::ConfigurationError(format!(
                    "measurement {} is not a base unit and has no parent",
                    current.id
                ))
            })?;

            factor = factor
                .checked_mul(current.base_unit_equivalent)
                .ok_or_else(|| {
                    ServiceError::ConfigurationError(format!(
                        "conversion factor overflow resolving measurement {}",
                        unit_id
                    ))
                })?;

            current = self.units.get(&parent_id).ok_or_else(|| {
                ServiceError::ConfigurationError(format!(
                    "measurement {} references missing parent {}",
                    current.id, parent_id
                ))
            })?;
        }
    }

    /// Converts `quantity` between two units sharing a base.
    pub fn convert(
        &self,
        quantity: Decimal,
        from_unit: i64,
        to_unit: i64,
    ) -> Result<Decimal, ServiceError> {
        if from_unit == to_unit {
            self.unit(from_unit)?;
            return Ok(quantity);
        }

        let from = self.resolve_to_base(from_unit)?;
        let to = self.resolve_to_base(to_unit)?;
        if from.base_unit_id != to.base_unit_id {
            return Err(ServiceError::IncompatibleUnits {
                from: from_unit,
                to: to_unit,
            });
        }

        quantity
            .checked_mul(from.factor)
            .and_then(|in_base| in_base.checked_div(to.factor))
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "quantity {} overflows converting measurement {} to {}",
                    quantity, from_unit, to_unit
                ))
            })
    }

    /// Every unit resolving to the same base as `unit_id`, coarsest first.
    pub fn family(&self, unit_id: i64) -> Result<Vec<(&MeasurementUnit, Decimal)>, ServiceError> {
        let base = self.resolve_to_base(unit_id)?.base_unit_id;

        let mut members = Vec::new();
        for unit in self.units.values() {
            // Units with broken chains are not part of any family.
            if let Ok(resolution) = self.resolve_to_base(unit.id) {
                if resolution.base_unit_id == base {
                    members.push((unit, resolution.factor));
                }
            }
        }
        members.sort_by(|(a, fa), (b, fb)| fb.cmp(fa).then(a.id.cmp(&b.id)));
        Ok(members)
    }

    /// Most granular unit of the family; the normalization point for sums.
    pub fn smallest_unit(&self, unit_id: i64) -> Result<i64, ServiceError> {
        let base = self.resolve_to_base(unit_id)?.base_unit_id;
        let smallest = self
            .family(unit_id)?
            .into_iter()
            .min_by(|(a, fa), (b, fb)| {
                fa.cmp(fb)
                    .then_with(|| (b.id == base).cmp(&(a.id == base)))
                    .then(a.id.cmp(&b.id))
            })
            .map(|(unit, _)| unit.id)
            .unwrap_or(base);
        Ok(smallest)
    }

    /// Resolves every unit so broken master data fails before any computation.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let mut ids: Vec<i64> = self.units.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.resolve_to_base(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    const KG: i64 = 1;
    const G: i64 = 2;
    const MG: i64 = 3;
    const LITRE: i64 = 10;
    const ML: i64 = 11;

    fn graph() -> MeasurementGraph {
        MeasurementGraph::new(vec![
            MeasurementUnit::base(KG, "kg").with_decimal_limit(3),
            MeasurementUnit::derived(G, "g", KG, dec!(0.001)).with_decimal_limit(0),
            MeasurementUnit::derived(MG, "mg", G, dec!(0.001)),
            MeasurementUnit::base(LITRE, "l"),
            MeasurementUnit::derived(ML, "ml", LITRE, dec!(0.001)),
        ])
    }

    #[test]
    fn resolves_multi_level_chain() {
        let resolution = graph().resolve_to_base(MG).unwrap();
        assert_eq!(resolution.base_unit_id, KG);
        assert_eq!(resolution.factor, dec!(0.000001));
    }

    #[test]
    fn base_unit_resolves_to_itself() {
        let resolution = graph().resolve_to_base(KG).unwrap();
        assert_eq!(resolution, BaseResolution { factor: Decimal::ONE, base_unit_id: KG });
    }

    #[test]
    fn converts_grams_to_kilograms() {
        assert_eq!(graph().convert(dec!(1500), G, KG).unwrap(), dec!(1.5));
        assert_eq!(graph().convert(dec!(1.5), KG, G).unwrap(), dec!(1500));
        assert_eq!(graph().convert(dec!(2), KG, MG).unwrap(), dec!(2000000));
    }

    #[test]
    fn rejects_conversion_across_bases() {
        assert_matches!(
            graph().convert(dec!(1), G, ML),
            Err(ServiceError::IncompatibleUnits { from: G, to: ML })
        );
    }

    #[test]
    fn detects_cycles() {
        let graph = MeasurementGraph::new(vec![
            MeasurementUnit::derived(1, "a", 2, dec!(2)),
            MeasurementUnit::derived(2, "b", 3, dec!(2)),
            MeasurementUnit::derived(3, "c", 1, dec!(2)),
        ]);
        assert_matches!(graph.resolve_to_base(1), Err(ServiceError::ConfigurationError(_)));
        assert!(graph.validate().is_err());
    }

    #[test]
    fn detects_dangling_parent_and_orphans() {
        let graph = MeasurementGraph::new(vec![
            MeasurementUnit::derived(1, "a", 99, dec!(2)),
            MeasurementUnit {
                base_unit_id: None,
                ..MeasurementUnit::derived(2, "b", 0, dec!(1))
            },
        ]);
        assert_matches!(graph.resolve_to_base(1), Err(ServiceError::ConfigurationError(_)));
        assert_matches!(graph.resolve_to_base(2), Err(ServiceError::ConfigurationError(_)));
        assert_matches!(graph.resolve_to_base(42), Err(ServiceError::UnknownMeasurement(42)));
    }

    #[test]
    fn rejects_non_positive_equivalent() {
        let graph = MeasurementGraph::new(vec![
            MeasurementUnit::base(1, "kg"),
            MeasurementUnit::derived(2, "g", 1, Decimal::ZERO),
        ]);
        assert_matches!(graph.resolve_to_base(2), Err(ServiceError::ConfigurationError(_)));
    }

    #[test]
    fn smallest_unit_is_most_granular_family_member() {
        let graph = graph();
        assert_eq!(graph.smallest_unit(KG).unwrap(), MG);
        assert_eq!(graph.smallest_unit(G).unwrap(), MG);
        assert_eq!(graph.smallest_unit(LITRE).unwrap(), ML);

        let lone = MeasurementGraph::new(vec![MeasurementUnit::base(7, "pcs")]);
        assert_eq!(lone.smallest_unit(7).unwrap(), 7);
    }

    #[test]
    fn family_is_ordered_coarsest_first() {
        let ids: Vec<i64> = graph()
            .family(G)
            .unwrap()
            .into_iter()
            .map(|(u, _)| u.id)
            .collect();
        assert_eq!(ids, vec![KG, G, MG]);
    }

    #[test]
    fn builds_from_models_with_sorted_ranges() {
        let measurements = vec![measurement::Model {
            id: 5,
            symbol: "tray".into(),
            is_base_unit: true,
            base_unit_id: None,
            base_unit_equivalent: Decimal::ONE,
            decimal_limit_qty: Some(2),
            adjust_type: "bucketed_range".into(),
            step_wise_range: None,
        }];
        let ranges = vec![
            measurement_range::Model {
                id: 2,
                measurement_id: 5,
                min_quantity: dec!(5),
                max_quantity: dec!(10),
                sort_order: 2,
            },
            measurement_range::Model {
                id: 1,
                measurement_id: 5,
                min_quantity: dec!(0),
                max_quantity: dec!(5),
                sort_order: 1,
            },
        ];

        let graph = MeasurementGraph::from_models(measurements, ranges).unwrap();
        let unit = graph.unit(5).unwrap();
        assert_eq!(unit.adjust_type, AdjustType::BucketedRange);
        assert_eq!(unit.decimal_limit_qty, Some(2));
        assert_eq!(unit.custom_ranges[0], CustomRange::new(dec!(0), dec!(5)));
        assert_eq!(unit.custom_ranges[1], CustomRange::new(dec!(5), dec!(10)));
    }

    #[test]
    fn unknown_adjust_type_is_a_configuration_error() {
        let measurements = vec![measurement::Model {
            id: 5,
            symbol: "tray".into(),
            is_base_unit: true,
            base_unit_id: None,
            base_unit_equivalent: Decimal::ONE,
            decimal_limit_qty: None,
            adjust_type: "stepwise-ish".into(),
            step_wise_range: None,
        }];
        assert_matches!(
            MeasurementGraph::from_models(measurements, vec![]),
            Err(ServiceError::ConfigurationError(_))
        );
    }

    #[test]
    fn out_of_range_decimal_limit_is_a_configuration_error() {
        let tray = |limit: i32| measurement::Model {
            id: 5,
            symbol: "tray".into(),
            is_base_unit: true,
            base_unit_id: None,
            base_unit_equivalent: Decimal::ONE,
            decimal_limit_qty: Some(limit),
            adjust_type: "nearest_step".into(),
            step_wise_range: None,
        };
        for limit in [-1, 11, 29] {
            assert_matches!(
                MeasurementGraph::from_models(vec![tray(limit)], vec![]),
                Err(ServiceError::ConfigurationError(_))
            );
        }
        assert!(MeasurementGraph::from_models(vec![tray(10)], vec![]).is_ok());
    }
}
