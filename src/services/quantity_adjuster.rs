//! Step-wise quantity adjustment
//!
//! Snaps raw requirement quantities to purchasable amounts according to the
//! measurement's `adjust_type`, and splits anything beyond the largest bucket
//! into a separately tracked extra component.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::entities::measurement::AdjustType;
use crate::errors::ServiceError;
use crate::services::company_settings::CompanySettings;
use crate::services::measurement_graph::{MeasurementGraph, MeasurementUnit};

/// An amount tagged with the measurement it is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity {
    pub amount: Decimal,
    pub measurement_id: i64,
}

impl Quantity {
    pub fn new(amount: Decimal, measurement_id: i64) -> Self {
        Self {
            amount,
            measurement_id,
        }
    }

    pub fn zero(measurement_id: i64) -> Self {
        Self::new(Decimal::ZERO, measurement_id)
    }
}

/// Adjusted amount plus the overflow that fits no bucket, each in its own unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustedSplit {
    pub adjusted: Quantity,
    pub extra: Quantity,
}

impl AdjustedSplit {
    pub fn has_extra(&self) -> bool {
        !self.extra.amount.is_zero()
    }
}

/// Error for Decimal arithmetic that leaves the representable range.
pub(crate) fn overflow(context: String) -> ServiceError {
    ServiceError::InvalidInput(format!("quantity overflows {}", context))
}

/// Rounds half away from zero, the policy used for every quantity rounding.
pub fn round_quantity(amount: Decimal, decimal_limit: u32) -> Decimal {
    amount.round_dp_with_strategy(decimal_limit, RoundingStrategy::MidpointAwayFromZero)
}

pub struct QuantityAdjuster<'a> {
    graph: &'a MeasurementGraph,
    settings: &'a CompanySettings,
}

impl<'a> QuantityAdjuster<'a> {
    pub fn new(graph: &'a MeasurementGraph, settings: &'a CompanySettings) -> Self {
        Self { graph, settings }
    }

    /// Decimal limit of a unit, or the company default when the unit has none.
    pub fn precision(&self, unit: &MeasurementUnit) -> u32 {
        unit.decimal_limit_qty
            .unwrap_or(self.settings.decimal_limit_qty)
    }

    pub fn adjust(
        &self,
        quantity: Decimal,
        unit_id: i64,
        apply_adjustment: bool,
    ) -> Result<Quantity, ServiceError> {
        ensure_non_negative(quantity)?;
        let unit = self.graph.unit(unit_id)?;
        let rounded = || round_quantity(quantity, self.precision(unit));

        if !apply_adjustment {
            return Ok(Quantity::new(rounded(), unit_id));
        }

        let amount = match unit.adjust_type {
            AdjustType::NearestStep => match unit.step_wise_range {
                Some(step) if step > Decimal::ZERO => quantity
                    .checked_div(step)
                    .map(|steps| steps.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
                    .and_then(|steps| steps.checked_mul(step))
                    .ok_or_else(|| overflow(format!("stepping {} by {}", quantity, step)))?,
                _ => rounded(),
            },
            AdjustType::BucketedRange => {
                // The first bucket whose upper bound covers the quantity decides.
                match unit.custom_ranges.iter().find(|r| quantity <= r.max) {
                    Some(range) if range.contains(quantity) => range.max,
                    Some(range) => range.min,
                    // Above every bucket: left for split_adjusted_and_extra.
                    None => rounded(),
                }
            }
        };

        Ok(Quantity::new(amount, unit_id))
    }

    /// Re-expresses `amount` in the coarsest unit of its family where it is at least
    /// one whole unit and still exact within that unit's decimal limit.
    pub fn select_output_unit(
        &self,
        amount: Decimal,
        unit_id: i64,
    ) -> Result<Quantity, ServiceError> {
        let current_factor = self.graph.resolve_to_base(unit_id)?.factor;

        for (candidate, factor) in self.graph.family(unit_id)? {
            if factor <= current_factor {
                break;
            }
            let converted = self.graph.convert(amount, unit_id, candidate.id)?.normalize();
            if converted >= Decimal::ONE && converted.scale() <= self.precision(candidate) {
                return Ok(Quantity::new(converted, candidate.id));
            }
        }

        Ok(Quantity::new(amount, unit_id))
    }

    /// Splits a quantity into the part the buckets can hold and the overflow beyond
    /// the largest bucket. With `is_supplier_rate` the overflow is quoted in the base
    /// unit, otherwise in the smallest unit of the family.
    pub fn split_adjusted_and_extra(
        &self,
        quantity: Decimal,
        unit_id: i64,
        apply_adjustment: bool,
        is_supplier_rate: bool,
    ) -> Result<AdjustedSplit, ServiceError> {
        ensure_non_negative(quantity)?;
        let unit = self.graph.unit(unit_id)?;

        let largest_bound = match unit.adjust_type {
            AdjustType::BucketedRange if apply_adjustment => {
                unit.custom_ranges.iter().map(|r| r.max).max()
            }
            _ => None,
        };

        let (adjusted_amount, overflow) = match largest_bound {
            Some(top) if quantity > top => (top, quantity - top),
            _ => (
                self.adjust(quantity, unit_id, apply_adjustment)?.amount,
                Decimal::ZERO,
            ),
        };

        let adjusted = self.select_output_unit(adjusted_amount, unit_id)?;
        if overflow.is_zero() {
            return Ok(AdjustedSplit {
                adjusted,
                extra: Quantity::zero(adjusted.measurement_id),
            });
        }

        let extra = if is_supplier_rate {
            let base_id = self.graph.resolve_to_base(unit_id)?.base_unit_id;
            let base = self.graph.unit(base_id)?;
            let in_base = self.graph.convert(overflow, unit_id, base_id)?;
            Quantity::new(round_quantity(in_base, self.precision(base)), base_id)
        } else {
            let smallest_id = self.graph.smallest_unit(unit_id)?;
            let smallest = self.graph.unit(smallest_id)?;
            let in_smallest = round_quantity(
                self.graph.convert(overflow, unit_id, smallest_id)?,
                self.precision(smallest),
            );
            self.select_output_unit(in_smallest, smallest_id)?
        };

        Ok(AdjustedSplit { adjusted, extra })
    }
}

fn ensure_non_negative(quantity: Decimal) -> Result<(), ServiceError> {
    if quantity.is_sign_negative() && !quantity.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "quantity must not be negative: {}",
            quantity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::measurement_graph::CustomRange;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    const KG: i64 = 1;
    const G: i64 = 2;
    const STEP_KG: i64 = 3;
    const TRAY: i64 = 4;
    const GAPPY: i64 = 5;

    fn graph() -> MeasurementGraph {
        MeasurementGraph::new(vec![
            MeasurementUnit::base(KG, "kg")
                .with_decimal_limit(3)
                .with_ranges(vec![
                    CustomRange::new(dec!(0), dec!(0.5)),
                    CustomRange::new(dec!(0.5), dec!(1)),
                    CustomRange::new(dec!(1), dec!(2)),
                ]),
            MeasurementUnit::derived(G, "g", KG, dec!(0.001)).with_decimal_limit(0),
            MeasurementUnit::base(STEP_KG, "kg-step")
                .with_decimal_limit(3)
                .with_step(dec!(0.25)),
            MeasurementUnit::base(TRAY, "tray"),
            MeasurementUnit::base(GAPPY, "crate").with_ranges(vec![
                CustomRange::new(dec!(5), dec!(10)),
                CustomRange::new(dec!(1), dec!(2)),
            ]),
        ])
    }

    fn settings() -> CompanySettings {
        CompanySettings::default()
    }

    #[rstest]
    #[case(dec!(8.80), dec!(8.75))]
    #[case(dec!(8.875), dec!(9.00))]
    #[case(dec!(8.874), dec!(8.75))]
    #[case(dec!(8.625), dec!(8.75))]
    #[case(dec!(0), dec!(0))]
    fn nearest_step_rounds_half_up(#[case] input: Decimal, #[case] expected: Decimal) {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        let adjusted = adjuster.adjust(input, STEP_KG, true).unwrap();
        assert_eq!(adjusted, Quantity::new(expected, STEP_KG));
    }

    #[rstest]
    #[case(dec!(0), dec!(0))]
    #[case(dec!(0.3), dec!(0.5))]
    #[case(dec!(0.5), dec!(0.5))]
    #[case(dec!(0.75), dec!(1))]
    #[case(dec!(1.2), dec!(2))]
    #[case(dec!(2.5), dec!(2.5))]
    fn bucketed_range_snaps_to_upper_bound(#[case] input: Decimal, #[case] expected: Decimal) {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        assert_eq!(adjuster.adjust(input, KG, true).unwrap().amount, expected);
    }

    #[test]
    fn below_and_between_buckets_raise_to_next_min() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        assert_eq!(adjuster.adjust(dec!(0.5), GAPPY, true).unwrap().amount, dec!(1));
        assert_eq!(adjuster.adjust(dec!(3), GAPPY, true).unwrap().amount, dec!(5));
        assert_eq!(adjuster.adjust(dec!(7), GAPPY, true).unwrap().amount, dec!(10));
    }

    #[test]
    fn adjust_is_idempotent_on_fixed_points() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        for unit in [KG, STEP_KG, GAPPY] {
            for input in [dec!(0.3), dec!(0.9), dec!(3), dec!(8.8), dec!(12.3456)] {
                let once = adjuster.adjust(input, unit, true).unwrap();
                let twice = adjuster.adjust(once.amount, unit, true).unwrap();
                assert_eq!(once, twice, "unit {} input {}", unit, input);
            }
        }
    }

    #[test]
    fn disabled_adjustment_only_rounds_to_precision() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        assert_eq!(adjuster.adjust(dec!(8.8765), STEP_KG, false).unwrap().amount, dec!(8.877));
        // Tray has no own limit and falls back to the company default of 3.
        assert_eq!(adjuster.adjust(dec!(1.23456), TRAY, true).unwrap().amount, dec!(1.235));
    }

    #[test]
    fn negative_quantities_are_rejected() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        assert_matches!(
            adjuster.adjust(dec!(-1), KG, true),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn promotes_whole_units_only_when_exact() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        assert_eq!(adjuster.select_output_unit(dec!(1500), G).unwrap(), Quantity::new(dec!(1.5), KG));
        assert_eq!(adjuster.select_output_unit(dec!(999), G).unwrap(), Quantity::new(dec!(999), G));
        assert_eq!(
            adjuster.select_output_unit(dec!(1234.5), G).unwrap(),
            Quantity::new(dec!(1234.5), G)
        );
        assert_eq!(adjuster.select_output_unit(dec!(2), KG).unwrap(), Quantity::new(dec!(2), KG));
    }

    #[test]
    fn split_reports_overflow_in_smallest_unit() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        let split = adjuster.split_adjusted_and_extra(dec!(2.5), KG, true, false).unwrap();
        assert_eq!(split.adjusted, Quantity::new(dec!(2), KG));
        assert_eq!(split.extra, Quantity::new(dec!(500), G));
        assert!(split.has_extra());
    }

    #[test]
    fn split_promotes_large_overflow() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        let split = adjuster.split_adjusted_and_extra(dec!(3.5), KG, true, false).unwrap();
        assert_eq!(split.extra, Quantity::new(dec!(1.5), KG));
    }

    #[test]
    fn supplier_rate_quotes_overflow_in_base_unit() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        let split = adjuster.split_adjusted_and_extra(dec!(2500), G, true, true).unwrap();
        // Grams use nearest-step without a step, so nothing overflows.
        assert!(!split.has_extra());
        assert_eq!(split.adjusted, Quantity::new(dec!(2.5), KG));

        let split = adjuster.split_adjusted_and_extra(dec!(2.5), KG, true, true).unwrap();
        assert_eq!(split.extra, Quantity::new(dec!(0.5), KG));
    }

    #[test]
    fn split_without_adjustment_keeps_everything() {
        let graph = graph();
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        let split = adjuster.split_adjusted_and_extra(dec!(2.5), KG, false, false).unwrap();
        assert_eq!(split.adjusted, Quantity::new(dec!(2.5), KG));
        assert_eq!(split.extra, Quantity::zero(KG));
    }

    #[test]
    fn step_overflow_is_invalid_input() {
        let graph = MeasurementGraph::new(vec![MeasurementUnit::base(9, "pinch").with_step(dec!(0.001))]);
        let settings = settings();
        let adjuster = QuantityAdjuster::new(&graph, &settings);
        assert_matches!(
            adjuster.adjust(Decimal::MAX / dec!(2), 9, true),
            Err(ServiceError::InvalidInput(_))
        );
    }
}
