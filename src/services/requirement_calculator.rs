//! Raw material requirement calculation
//!
//! Recipes are stored per hundred guests; this module scales them to real
//! guest counts, sums same-material requirements in the family's smallest unit,
//! and splits order-wide quantities across functions by head count.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entities::menu_item_raw_material;
use crate::errors::ServiceError;
use crate::services::company_settings::CompanySettings;
use crate::services::measurement_graph::MeasurementGraph;
use crate::services::quantity_adjuster::{overflow, round_quantity, Quantity, QuantityAdjuster};

const RECIPE_BATCH_PAX: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub raw_material_id: i64,
    pub is_extra: bool,
    pub quantity: Quantity,
}

/// A function's share of the order's guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionShare {
    pub function_id: i64,
    pub person_count: u32,
}

pub struct RequirementCalculator<'a> {
    graph: &'a MeasurementGraph,
    settings: &'a CompanySettings,
}

impl<'a> RequirementCalculator<'a> {
    pub fn new(graph: &'a MeasurementGraph, settings: &'a CompanySettings) -> Self {
        Self { graph, settings }
    }

    fn adjuster(&self) -> QuantityAdjuster<'a> {
        QuantityAdjuster::new(self.graph, self.settings)
    }

    /// `weight_per_100_pax x person_count / 100`, in the recipe line's measurement.
    pub fn requirement(
        &self,
        line: &menu_item_raw_material::Model,
        person_count: u32,
    ) -> Result<Requirement, ServiceError> {
        if line.weight_per_100_pax.is_sign_negative() && !line.weight_per_100_pax.is_zero() {
            return Err(ServiceError::ValidationError(format!(
                "menu item {} has negative weight for raw material {}",
                line.menu_item_id, line.raw_material_id
            )));
        }
        self.graph.unit(line.measurement_id)?;

        let amount = line
            .weight_per_100_pax
            .checked_mul(Decimal::from(person_count))
            .and_then(|scaled| scaled.checked_div(Decimal::from(RECIPE_BATCH_PAX)))
            .ok_or_else(|| {
                overflow(format!(
                    "scaling menu item {} raw material {} to {} guests",
                    line.menu_item_id, line.raw_material_id, person_count
                ))
            })?;

        Ok(Requirement {
            raw_material_id: line.raw_material_id,
            is_extra: false,
            quantity: Quantity::new(amount.normalize(), line.measurement_id),
        })
    }

    /// Sums requirements per (raw material, is_extra) in the smallest unit of their
    /// family, then re-expresses each sum for storage. Output is ordered by key.
    pub fn aggregate(&self, requirements: &[Requirement]) -> Result<Vec<Requirement>, ServiceError> {
        let mut totals: BTreeMap<(i64, bool), Quantity> = BTreeMap::new();

        for requirement in requirements {
            let unit_id = requirement.quantity.measurement_id;
            let smallest = self.graph.smallest_unit(unit_id)?;
            let normalized = self
                .graph
                .convert(requirement.quantity.amount, unit_id, smallest)?;

            let key = (requirement.raw_material_id, requirement.is_extra);
            match totals.get_mut(&key) {
                Some(total) if total.measurement_id != smallest => {
                    return Err(ServiceError::IncompatibleUnits {
                        from: unit_id,
                        to: total.measurement_id,
                    });
                }
                Some(total) => {
                    total.amount = total.amount.checked_add(normalized).ok_or_else(|| {
                        overflow(format!("summing raw material {}", requirement.raw_material_id))
                    })?;
                }
                None => {
                    totals.insert(key, Quantity::new(normalized, smallest));
                }
            }
        }

        let adjuster = self.adjuster();
        totals
            .into_iter()
            .map(|((raw_material_id, is_extra), total)| {
                Ok(Requirement {
                    raw_material_id,
                    is_extra,
                    quantity: adjuster.select_output_unit(total.amount, total.measurement_id)?,
                })
            })
            .collect()
    }

    /// Splits `total` across functions proportionally to head count using the largest
    /// remainder method, so the parts add back up to the rounded total exactly.
    pub fn apportion(
        &self,
        total: Quantity,
        functions: &[FunctionShare],
    ) -> Result<Vec<(i64, Quantity)>, ServiceError> {
        if functions.is_empty() {
            return Err(ServiceError::ValidationError(
                "cannot apportion a requirement across zero functions".to_string(),
            ));
        }
        if total.amount.is_sign_negative() && !total.amount.is_zero() {
            return Err(ServiceError::ValidationError(format!(
                "cannot apportion negative quantity {}",
                total.amount
            )));
        }

        let total_persons: u64 = functions.iter().map(|f| u64::from(f.person_count)).sum();
        if total_persons == 0 {
            return Err(ServiceError::ValidationError(
                "cannot apportion a requirement across functions without guests".to_string(),
            ));
        }

        let unit = self.graph.unit(total.measurement_id)?;
        let decimal_limit = self.adjuster().precision(unit);
        let total_amount = round_quantity(total.amount, decimal_limit);
        let ulp = Decimal::try_new(1, decimal_limit).map_err(|_| {
            ServiceError::ConfigurationError(format!(
                "measurement {} has unsupported decimal limit {}",
                unit.id, decimal_limit
            ))
        })?;

        let mut parts = Vec::with_capacity(functions.len());
        let mut remainders = Vec::with_capacity(functions.len());
        for (index, share) in functions.iter().enumerate() {
            let exact = total_amount
                .checked_mul(Decimal::from(share.person_count))
                .and_then(|weighted| weighted.checked_div(Decimal::from(total_persons)))
                .ok_or_else(|| overflow(format!("apportioning {}", total_amount)))?;
            let floor = exact.round_dp_with_strategy(decimal_limit, RoundingStrategy::ToZero);
            parts.push(floor);
            remainders.push((index, exact - floor));
        }

        let distributed: Decimal = parts.iter().copied().sum();
        let leftover = ((total_amount - distributed) / ulp)
            .round()
            .to_usize()
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "apportioning {} left an invalid remainder",
                    total_amount
                ))
            })?;

        // Largest remainders first; ties go to the earlier function.
        remainders.sort_by(|(ia, ra), (ib, rb)| rb.cmp(ra).then(ia.cmp(ib)));
        for k in 0..leftover {
            let (index, _) = remainders[k % remainders.len()];
            parts[index] += ulp;
        }

        Ok(functions
            .iter()
            .zip(parts)
            .map(|(share, amount)| (share.function_id, Quantity::new(amount, total.measurement_id)))
            .collect())
    }
}
