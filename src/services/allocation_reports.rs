use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::entities::raw_material::{self, Entity as RawMaterialEntity};
use crate::entities::raw_material_allocation::{self, Entity as AllocationEntity};
use crate::errors::ServiceError;
use crate::services::company_settings::{load_company_settings, CompanySettings};
use crate::services::measurement_graph::MeasurementGraph;
use crate::services::quantity_adjuster::{overflow, Quantity, QuantityAdjuster};

pub const UNALLOCATED_SUPPLIER: &str = "unallocated";
const UNCATEGORISED: &str = "uncategorised";

/// How allocation rows are grouped in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportGrouping {
    Supplier,
    Category,
    Date,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFilter {
    #[serde(default)]
    pub order_ids: Vec<i64>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

/// Total of one raw material within one group, in a display unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
    pub group: String,
    pub raw_material_id: i64,
    pub final_quantity: Quantity,
    pub extra_quantity: Quantity,
}

/// Sums final and extra quantities per (group, raw material, unit family).
pub fn summarize<F>(
    rows: &[raw_material_allocation::Model],
    graph: &MeasurementGraph,
    settings: &CompanySettings,
    group_of: F,
) -> Result<Vec<ReportLine>, ServiceError>
where
    F: Fn(&raw_material_allocation::Model) -> String,
{
    // (group, raw material, family smallest unit) -> (final, extra)
    let mut totals: BTreeMap<(String, i64, i64), (Decimal, Decimal)> = BTreeMap::new();

    for row in rows {
        let smallest = graph.smallest_unit(row.final_measurement_id)?;
        let final_amount = graph.convert(row.final_quantity, row.final_measurement_id, smallest)?;
        let extra_amount = if row.extra_quantity.is_zero() {
            Decimal::ZERO
        } else {
            graph.convert(row.extra_quantity, row.extra_measurement_id, smallest)?
        };

        let entry = totals
            .entry((group_of(row), row.raw_material_id, smallest))
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        let sum = |total: Decimal, amount: Decimal| {
            total.checked_add(amount).ok_or_else(|| {
                overflow(format!("summing raw material {} for report", row.raw_material_id))
            })
        };
        entry.0 = sum(entry.0, final_amount)?;
        entry.1 = sum(entry.1, extra_amount)?;
    }

    let adjuster = QuantityAdjuster::new(graph, settings);
    totals
        .into_iter()
        .map(|((group, raw_material_id, unit), (final_amount, extra_amount))| {
            Ok(ReportLine {
                group,
                raw_material_id,
                final_quantity: adjuster.select_output_unit(final_amount, unit)?,
                extra_quantity: adjuster.select_output_unit(extra_amount, unit)?,
            })
        })
        .collect()
}

/// Read-only views over allocation rows.
pub struct AllocationReportService {
    db: Arc<DatabaseConnection>,
    defaults: CompanySettings,
}

impl AllocationReportService {
    pub fn new(db: Arc<DatabaseConnection>, defaults: CompanySettings) -> Self {
        Self { db, defaults }
    }

    async fn rows(
        &self,
        filter: &ReportFilter,
    ) -> Result<Vec<raw_material_allocation::Model>, ServiceError> {
        let mut query = AllocationEntity::find();
        if !filter.order_ids.is_empty() {
            query = query.filter(
                raw_material_allocation::Column::OrderId.is_in(filter.order_ids.iter().copied()),
            );
        }
        if let Some(from) = filter.from {
            query = query.filter(raw_material_allocation::Column::OrderTime.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(raw_material_allocation::Column::OrderTime.lt(to));
        }

        query
            .order_by_asc(raw_material_allocation::Column::OrderTime)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self, filter))]
    pub async fn report(
        &self,
        grouping: ReportGrouping,
        filter: &ReportFilter,
        company_id: i64,
    ) -> Result<Vec<ReportLine>, ServiceError> {
        let rows = self.rows(filter).await?;
        let settings = load_company_settings(&*self.db, company_id, &self.defaults).await?;
        let graph = MeasurementGraph::load(&*self.db).await?;

        let lines = match grouping {
            ReportGrouping::Supplier => summarize(&rows, &graph, &settings, supplier_group)?,
            ReportGrouping::Date => summarize(&rows, &graph, &settings, date_group)?,
            ReportGrouping::Category => {
                let mut ids: Vec<i64> = rows.iter().map(|r| r.raw_material_id).collect();
                ids.sort_unstable();
                ids.dedup();
                let categories: HashMap<i64, String> = RawMaterialEntity::find()
                    .filter(raw_material::Column::Id.is_in(ids))
                    .all(&*self.db)
                    .await
                    .map_err(ServiceError::db_error)?
                    .into_iter()
                    .map(|m| (m.id, m.category))
                    .collect();
                summarize(&rows, &graph, &settings, |row| {
                    categories
                        .get(&row.raw_material_id)
                        .cloned()
                        .unwrap_or_else(|| UNCATEGORISED.to_string())
                })?
            }
        };

        info!(?grouping, rows = rows.len(), lines = lines.len(), "Allocation report generated");
        Ok(lines)
    }

    pub async fn supplier_wise(
        &self,
        filter: &ReportFilter,
        company_id: i64,
    ) -> Result<Vec<ReportLine>, ServiceError> {
        self.report(ReportGrouping::Supplier, filter, company_id).await
    }

    pub async fn category_wise(
        &self,
        filter: &ReportFilter,
        company_id: i64,
    ) -> Result<Vec<ReportLine>, ServiceError> {
        self.report(ReportGrouping::Category, filter, company_id).await
    }

    pub async fn date_wise(
        &self,
        filter: &ReportFilter,
        company_id: i64,
    ) -> Result<Vec<ReportLine>, ServiceError> {
        self.report(ReportGrouping::Date, filter, company_id).await
    }
}

fn supplier_group(row: &raw_material_allocation::Model) -> String {
    row.supplier_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| UNALLOCATED_SUPPLIER.to_string())
}

fn date_group(row: &raw_material_allocation::Model) -> String {
    row.order_time.date_naive().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::raw_material_allocation::AllocationStatus;
    use crate::services::measurement_graph::MeasurementUnit;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const KG: i64 = 1;
    const G: i64 = 2;
    const LITRE: i64 = 3;

    fn graph() -> MeasurementGraph {
        MeasurementGraph::new(vec![
            MeasurementUnit::base(KG, "kg").with_decimal_limit(3),
            MeasurementUnit::derived(G, "g", KG, dec!(0.001)).with_decimal_limit(0),
            MeasurementUnit::base(LITRE, "l").with_decimal_limit(2),
        ])
    }

    fn row(
        raw_material_id: i64,
        supplier_id: Option<i64>,
        final_quantity: Quantity,
        extra_quantity: Quantity,
        day: u32,
    ) -> raw_material_allocation::Model {
        let at = Utc.with_ymd_and_hms(2026, 3, day, 18, 0, 0).unwrap();
        raw_material_allocation::Model {
            id: Uuid::new_v4(),
            order_id: 1,
            function_id: 1,
            menu_item_placement_id: Some(1),
            raw_material_id,
            is_extra: false,
            actual_quantity: final_quantity.amount,
            actual_measurement_id: final_quantity.measurement_id,
            final_quantity: final_quantity.amount,
            final_measurement_id: final_quantity.measurement_id,
            extra_quantity: extra_quantity.amount,
            extra_measurement_id: extra_quantity.measurement_id,
            supplier_id,
            godown_id: None,
            allocation_status: if supplier_id.is_some() {
                AllocationStatus::Allocated.to_string()
            } else {
                AllocationStatus::NeedsManualAllocation.to_string()
            },
            order_time: at,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn supplier_report_sums_units_of_a_family() {
        let rows = vec![
            row(9, Some(70), Quantity::new(dec!(1.25), KG), Quantity::zero(KG), 1),
            row(9, Some(70), Quantity::new(dec!(250), G), Quantity::new(dec!(500), G), 1),
            row(9, None, Quantity::new(dec!(300), G), Quantity::zero(G), 2),
        ];
        let lines = summarize(&rows, &graph(), &CompanySettings::default(), supplier_group).unwrap();

        assert_eq!(
            lines,
            vec![
                ReportLine {
                    group: "70".into(),
                    raw_material_id: 9,
                    final_quantity: Quantity::new(dec!(1.5), KG),
                    extra_quantity: Quantity::new(dec!(500), G),
                },
                ReportLine {
                    group: UNALLOCATED_SUPPLIER.into(),
                    raw_material_id: 9,
                    final_quantity: Quantity::new(dec!(300), G),
                    extra_quantity: Quantity::zero(G),
                },
            ]
        );
    }

    #[test]
    fn date_report_groups_by_order_day() {
        let rows = vec![
            row(9, Some(70), Quantity::new(dec!(2), KG), Quantity::zero(KG), 1),
            row(4, Some(70), Quantity::new(dec!(1.5), LITRE), Quantity::zero(LITRE), 1),
            row(9, Some(70), Quantity::new(dec!(3), KG), Quantity::zero(KG), 2),
        ];
        let lines = summarize(&rows, &graph(), &CompanySettings::default(), date_group).unwrap();
        let groups: Vec<(&str, i64)> = lines
            .iter()
            .map(|l| (l.group.as_str(), l.raw_material_id))
            .collect();
        assert_eq!(
            groups,
            vec![("2026-03-01", 4), ("2026-03-01", 9), ("2026-03-02", 9)]
        );
        assert_eq!(lines[0].final_quantity, Quantity::new(dec!(1.5), LITRE));
    }

    #[test]
    fn overflowing_totals_are_invalid_input() {
        let huge = Quantity::new(Decimal::MAX - Decimal::ONE, LITRE);
        let rows = vec![
            row(4, Some(70), huge, Quantity::zero(LITRE), 1),
            row(4, Some(70), huge, Quantity::zero(LITRE), 1),
        ];
        assert_matches!(
            summarize(&rows, &graph(), &CompanySettings::default(), supplier_group),
            Err(ServiceError::InvalidInput(_))
        );
    }
}
