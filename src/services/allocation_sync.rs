//! Raw material allocation synchronisation
//!
//! Keeps exactly one `raw_material_allocations` row per allocation key while an
//! order's menu preparation is edited. Every save recomputes all quantities from
//! scratch inside one transaction: read, recompute, upsert, prune, commit.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::menu_item_raw_material::{self, Entity as MenuItemRawMaterialEntity};
use crate::entities::raw_material::{self, Entity as RawMaterialEntity};
use crate::entities::raw_material_allocation::{
    self, AllocationStatus, Entity as AllocationEntity,
};
use crate::entities::raw_material_supplier::{self, Entity as RawMaterialSupplierEntity};
use crate::errors::ServiceError;
use crate::services::company_settings::{load_company_settings, CompanySettings, MAX_DECIMAL_LIMIT};
use crate::services::measurement_graph::MeasurementGraph;
use crate::services::quantity_adjuster::{round_quantity, AdjustedSplit, Quantity, QuantityAdjuster};
use crate::services::requirement_calculator::{FunctionShare, Requirement, RequirementCalculator};

/// Identity of an allocation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocationKey {
    /// Requirement computed from a menu item placed in a function.
    Placement {
        placement_id: i64,
        raw_material_id: i64,
    },
    /// Ad hoc ("extra") requirement added directly to a function.
    Function {
        function_id: i64,
        raw_material_id: i64,
    },
}

impl AllocationKey {
    pub fn raw_material_id(&self) -> i64 {
        match *self {
            AllocationKey::Placement { raw_material_id, .. }
            | AllocationKey::Function { raw_material_id, .. } => raw_material_id,
        }
    }

    pub fn is_extra(&self) -> bool {
        matches!(self, AllocationKey::Function { .. })
    }

    /// Key of a stored row; `None` for a non-extra row without a placement.
    pub fn of(model: &raw_material_allocation::Model) -> Option<Self> {
        if model.is_extra {
            Some(AllocationKey::Function {
                function_id: model.function_id,
                raw_material_id: model.raw_material_id,
            })
        } else {
            model
                .menu_item_placement_id
                .map(|placement_id| AllocationKey::Placement {
                    placement_id,
                    raw_material_id: model.raw_material_id,
                })
        }
    }

    fn filter(&self) -> sea_orm::Condition {
        use sea_orm::Condition;
        match *self {
            AllocationKey::Placement {
                placement_id,
                raw_material_id,
            } => Condition::all()
                .add(raw_material_allocation::Column::MenuItemPlacementId.eq(placement_id))
                .add(raw_material_allocation::Column::RawMaterialId.eq(raw_material_id))
                .add(raw_material_allocation::Column::IsExtra.eq(false)),
            AllocationKey::Function {
                function_id,
                raw_material_id,
            } => Condition::all()
                .add(raw_material_allocation::Column::FunctionId.eq(function_id))
                .add(raw_material_allocation::Column::RawMaterialId.eq(raw_material_id))
                .add(raw_material_allocation::Column::IsExtra.eq(true)),
        }
    }
}

/// Everything needed to (re)compute one allocation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub key: AllocationKey,
    pub order_id: i64,
    pub function_id: i64,
    pub order_time: DateTime<Utc>,
    pub actual: Quantity,
    /// Manual supplier reassignment; otherwise the stored or default supplier is used.
    #[serde(default)]
    pub supplier_id: Option<i64>,
    /// Manual godown reassignment; otherwise the stored or default godown is used.
    #[serde(default)]
    pub godown_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Menu preparation of one order, as handed over by the order-save workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub order_id: i64,
    pub order_time: DateTime<Utc>,
    pub functions: Vec<FunctionPlan>,
    /// Extras entered for the whole order, apportioned across functions by guests.
    #[serde(default)]
    pub order_extras: Vec<ExtraPlan>,
    #[serde(default)]
    pub overrides: Vec<SourcingOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionPlan {
    pub function_id: i64,
    pub person_count: u32,
    #[serde(default)]
    pub placements: Vec<PlacementPlan>,
    #[serde(default)]
    pub extras: Vec<ExtraPlan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementPlan {
    pub placement_id: i64,
    pub menu_item_id: i64,
    /// Guests served by this placement; defaults to the function's guests.
    #[serde(default)]
    pub person_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtraPlan {
    pub raw_material_id: i64,
    pub quantity: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcingOverride {
    pub key: AllocationKey,
    #[serde(default)]
    pub supplier_id: Option<i64>,
    #[serde(default)]
    pub godown_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub pruned: u64,
    pub needs_manual_allocation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SupplierLink {
    supplier_id: i64,
    is_default: bool,
    is_supplier_rate: bool,
}

/// Default supplier, godown and supplier links per raw material.
#[derive(Debug, Clone, Default)]
pub struct SourcingDirectory {
    materials: HashMap<i64, raw_material::Model>,
    suppliers: HashMap<i64, Vec<SupplierLink>>,
}

impl SourcingDirectory {
    pub fn new(
        materials: Vec<raw_material::Model>,
        suppliers: Vec<raw_material_supplier::Model>,
    ) -> Self {
        let mut links: HashMap<i64, Vec<SupplierLink>> = HashMap::new();
        for supplier in suppliers {
            links
                .entry(supplier.raw_material_id)
                .or_default()
                .push(SupplierLink {
                    supplier_id: supplier.supplier_id,
                    is_default: supplier.is_default,
                    is_supplier_rate: supplier.is_supplier_rate,
                });
        }
        Self {
            materials: materials.into_iter().map(|m| (m.id, m)).collect(),
            suppliers: links,
        }
    }

    #[instrument(skip(db))]
    pub async fn load<C: ConnectionTrait>(
        db: &C,
        raw_material_ids: &[i64],
    ) -> Result<Self, ServiceError> {
        if raw_material_ids.is_empty() {
            return Ok(Self::default());
        }

        let materials = RawMaterialEntity::find()
            .filter(raw_material::Column::Id.is_in(raw_material_ids.iter().copied()))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let suppliers = RawMaterialSupplierEntity::find()
            .filter(
                raw_material_supplier::Column::RawMaterialId
                    .is_in(raw_material_ids.iter().copied()),
            )
            .order_by_asc(raw_material_supplier::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let directory = Self::new(materials, suppliers);
        for id in raw_material_ids {
            directory.material(*id)?;
        }
        Ok(directory)
    }

    pub fn material(&self, raw_material_id: i64) -> Result<&raw_material::Model, ServiceError> {
        self.materials.get(&raw_material_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Raw material {} not found", raw_material_id))
        })
    }

    pub fn default_supplier(&self, raw_material_id: i64) -> Option<i64> {
        self.suppliers
            .get(&raw_material_id)?
            .iter()
            .find(|link| link.is_default)
            .map(|link| link.supplier_id)
    }

    pub fn default_godown(&self, raw_material_id: i64) -> Option<i64> {
        self.materials
            .get(&raw_material_id)
            .and_then(|m| m.default_godown_id)
    }

    pub fn is_supplier_rate(&self, raw_material_id: i64, supplier_id: Option<i64>) -> bool {
        let Some(supplier_id) = supplier_id else {
            return false;
        };
        self.suppliers
            .get(&raw_material_id)
            .and_then(|links| links.iter().find(|link| link.supplier_id == supplier_id))
            .map(|link| link.is_supplier_rate)
            .unwrap_or(false)
    }
}

/// Read-mostly inputs of one recompute pass, loaded once per transaction.
pub struct AllocationContext<'a> {
    pub graph: &'a MeasurementGraph,
    pub settings: &'a CompanySettings,
    pub sourcing: &'a SourcingDirectory,
}

/// Creates or recomputes the single row for `request.key`. Actual, final and extra
/// quantities are always written together.
pub async fn upsert_allocation<C: ConnectionTrait>(
    db: &C,
    ctx: &AllocationContext<'_>,
    request: &AllocationRequest,
) -> Result<(raw_material_allocation::Model, UpsertOutcome), ServiceError> {
    let raw_material_id = request.key.raw_material_id();
    ctx.sourcing.material(raw_material_id)?;

    let mut matches = AllocationEntity::find()
        .filter(request.key.filter())
        .order_by_asc(raw_material_allocation::Column::CreatedAt)
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;
    let existing = if matches.is_empty() {
        None
    } else {
        Some(matches.remove(0))
    };
    if !matches.is_empty() {
        warn!(key = ?request.key, duplicates = matches.len(), "Removing duplicate allocation rows");
        AllocationEntity::delete_many()
            .filter(raw_material_allocation::Column::Id.is_in(matches.iter().map(|m| m.id)))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
    }

    let supplier_id = request
        .supplier_id
        .or_else(|| existing.as_ref().and_then(|e| e.supplier_id))
        .or_else(|| ctx.sourcing.default_supplier(raw_material_id));
    let godown_id = request
        .godown_id
        .or_else(|| existing.as_ref().and_then(|e| e.godown_id))
        .or_else(|| ctx.sourcing.default_godown(raw_material_id));
    let status = if supplier_id.is_some() {
        AllocationStatus::Allocated
    } else {
        warn!(
            key = ?request.key,
            raw_material_id,
            "No default supplier; allocation needs manual assignment"
        );
        counter!("allocations.needs_manual_allocation", 1);
        AllocationStatus::NeedsManualAllocation
    };

    // Stored at the column scale so a resave compares equal to what was written.
    let actual_amount = round_quantity(request.actual.amount, MAX_DECIMAL_LIMIT);
    let adjuster = QuantityAdjuster::new(ctx.graph, ctx.settings);
    let AdjustedSplit { adjusted, extra } = adjuster.split_adjusted_and_extra(
        actual_amount,
        request.actual.measurement_id,
        ctx.settings.is_adjust_quantity,
        ctx.sourcing.is_supplier_rate(raw_material_id, supplier_id),
    )?;

    let placement_id = match request.key {
        AllocationKey::Placement { placement_id, .. } => Some(placement_id),
        AllocationKey::Function { .. } => None,
    };

    if let Some(current) = existing {
        let unchanged = current.order_id == request.order_id
            && current.function_id == request.function_id
            && current.actual_quantity == actual_amount
            && current.actual_measurement_id == request.actual.measurement_id
            && current.final_quantity == adjusted.amount
            && current.final_measurement_id == adjusted.measurement_id
            && current.extra_quantity == extra.amount
            && current.extra_measurement_id == extra.measurement_id
            && current.supplier_id == supplier_id
            && current.godown_id == godown_id
            && current.status() == Some(status)
            && current.order_time == request.order_time;
        if unchanged {
            return Ok((current, UpsertOutcome::Unchanged));
        }

        let mut active: raw_material_allocation::ActiveModel = current.into();
        active.order_id = Set(request.order_id);
        active.function_id = Set(request.function_id);
        active.actual_quantity = Set(actual_amount);
        active.actual_measurement_id = Set(request.actual.measurement_id);
        active.final_quantity = Set(adjusted.amount);
        active.final_measurement_id = Set(adjusted.measurement_id);
        active.extra_quantity = Set(extra.amount);
        active.extra_measurement_id = Set(extra.measurement_id);
        active.supplier_id = Set(supplier_id);
        active.godown_id = Set(godown_id);
        active.allocation_status = Set(status.to_string());
        active.order_time = Set(request.order_time);

        let updated = active.update(db).await.map_err(|e| {
            error!(key = ?request.key, error = %e, "Failed to update allocation");
            ServiceError::db_error(e)
        })?;
        counter!("allocations.updated", 1);
        debug!(key = ?request.key, allocation_id = %updated.id, "Allocation updated");
        return Ok((updated, UpsertOutcome::Updated));
    }

    let now = Utc::now();
    let created = raw_material_allocation::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(request.order_id),
        function_id: Set(request.function_id),
        menu_item_placement_id: Set(placement_id),
        raw_material_id: Set(raw_material_id),
        is_extra: Set(request.key.is_extra()),
        actual_quantity: Set(actual_amount),
        actual_measurement_id: Set(request.actual.measurement_id),
        final_quantity: Set(adjusted.amount),
        final_measurement_id: Set(adjusted.measurement_id),
        extra_quantity: Set(extra.amount),
        extra_measurement_id: Set(extra.measurement_id),
        supplier_id: Set(supplier_id),
        godown_id: Set(godown_id),
        allocation_status: Set(status.to_string()),
        order_time: Set(request.order_time),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .map_err(|e| {
        error!(key = ?request.key, error = %e, "Failed to create allocation");
        ServiceError::db_error(e)
    })?;

    counter!("allocations.created", 1);
    debug!(key = ?request.key, allocation_id = %created.id, "Allocation created");
    Ok((created, UpsertOutcome::Created))
}

/// Deletes every allocation of the order owned by a function outside `valid_function_ids`.
pub async fn prune_functions<C: ConnectionTrait>(
    db: &C,
    order_id: i64,
    valid_function_ids: &[i64],
) -> Result<u64, ServiceError> {
    let mut delete = AllocationEntity::delete_many()
        .filter(raw_material_allocation::Column::OrderId.eq(order_id));
    if !valid_function_ids.is_empty() {
        delete = delete.filter(
            raw_material_allocation::Column::FunctionId
                .is_not_in(valid_function_ids.iter().copied()),
        );
    }

    let result = delete.exec(db).await.map_err(ServiceError::db_error)?;
    if result.rows_affected > 0 {
        counter!("allocations.pruned", result.rows_affected);
        info!(
            order_id,
            pruned = result.rows_affected,
            "Pruned allocations of removed functions"
        );
    }
    Ok(result.rows_affected)
}

/// Deletes allocations of the order whose key is not in `desired`.
pub async fn prune_stale_keys<C: ConnectionTrait>(
    db: &C,
    order_id: i64,
    desired: &HashSet<AllocationKey>,
) -> Result<u64, ServiceError> {
    let rows = AllocationEntity::find()
        .filter(raw_material_allocation::Column::OrderId.eq(order_id))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    let stale: Vec<Uuid> = rows
        .iter()
        .filter(|row| AllocationKey::of(row).map_or(true, |key| !desired.contains(&key)))
        .map(|row| row.id)
        .collect();
    if stale.is_empty() {
        return Ok(0);
    }

    let result = AllocationEntity::delete_many()
        .filter(raw_material_allocation::Column::Id.is_in(stale))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    counter!("allocations.pruned", result.rows_affected);
    info!(
        order_id,
        pruned = result.rows_affected,
        "Pruned allocations of removed menu items and raw materials"
    );
    Ok(result.rows_affected)
}

/// Serialises concurrent saves of the same order for the rest of the transaction.
async fn lock_order<C: ConnectionTrait>(db: &C, order_id: i64) -> Result<(), ServiceError> {
    match db.get_database_backend() {
        DbBackend::Postgres => {
            db.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT pg_advisory_xact_lock($1)",
                [order_id.into()],
            ))
            .await
            .map_err(ServiceError::db_error)?;
        }
        // SQLite allows a single writer; MySQL is not a supported backend for this lock.
        backend => debug!(?backend, order_id, "No order lock for backend"),
    }
    Ok(())
}

/// Turns an order plan into one aggregated requirement per allocation key.
pub fn plan_requirements(
    calculator: &RequirementCalculator<'_>,
    plan: &OrderPlan,
    recipes: &HashMap<i64, Vec<menu_item_raw_material::Model>>,
) -> Result<BTreeMap<AllocationKey, (i64, Quantity)>, ServiceError> {
    let mut grouped: BTreeMap<AllocationKey, (i64, Vec<Requirement>)> = BTreeMap::new();
    let mut function_ids = HashSet::new();
    let mut placement_owner: HashMap<i64, i64> = HashMap::new();

    for function in &plan.functions {
        if !function_ids.insert(function.function_id) {
            return Err(ServiceError::ValidationError(format!(
                "function {} appears twice in order {}",
                function.function_id, plan.order_id
            )));
        }

        for placement in &function.placements {
            if let Some(owner) = placement_owner.insert(placement.placement_id, function.function_id)
            {
                return Err(ServiceError::ValidationError(format!(
                    "placement {} is listed under functions {} and {}",
                    placement.placement_id, owner, function.function_id
                )));
            }

            let persons = placement.person_count.unwrap_or(function.person_count);
            for line in recipes.get(&placement.menu_item_id).into_iter().flatten() {
                let requirement = calculator.requirement(line, persons)?;
                let key = AllocationKey::Placement {
                    placement_id: placement.placement_id,
                    raw_material_id: line.raw_material_id,
                };
                grouped
                    .entry(key)
                    .or_insert_with(|| (function.function_id, Vec::new()))
                    .1
                    .push(requirement);
            }
        }

        for extra in &function.extras {
            push_extra(&mut grouped, function.function_id, extra.raw_material_id, extra.quantity);
        }
    }

    if !plan.order_extras.is_empty() {
        let shares: Vec<FunctionShare> = plan
            .functions
            .iter()
            .map(|f| FunctionShare {
                function_id: f.function_id,
                person_count: f.person_count,
            })
            .collect();
        for extra in &plan.order_extras {
            for (function_id, part) in calculator.apportion(extra.quantity, &shares)? {
                push_extra(&mut grouped, function_id, extra.raw_material_id, part);
            }
        }
    }

    let mut planned = BTreeMap::new();
    for (key, (function_id, requirements)) in grouped {
        let total = calculator
            .aggregate(&requirements)?
            .into_iter()
            .next()
            .map(|r| r.quantity)
            .ok_or_else(|| {
                ServiceError::InternalError(format!("no requirement aggregated for {:?}", key))
            })?;
        planned.insert(key, (function_id, total));
    }
    Ok(planned)
}

fn push_extra(
    grouped: &mut BTreeMap<AllocationKey, (i64, Vec<Requirement>)>,
    function_id: i64,
    raw_material_id: i64,
    quantity: Quantity,
) {
    let key = AllocationKey::Function {
        function_id,
        raw_material_id,
    };
    grouped
        .entry(key)
        .or_insert_with(|| (function_id, Vec::new()))
        .1
        .push(Requirement {
            raw_material_id,
            is_extra: true,
            quantity,
        });
}

/// Order-save entry point for allocation bookkeeping.
#[derive(Clone)]
pub struct AllocationSyncService {
    db: Arc<DatabaseConnection>,
    defaults: CompanySettings,
}

impl AllocationSyncService {
    pub fn new(db: Arc<DatabaseConnection>, defaults: CompanySettings) -> Self {
        Self { db, defaults }
    }

    /// Recomputes and persists every allocation of the order in one transaction.
    #[instrument(skip(self, plan), fields(order_id = plan.order_id))]
    pub async fn sync_order(
        &self,
        plan: &OrderPlan,
        company_id: i64,
    ) -> Result<SyncSummary, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        match self.sync_order_in(&txn, plan, company_id).await {
            Ok(summary) => {
                txn.commit().await.map_err(ServiceError::db_error)?;
                info!(
                    order_id = plan.order_id,
                    created = summary.created,
                    updated = summary.updated,
                    unchanged = summary.unchanged,
                    pruned = summary.pruned,
                    needs_manual_allocation = summary.needs_manual_allocation,
                    "Order allocations synchronised"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(
                    order_id = plan.order_id,
                    configuration = e.is_configuration(),
                    error = %e,
                    "Allocation sync failed; rolling back"
                );
                txn.rollback().await.map_err(ServiceError::db_error)?;
                Err(e)
            }
        }
    }

    async fn sync_order_in<C: ConnectionTrait>(
        &self,
        db: &C,
        plan: &OrderPlan,
        company_id: i64,
    ) -> Result<SyncSummary, ServiceError> {
        lock_order(db, plan.order_id).await?;

        let settings = load_company_settings(db, company_id, &self.defaults).await?;
        let graph = MeasurementGraph::load(db).await?;

        let menu_item_ids: BTreeSet<i64> = plan
            .functions
            .iter()
            .flat_map(|f| f.placements.iter().map(|p| p.menu_item_id))
            .collect();
        let mut recipes: HashMap<i64, Vec<menu_item_raw_material::Model>> = HashMap::new();
        if !menu_item_ids.is_empty() {
            let lines = MenuItemRawMaterialEntity::find()
                .filter(menu_item_raw_material::Column::MenuItemId.is_in(menu_item_ids))
                .order_by_asc(menu_item_raw_material::Column::Id)
                .all(db)
                .await
                .map_err(ServiceError::db_error)?;
            for line in lines {
                recipes.entry(line.menu_item_id).or_default().push(line);
            }
        }

        let calculator = RequirementCalculator::new(&graph, &settings);
        let planned = plan_requirements(&calculator, plan, &recipes)?;

        let raw_material_ids: Vec<i64> = planned
            .keys()
            .map(|k| k.raw_material_id())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let sourcing = SourcingDirectory::load(db, &raw_material_ids).await?;
        let ctx = AllocationContext {
            graph: &graph,
            settings: &settings,
            sourcing: &sourcing,
        };

        let overrides: HashMap<AllocationKey, &SourcingOverride> =
            plan.overrides.iter().map(|o| (o.key, o)).collect();

        let mut summary = SyncSummary::default();
        for (key, (function_id, actual)) in &planned {
            let sourcing_override = overrides.get(key);
            let request = AllocationRequest {
                key: *key,
                order_id: plan.order_id,
                function_id: *function_id,
                order_time: plan.order_time,
                actual: *actual,
                supplier_id: sourcing_override.and_then(|o| o.supplier_id),
                godown_id: sourcing_override.and_then(|o| o.godown_id),
            };
            let (row, outcome) = upsert_allocation(db, &ctx, &request).await?;
            match outcome {
                UpsertOutcome::Created => summary.created += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Unchanged => summary.unchanged += 1,
            }
            if row.needs_manual_allocation() {
                summary.needs_manual_allocation += 1;
            }
        }

        let valid_function_ids: Vec<i64> = plan.functions.iter().map(|f| f.function_id).collect();
        summary.pruned += prune_functions(db, plan.order_id, &valid_function_ids).await?;

        let desired: HashSet<AllocationKey> = planned.keys().copied().collect();
        summary.pruned += prune_stale_keys(db, plan.order_id, &desired).await?;

        Ok(summary)
    }

    /// Recomputes a single allocation in its own transaction.
    #[instrument(skip(self, request), fields(key = ?request.key))]
    pub async fn upsert(
        &self,
        request: &AllocationRequest,
        company_id: i64,
    ) -> Result<(raw_material_allocation::Model, UpsertOutcome), ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let result = async {
            lock_order(&txn, request.order_id).await?;
            let settings = load_company_settings(&txn, company_id, &self.defaults).await?;
            let graph = MeasurementGraph::load(&txn).await?;
            let sourcing =
                SourcingDirectory::load(&txn, &[request.key.raw_material_id()]).await?;
            let ctx = AllocationContext {
                graph: &graph,
                settings: &settings,
                sourcing: &sourcing,
            };
            upsert_allocation(&txn, &ctx, request).await
        }
        .await;

        match result {
            Ok(value) => {
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback().await.map_err(ServiceError::db_error)?;
                Err(e)
            }
        }
    }

    /// Removes allocations of functions that left the order.
    #[instrument(skip(self))]
    pub async fn prune(
        &self,
        order_id: i64,
        valid_function_ids: &[i64],
    ) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let result = async {
            lock_order(&txn, order_id).await?;
            prune_functions(&txn, order_id, valid_function_ids).await
        }
        .await;

        match result {
            Ok(pruned) => {
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(pruned)
            }
            Err(e) => {
                txn.rollback().await.map_err(ServiceError::db_error)?;
                Err(e)
            }
        }
    }

    /// Current allocation rows of an order.
    #[instrument(skip(self))]
    pub async fn allocations_for_order(
        &self,
        order_id: i64,
    ) -> Result<Vec<raw_material_allocation::Model>, ServiceError> {
        AllocationEntity::find()
            .filter(raw_material_allocation::Column::OrderId.eq(order_id))
            .order_by_asc(raw_material_allocation::Column::FunctionId)
            .order_by_asc(raw_material_allocation::Column::RawMaterialId)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }
}
