use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Sourcing state of an allocation row
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AllocationStatus {
    /// A supplier is attached.
    Allocated,
    /// No default supplier exists; someone has to pick one by hand.
    NeedsManualAllocation,
}

/// One row per (placement, raw material) or, for ad hoc extras, per (function, raw material).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "raw_material_allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: i64,
    pub function_id: i64,
    pub menu_item_placement_id: Option<i64>,
    pub raw_material_id: i64,
    pub is_extra: bool,
    #[sea_orm(column_type = "Decimal(Some((28, 10)))")]
    pub actual_quantity: Decimal,
    pub actual_measurement_id: i64,
    #[sea_orm(column_type = "Decimal(Some((28, 10)))")]
    pub final_quantity: Decimal,
    pub final_measurement_id: i64,
    #[sea_orm(column_type = "Decimal(Some((28, 10)))")]
    pub extra_quantity: Decimal,
    pub extra_measurement_id: i64,
    pub supplier_id: Option<i64>,
    pub godown_id: Option<i64>,
    pub allocation_status: String,
    pub order_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn status(&self) -> Option<AllocationStatus> {
        self.allocation_status.parse().ok()
    }

    pub fn needs_manual_allocation(&self) -> bool {
        self.status() == Some(AllocationStatus::NeedsManualAllocation)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::raw_material::Entity",
        from = "Column::RawMaterialId",
        to = "super::raw_material::Column::Id"
    )]
    RawMaterial,
}

impl Related<super::raw_material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RawMaterial.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);

            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }

        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}
