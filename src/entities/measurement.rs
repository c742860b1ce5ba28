use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// How a measurement snaps requirement quantities to purchasable amounts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdjustType {
    /// Round to the nearest multiple of `step_wise_range`.
    NearestStep,
    /// Snap to the upper bound of the containing custom range.
    BucketedRange,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "measurements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub symbol: String,
    pub is_base_unit: bool,
    /// Parent unit this one is defined in terms of.
    pub base_unit_id: Option<i64>,
    /// 1 of this unit = `base_unit_equivalent` x 1 parent unit.
    #[sea_orm(column_type = "Decimal(Some((24, 10)))")]
    pub base_unit_equivalent: Decimal,
    pub decimal_limit_qty: Option<i32>,
    pub adjust_type: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub step_wise_range: Option<Decimal>,
}

impl Model {
    pub fn adjust_type(&self) -> Option<AdjustType> {
        self.adjust_type.parse().ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::BaseUnitId",
        to = "Column::Id"
    )]
    BaseUnit,
    #[sea_orm(has_many = "super::measurement_range::Entity")]
    CustomRanges,
}

impl Related<super::measurement_range::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CustomRanges.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
