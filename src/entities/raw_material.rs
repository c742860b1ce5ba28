use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "raw_materials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub name: String,
    pub category: String,
    pub default_measurement_id: i64,
    pub default_godown_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::raw_material_supplier::Entity")]
    Suppliers,
    #[sea_orm(
        belongs_to = "super::measurement::Entity",
        from = "Column::DefaultMeasurementId",
        to = "super::measurement::Column::Id"
    )]
    DefaultMeasurement,
}

impl Related<super::raw_material_supplier::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Suppliers.def()
    }
}

impl Related<super::measurement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DefaultMeasurement.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
