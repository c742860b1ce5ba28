#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

use catering_allocations::{
    db::{self, DbConfig},
    entities::{
        company_setting, measurement, measurement_range, menu_item_raw_material, raw_material,
        raw_material_supplier,
    },
    services::{
        allocation_sync::{ExtraPlan, FunctionPlan, OrderPlan, PlacementPlan},
        CompanySettings, Quantity,
    },
};

pub const COMPANY_ID: i64 = 1;

pub const KG: i64 = 1;
pub const G: i64 = 2;
pub const LITRE: i64 = 3;
pub const ML: i64 = 4;
pub const BOX: i64 = 5;

pub const RICE: i64 = 9;
pub const OIL: i64 = 8;
pub const PANEER: i64 = 7;

pub const RICE_SUPPLIER: i64 = 70;
pub const PANEER_SUPPLIER: i64 = 72;
pub const MAIN_GODOWN: i64 = 3;

/// Menu item using rice (2.5 kg) and oil (500 ml) per hundred guests.
pub const BIRYANI: i64 = 50;
/// Menu item using rice only (1 kg per hundred guests).
pub const KHEER: i64 = 51;
/// Menu item using paneer boxes (4 per hundred guests).
pub const PANEER_TIKKA: i64 = 52;

const KHEER_RICE_LINE: i64 = 3;

/// In-memory SQLite database with migrations applied and master data seeded.
pub struct TestDb {
    pub db: Arc<DatabaseConnection>,
}

impl TestDb {
    pub async fn new() -> Self {
        let pool = db::establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        seed_master_data(&pool).await;

        Self { db: Arc::new(pool) }
    }

    pub fn defaults(&self) -> CompanySettings {
        CompanySettings::default()
    }

    pub async fn enable_adjustment(&self) {
        company_setting::ActiveModel {
            company_id: Set(COMPANY_ID),
            is_adjust_quantity: Set(true),
            decimal_limit_qty: Set(3),
            decimal_limit_for_currency: Set(2),
        }
        .insert(&*self.db)
        .await
        .expect("insert company settings");
    }

    /// Rewrites the kheer recipe line for rice.
    pub async fn edit_kheer_rice(&self, measurement_id: i64, weight: Decimal) {
        menu_item_raw_material::ActiveModel {
            id: Set(KHEER_RICE_LINE),
            menu_item_id: Set(KHEER),
            raw_material_id: Set(RICE),
            measurement_id: Set(measurement_id),
            weight_per_100_pax: Set(weight),
        }
        .update(&*self.db)
        .await
        .expect("update menu item raw material");
    }
}

async fn insert_measurement(
    db: &DatabaseConnection,
    id: i64,
    symbol: &str,
    parent: Option<(i64, Decimal)>,
    decimal_limit: i32,
    adjust_type: &str,
    step: Option<Decimal>,
) {
    measurement::ActiveModel {
        id: Set(id),
        symbol: Set(symbol.to_string()),
        is_base_unit: Set(parent.is_none()),
        base_unit_id: Set(parent.map(|(p, _)| p)),
        base_unit_equivalent: Set(parent.map(|(_, eq)| eq).unwrap_or(Decimal::ONE)),
        decimal_limit_qty: Set(Some(decimal_limit)),
        adjust_type: Set(adjust_type.to_string()),
        step_wise_range: Set(step),
    }
    .insert(db)
    .await
    .expect("insert measurement");
}

async fn seed_master_data(db: &DatabaseConnection) {
    insert_measurement(db, KG, "kg", None, 3, "nearest_step", Some(dec!(0.25))).await;
    insert_measurement(db, G, "g", Some((KG, dec!(0.001))), 0, "nearest_step", None).await;
    insert_measurement(db, LITRE, "l", None, 2, "nearest_step", None).await;
    insert_measurement(db, ML, "ml", Some((LITRE, dec!(0.001))), 0, "nearest_step", None).await;
    insert_measurement(db, BOX, "box", None, 2, "bucketed_range", None).await;

    for (id, min, max) in [(1, dec!(0), dec!(5)), (2, dec!(5), dec!(10))] {
        measurement_range::ActiveModel {
            id: Set(id),
            measurement_id: Set(BOX),
            min_quantity: Set(min),
            max_quantity: Set(max),
            sort_order: Set(id as i32),
        }
        .insert(db)
        .await
        .expect("insert custom range");
    }

    for (id, name, category, unit, godown) in [
        (RICE, "Basmati rice", "grains", KG, Some(MAIN_GODOWN)),
        (OIL, "Sunflower oil", "oils", LITRE, None),
        (PANEER, "Paneer", "dairy", BOX, None),
    ] {
        raw_material::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            category: Set(category.to_string()),
            default_measurement_id: Set(unit),
            default_godown_id: Set(godown),
        }
        .insert(db)
        .await
        .expect("insert raw material");
    }

    for (id, rm, supplier, is_default, is_supplier_rate) in [
        (1, RICE, 69, false, false),
        (2, RICE, RICE_SUPPLIER, true, false),
        (3, PANEER, PANEER_SUPPLIER, true, true),
    ] {
        raw_material_supplier::ActiveModel {
            id: Set(id),
            raw_material_id: Set(rm),
            supplier_id: Set(supplier),
            is_default: Set(is_default),
            is_supplier_rate: Set(is_supplier_rate),
        }
        .insert(db)
        .await
        .expect("insert raw material supplier");
    }

    for (id, menu_item, rm, unit, weight) in [
        (1, BIRYANI, RICE, KG, dec!(2.5)),
        (2, BIRYANI, OIL, ML, dec!(500)),
        (KHEER_RICE_LINE, KHEER, RICE, KG, dec!(1)),
        (4, PANEER_TIKKA, PANEER, BOX, dec!(4)),
    ] {
        menu_item_raw_material::ActiveModel {
            id: Set(id),
            menu_item_id: Set(menu_item),
            raw_material_id: Set(rm),
            measurement_id: Set(unit),
            weight_per_100_pax: Set(weight),
        }
        .insert(db)
        .await
        .expect("insert menu item raw material");
    }
}

pub fn order_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 14, 12, 0, 0).unwrap()
}

pub fn placement(placement_id: i64, menu_item_id: i64) -> PlacementPlan {
    PlacementPlan {
        placement_id,
        menu_item_id,
        person_count: None,
    }
}

pub fn function(function_id: i64, person_count: u32, placements: Vec<PlacementPlan>) -> FunctionPlan {
    FunctionPlan {
        function_id,
        person_count,
        placements,
        extras: vec![],
    }
}

pub fn extra(raw_material_id: i64, amount: Decimal, measurement_id: i64) -> ExtraPlan {
    ExtraPlan {
        raw_material_id,
        quantity: Quantity::new(amount, measurement_id),
    }
}

pub fn order(order_id: i64, functions: Vec<FunctionPlan>) -> OrderPlan {
    OrderPlan {
        order_id,
        order_time: order_time(),
        functions,
        order_extras: vec![],
        overrides: vec![],
    }
}
