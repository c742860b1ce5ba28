pub mod company_setting;
pub mod measurement;
pub mod measurement_range;
pub mod menu_item_raw_material;
pub mod raw_material;
pub mod raw_material_allocation;
pub mod raw_material_supplier;
