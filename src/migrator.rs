use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_measurement_tables::Migration),
            Box::new(m20240601_000002_create_raw_material_tables::Migration),
            Box::new(m20240601_000003_create_company_settings_table::Migration),
            Box::new(m20240601_000004_create_raw_material_allocations_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_measurement_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_measurement_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Measurements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Measurements::Id)
                                .big_integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Measurements::Symbol).string().not_null())
                        .col(
                            ColumnDef::new(Measurements::IsBaseUnit)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Measurements::BaseUnitId).big_integer().null())
                        .col(
                            ColumnDef::new(Measurements::BaseUnitEquivalent)
                                .decimal_len(24, 10)
                                .not_null()
                                .default(1),
                        )
                        .col(ColumnDef::new(Measurements::DecimalLimitQty).integer().null())
                        .col(
                            ColumnDef::new(Measurements::AdjustType)
                                .string()
                                .not_null()
                                .default("nearest_step"),
                        )
                        .col(
                            ColumnDef::new(Measurements::StepWiseRange)
                                .decimal_len(19, 4)
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(MeasurementCustomRanges::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MeasurementCustomRanges::Id)
                                .big_integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MeasurementCustomRanges::MeasurementId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MeasurementCustomRanges::MinQuantity)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MeasurementCustomRanges::MaxQuantity)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MeasurementCustomRanges::SortOrder)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_custom_ranges_measurement")
                                .from(
                                    MeasurementCustomRanges::Table,
                                    MeasurementCustomRanges::MeasurementId,
                                )
                                .to(Measurements::Table, Measurements::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_custom_ranges_measurement_id")
                        .table(MeasurementCustomRanges::Table)
                        .col(MeasurementCustomRanges::MeasurementId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(MeasurementCustomRanges::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_table(Table::drop().table(Measurements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Measurements {
        Table,
        Id,
        Symbol,
        IsBaseUnit,
        BaseUnitId,
        BaseUnitEquivalent,
        DecimalLimitQty,
        AdjustType,
        StepWiseRange,
    }

    #[derive(DeriveIden)]
    enum MeasurementCustomRanges {
        Table,
        Id,
        MeasurementId,
        MinQuantity,
        MaxQuantity,
        SortOrder,
    }
}

mod m20240601_000002_create_raw_material_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_raw_material_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RawMaterials::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RawMaterials::Id)
                                .big_integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RawMaterials::Name).string().not_null())
                        .col(ColumnDef::new(RawMaterials::Category).string().not_null())
                        .col(
                            ColumnDef::new(RawMaterials::DefaultMeasurementId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterials::DefaultGodownId)
                                .big_integer()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(RawMaterialSuppliers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RawMaterialSuppliers::Id)
                                .big_integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialSuppliers::RawMaterialId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialSuppliers::SupplierId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialSuppliers::IsDefault)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(RawMaterialSuppliers::IsSupplierRate)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_raw_material_suppliers_raw_material")
                                .from(
                                    RawMaterialSuppliers::Table,
                                    RawMaterialSuppliers::RawMaterialId,
                                )
                                .to(RawMaterials::Table, RawMaterials::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_raw_material_suppliers_raw_material_id")
                        .table(RawMaterialSuppliers::Table)
                        .col(RawMaterialSuppliers::RawMaterialId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(MenuItemRawMaterials::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MenuItemRawMaterials::Id)
                                .big_integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MenuItemRawMaterials::MenuItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MenuItemRawMaterials::RawMaterialId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MenuItemRawMaterials::MeasurementId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MenuItemRawMaterials::WeightPer100Pax)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_menu_item_raw_materials_raw_material")
                                .from(
                                    MenuItemRawMaterials::Table,
                                    MenuItemRawMaterials::RawMaterialId,
                                )
                                .to(RawMaterials::Table, RawMaterials::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_menu_item_raw_materials_menu_item_id")
                        .table(MenuItemRawMaterials::Table)
                        .col(MenuItemRawMaterials::MenuItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MenuItemRawMaterials::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RawMaterialSuppliers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(RawMaterials::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RawMaterials {
        Table,
        Id,
        Name,
        Category,
        DefaultMeasurementId,
        DefaultGodownId,
    }

    #[derive(DeriveIden)]
    enum RawMaterialSuppliers {
        Table,
        Id,
        RawMaterialId,
        SupplierId,
        IsDefault,
        IsSupplierRate,
    }

    #[derive(DeriveIden)]
    enum MenuItemRawMaterials {
        Table,
        Id,
        MenuItemId,
        RawMaterialId,
        MeasurementId,
        #[sea_orm(iden = "weight_per_100_pax")]
        WeightPer100Pax,
    }
}

mod m20240601_000003_create_company_settings_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_company_settings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CompanySettings::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CompanySettings::CompanyId)
                                .big_integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CompanySettings::IsAdjustQuantity)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(CompanySettings::DecimalLimitQty)
                                .integer()
                                .not_null()
                                .default(3),
                        )
                        .col(
                            ColumnDef::new(CompanySettings::DecimalLimitForCurrency)
                                .integer()
                                .not_null()
                                .default(2),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CompanySettings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CompanySettings {
        Table,
        CompanyId,
        IsAdjustQuantity,
        DecimalLimitQty,
        DecimalLimitForCurrency,
    }
}

mod m20240601_000004_create_raw_material_allocations_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_raw_material_allocations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RawMaterialAllocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RawMaterialAllocations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::OrderId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::FunctionId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::MenuItemPlacementId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::RawMaterialId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::IsExtra)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::ActualQuantity)
                                .decimal_len(28, 10)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::ActualMeasurementId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::FinalQuantity)
                                .decimal_len(28, 10)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::FinalMeasurementId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::ExtraQuantity)
                                .decimal_len(28, 10)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::ExtraMeasurementId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::SupplierId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::GodownId)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::AllocationStatus)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::OrderTime)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .col(
                            ColumnDef::new(RawMaterialAllocations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_raw_material_allocations_order_id")
                        .table(RawMaterialAllocations::Table)
                        .col(RawMaterialAllocations::OrderId)
                        .to_owned(),
                )
                .await?;

            // Placement rows; extras carry a NULL placement and are keyed by function.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_raw_material_allocations_placement_key")
                        .table(RawMaterialAllocations::Table)
                        .col(RawMaterialAllocations::MenuItemPlacementId)
                        .col(RawMaterialAllocations::RawMaterialId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_raw_material_allocations_function_key")
                        .table(RawMaterialAllocations::Table)
                        .col(RawMaterialAllocations::FunctionId)
                        .col(RawMaterialAllocations::RawMaterialId)
                        .col(RawMaterialAllocations::IsExtra)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_raw_material_allocations_supplier_id")
                        .table(RawMaterialAllocations::Table)
                        .col(RawMaterialAllocations::SupplierId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(RawMaterialAllocations::Table)
                        .to_owned(),
                )
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RawMaterialAllocations {
        Table,
        Id,
        OrderId,
        FunctionId,
        MenuItemPlacementId,
        RawMaterialId,
        IsExtra,
        ActualQuantity,
        ActualMeasurementId,
        FinalQuantity,
        FinalMeasurementId,
        ExtraQuantity,
        ExtraMeasurementId,
        SupplierId,
        GodownId,
        AllocationStatus,
        OrderTime,
        CreatedAt,
        UpdatedAt,
    }
}
