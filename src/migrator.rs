use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240401_000001_create_procurement_tables::Migration),
            Box::new(m20240401_000002_create_receiving_tables::Migration),
            Box::new(m20240401_000003_create_invoicing_tables::Migration),
            Box::new(m20240401_000004_create_approval_rules_table::Migration),
            Box::new(m20240401_000005_create_sales_tables::Migration),
            Box::new(m20240401_000006_create_manufacturing_tables::Migration),
            Box::new(m20240401_000007_create_inventory_table::Migration),
            Box::new(m20240401_000008_create_audit_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20240401_000001_create_procurement_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000001_create_procurement_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseRequisitions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseRequisitions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitions::PrNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitions::Department)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitions::Status)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitions::CurrentLevel)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitions::EstimatedValue)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitions::SourceType)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(PurchaseRequisitions::SourceId).uuid().null())
                        .col(
                            ColumnDef::new(PurchaseRequisitions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseRequisitionLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseRequisitionLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitionLines::RequisitionId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitionLines::ItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitionLines::Quantity)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitionLines::Uom)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitionLines::RequiredDate)
                                .date()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitionLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRequisitionLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Quotations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Quotations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Quotations::QuotationNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Quotations::RequisitionId).uuid().null())
                        .col(ColumnDef::new(Quotations::SupplierId).uuid().not_null())
                        .col(ColumnDef::new(Quotations::Status).string().not_null())
                        .col(
                            ColumnDef::new(Quotations::TotalAmount)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Quotations::IsBest)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Quotations::AmountBlocked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Quotations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Quotations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(QuotationLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(QuotationLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(QuotationLines::QuotationId).uuid().not_null())
                        .col(ColumnDef::new(QuotationLines::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(QuotationLines::Quantity)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(QuotationLines::Rate)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(QuotationLines::Amount)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(QuotationLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(QuotationLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::PoNumber).string().not_null())
                        .col(ColumnDef::new(PurchaseOrders::QuotationId).uuid().null())
                        .col(ColumnDef::new(PurchaseOrders::SupplierId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseOrders::Status).string().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrders::TotalAmount)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::CurrentLevel)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderLines::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrderLines::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrderLines::Quantity)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderLines::Rate)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderLines::Amount)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_quotations_requisition_id")
                        .table(Quotations::Table)
                        .col(Quotations::RequisitionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_orders_status")
                        .table(PurchaseOrders::Table)
                        .col(PurchaseOrders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_order_lines_po_id")
                        .table(PurchaseOrderLines::Table)
                        .col(PurchaseOrderLines::PurchaseOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrderLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(QuotationLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Quotations::Table).to_owned())
                .await?;
            manager
                .drop_table(
                    Table::drop()
                        .table(PurchaseRequisitionLines::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseRequisitions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseRequisitions {
        Table,
        Id,
        PrNumber,
        Department,
        Status,
        CurrentLevel,
        EstimatedValue,
        SourceType,
        SourceId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseRequisitionLines {
        Table,
        Id,
        RequisitionId,
        ItemId,
        Quantity,
        Uom,
        RequiredDate,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Quotations {
        Table,
        Id,
        QuotationNumber,
        RequisitionId,
        SupplierId,
        Status,
        TotalAmount,
        IsBest,
        AmountBlocked,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum QuotationLines {
        Table,
        Id,
        QuotationId,
        ItemId,
        Quantity,
        Rate,
        Amount,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
        PoNumber,
        QuotationId,
        SupplierId,
        Status,
        TotalAmount,
        CurrentLevel,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrderLines {
        Table,
        Id,
        PurchaseOrderId,
        ItemId,
        Quantity,
        Rate,
        Amount,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240401_000002_create_receiving_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000002_create_receiving_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(GoodsReceipts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(GoodsReceipts::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(GoodsReceipts::GrnNumber).string().not_null())
                        .col(
                            ColumnDef::new(GoodsReceipts::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(GoodsReceipts::Warehouse).string().not_null())
                        .col(
                            ColumnDef::new(GoodsReceipts::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GoodsReceipts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GoodsReceipts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(GoodsReceiptLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(GoodsReceiptLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GoodsReceiptLines::GoodsReceiptId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(GoodsReceiptLines::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(GoodsReceiptLines::ReceivedQuantity)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GoodsReceiptLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(GoodsReceiptLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_goods_receipts_po_id")
                        .table(GoodsReceipts::Table)
                        .col(GoodsReceipts::PurchaseOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(GoodsReceiptLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(GoodsReceipts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum GoodsReceipts {
        Table,
        Id,
        GrnNumber,
        PurchaseOrderId,
        Warehouse,
        ReceivedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum GoodsReceiptLines {
        Table,
        Id,
        GoodsReceiptId,
        ItemId,
        ReceivedQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240401_000003_create_invoicing_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000003_create_invoicing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Invoices::InvoiceNumber).string().not_null())
                        .col(ColumnDef::new(Invoices::PurchaseOrderId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::SupplierId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::Status).string().not_null())
                        .col(
                            ColumnDef::new(Invoices::TotalAmount)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Invoices::HoldReason).text().null())
                        .col(ColumnDef::new(Invoices::QuotationMatch).string().not_null())
                        .col(ColumnDef::new(Invoices::PoMatch).string().not_null())
                        .col(ColumnDef::new(Invoices::GrnMatch).string().not_null())
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InvoiceLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InvoiceLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoiceLines::InvoiceId).uuid().not_null())
                        .col(ColumnDef::new(InvoiceLines::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(InvoiceLines::Quantity)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLines::Rate)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLines::Amount)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoices_po_id")
                        .table(Invoices::Table)
                        .col(Invoices::PurchaseOrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoices_status")
                        .table(Invoices::Table)
                        .col(Invoices::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InvoiceLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        InvoiceNumber,
        PurchaseOrderId,
        SupplierId,
        Status,
        TotalAmount,
        HoldReason,
        QuotationMatch,
        PoMatch,
        GrnMatch,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InvoiceLines {
        Table,
        Id,
        InvoiceId,
        ItemId,
        Quantity,
        Rate,
        Amount,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240401_000004_create_approval_rules_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000004_create_approval_rules_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ApprovalRules::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ApprovalRules::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ApprovalRules::DocumentType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ApprovalRules::ApprovalLevel)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ApprovalRules::RoleName).string().not_null())
                        .col(
                            ColumnDef::new(ApprovalRules::MinAmount)
                                .decimal_len(19, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ApprovalRules::MaxAmount)
                                .decimal_len(19, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ApprovalRules::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(ApprovalRules::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ApprovalRules::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_approval_rules_doc_type_level")
                        .table(ApprovalRules::Table)
                        .col(ApprovalRules::DocumentType)
                        .col(ApprovalRules::ApprovalLevel)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ApprovalRules::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ApprovalRules {
        Table,
        Id,
        DocumentType,
        ApprovalLevel,
        RoleName,
        MinAmount,
        MaxAmount,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240401_000005_create_sales_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000005_create_sales_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SalesOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SalesOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SalesOrders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(SalesOrders::PartyId).uuid().not_null())
                        .col(ColumnDef::new(SalesOrders::Status).string().not_null())
                        .col(
                            ColumnDef::new(SalesOrders::TotalAmount)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SalesOrders::CurrentLevel)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SalesOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SalesOrderLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SalesOrderLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesOrderLines::SalesOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(SalesOrderLines::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(SalesOrderLines::Quantity)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesOrderLines::Rate)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesOrderLines::Amount)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesOrderLines::NeedsProduction)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(SalesOrderLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SalesOrderLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sales_order_lines_so_id")
                        .table(SalesOrderLines::Table)
                        .col(SalesOrderLines::SalesOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SalesOrderLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SalesOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SalesOrders {
        Table,
        Id,
        OrderNumber,
        PartyId,
        Status,
        TotalAmount,
        CurrentLevel,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SalesOrderLines {
        Table,
        Id,
        SalesOrderId,
        ItemId,
        Quantity,
        Rate,
        Amount,
        NeedsProduction,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240401_000006_create_manufacturing_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000006_create_manufacturing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Boms::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Boms::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Boms::FinishedItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(Boms::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Boms::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Boms::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Boms::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BomComponents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BomComponents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BomComponents::BomId).uuid().not_null())
                        .col(ColumnDef::new(BomComponents::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(BomComponents::QuantityPerUnit)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(BomComponents::Uom).string().not_null())
                        .col(
                            ColumnDef::new(BomComponents::UnitCost)
                                .decimal_len(19, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(BomComponents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BomComponents::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProductionOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductionOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::OrderNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductionOrders::BomId).uuid().not_null())
                        .col(
                            ColumnDef::new(ProductionOrders::FinishedItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::QuantityPlanned)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::QuantityProduced)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::QuantityRejected)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(ProductionOrders::Status).string().not_null())
                        .col(ColumnDef::new(ProductionOrders::SourceType).string().null())
                        .col(ColumnDef::new(ProductionOrders::SourceId).uuid().null())
                        .col(
                            ColumnDef::new(ProductionOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_boms_finished_item_id")
                        .table(Boms::Table)
                        .col(Boms::FinishedItemId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bom_components_bom_id")
                        .table(BomComponents::Table)
                        .col(BomComponents::BomId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductionOrders::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(BomComponents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Boms::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Boms {
        Table,
        Id,
        FinishedItemId,
        Version,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum BomComponents {
        Table,
        Id,
        BomId,
        ItemId,
        QuantityPerUnit,
        Uom,
        UnitCost,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ProductionOrders {
        Table,
        Id,
        OrderNumber,
        BomId,
        FinishedItemId,
        QuantityPlanned,
        QuantityProduced,
        QuantityRejected,
        Status,
        SourceType,
        SourceId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240401_000007_create_inventory_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000007_create_inventory_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLevels::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLevels::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLevels::ItemId).uuid().not_null())
                        .col(ColumnDef::new(StockLevels::Warehouse).string().not_null())
                        .col(
                            ColumnDef::new(StockLevels::Quantity)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockLevels::ReservedQuantity)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockLevels::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLevels::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_levels_item_warehouse")
                        .table(StockLevels::Table)
                        .col(StockLevels::ItemId)
                        .col(StockLevels::Warehouse)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockLevels::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockLevels {
        Table,
        Id,
        ItemId,
        Warehouse,
        Quantity,
        ReservedQuantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240401_000008_create_audit_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000008_create_audit_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CascadeLinks::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CascadeLinks::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CascadeLinks::SourceType).string().not_null())
                        .col(ColumnDef::new(CascadeLinks::SourceId).uuid().not_null())
                        .col(ColumnDef::new(CascadeLinks::TargetType).string().not_null())
                        .col(ColumnDef::new(CascadeLinks::TargetId).uuid().not_null())
                        .col(
                            ColumnDef::new(CascadeLinks::TargetItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CascadeLinks::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One recorded outcome per (source, item scope); two racing
            // first runs cannot both commit, whatever they triggered
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cascade_links_unique_trigger")
                        .table(CascadeLinks::Table)
                        .col(CascadeLinks::SourceType)
                        .col(CascadeLinks::SourceId)
                        .col(CascadeLinks::TargetItemId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StatusLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StatusLogs::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StatusLogs::DocumentType).string().not_null())
                        .col(ColumnDef::new(StatusLogs::DocumentId).uuid().not_null())
                        .col(ColumnDef::new(StatusLogs::FromStatus).string().not_null())
                        .col(ColumnDef::new(StatusLogs::ToStatus).string().not_null())
                        .col(ColumnDef::new(StatusLogs::Reason).text().null())
                        .col(
                            ColumnDef::new(StatusLogs::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_status_logs_document")
                        .table(StatusLogs::Table)
                        .col(StatusLogs::DocumentType)
                        .col(StatusLogs::DocumentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StatusLogs::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CascadeLinks::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CascadeLinks {
        Table,
        Id,
        SourceType,
        SourceId,
        TargetType,
        TargetId,
        TargetItemId,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum StatusLogs {
        Table,
        Id,
        DocumentType,
        DocumentId,
        FromStatus,
        ToStatus,
        Reason,
        OccurredAt,
    }
}
