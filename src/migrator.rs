use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_tables::Migration),
            Box::new(m20240601_000002_create_basket_tables::Migration),
            Box::new(m20240601_000003_create_purchase_tables::Migration),
            Box::new(m20240601_000004_create_coupons_table::Migration),
        ]
    }
}

mod m20240601_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Users::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Users::Username).string().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null())
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Records::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Records::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Records::Title).string().not_null())
                        .col(ColumnDef::new(Records::Artist).string().not_null())
                        .col(ColumnDef::new(Records::Condition).string().not_null())
                        .col(ColumnDef::new(Records::PriceCents).big_integer().not_null())
                        // Stock can never be observed below zero
                        .col(
                            ColumnDef::new(Records::Quantity)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Records::Quantity).gte(0)),
                        )
                        .col(
                            ColumnDef::new(Records::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Records::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Records::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Users {
        Table,
        Id,
        Username,
        Email,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Records {
        Table,
        Id,
        Title,
        Artist,
        Condition,
        PriceCents,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_basket_tables {

    use super::m20240601_000001_create_catalog_tables::Records;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_basket_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Baskets::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Baskets::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Baskets::UserId)
                                .big_integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Baskets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Baskets::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BasketItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BasketItems::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(BasketItems::BasketId).big_integer().not_null())
                        .col(ColumnDef::new(BasketItems::RecordId).big_integer().not_null())
                        .col(
                            ColumnDef::new(BasketItems::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(BasketItems::Quantity).gte(1)),
                        )
                        .col(
                            ColumnDef::new(BasketItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BasketItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_basket_items_basket_id")
                                .from(BasketItems::Table, BasketItems::BasketId)
                                .to(Baskets::Table, Baskets::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_basket_items_record_id")
                                .from(BasketItems::Table, BasketItems::RecordId)
                                .to(Records::Table, Records::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_basket_items_basket_record")
                        .table(BasketItems::Table)
                        .col(BasketItems::BasketId)
                        .col(BasketItems::RecordId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BasketItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Baskets::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Baskets {
        Table,
        Id,
        UserId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum BasketItems {
        Table,
        Id,
        BasketId,
        RecordId,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_purchase_tables {

    use super::m20240601_000001_create_catalog_tables::Records;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_purchase_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseRecords::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PurchaseRecords::UserId).big_integer().null())
                        .col(ColumnDef::new(PurchaseRecords::IsGuest).boolean().not_null())
                        .col(
                            ColumnDef::new(PurchaseRecords::RecordId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseRecords::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(PurchaseRecords::UnitPriceCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::TotalAmountCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::PurchaseDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::CheckoutSessionId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseRecords::LineIndex).integer().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_records_record_id")
                                .from(PurchaseRecords::Table, PurchaseRecords::RecordId)
                                .to(Records::Table, Records::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // The per-line idempotency key
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_purchase_records_session_line")
                        .table(PurchaseRecords::Table)
                        .col(PurchaseRecords::CheckoutSessionId)
                        .col(PurchaseRecords::LineIndex)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_records_user_date")
                        .table(PurchaseRecords::Table)
                        .col(PurchaseRecords::UserId)
                        .col(PurchaseRecords::PurchaseDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(GuestContacts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(GuestContacts::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(GuestContacts::PurchaseRecordId)
                                .big_integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(GuestContacts::FirstName).string().not_null())
                        .col(ColumnDef::new(GuestContacts::LastName).string().not_null())
                        .col(ColumnDef::new(GuestContacts::Email).string().not_null())
                        .col(ColumnDef::new(GuestContacts::Address).string().null())
                        .col(ColumnDef::new(GuestContacts::PostalCode).string().null())
                        .col(ColumnDef::new(GuestContacts::City).string().null())
                        .col(ColumnDef::new(GuestContacts::Region).string().null())
                        .col(ColumnDef::new(GuestContacts::Country).string().null())
                        .col(ColumnDef::new(GuestContacts::Phone).string().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_guest_contacts_purchase_record_id")
                                .from(GuestContacts::Table, GuestContacts::PurchaseRecordId)
                                .to(PurchaseRecords::Table, PurchaseRecords::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProcessedCheckoutSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProcessedCheckoutSessions::SessionId)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ProcessedCheckoutSessions::EventId)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProcessedCheckoutSessions::OrderNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProcessedCheckoutSessions::LineCount)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProcessedCheckoutSessions::ProcessedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProcessedCheckoutSessions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(GuestContacts::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseRecords {
        Table,
        Id,
        UserId,
        IsGuest,
        RecordId,
        Quantity,
        UnitPriceCents,
        TotalAmountCents,
        PurchaseDate,
        Status,
        CheckoutSessionId,
        LineIndex,
    }

    #[derive(DeriveIden)]
    enum GuestContacts {
        Table,
        Id,
        PurchaseRecordId,
        FirstName,
        LastName,
        Email,
        Address,
        PostalCode,
        City,
        Region,
        Country,
        Phone,
    }

    #[derive(DeriveIden)]
    enum ProcessedCheckoutSessions {
        Table,
        SessionId,
        EventId,
        OrderNumber,
        LineCount,
        ProcessedAt,
    }
}

mod m20240601_000004_create_coupons_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_coupons_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Coupons::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Coupons::UserId).big_integer().not_null())
                        .col(
                            ColumnDef::new(Coupons::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Coupons::DiscountPercentage)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::ValidUntil)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::IsUsed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
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
                        .name("idx_coupons_user_id")
                        .table(Coupons::Table)
                        .col(Coupons::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        UserId,
        Code,
        DiscountPercentage,
        ValidUntil,
        IsUsed,
        CreatedAt,
    }
}
