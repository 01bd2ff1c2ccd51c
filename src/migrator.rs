use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_sync_tables::Migration),
            Box::new(m20250101_000002_create_address_fingerprint_index::Migration),
            Box::new(m20250301_000003_one_settlement_per_document::Migration),
            Box::new(m20250301_000004_create_page_progress::Migration),
        ]
    }
}

mod m20250101_000001_create_sync_tables {
    use crate::entities::{
        customer, customer_address, document_line, financial_document, pricing_profile,
        settlement_record, sync_record, territory,
    };
    use sea_orm::{EntityTrait, Schema};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_sync_tables"
        }
    }

    async fn create_from_entity<E>(
        manager: &SchemaManager<'_>,
        schema: &Schema,
        entity: E,
    ) -> Result<(), DbErr>
    where
        E: EntityTrait + Copy,
    {
        manager
            .create_table(schema.create_table_from_entity(entity).if_not_exists().to_owned())
            .await?;
        for mut index in schema.create_index_from_entity(entity) {
            manager.create_index(index.if_not_exists().to_owned()).await?;
        }
        Ok(())
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let schema = Schema::new(manager.get_database_backend());

            create_from_entity(manager, &schema, territory::Entity).await?;
            create_from_entity(manager, &schema, pricing_profile::Entity).await?;
            create_from_entity(manager, &schema, customer::Entity).await?;
            create_from_entity(manager, &schema, customer_address::Entity).await?;
            create_from_entity(manager, &schema, financial_document::Entity).await?;
            create_from_entity(manager, &schema, document_line::Entity).await?;
            create_from_entity(manager, &schema, settlement_record::Entity).await?;
            create_from_entity(manager, &schema, sync_record::Entity).await?;
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(sync_record::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(settlement_record::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(document_line::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(financial_document::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(customer_address::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(customer::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(pricing_profile::Entity).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(territory::Entity).to_owned())
                .await
        }
    }
}

mod m20250101_000002_create_address_fingerprint_index {
    use crate::entities::customer_address;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_address_fingerprint_index"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_customer_addresses_customer_fingerprint")
                        .table(customer_address::Entity)
                        .col(customer_address::Column::CustomerId)
                        .col(customer_address::Column::Fingerprint)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_index(
                    Index::drop()
                        .name("idx_customer_addresses_customer_fingerprint")
                        .table(customer_address::Entity)
                        .to_owned(),
                )
                .await
        }
    }
}

mod m20250301_000003_one_settlement_per_document {
    use crate::entities::settlement_record;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_one_settlement_per_document"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_settlement_records_document_unique")
                        .table(settlement_record::Entity)
                        .col(settlement_record::Column::DocumentId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_index(
                    Index::drop()
                        .name("idx_settlement_records_document_unique")
                        .table(settlement_record::Entity)
                        .to_owned(),
                )
                .await
        }
    }
}

mod m20250301_000004_create_page_progress {
    use crate::entities::page_progress;
    use sea_orm::Schema;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000004_create_page_progress"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let schema = Schema::new(manager.get_database_backend());
            manager
                .create_table(
                    schema
                        .create_table_from_entity(page_progress::Entity)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(page_progress::Entity).to_owned())
                .await
        }
    }
}
