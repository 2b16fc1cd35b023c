use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202610010001_create_handins"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("handins"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Alias::new("owner_id")).big_integer().not_null())
                    .col(ColumnDef::new(Alias::new("assignment_id")).string().not_null())
                    .col(ColumnDef::new(Alias::new("assignment_slug")).string().not_null())
                    .col(ColumnDef::new(Alias::new("language")).string().not_null())
                    .col(ColumnDef::new(Alias::new("tier_deadline")).timestamp().not_null())
                    .col(ColumnDef::new(Alias::new("tier_scale")).double().not_null())
                    .col(ColumnDef::new(Alias::new("artifact_ref")).string().not_null())
                    .col(
                        ColumnDef::new(Alias::new("state"))
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Alias::new("result")).json_binary().null())
                    .col(ColumnDef::new(Alias::new("score")).double().null())
                    .col(ColumnDef::new(Alias::new("final_score")).double().null())
                    .col(
                        ColumnDef::new(Alias::new("submitted_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(
                        ColumnDef::new(Alias::new("updated_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(ColumnDef::new(Alias::new("completed_at")).timestamp().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_handins_owner")
                    .table(Alias::new("handins"))
                    .col(Alias::new("owner_id"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_handins_assignment")
                    .table(Alias::new("handins"))
                    .col(Alias::new("assignment_id"))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alias::new("handins")).to_owned())
            .await
    }
}
