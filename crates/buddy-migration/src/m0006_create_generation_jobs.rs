use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GenerationJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GenerationJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GenerationJobs::UserId).integer().not_null())
                    .col(ColumnDef::new(GenerationJobs::SubjectId).integer().not_null())
                    .col(ColumnDef::new(GenerationJobs::ParamsJson).text().not_null())
                    .col(ColumnDef::new(GenerationJobs::State).string().not_null())
                    .col(ColumnDef::new(GenerationJobs::ProgressCurrent).integer().null())
                    .col(ColumnDef::new(GenerationJobs::ProgressTotal).integer().null())
                    .col(ColumnDef::new(GenerationJobs::ResultJson).text().null())
                    .col(ColumnDef::new(GenerationJobs::Error).text().null())
                    .col(
                        ColumnDef::new(GenerationJobs::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(GenerationJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GenerationJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GenerationJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(GenerationJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_generation_jobs_state_created_at")
                    .table(GenerationJobs::Table)
                    .col(GenerationJobs::State)
                    .col(GenerationJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_generation_jobs_updated_at")
                    .table(GenerationJobs::Table)
                    .col(GenerationJobs::UpdatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_generation_jobs_updated_at")
                    .table(GenerationJobs::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_generation_jobs_state_created_at")
                    .table(GenerationJobs::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(GenerationJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum GenerationJobs {
    Table,
    Id,
    UserId,
    SubjectId,
    ParamsJson,
    State,
    ProgressCurrent,
    ProgressTotal,
    ResultJson,
    Error,
    AttemptCount,
    CreatedAt,
    UpdatedAt,
    StartedAt,
    FinishedAt,
}
