use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Quizzes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Quizzes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Quizzes::Title).string_len(255).not_null())
                    .col(ColumnDef::new(Quizzes::SuccessPercentage).integer().not_null())
                    .col(ColumnDef::new(Quizzes::Description).string_len(1024).null())
                    .col(ColumnDef::new(Quizzes::Duration).integer().not_null())
                    .col(ColumnDef::new(Quizzes::CreatedById).integer().not_null())
                    .col(ColumnDef::new(Quizzes::SubjectId).integer().not_null())
                    .col(ColumnDef::new(Quizzes::GenerationJobId).uuid().null())
                    .col(
                        ColumnDef::new(Quizzes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_quizzes_created_by")
                            .from(Quizzes::Table, Quizzes::CreatedById)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_quizzes_subject")
                            .from(Quizzes::Table, Quizzes::SubjectId)
                            .to(Subjects::Table, Subjects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Redelivered jobs must not be able to materialize a second quiz.
        manager
            .create_index(
                Index::create()
                    .name("idx_quizzes_generation_job_id_unique")
                    .table(Quizzes::Table)
                    .col(Quizzes::GenerationJobId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_quizzes_created_by_subject")
                    .table(Quizzes::Table)
                    .col(Quizzes::CreatedById)
                    .col(Quizzes::SubjectId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_quizzes_created_by_subject")
                    .table(Quizzes::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_quizzes_generation_job_id_unique")
                    .table(Quizzes::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Quizzes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Subjects {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Quizzes {
    Table,
    Id,
    Title,
    SuccessPercentage,
    Description,
    Duration,
    CreatedById,
    SubjectId,
    GenerationJobId,
    CreatedAt,
}
