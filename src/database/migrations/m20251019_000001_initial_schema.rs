use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_runs_table(manager).await?;
        self.create_jobs_table(manager).await?;
        self.create_indexes(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Jobs::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Runs::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    fn create_timestamp_column(&self, manager: &SchemaManager, column: impl IntoIden) -> ColumnDef {
        let mut col = ColumnDef::new(column);
        match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => col.timestamp_with_time_zone().not_null(),
            _ => col.string().not_null(),
        };
        col
    }

    fn create_nullable_timestamp_column(
        &self,
        manager: &SchemaManager,
        column: impl IntoIden,
    ) -> ColumnDef {
        let mut col = ColumnDef::new(column);
        match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => col.timestamp_with_time_zone(),
            _ => col.string(),
        };
        col
    }

    async fn create_runs_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Runs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Runs::Id)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Runs::Name).string().not_null())
                    .col(ColumnDef::new(Runs::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Runs::TargetUnits).big_integer().not_null())
                    .col(ColumnDef::new(Runs::PacingMode).string_len(16).not_null())
                    .col(ColumnDef::new(Runs::PacingHours).double())
                    .col(ColumnDef::new(Runs::Distribution).text())
                    .col(ColumnDef::new(Runs::Concurrency).integer())
                    .col(ColumnDef::new(Runs::UnitsPerCohort).integer().not_null())
                    .col(ColumnDef::new(Runs::CohortCount).integer().not_null())
                    .col(ColumnDef::new(Runs::Stats).text())
                    .col(ColumnDef::new(Runs::Metrics).text())
                    .col(self.create_timestamp_column(manager, Runs::CreatedAt))
                    .col(self.create_timestamp_column(manager, Runs::UpdatedAt))
                    .col(self.create_nullable_timestamp_column(manager, Runs::StartedAt))
                    .col(self.create_nullable_timestamp_column(manager, Runs::CompletedAt))
                    .to_owned(),
            )
            .await
    }

    async fn create_jobs_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Jobs::Id)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Jobs::RunId).string_len(64).not_null())
                    .col(ColumnDef::new(Jobs::CohortId).string_len(128).not_null())
                    .col(ColumnDef::new(Jobs::CohortPosition).integer().not_null())
                    .col(ColumnDef::new(Jobs::ScheduledAtMs).big_integer().not_null())
                    .col(ColumnDef::new(Jobs::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Jobs::Country).string())
                    .col(ColumnDef::new(Jobs::DeviceType).string())
                    .col(ColumnDef::new(Jobs::DeviceName).string())
                    .col(ColumnDef::new(Jobs::BrowserType).string())
                    .col(ColumnDef::new(Jobs::ErrorMessage).text())
                    .col(
                        ColumnDef::new(Jobs::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(self.create_timestamp_column(manager, Jobs::CreatedAt))
                    .col(self.create_timestamp_column(manager, Jobs::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_jobs_run_id")
                            .from(Jobs::Table, Jobs::RunId)
                            .to(Runs::Table, Runs::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::NoAction),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_indexes(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        // FIFO claim scans pending jobs in schedule order
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_status_scheduled")
                    .table(Jobs::Table)
                    .col(Jobs::Status)
                    .col(Jobs::ScheduledAtMs)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_run_scheduled")
                    .table(Jobs::Table)
                    .col(Jobs::RunId)
                    .col(Jobs::ScheduledAtMs)
                    .to_owned(),
            )
            .await?;
        // Per-run stats group by status
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_run_status")
                    .table(Jobs::Table)
                    .col(Jobs::RunId)
                    .col(Jobs::Status)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_runs_status")
                    .table(Runs::Table)
                    .col(Runs::Status)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Runs {
    Table,
    Id,
    Name,
    Status,
    TargetUnits,
    PacingMode,
    PacingHours,
    Distribution,
    Concurrency,
    UnitsPerCohort,
    CohortCount,
    Stats,
    Metrics,
    CreatedAt,
    UpdatedAt,
    StartedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    RunId,
    CohortId,
    CohortPosition,
    ScheduledAtMs,
    Status,
    Country,
    DeviceType,
    DeviceName,
    BrowserType,
    ErrorMessage,
    Version,
    CreatedAt,
    UpdatedAt,
}
