use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Raw usage records, already validated and converted upstream
        manager
            .create_table(
                Table::create()
                    .table(Usagerecords::Table)
                    .if_not_exists()
                    .col(pk_auto(Usagerecords::Id))
                    .col(string_uniq(Usagerecords::RecordId))
                    .col(date(Usagerecords::CreateDate))
                    .col(date(Usagerecords::InsertDate))
                    .col(date_null(Usagerecords::EndDate))
                    .col(string(Usagerecords::MachineName))
                    .col(string_null(Usagerecords::GlobalUserName))
                    .col(string_null(Usagerecords::LocalUserId))
                    .col(string_null(Usagerecords::ProjectName))
                    .col(string_null(Usagerecords::VoIssuer))
                    .col(string_null(Usagerecords::VoName))
                    .col(string_null(Usagerecords::VoGroup))
                    .col(string_null(Usagerecords::VoRole))
                    .col(big_integer_null(Usagerecords::CpuDuration))
                    .col(big_integer_null(Usagerecords::WallDuration))
                    .col(integer_null(Usagerecords::Processors))
                    .col(string_null(Usagerecords::InsertIdentity))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_usagerecords_insert_date_machine")
                    .table(Usagerecords::Table)
                    .col(Usagerecords::InsertDate)
                    .col(Usagerecords::MachineName)
                    .to_owned(),
            )
            .await?;

        // Derived per-day, per-host statistics
        manager
            .create_table(
                Table::create()
                    .table(Uraggregated::Table)
                    .if_not_exists()
                    .col(date(Uraggregated::ExecuteDate))
                    .col(date(Uraggregated::InsertDate))
                    .col(string(Uraggregated::MachineName))
                    .col(string_null(Uraggregated::UserIdentity))
                    .col(string_null(Uraggregated::VoIssuer))
                    .col(string_null(Uraggregated::VoName))
                    .col(string_null(Uraggregated::VoGroup))
                    .col(string_null(Uraggregated::VoRole))
                    .col(big_integer(Uraggregated::NJobs))
                    .col(double(Uraggregated::Cputime))
                    .col(double(Uraggregated::Walltime))
                    .col(timestamp(Uraggregated::GenerateTime))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_uraggregated_insert_date_machine")
                    .table(Uraggregated::Table)
                    .col(Uraggregated::InsertDate)
                    .col(Uraggregated::MachineName)
                    .to_owned(),
            )
            .await?;

        // Keys whose aggregated rows are stale
        manager
            .create_table(
                Table::create()
                    .table(UraggregatedUpdate::Table)
                    .if_not_exists()
                    .col(date(UraggregatedUpdate::InsertDate))
                    .col(string(UraggregatedUpdate::MachineName))
                    .primary_key(
                        Index::create()
                            .col(UraggregatedUpdate::InsertDate)
                            .col(UraggregatedUpdate::MachineName),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UraggregatedUpdate::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Uraggregated::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Usagerecords::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Usagerecords {
    Table,
    Id,
    RecordId,
    CreateDate,
    InsertDate,
    EndDate,
    MachineName,
    GlobalUserName,
    LocalUserId,
    ProjectName,
    VoIssuer,
    VoName,
    VoGroup,
    VoRole,
    CpuDuration,
    WallDuration,
    Processors,
    InsertIdentity,
}

#[derive(DeriveIden)]
enum Uraggregated {
    Table,
    ExecuteDate,
    InsertDate,
    MachineName,
    UserIdentity,
    VoIssuer,
    VoName,
    VoGroup,
    VoRole,
    NJobs,
    Cputime,
    Walltime,
    GenerateTime,
}

#[derive(DeriveIden)]
enum UraggregatedUpdate {
    Table,
    InsertDate,
    MachineName,
}
