use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Lead {
    Table,
    Id,
    FirstName,
    LastName,
    Email,
    Phone,
    Address,
    Suburb,
    Postcode,
    ServiceType,
    Urgency,
    Source,
    Status,
    InspectionDate,
    InspectionTime,
    EmailSent,
    Notes,
    AssignedTechnicianId,
    Version,
    ContactedAt,
    QualifiedAt,
    ConvertedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum LeadStatusEnum {
    #[sea_orm(iden = "lead_status")]
    Table,
}

#[derive(DeriveIden)]
enum Activity {
    Table,
    Id,
    LeadId,
    InspectionId,
    Kind,
    Description,
    Notes,
    MetaJson,
    CreatedBy,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Inspection {
    Table,
    Id,
    LeadId,
    ScheduledAt,
    CompletedAt,
    Status,
    Findings,
    Recommendations,
    EstimatedCostCents,
    FinalCostCents,
    TechnicianId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Technician {
    Table,
    Id,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

const LEAD_STATUS_VALUES: &[&str] = &[
    "NEW",
    "CONTACTED",
    "QUALIFIED",
    "QUOTED",
    "CONVERTED",
    "FOLLOW_UP",
    "CLOSED_LOST",
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let create_enum_sql = format!(
            "DO $$ BEGIN IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'lead_status') THEN CREATE TYPE lead_status AS ENUM ({}); END IF; END $$;",
            LEAD_STATUS_VALUES
                .iter()
                .map(|v| format!("'{}'", v))
                .collect::<Vec<_>>()
                .join(", ")
        );
        manager
            .get_connection()
            .execute_unprepared(&create_enum_sql)
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Lead::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Lead::Id)
                            .uuid()
                            .not_null()
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()")),
                    )
                    .col(ColumnDef::new(Lead::FirstName).string_len(128).not_null())
                    .col(ColumnDef::new(Lead::LastName).string_len(128).not_null())
                    .col(ColumnDef::new(Lead::Email).string_len(320))
                    .col(ColumnDef::new(Lead::Phone).string_len(64).not_null())
                    .col(ColumnDef::new(Lead::Address).string_len(512).not_null())
                    .col(ColumnDef::new(Lead::Suburb).string_len(128).not_null())
                    .col(ColumnDef::new(Lead::Postcode).string_len(16).not_null())
                    .col(ColumnDef::new(Lead::ServiceType).string_len(32).not_null())
                    .col(ColumnDef::new(Lead::Urgency).string_len(32).not_null())
                    .col(ColumnDef::new(Lead::Source).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Lead::Status)
                            .custom(LeadStatusEnum::Table)
                            .not_null()
                            .default(Expr::cust("'NEW'::lead_status")),
                    )
                    .col(ColumnDef::new(Lead::InspectionDate).date())
                    .col(ColumnDef::new(Lead::InspectionTime).string_len(16))
                    .col(
                        ColumnDef::new(Lead::EmailSent)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Lead::Notes).text())
                    .col(ColumnDef::new(Lead::AssignedTechnicianId).uuid())
                    .col(
                        ColumnDef::new(Lead::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(Lead::ContactedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Lead::QualifiedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Lead::ConvertedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Lead::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("now()")),
                    )
                    .col(
                        ColumnDef::new(Lead::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("now()")),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_lead_technician")
                            .from(Lead::Table, Lead::AssignedTechnicianId)
                            .to(Technician::Table, Technician::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lead_status")
                    .table(Lead::Table)
                    .col(Lead::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lead_suburb")
                    .table(Lead::Table)
                    .col(Lead::Suburb)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_lead_technician")
                    .table(Lead::Table)
                    .col(Lead::AssignedTechnicianId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Inspection::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Inspection::Id)
                            .uuid()
                            .not_null()
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()")),
                    )
                    .col(ColumnDef::new(Inspection::LeadId).uuid().not_null())
                    .col(
                        ColumnDef::new(Inspection::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Inspection::CompletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Inspection::Status)
                            .string_len(32)
                            .not_null()
                            .default("SCHEDULED"),
                    )
                    .col(ColumnDef::new(Inspection::Findings).text())
                    .col(ColumnDef::new(Inspection::Recommendations).text())
                    .col(ColumnDef::new(Inspection::EstimatedCostCents).big_integer())
                    .col(ColumnDef::new(Inspection::FinalCostCents).big_integer())
                    .col(ColumnDef::new(Inspection::TechnicianId).uuid())
                    .col(
                        ColumnDef::new(Inspection::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("now()")),
                    )
                    .col(
                        ColumnDef::new(Inspection::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("now()")),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inspection_lead")
                            .from(Inspection::Table, Inspection::LeadId)
                            .to(Lead::Table, Lead::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inspection_technician")
                            .from(Inspection::Table, Inspection::TechnicianId)
                            .to(Technician::Table, Technician::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_inspection_lead")
                    .table(Inspection::Table)
                    .col(Inspection::LeadId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Activity::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Activity::Id)
                            .uuid()
                            .not_null()
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()")),
                    )
                    .col(ColumnDef::new(Activity::LeadId).uuid().not_null())
                    .col(ColumnDef::new(Activity::InspectionId).uuid())
                    .col(ColumnDef::new(Activity::Kind).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Activity::Description)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Activity::Notes).text())
                    .col(
                        ColumnDef::new(Activity::MetaJson)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'{}'::jsonb")),
                    )
                    .col(ColumnDef::new(Activity::CreatedBy).uuid())
                    .col(
                        ColumnDef::new(Activity::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("now()")),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_activity_lead")
                            .from(Activity::Table, Activity::LeadId)
                            .to(Lead::Table, Lead::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_activity_inspection")
                            .from(Activity::Table, Activity::InspectionId)
                            .to(Inspection::Table, Inspection::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_activity_lead_created")
                    .table(Activity::Table)
                    .col(Activity::LeadId)
                    .col(Activity::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Activity::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Inspection::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Lead::Table).to_owned())
            .await?;
        manager
            .get_connection()
            .execute_unprepared("DROP TYPE IF EXISTS lead_status;")
            .await?;
        Ok(())
    }
}
