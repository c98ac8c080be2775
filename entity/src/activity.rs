use sea_orm::entity::prelude::*;

/// Append-only timeline row. Nothing in the API updates or deletes these.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "activity")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub lead_id: Uuid,
    pub inspection_id: Option<Uuid>,
    pub kind: Kind,
    pub description: String,
    pub notes: Option<String>,
    pub meta_json: Json,
    pub created_by: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lead::Entity",
        from = "Column::LeadId",
        to = "super::lead::Column::Id",
        on_delete = "Cascade"
    )]
    Lead,
    #[sea_orm(
        belongs_to = "super::inspection::Entity",
        from = "Column::InspectionId",
        to = "super::inspection::Column::Id",
        on_delete = "SetNull"
    )]
    Inspection,
}

impl Related<super::lead::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lead.def()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
pub enum Kind {
    #[sea_orm(string_value = "CALL")]
    Call,
    #[sea_orm(string_value = "EMAIL")]
    Email,
    #[sea_orm(string_value = "SMS")]
    Sms,
    #[sea_orm(string_value = "MEETING")]
    Meeting,
    #[sea_orm(string_value = "NOTE_ADDED")]
    NoteAdded,
    #[sea_orm(string_value = "STATUS_CHANGE")]
    StatusChange,
    #[sea_orm(string_value = "INSPECTION_COMPLETED")]
    InspectionCompleted,
    #[sea_orm(string_value = "QUOTE_SENT")]
    QuoteSent,
    #[sea_orm(string_value = "PAYMENT_RECEIVED")]
    PaymentReceived,
}

impl ActiveModelBehavior for ActiveModel {}
