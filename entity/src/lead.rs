use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "lead")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub address: String,
    #[sea_orm(indexed)]
    pub suburb: String,
    pub postcode: String,
    pub service_type: ServiceType,
    pub urgency: Urgency,
    pub source: Source,
    pub status: Status,
    pub inspection_date: Option<Date>,
    pub inspection_time: Option<String>,
    pub email_sent: bool,
    pub notes: Option<String>,
    #[sea_orm(indexed)]
    pub assigned_technician_id: Option<Uuid>,
    pub version: i32,
    pub contacted_at: Option<DateTimeWithTimeZone>,
    pub qualified_at: Option<DateTimeWithTimeZone>,
    pub converted_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::technician::Entity",
        from = "Column::AssignedTechnicianId",
        to = "super::technician::Column::Id",
        on_delete = "SetNull"
    )]
    Technician,
    #[sea_orm(has_many = "super::activity::Entity")]
    Activity,
    #[sea_orm(has_many = "super::inspection::Entity")]
    Inspection,
}

impl Related<super::technician::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Technician.def()
    }
}

impl Related<super::activity::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Activity.def()
    }
}

impl Related<super::inspection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Inspection.def()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "lead_status")]
pub enum Status {
    #[sea_orm(string_value = "NEW")]
    New,
    #[sea_orm(string_value = "CONTACTED")]
    Contacted,
    #[sea_orm(string_value = "QUALIFIED")]
    Qualified,
    #[sea_orm(string_value = "QUOTED")]
    Quoted,
    #[sea_orm(string_value = "CONVERTED")]
    Converted,
    #[sea_orm(string_value = "FOLLOW_UP")]
    FollowUp,
    #[sea_orm(string_value = "CLOSED_LOST")]
    ClosedLost,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
pub enum ServiceType {
    #[sea_orm(string_value = "INSPECTION")]
    Inspection,
    #[sea_orm(string_value = "REMOVAL")]
    Removal,
    #[sea_orm(string_value = "REMEDIATION")]
    Remediation,
    #[sea_orm(string_value = "FOGGING")]
    Fogging,
    #[sea_orm(string_value = "MATERIAL_REMOVAL")]
    MaterialRemoval,
    #[sea_orm(string_value = "SUBFLOOR")]
    Subfloor,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
pub enum Urgency {
    #[sea_orm(string_value = "LOW")]
    Low,
    #[sea_orm(string_value = "MEDIUM")]
    Medium,
    #[sea_orm(string_value = "HIGH")]
    High,
    #[sea_orm(string_value = "URGENT")]
    Urgent,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
pub enum Source {
    #[sea_orm(string_value = "WEBSITE")]
    Website,
    #[sea_orm(string_value = "PHONE")]
    Phone,
    #[sea_orm(string_value = "REFERRAL")]
    Referral,
    #[sea_orm(string_value = "ADS")]
    Ads,
    #[sea_orm(string_value = "SOCIAL")]
    Social,
}

impl ActiveModelBehavior for ActiveModel {}
