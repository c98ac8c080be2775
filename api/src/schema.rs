use std::sync::Arc;

use async_graphql::{
    Context, EmptySubscription, Enum, Error, ErrorExtensions, InputObject, Object, Schema,
    SimpleObject, ID,
};
use chrono::{DateTime, NaiveDate, Utc};
use entity::{activity, inspection, lead, technician, user};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, Iterable, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::auth::{issue_token, verify_password, AuthConfig, CurrentUser, StaffRole};
use crate::lifecycle::{self, Booking, NotificationIntent, TransitionError};
use crate::notify::Dispatcher;

pub struct AppSchema(pub Schema<QueryRoot, MutationRoot, EmptySubscription>);

pub fn build_schema(
    db: Arc<DatabaseConnection>,
    auth: Arc<AuthConfig>,
    dispatcher: Arc<Dispatcher>,
) -> AppSchema {
    let schema = Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(db)
        .data(auth)
        .data(dispatcher)
        .finish();
    AppSchema(schema)
}

pub struct QueryRoot;
pub struct MutationRoot;

const MAX_LEADS_PAGE: i32 = 100;
const MAX_ACTIVITIES_PAGE: i32 = 200;

#[Object]
impl QueryRoot {
    async fn leads(&self) -> LeadsQuery {
        LeadsQuery
    }
}

#[Object]
impl MutationRoot {
    async fn leads(&self) -> LeadsMutation {
        LeadsMutation
    }
}

#[derive(Default)]
pub struct LeadsQuery;

#[derive(Default)]
pub struct LeadsMutation;

#[Object]
impl LeadsQuery {
    async fn me(&self, ctx: &Context<'_>) -> async_graphql::Result<UserNode> {
        let current = current_user(ctx)?;
        let db = database(ctx)?;
        let model = user::Entity::find_by_id(current.user_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| error_with_code("NOT_FOUND", "User not found"))?;
        Ok(UserNode::from(model))
    }

    async fn lead(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<LeadNode> {
        require_role(ctx, StaffRole::Viewer)?;
        let db = database(ctx)?;
        let lead_id = parse_uuid(&id)?;
        let model = lead::Entity::find_by_id(lead_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| error_with_code("NOT_FOUND", "Lead not found"))?;
        Ok(LeadNode::from(model))
    }

    async fn leads(
        &self,
        ctx: &Context<'_>,
        filter: Option<LeadFilter>,
        first: Option<i32>,
        offset: Option<i32>,
    ) -> async_graphql::Result<Vec<LeadNode>> {
        require_role(ctx, StaffRole::Viewer)?;
        let db = database(ctx)?;
        let limit = first.unwrap_or(50).clamp(1, MAX_LEADS_PAGE) as u64;
        let skip = offset.unwrap_or(0).max(0) as u64;
        let mut query = lead::Entity::find();
        if let Some(filter) = filter {
            if let Some(status) = filter.status {
                query = query.filter(lead::Column::Status.eq(lead::Status::from(status)));
            }
            if let Some(service_type) = filter.service_type {
                query = query
                    .filter(lead::Column::ServiceType.eq(lead::ServiceType::from(service_type)));
            }
            if let Some(urgency) = filter.urgency {
                query = query.filter(lead::Column::Urgency.eq(lead::Urgency::from(urgency)));
            }
            if let Some(source) = filter.source {
                query = query.filter(lead::Column::Source.eq(lead::Source::from(source)));
            }
            if let Some(technician_id) = filter.assigned_technician_id {
                query = query
                    .filter(lead::Column::AssignedTechnicianId.eq(parse_uuid(&technician_id)?));
            }
            if let Some(q) = sanitize_optional_filter(filter.q) {
                let pattern = format!("%{}%", q);
                query = query.filter(
                    Condition::any()
                        .add(lead::Column::FirstName.like(pattern.clone()))
                        .add(lead::Column::LastName.like(pattern.clone()))
                        .add(lead::Column::Phone.like(pattern.clone()))
                        .add(lead::Column::Email.like(pattern.clone()))
                        .add(lead::Column::Suburb.like(pattern)),
                );
            }
        }
        let rows = query
            .order_by_desc(lead::Column::UpdatedAt)
            .limit(limit)
            .offset(skip)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(LeadNode::from).collect())
    }

    /// Per-status lead counts for the kanban board.
    #[graphql(name = "pipelineSummary")]
    async fn pipeline_summary(
        &self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Vec<PipelineColumn>> {
        require_role(ctx, StaffRole::Viewer)?;
        let db = database(ctx)?;
        let mut columns = Vec::new();
        for status in lead::Status::iter() {
            let count = lead::Entity::find()
                .filter(lead::Column::Status.eq(status))
                .count(db.as_ref())
                .await
                .map_err(db_error)?;
            columns.push(PipelineColumn {
                status: LeadStatus::from(status),
                count: count as i64,
            });
        }
        Ok(columns)
    }

    #[graphql(name = "leadActivities")]
    async fn lead_activities(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "leadId")] lead_id: ID,
        first: Option<i32>,
        offset: Option<i32>,
    ) -> async_graphql::Result<Vec<ActivityNode>> {
        require_role(ctx, StaffRole::Viewer)?;
        let db = database(ctx)?;
        let lead_uuid = parse_uuid(&lead_id)?;
        let limit = first.unwrap_or(50).clamp(1, MAX_ACTIVITIES_PAGE) as u64;
        let skip = offset.unwrap_or(0).max(0) as u64;
        let rows = activity::Entity::find()
            .filter(activity::Column::LeadId.eq(lead_uuid))
            .order_by_asc(activity::Column::CreatedAt)
            .limit(limit)
            .offset(skip)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(ActivityNode::from).collect())
    }

    async fn inspections(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "leadId")] lead_id: ID,
    ) -> async_graphql::Result<Vec<InspectionNode>> {
        require_role(ctx, StaffRole::Viewer)?;
        let db = database(ctx)?;
        let lead_uuid = parse_uuid(&lead_id)?;
        let rows = inspection::Entity::find()
            .filter(inspection::Column::LeadId.eq(lead_uuid))
            .order_by_asc(inspection::Column::ScheduledAt)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(InspectionNode::from).collect())
    }

    async fn technicians(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<TechnicianNode>> {
        require_role(ctx, StaffRole::Viewer)?;
        let db = database(ctx)?;
        let rows = technician::Entity::find()
            .filter(technician::Column::IsActive.eq(true))
            .order_by_asc(technician::Column::Name)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(rows.into_iter().map(TechnicianNode::from).collect())
    }
}

#[Object]
impl LeadsMutation {
    async fn login(
        &self,
        ctx: &Context<'_>,
        email: String,
        password: String,
    ) -> async_graphql::Result<AuthPayload> {
        let auth = auth_config(ctx)?;
        let db = database(ctx)?;
        let normalized = normalize_email(&email)?;
        let found = user::Entity::find()
            .filter(user::Column::Email.eq(normalized))
            .one(db.as_ref())
            .await
            .map_err(db_error)?;
        let Some(found) = found else {
            return Ok(AuthPayload::failed("Invalid credentials"));
        };
        if !found.is_active {
            return Ok(AuthPayload::failed("Account disabled"));
        }
        if !verify_password(&password, &found.password_hash) {
            return Ok(AuthPayload::failed("Invalid credentials"));
        }
        let role = StaffRole::from(found.role);
        let token = issue_token(found.id, role, &auth)
            .map_err(|_| error_with_code("INTERNAL", "Failed to issue session token"))?;
        Ok(AuthPayload {
            ok: true,
            token: Some(token),
            user: Some(UserNode::from(found)),
            error: None,
        })
    }

    async fn logout(&self) -> async_graphql::Result<bool> {
        // Tokens are stateless; the client discards its copy.
        Ok(true)
    }

    /// Public website intake. Always lands as a NEW lead from WEBSITE.
    #[graphql(name = "submitLead")]
    async fn submit_lead(
        &self,
        ctx: &Context<'_>,
        input: SubmitLeadInput,
    ) -> async_graphql::Result<LeadNode> {
        let db = database(ctx)?;
        let fields = NewLeadFields {
            first_name: validate_required("firstName", &input.first_name)?,
            last_name: validate_required("lastName", &input.last_name)?,
            email: validate_optional_email(input.email)?,
            phone: validate_required("phone", &input.phone)?,
            address: validate_required("address", &input.address)?,
            suburb: validate_required("suburb", &input.suburb)?,
            postcode: validate_required("postcode", &input.postcode)?,
            service_type: input.service_type.into(),
            urgency: input.urgency.into(),
            source: lead::Source::Website,
            notes: validate_optional_notes(input.message)?,
            booking: None,
        };
        let model = create_lead_internal(db.as_ref(), fields)
            .await
            .map_err(lead_change_error)?;
        Ok(LeadNode::from(model))
    }

    /// Staff intake for phone and walk-in enquiries.
    #[graphql(name = "createLead")]
    async fn create_lead(
        &self,
        ctx: &Context<'_>,
        input: NewLeadInput,
    ) -> async_graphql::Result<LeadNode> {
        require_role(ctx, StaffRole::Technician)?;
        let db = database(ctx)?;
        let booking = booking_from_input(input.inspection_date, input.inspection_time.clone())?;
        let fields = NewLeadFields {
            first_name: validate_required("firstName", &input.first_name)?,
            last_name: validate_required("lastName", &input.last_name)?,
            email: validate_optional_email(input.email)?,
            phone: validate_required("phone", &input.phone)?,
            address: validate_required("address", &input.address)?,
            suburb: validate_required("suburb", &input.suburb)?,
            postcode: validate_required("postcode", &input.postcode)?,
            service_type: input.service_type.into(),
            urgency: input.urgency.into(),
            source: input.source.into(),
            notes: validate_optional_notes(input.notes)?,
            booking,
        };
        let model = create_lead_internal(db.as_ref(), fields)
            .await
            .map_err(lead_change_error)?;
        Ok(LeadNode::from(model))
    }

    /// Field edits and re-bookings. A changed booking re-arms the
    /// confirmation email even when the status stays put.
    #[graphql(name = "updateLead")]
    async fn update_lead(
        &self,
        ctx: &Context<'_>,
        input: UpdateLeadInput,
    ) -> async_graphql::Result<LeadChangePayload> {
        let current = require_role(ctx, StaffRole::Technician)?;
        let lead_id = parse_uuid(&input.id)?;
        let mut patch = LeadPatch::default();
        if let Some(value) = &input.first_name {
            patch.first_name = Some(validate_required("firstName", value)?);
        }
        if let Some(value) = &input.last_name {
            patch.last_name = Some(validate_required("lastName", value)?);
        }
        if input.email.is_some() {
            patch.email = validate_optional_email(input.email)?;
        }
        if let Some(value) = &input.phone {
            patch.phone = Some(validate_required("phone", value)?);
        }
        if let Some(value) = &input.address {
            patch.address = Some(validate_required("address", value)?);
        }
        if let Some(value) = &input.suburb {
            patch.suburb = Some(validate_required("suburb", value)?);
        }
        if let Some(value) = &input.postcode {
            patch.postcode = Some(validate_required("postcode", value)?);
        }
        patch.service_type = input.service_type.map(Into::into);
        patch.urgency = input.urgency.map(Into::into);
        if input.notes.is_some() {
            patch.notes = validate_optional_notes(input.notes)?;
        }
        patch.inspection_date = input.inspection_date;
        if let Some(value) = &input.inspection_time {
            patch.inspection_time = Some(validate_time("inspectionTime", value)?);
        }
        finish_lead_change(ctx, lead_id, input.expected_version, patch, Some(current.user_id))
            .await
    }

    /// The kanban drag: validated status transition plus optional booking.
    #[graphql(name = "moveLeadStatus")]
    async fn move_lead_status(
        &self,
        ctx: &Context<'_>,
        input: MoveLeadStatusInput,
    ) -> async_graphql::Result<LeadChangePayload> {
        let current = require_role(ctx, StaffRole::Technician)?;
        let lead_id = parse_uuid(&input.id)?;
        let mut patch = LeadPatch {
            status: Some(input.status.into()),
            ..Default::default()
        };
        patch.inspection_date = input.inspection_date;
        if let Some(value) = &input.inspection_time {
            patch.inspection_time = Some(validate_time("inspectionTime", value)?);
        }
        if input.note.is_some() {
            patch.note = validate_optional_notes(input.note)?;
        }
        finish_lead_change(ctx, lead_id, input.expected_version, patch, Some(current.user_id))
            .await
    }

    #[graphql(name = "assignTechnician")]
    async fn assign_technician(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "leadId")] lead_id: ID,
        #[graphql(name = "expectedVersion")] expected_version: i32,
        #[graphql(name = "technicianId")] technician_id: ID,
    ) -> async_graphql::Result<LeadChangePayload> {
        let current = require_role(ctx, StaffRole::Admin)?;
        let db = database(ctx)?;
        let lead_uuid = parse_uuid(&lead_id)?;
        let technician_uuid = parse_uuid(&technician_id)?;
        let technician = technician::Entity::find_by_id(technician_uuid)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| error_with_code("NOT_FOUND", "Technician not found"))?;
        if !technician.is_active {
            return Err(validation_error("Technician is inactive"));
        }
        let patch = LeadPatch {
            assigned_technician_id: Some(technician_uuid),
            ..Default::default()
        };
        let payload =
            finish_lead_change(ctx, lead_uuid, expected_version, patch, Some(current.user_id))
                .await?;
        append_activity_best_effort(
            db.as_ref(),
            activity_row(
                lead_uuid,
                None,
                activity::Kind::NoteAdded,
                format!("Assigned to {}", technician.name),
                None,
                json!({ "technicianId": technician_uuid }),
                Some(current.user_id),
            ),
        )
        .await;
        Ok(payload)
    }

    #[graphql(name = "addLeadNote")]
    async fn add_lead_note(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "leadId")] lead_id: ID,
        note: String,
    ) -> async_graphql::Result<ActivityNode> {
        let current = require_role(ctx, StaffRole::Technician)?;
        let db = database(ctx)?;
        let lead_uuid = require_lead(db.as_ref(), parse_uuid(&lead_id)?).await?;
        let note = validate_required("note", &note)?;
        let row = activity_row(
            lead_uuid,
            None,
            activity::Kind::NoteAdded,
            "Note added".to_string(),
            Some(note),
            json!({}),
            Some(current.user_id),
        );
        insert_activity(db.as_ref(), row).await
    }

    /// Manual log of a call, SMS or meeting with the customer.
    #[graphql(name = "logCommunication")]
    async fn log_communication(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "leadId")] lead_id: ID,
        kind: CommunicationKind,
        description: String,
        notes: Option<String>,
    ) -> async_graphql::Result<ActivityNode> {
        let current = require_role(ctx, StaffRole::Technician)?;
        let db = database(ctx)?;
        let lead_uuid = require_lead(db.as_ref(), parse_uuid(&lead_id)?).await?;
        let description = validate_required("description", &description)?;
        let row = activity_row(
            lead_uuid,
            None,
            kind.into(),
            description,
            validate_optional_notes(notes)?,
            json!({}),
            Some(current.user_id),
        );
        insert_activity(db.as_ref(), row).await
    }

    #[graphql(name = "logQuoteSent")]
    async fn log_quote_sent(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "leadId")] lead_id: ID,
        note: Option<String>,
    ) -> async_graphql::Result<ActivityNode> {
        let current = require_role(ctx, StaffRole::Technician)?;
        let db = database(ctx)?;
        let lead_uuid = require_lead(db.as_ref(), parse_uuid(&lead_id)?).await?;
        let row = activity_row(
            lead_uuid,
            None,
            activity::Kind::QuoteSent,
            "Quote sent to customer".to_string(),
            validate_optional_notes(note)?,
            json!({}),
            Some(current.user_id),
        );
        insert_activity(db.as_ref(), row).await
    }

    #[graphql(name = "logPayment")]
    async fn log_payment(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "leadId")] lead_id: ID,
        #[graphql(name = "amountCents")] amount_cents: Option<i64>,
        note: Option<String>,
    ) -> async_graphql::Result<ActivityNode> {
        let current = require_role(ctx, StaffRole::Technician)?;
        let db = database(ctx)?;
        let lead_uuid = require_lead(db.as_ref(), parse_uuid(&lead_id)?).await?;
        let row = activity_row(
            lead_uuid,
            None,
            activity::Kind::PaymentReceived,
            "Payment received".to_string(),
            validate_optional_notes(note)?,
            json!({ "amountCents": amount_cents }),
            Some(current.user_id),
        );
        insert_activity(db.as_ref(), row).await
    }

    #[graphql(name = "scheduleInspection")]
    async fn schedule_inspection(
        &self,
        ctx: &Context<'_>,
        input: ScheduleInspectionInput,
    ) -> async_graphql::Result<InspectionNode> {
        require_role(ctx, StaffRole::Technician)?;
        let db = database(ctx)?;
        let lead_uuid = require_lead(db.as_ref(), parse_uuid(&input.lead_id)?).await?;
        let technician_id = match input.technician_id {
            Some(id) => {
                let technician_uuid = parse_uuid(&id)?;
                technician::Entity::find_by_id(technician_uuid)
                    .one(db.as_ref())
                    .await
                    .map_err(db_error)?
                    .ok_or_else(|| error_with_code("NOT_FOUND", "Technician not found"))?;
                Some(technician_uuid)
            }
            None => None,
        };
        let now: DateTimeWithTimeZone = Utc::now().into();
        let inspection_id = Uuid::new_v4();
        let row = inspection::ActiveModel {
            id: Set(inspection_id),
            lead_id: Set(lead_uuid),
            scheduled_at: Set(input.scheduled_at.into()),
            completed_at: Set(None),
            status: Set(inspection::Status::Scheduled),
            findings: Set(None),
            recommendations: Set(None),
            estimated_cost_cents: Set(input.estimated_cost_cents),
            final_cost_cents: Set(None),
            technician_id: Set(technician_id),
            created_at: Set(now),
            updated_at: Set(now),
        };
        inspection::Entity::insert(row)
            .exec_without_returning(db.as_ref())
            .await
            .map_err(db_error)?;
        let model = inspection::Entity::find_by_id(inspection_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| error_with_code("INTERNAL", "Failed to load inserted inspection"))?;
        Ok(InspectionNode::from(model))
    }

    #[graphql(name = "completeInspection")]
    async fn complete_inspection(
        &self,
        ctx: &Context<'_>,
        input: CompleteInspectionInput,
    ) -> async_graphql::Result<InspectionNode> {
        let current = require_role(ctx, StaffRole::Technician)?;
        let db = database(ctx)?;
        let inspection_id = parse_uuid(&input.id)?;
        let model = complete_inspection_internal(db.as_ref(), inspection_id, input, current.user_id)
            .await
            .map_err(lead_change_error)?;
        Ok(InspectionNode::from(model))
    }

    #[graphql(name = "cancelInspection")]
    async fn cancel_inspection(
        &self,
        ctx: &Context<'_>,
        id: ID,
    ) -> async_graphql::Result<InspectionNode> {
        require_role(ctx, StaffRole::Technician)?;
        let db = database(ctx)?;
        let inspection_id = parse_uuid(&id)?;
        let existing = inspection::Entity::find_by_id(inspection_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| error_with_code("NOT_FOUND", "Inspection not found"))?;
        if existing.status != inspection::Status::Scheduled {
            return Err(validation_error("Only scheduled inspections can be cancelled"));
        }
        let mut active: inspection::ActiveModel = existing.into();
        active.status = Set(inspection::Status::Cancelled);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(db.as_ref()).await.map_err(db_error)?;
        Ok(InspectionNode::from(updated))
    }

    /// Admin recovery path for a failed confirmation email.
    #[graphql(name = "resendBookingConfirmation")]
    async fn resend_booking_confirmation(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "leadId")] lead_id: ID,
    ) -> async_graphql::Result<LeadChangePayload> {
        let current = require_role(ctx, StaffRole::Admin)?;
        let db = database(ctx)?;
        let dispatcher = mail_dispatcher(ctx)?;
        let lead_uuid = parse_uuid(&lead_id)?;
        let model = lead::Entity::find_by_id(lead_uuid)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| error_with_code("NOT_FOUND", "Lead not found"))?;
        if model.status != lead::Status::Contacted {
            return Err(validation_error("Lead has no pending booking to confirm"));
        }
        let booking = Booking::from_columns(model.inspection_date, model.inspection_time.clone())
            .map_err(|_| error_with_code("INTERNAL", "Stored booking is incomplete"))?
            .ok_or_else(|| validation_error("Lead has no booking on file"))?;
        let Some(recipient) = model.email.clone() else {
            return Err(validation_error("Lead has no email address"));
        };
        let intent = NotificationIntent {
            lead_id: model.id,
            recipient,
            first_name: model.first_name.clone(),
            booking,
        };
        let model = if model.email_sent {
            model
        } else {
            let mut active: lead::ActiveModel = model.into();
            active.email_sent = Set(true);
            active.updated_at = Set(Utc::now().into());
            active.update(db.as_ref()).await.map_err(db_error)?
        };
        let email_warning =
            dispatch_confirmation(db.as_ref(), dispatcher.as_ref(), &intent, Some(current.user_id))
                .await;
        Ok(LeadChangePayload {
            lead: LeadNode::from(model),
            email_warning,
        })
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Quoted,
    Converted,
    FollowUp,
    ClosedLost,
}

impl LeadStatus {
    fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::Contacted => "CONTACTED",
            LeadStatus::Qualified => "QUALIFIED",
            LeadStatus::Quoted => "QUOTED",
            LeadStatus::Converted => "CONVERTED",
            LeadStatus::FollowUp => "FOLLOW_UP",
            LeadStatus::ClosedLost => "CLOSED_LOST",
        }
    }
}

impl From<lead::Status> for LeadStatus {
    fn from(value: lead::Status) -> Self {
        match value {
            lead::Status::New => LeadStatus::New,
            lead::Status::Contacted => LeadStatus::Contacted,
            lead::Status::Qualified => LeadStatus::Qualified,
            lead::Status::Quoted => LeadStatus::Quoted,
            lead::Status::Converted => LeadStatus::Converted,
            lead::Status::FollowUp => LeadStatus::FollowUp,
            lead::Status::ClosedLost => LeadStatus::ClosedLost,
        }
    }
}

impl From<LeadStatus> for lead::Status {
    fn from(value: LeadStatus) -> Self {
        match value {
            LeadStatus::New => lead::Status::New,
            LeadStatus::Contacted => lead::Status::Contacted,
            LeadStatus::Qualified => lead::Status::Qualified,
            LeadStatus::Quoted => lead::Status::Quoted,
            LeadStatus::Converted => lead::Status::Converted,
            LeadStatus::FollowUp => lead::Status::FollowUp,
            LeadStatus::ClosedLost => lead::Status::ClosedLost,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum ServiceType {
    Inspection,
    Removal,
    Remediation,
    Fogging,
    MaterialRemoval,
    Subfloor,
}

impl From<lead::ServiceType> for ServiceType {
    fn from(value: lead::ServiceType) -> Self {
        match value {
            lead::ServiceType::Inspection => ServiceType::Inspection,
            lead::ServiceType::Removal => ServiceType::Removal,
            lead::ServiceType::Remediation => ServiceType::Remediation,
            lead::ServiceType::Fogging => ServiceType::Fogging,
            lead::ServiceType::MaterialRemoval => ServiceType::MaterialRemoval,
            lead::ServiceType::Subfloor => ServiceType::Subfloor,
        }
    }
}

impl From<ServiceType> for lead::ServiceType {
    fn from(value: ServiceType) -> Self {
        match value {
            ServiceType::Inspection => lead::ServiceType::Inspection,
            ServiceType::Removal => lead::ServiceType::Removal,
            ServiceType::Remediation => lead::ServiceType::Remediation,
            ServiceType::Fogging => lead::ServiceType::Fogging,
            ServiceType::MaterialRemoval => lead::ServiceType::MaterialRemoval,
            ServiceType::Subfloor => lead::ServiceType::Subfloor,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum Urgency {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for Urgency {
    fn default() -> Self {
        Urgency::Medium
    }
}

impl From<lead::Urgency> for Urgency {
    fn from(value: lead::Urgency) -> Self {
        match value {
            lead::Urgency::Low => Urgency::Low,
            lead::Urgency::Medium => Urgency::Medium,
            lead::Urgency::High => Urgency::High,
            lead::Urgency::Urgent => Urgency::Urgent,
        }
    }
}

impl From<Urgency> for lead::Urgency {
    fn from(value: Urgency) -> Self {
        match value {
            Urgency::Low => lead::Urgency::Low,
            Urgency::Medium => lead::Urgency::Medium,
            Urgency::High => lead::Urgency::High,
            Urgency::Urgent => lead::Urgency::Urgent,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum LeadSource {
    Website,
    Phone,
    Referral,
    Ads,
    Social,
}

impl From<lead::Source> for LeadSource {
    fn from(value: lead::Source) -> Self {
        match value {
            lead::Source::Website => LeadSource::Website,
            lead::Source::Phone => LeadSource::Phone,
            lead::Source::Referral => LeadSource::Referral,
            lead::Source::Ads => LeadSource::Ads,
            lead::Source::Social => LeadSource::Social,
        }
    }
}

impl From<LeadSource> for lead::Source {
    fn from(value: LeadSource) -> Self {
        match value {
            LeadSource::Website => lead::Source::Website,
            LeadSource::Phone => lead::Source::Phone,
            LeadSource::Referral => lead::Source::Referral,
            LeadSource::Ads => lead::Source::Ads,
            LeadSource::Social => lead::Source::Social,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum ActivityKind {
    Call,
    Email,
    Sms,
    Meeting,
    NoteAdded,
    StatusChange,
    InspectionCompleted,
    QuoteSent,
    PaymentReceived,
}

impl From<activity::Kind> for ActivityKind {
    fn from(value: activity::Kind) -> Self {
        match value {
            activity::Kind::Call => ActivityKind::Call,
            activity::Kind::Email => ActivityKind::Email,
            activity::Kind::Sms => ActivityKind::Sms,
            activity::Kind::Meeting => ActivityKind::Meeting,
            activity::Kind::NoteAdded => ActivityKind::NoteAdded,
            activity::Kind::StatusChange => ActivityKind::StatusChange,
            activity::Kind::InspectionCompleted => ActivityKind::InspectionCompleted,
            activity::Kind::QuoteSent => ActivityKind::QuoteSent,
            activity::Kind::PaymentReceived => ActivityKind::PaymentReceived,
        }
    }
}

/// Kinds a human can log by hand; system kinds stay system-written.
#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum CommunicationKind {
    Call,
    Sms,
    Meeting,
}

impl From<CommunicationKind> for activity::Kind {
    fn from(value: CommunicationKind) -> Self {
        match value {
            CommunicationKind::Call => activity::Kind::Call,
            CommunicationKind::Sms => activity::Kind::Sms,
            CommunicationKind::Meeting => activity::Kind::Meeting,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum InspectionStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl From<inspection::Status> for InspectionStatus {
    fn from(value: inspection::Status) -> Self {
        match value {
            inspection::Status::Scheduled => InspectionStatus::Scheduled,
            inspection::Status::Completed => InspectionStatus::Completed,
            inspection::Status::Cancelled => InspectionStatus::Cancelled,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Lead")]
pub struct LeadNode {
    pub id: ID,
    #[graphql(name = "firstName")]
    pub first_name: String,
    #[graphql(name = "lastName")]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub address: String,
    pub suburb: String,
    pub postcode: String,
    #[graphql(name = "serviceType")]
    pub service_type: ServiceType,
    pub urgency: Urgency,
    pub source: LeadSource,
    pub status: LeadStatus,
    #[graphql(name = "inspectionDate")]
    pub inspection_date: Option<NaiveDate>,
    #[graphql(name = "inspectionTime")]
    pub inspection_time: Option<String>,
    #[graphql(name = "emailSent")]
    pub email_sent: bool,
    pub notes: Option<String>,
    #[graphql(name = "assignedTechnicianId")]
    pub assigned_technician_id: Option<ID>,
    pub version: i32,
    #[graphql(name = "contactedAt")]
    pub contacted_at: Option<DateTime<Utc>>,
    #[graphql(name = "qualifiedAt")]
    pub qualified_at: Option<DateTime<Utc>>,
    #[graphql(name = "convertedAt")]
    pub converted_at: Option<DateTime<Utc>>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<lead::Model> for LeadNode {
    fn from(model: lead::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            first_name: model.first_name,
            last_name: model.last_name,
            email: model.email,
            phone: model.phone,
            address: model.address,
            suburb: model.suburb,
            postcode: model.postcode,
            service_type: model.service_type.into(),
            urgency: model.urgency.into(),
            source: model.source.into(),
            status: model.status.into(),
            inspection_date: model.inspection_date,
            inspection_time: model.inspection_time,
            email_sent: model.email_sent,
            notes: model.notes,
            assigned_technician_id: model
                .assigned_technician_id
                .map(|id| ID::from(id.to_string())),
            version: model.version,
            contacted_at: model.contacted_at.map(|d| d.into()),
            qualified_at: model.qualified_at.map(|d| d.into()),
            converted_at: model.converted_at.map(|d| d.into()),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Activity")]
pub struct ActivityNode {
    pub id: ID,
    #[graphql(name = "leadId")]
    pub lead_id: ID,
    #[graphql(name = "inspectionId")]
    pub inspection_id: Option<ID>,
    pub kind: ActivityKind,
    pub description: String,
    pub notes: Option<String>,
    pub meta: async_graphql::Json<serde_json::Value>,
    #[graphql(name = "createdBy")]
    pub created_by: Option<ID>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<activity::Model> for ActivityNode {
    fn from(model: activity::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            lead_id: ID::from(model.lead_id.to_string()),
            inspection_id: model.inspection_id.map(|id| ID::from(id.to_string())),
            kind: model.kind.into(),
            description: model.description,
            notes: model.notes,
            meta: async_graphql::Json(model.meta_json),
            created_by: model.created_by.map(|id| ID::from(id.to_string())),
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Inspection")]
pub struct InspectionNode {
    pub id: ID,
    #[graphql(name = "leadId")]
    pub lead_id: ID,
    #[graphql(name = "scheduledAt")]
    pub scheduled_at: DateTime<Utc>,
    #[graphql(name = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: InspectionStatus,
    pub findings: Option<String>,
    pub recommendations: Option<String>,
    #[graphql(name = "estimatedCostCents")]
    pub estimated_cost_cents: Option<i64>,
    #[graphql(name = "finalCostCents")]
    pub final_cost_cents: Option<i64>,
    #[graphql(name = "technicianId")]
    pub technician_id: Option<ID>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<inspection::Model> for InspectionNode {
    fn from(model: inspection::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            lead_id: ID::from(model.lead_id.to_string()),
            scheduled_at: model.scheduled_at.into(),
            completed_at: model.completed_at.map(|d| d.into()),
            status: model.status.into(),
            findings: model.findings,
            recommendations: model.recommendations,
            estimated_cost_cents: model.estimated_cost_cents,
            final_cost_cents: model.final_cost_cents,
            technician_id: model.technician_id.map(|id| ID::from(id.to_string())),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Technician")]
pub struct TechnicianNode {
    pub id: ID,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    #[graphql(name = "isActive")]
    pub is_active: bool,
}

impl From<technician::Model> for TechnicianNode {
    fn from(model: technician::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            name: model.name,
            email: model.email,
            phone: model.phone,
            is_active: model.is_active,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "User")]
pub struct UserNode {
    pub id: ID,
    pub email: String,
    #[graphql(name = "displayName")]
    pub display_name: String,
    pub role: String,
    #[graphql(name = "isActive")]
    pub is_active: bool,
}

impl From<user::Model> for UserNode {
    fn from(model: user::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            email: model.email,
            display_name: model.display_name,
            role: StaffRole::from(model.role).as_str().to_string(),
            is_active: model.is_active,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct PipelineColumn {
    pub status: LeadStatus,
    pub count: i64,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct AuthPayload {
    pub ok: bool,
    pub token: Option<String>,
    pub user: Option<UserNode>,
    pub error: Option<String>,
}

impl AuthPayload {
    fn failed(message: &str) -> Self {
        Self {
            ok: false,
            token: None,
            user: None,
            error: Some(message.to_string()),
        }
    }
}

/// Mutation result for lead writes. `emailWarning` is set when the lead
/// saved but its confirmation email did not go out.
#[derive(Clone, Debug, SimpleObject)]
pub struct LeadChangePayload {
    pub lead: LeadNode,
    #[graphql(name = "emailWarning")]
    pub email_warning: Option<String>,
}

#[derive(InputObject, Clone)]
pub struct SubmitLeadInput {
    #[graphql(name = "firstName")]
    pub first_name: String,
    #[graphql(name = "lastName")]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub address: String,
    pub suburb: String,
    pub postcode: String,
    #[graphql(name = "serviceType")]
    pub service_type: ServiceType,
    #[graphql(default)]
    pub urgency: Urgency,
    pub message: Option<String>,
}

#[derive(InputObject, Clone)]
pub struct NewLeadInput {
    #[graphql(name = "firstName")]
    pub first_name: String,
    #[graphql(name = "lastName")]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub address: String,
    pub suburb: String,
    pub postcode: String,
    #[graphql(name = "serviceType")]
    pub service_type: ServiceType,
    #[graphql(default)]
    pub urgency: Urgency,
    pub source: LeadSource,
    pub notes: Option<String>,
    #[graphql(name = "inspectionDate")]
    pub inspection_date: Option<NaiveDate>,
    #[graphql(name = "inspectionTime")]
    pub inspection_time: Option<String>,
}

#[derive(InputObject, Clone)]
pub struct UpdateLeadInput {
    pub id: ID,
    #[graphql(name = "expectedVersion")]
    pub expected_version: i32,
    #[graphql(name = "firstName")]
    pub first_name: Option<String>,
    #[graphql(name = "lastName")]
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub postcode: Option<String>,
    #[graphql(name = "serviceType")]
    pub service_type: Option<ServiceType>,
    pub urgency: Option<Urgency>,
    pub notes: Option<String>,
    #[graphql(name = "inspectionDate")]
    pub inspection_date: Option<NaiveDate>,
    #[graphql(name = "inspectionTime")]
    pub inspection_time: Option<String>,
}

#[derive(InputObject, Clone)]
pub struct MoveLeadStatusInput {
    pub id: ID,
    #[graphql(name = "expectedVersion")]
    pub expected_version: i32,
    pub status: LeadStatus,
    #[graphql(name = "inspectionDate")]
    pub inspection_date: Option<NaiveDate>,
    #[graphql(name = "inspectionTime")]
    pub inspection_time: Option<String>,
    pub note: Option<String>,
}

#[derive(InputObject, Clone)]
pub struct ScheduleInspectionInput {
    #[graphql(name = "leadId")]
    pub lead_id: ID,
    #[graphql(name = "scheduledAt")]
    pub scheduled_at: DateTime<Utc>,
    #[graphql(name = "technicianId")]
    pub technician_id: Option<ID>,
    #[graphql(name = "estimatedCostCents")]
    pub estimated_cost_cents: Option<i64>,
}

#[derive(InputObject, Clone)]
pub struct CompleteInspectionInput {
    pub id: ID,
    pub findings: Option<String>,
    pub recommendations: Option<String>,
    #[graphql(name = "finalCostCents")]
    pub final_cost_cents: Option<i64>,
}

#[derive(InputObject, Default, Clone)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    #[graphql(name = "serviceType")]
    pub service_type: Option<ServiceType>,
    pub urgency: Option<Urgency>,
    pub source: Option<LeadSource>,
    #[graphql(name = "assignedTechnicianId")]
    pub assigned_technician_id: Option<ID>,
    pub q: Option<String>,
}

#[derive(Debug)]
pub enum LeadChangeError {
    NotFound,
    Conflict,
    Transition(TransitionError),
    IncompleteBooking,
    Validation(String),
    Db(DbErr),
}

impl From<DbErr> for LeadChangeError {
    fn from(value: DbErr) -> Self {
        LeadChangeError::Db(value)
    }
}

impl From<TransitionError> for LeadChangeError {
    fn from(value: TransitionError) -> Self {
        LeadChangeError::Transition(value)
    }
}

fn lead_change_error(err: LeadChangeError) -> Error {
    match err {
        LeadChangeError::NotFound => error_with_code("NOT_FOUND", "Lead not found"),
        LeadChangeError::Conflict => error_with_code(
            "CONFLICT",
            "Lead was modified by someone else; refresh and retry",
        ),
        LeadChangeError::Transition(TransitionError::Illegal { from, to }) => error_with_code(
            "ILLEGAL_TRANSITION",
            format!(
                "Cannot move lead from {} to {}",
                LeadStatus::from(from).as_str(),
                LeadStatus::from(to).as_str()
            ),
        ),
        LeadChangeError::Transition(TransitionError::MissingBooking) => error_with_code(
            "MISSING_BOOKING",
            "An inspection date and time are required before a lead can be marked contacted",
        ),
        LeadChangeError::IncompleteBooking => error_with_code(
            "MISSING_BOOKING",
            "Inspection date and time must be provided together",
        ),
        LeadChangeError::Validation(message) => validation_error(message),
        LeadChangeError::Db(e) => db_error(e),
    }
}

/// Field patch applied to a lead. `None` leaves the stored value alone;
/// booking fields merge over the stored pair before validation.
#[derive(Default, Clone)]
pub struct LeadPatch {
    pub status: Option<lead::Status>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub postcode: Option<String>,
    pub service_type: Option<lead::ServiceType>,
    pub urgency: Option<lead::Urgency>,
    pub notes: Option<String>,
    pub assigned_technician_id: Option<Uuid>,
    pub inspection_date: Option<NaiveDate>,
    pub inspection_time: Option<String>,
    pub note: Option<String>,
}

pub struct LeadChangeOutcome {
    pub lead: lead::Model,
    pub intent: Option<NotificationIntent>,
}

pub struct NewLeadFields {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub address: String,
    pub suburb: String,
    pub postcode: String,
    pub service_type: lead::ServiceType,
    pub urgency: lead::Urgency,
    pub source: lead::Source,
    pub notes: Option<String>,
    pub booking: Option<Booking>,
}

pub async fn create_lead_internal(
    db: &DatabaseConnection,
    fields: NewLeadFields,
) -> Result<lead::Model, LeadChangeError> {
    let lead_id = Uuid::new_v4();
    let now: DateTimeWithTimeZone = Utc::now().into();
    let (inspection_date, inspection_time) = match fields.booking {
        Some(booking) => (Some(booking.date), Some(booking.time)),
        None => (None, None),
    };
    let row = lead::ActiveModel {
        id: Set(lead_id),
        first_name: Set(fields.first_name),
        last_name: Set(fields.last_name),
        email: Set(fields.email),
        phone: Set(fields.phone),
        address: Set(fields.address),
        suburb: Set(fields.suburb),
        postcode: Set(fields.postcode),
        service_type: Set(fields.service_type),
        urgency: Set(fields.urgency),
        source: Set(fields.source),
        status: Set(lead::Status::New),
        inspection_date: Set(inspection_date),
        inspection_time: Set(inspection_time),
        email_sent: Set(false),
        notes: Set(fields.notes),
        assigned_technician_id: Set(None),
        version: Set(1),
        contacted_at: Set(None),
        qualified_at: Set(None),
        converted_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    lead::Entity::insert(row).exec_without_returning(db).await?;
    lead::Entity::find_by_id(lead_id)
        .one(db)
        .await?
        .ok_or(LeadChangeError::NotFound)
}

/// The transactional heart of the pipeline: validates the proposed change
/// against the stored lead, persists it under an optimistic version check,
/// appends the status-change audit row and arms the confirmation guard,
/// all in one transaction. The returned intent, if any, still needs
/// dispatching (the caller does that after commit).
pub async fn apply_lead_change_internal(
    db: &DatabaseConnection,
    lead_id: Uuid,
    expected_version: i32,
    patch: LeadPatch,
    actor: Option<Uuid>,
) -> Result<LeadChangeOutcome, LeadChangeError> {
    let txn = db.begin().await?;
    let existing = lead::Entity::find_by_id(lead_id)
        .one(&txn)
        .await?
        .ok_or(LeadChangeError::NotFound)?;
    if existing.version != expected_version {
        return Err(LeadChangeError::Conflict);
    }

    let from = existing.status;
    let to = patch.status.unwrap_or(from);

    let merged_date = patch.inspection_date.or(existing.inspection_date);
    let merged_time = patch
        .inspection_time
        .clone()
        .or_else(|| existing.inspection_time.clone());
    let booking = Booking::from_columns(merged_date, merged_time.clone())
        .map_err(|_| LeadChangeError::IncompleteBooking)?;
    lifecycle::validate_transition(from, to, booking.as_ref())?;

    let booking_changed = merged_date != existing.inspection_date
        || merged_time != existing.inspection_time;

    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut active: lead::ActiveModel = existing.clone().into();
    if let Some(value) = patch.first_name {
        active.first_name = Set(value);
    }
    if let Some(value) = patch.last_name {
        active.last_name = Set(value);
    }
    if let Some(value) = patch.email {
        active.email = Set(Some(value));
    }
    if let Some(value) = patch.phone {
        active.phone = Set(value);
    }
    if let Some(value) = patch.address {
        active.address = Set(value);
    }
    if let Some(value) = patch.suburb {
        active.suburb = Set(value);
    }
    if let Some(value) = patch.postcode {
        active.postcode = Set(value);
    }
    if let Some(value) = patch.service_type {
        active.service_type = Set(value);
    }
    if let Some(value) = patch.urgency {
        active.urgency = Set(value);
    }
    if let Some(value) = patch.notes {
        active.notes = Set(Some(value));
    }
    if let Some(value) = patch.assigned_technician_id {
        active.assigned_technician_id = Set(Some(value));
    }
    active.status = Set(to);
    active.inspection_date = Set(merged_date);
    active.inspection_time = Set(merged_time);
    if booking_changed && existing.email_sent {
        // A re-book re-arms the confirmation; nothing else ever resets it.
        active.email_sent = Set(false);
    }
    if to != from {
        match to {
            lead::Status::Contacted if existing.contacted_at.is_none() => {
                active.contacted_at = Set(Some(now));
            }
            lead::Status::Qualified if existing.qualified_at.is_none() => {
                active.qualified_at = Set(Some(now));
            }
            lead::Status::Converted if existing.converted_at.is_none() => {
                active.converted_at = Set(Some(now));
            }
            _ => {}
        }
    }
    active.version = Set(existing.version + 1);
    active.updated_at = Set(now);

    let result = lead::Entity::update_many()
        .set(active)
        .filter(lead::Column::Id.eq(lead_id))
        .filter(lead::Column::Version.eq(expected_version))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(LeadChangeError::Conflict);
    }

    let updated = lead::Entity::find_by_id(lead_id)
        .one(&txn)
        .await?
        .ok_or(LeadChangeError::NotFound)?;

    if to != from {
        let row = activity_row(
            lead_id,
            None,
            activity::Kind::StatusChange,
            format!(
                "Status: {} -> {}",
                LeadStatus::from(from).as_str(),
                LeadStatus::from(to).as_str()
            ),
            patch.note.clone(),
            json!({
                "from": LeadStatus::from(from).as_str(),
                "to": LeadStatus::from(to).as_str(),
            }),
            actor,
        );
        activity::Entity::insert(row)
            .exec_without_returning(&txn)
            .await?;
    }

    let intent = lifecycle::confirmation_due(&updated);
    let updated = if intent.is_some() {
        // Marked sent before the send is attempted: a crash here costs at
        // most one email, never a duplicate.
        let mut arm: lead::ActiveModel = updated.into();
        arm.email_sent = Set(true);
        arm.update(&txn).await?
    } else {
        updated
    };

    txn.commit().await?;
    Ok(LeadChangeOutcome {
        lead: updated,
        intent,
    })
}

async fn finish_lead_change(
    ctx: &Context<'_>,
    lead_id: Uuid,
    expected_version: i32,
    patch: LeadPatch,
    actor: Option<Uuid>,
) -> async_graphql::Result<LeadChangePayload> {
    let db = database(ctx)?;
    let dispatcher = mail_dispatcher(ctx)?;
    let outcome = apply_lead_change_internal(db.as_ref(), lead_id, expected_version, patch, actor)
        .await
        .map_err(lead_change_error)?;
    let email_warning = match &outcome.intent {
        Some(intent) => dispatch_confirmation(db.as_ref(), dispatcher.as_ref(), intent, actor).await,
        None => None,
    };
    Ok(LeadChangePayload {
        lead: LeadNode::from(outcome.lead),
        email_warning,
    })
}

/// Send one armed confirmation and record the outcome on the timeline.
/// Returns a warning string when the send did not go out; the lead change
/// itself is already committed and is never rolled back here.
pub async fn dispatch_confirmation(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
    intent: &NotificationIntent,
    actor: Option<Uuid>,
) -> Option<String> {
    match dispatcher.dispatch(intent).await {
        Ok(()) => {
            append_activity_best_effort(
                db,
                activity_row(
                    intent.lead_id,
                    None,
                    activity::Kind::Email,
                    "Booking confirmation sent".to_string(),
                    None,
                    json!({
                        "template": lifecycle::CONFIRMATION_TEMPLATE,
                        "inspectionDate": intent.booking.date.to_string(),
                        "inspectionTime": intent.booking.time,
                    }),
                    actor,
                ),
            )
            .await;
            None
        }
        Err(err) => {
            append_activity_best_effort(
                db,
                activity_row(
                    intent.lead_id,
                    None,
                    activity::Kind::Email,
                    "Booking confirmation failed".to_string(),
                    None,
                    json!({
                        "template": lifecycle::CONFIRMATION_TEMPLATE,
                        "failed": true,
                        "error": err.to_string(),
                    }),
                    actor,
                ),
            )
            .await;
            Some(format!(
                "Booking saved, but the confirmation email failed: {}",
                err
            ))
        }
    }
}

async fn complete_inspection_internal(
    db: &DatabaseConnection,
    inspection_id: Uuid,
    input: CompleteInspectionInput,
    actor: Uuid,
) -> Result<inspection::Model, LeadChangeError> {
    let txn = db.begin().await?;
    let existing = inspection::Entity::find_by_id(inspection_id)
        .one(&txn)
        .await?
        .ok_or(LeadChangeError::NotFound)?;
    if existing.status != inspection::Status::Scheduled {
        return Err(LeadChangeError::Validation(
            "Only scheduled inspections can be completed".to_string(),
        ));
    }
    let lead_id = existing.lead_id;
    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut active: inspection::ActiveModel = existing.into();
    active.status = Set(inspection::Status::Completed);
    active.completed_at = Set(Some(now));
    active.findings = Set(input.findings.clone());
    active.recommendations = Set(input.recommendations.clone());
    active.final_cost_cents = Set(input.final_cost_cents);
    active.updated_at = Set(now);
    let updated = active.update(&txn).await?;

    let row = activity_row(
        lead_id,
        Some(inspection_id),
        activity::Kind::InspectionCompleted,
        "Inspection completed".to_string(),
        input.findings,
        json!({ "finalCostCents": input.final_cost_cents }),
        Some(actor),
    );
    activity::Entity::insert(row)
        .exec_without_returning(&txn)
        .await?;

    txn.commit().await?;
    Ok(updated)
}

fn activity_row(
    lead_id: Uuid,
    inspection_id: Option<Uuid>,
    kind: activity::Kind,
    description: String,
    notes: Option<String>,
    meta: serde_json::Value,
    created_by: Option<Uuid>,
) -> activity::ActiveModel {
    activity::ActiveModel {
        id: Set(Uuid::new_v4()),
        lead_id: Set(lead_id),
        inspection_id: Set(inspection_id),
        kind: Set(kind),
        description: Set(description),
        notes: Set(notes),
        meta_json: Set(meta),
        created_by: Set(created_by),
        created_at: Set(Utc::now().into()),
    }
}

async fn insert_activity(
    db: &DatabaseConnection,
    row: activity::ActiveModel,
) -> async_graphql::Result<ActivityNode> {
    let id = match &row.id {
        Set(id) => *id,
        _ => return Err(error_with_code("INTERNAL", "Activity row missing id")),
    };
    activity::Entity::insert(row)
        .exec_without_returning(db)
        .await
        .map_err(db_error)?;
    let model = activity::Entity::find_by_id(id)
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| error_with_code("INTERNAL", "Failed to load inserted activity"))?;
    Ok(ActivityNode::from(model))
}

async fn append_activity_best_effort(db: &DatabaseConnection, row: activity::ActiveModel) {
    if let Err(err) = activity::Entity::insert(row).exec_without_returning(db).await {
        warn!(error = %err, "failed to append activity");
    }
}

async fn require_lead(db: &DatabaseConnection, lead_id: Uuid) -> async_graphql::Result<Uuid> {
    lead::Entity::find_by_id(lead_id)
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| error_with_code("NOT_FOUND", "Lead not found"))?;
    Ok(lead_id)
}

fn booking_from_input(
    date: Option<NaiveDate>,
    time: Option<String>,
) -> async_graphql::Result<Option<Booking>> {
    let time = match time {
        Some(value) => Some(validate_time("inspectionTime", &value)?),
        None => None,
    };
    Booking::from_columns(date, time).map_err(|_| {
        error_with_code(
            "MISSING_BOOKING",
            "Inspection date and time must be provided together",
        )
    })
}

fn database(ctx: &Context<'_>) -> async_graphql::Result<Arc<DatabaseConnection>> {
    ctx.data::<Arc<DatabaseConnection>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing database connection"))
}

fn auth_config(ctx: &Context<'_>) -> async_graphql::Result<Arc<AuthConfig>> {
    ctx.data::<Arc<AuthConfig>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing auth configuration"))
}

fn mail_dispatcher(ctx: &Context<'_>) -> async_graphql::Result<Arc<Dispatcher>> {
    ctx.data::<Arc<Dispatcher>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing mail dispatcher"))
}

fn current_user(ctx: &Context<'_>) -> async_graphql::Result<CurrentUser> {
    ctx.data::<CurrentUser>()
        .cloned()
        .map_err(|_| error_with_code("UNAUTHENTICATED", "Login required"))
}

fn require_role(ctx: &Context<'_>, role: StaffRole) -> async_graphql::Result<CurrentUser> {
    let user = current_user(ctx)?;
    if user.has_role(role) {
        Ok(user)
    } else {
        Err(error_with_code("FORBIDDEN", "Insufficient permissions"))
    }
}

fn parse_uuid(id: &ID) -> async_graphql::Result<Uuid> {
    Uuid::parse_str(id.as_str()).map_err(|_| error_with_code("BAD_REQUEST", "Invalid ID"))
}

fn db_error(err: DbErr) -> Error {
    error_with_code("INTERNAL", format!("Database error: {}", err))
}

fn error_with_code(code: &'static str, message: impl Into<String>) -> Error {
    Error::new(message).extend_with(|_, e| e.set("code", code))
}

fn validation_error(message: impl Into<String>) -> Error {
    error_with_code("VALIDATION", message)
}

fn validate_required(field: &str, value: &str) -> async_graphql::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(validation_error(format!("{} is required", field)));
    }
    validate_length(field, trimmed, 512)?;
    Ok(trimmed.to_string())
}

fn validate_optional_notes(value: Option<String>) -> async_graphql::Result<Option<String>> {
    match value {
        Some(notes) => {
            validate_length("notes", &notes, 65_535)?;
            let trimmed = notes.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        None => Ok(None),
    }
}

fn validate_optional_email(value: Option<String>) -> async_graphql::Result<Option<String>> {
    match value {
        Some(email) => Ok(Some(normalize_email(&email)?)),
        None => Ok(None),
    }
}

fn normalize_email(value: &str) -> async_graphql::Result<String> {
    let trimmed = value.trim().to_lowercase();
    if trimmed.is_empty() || !trimmed.contains('@') {
        return Err(validation_error("A valid email address is required"));
    }
    validate_length("email", &trimmed, 320)?;
    Ok(trimmed)
}

/// Booking times are stored as "HH:MM" strings the way the intake forms
/// submit them.
fn validate_time(field: &str, value: &str) -> async_graphql::Result<String> {
    let trimmed = value.trim();
    let parts: Vec<&str> = trimmed.split(':').collect();
    let valid = parts.len() == 2
        && parts[0].len() == 2
        && parts[1].len() == 2
        && matches!(parts[0].parse::<u8>(), Ok(h) if h < 24)
        && matches!(parts[1].parse::<u8>(), Ok(m) if m < 60);
    if !valid {
        return Err(validation_error(format!("{} must be HH:MM", field)));
    }
    Ok(trimmed.to_string())
}

fn validate_length(field: &str, value: &str, max: usize) -> async_graphql::Result<()> {
    if value.chars().count() > max {
        return Err(validation_error(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

fn sanitize_optional_filter(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[derive(Debug, Clone)]
pub struct SeededRecords {
    pub users: Vec<user::Model>,
    pub technicians: Vec<technician::Model>,
    pub leads: Vec<lead::Model>,
}

impl SeededRecords {
    pub fn user_email(&self, email: &str) -> Option<&user::Model> {
        self.users.iter().find(|u| u.email == email)
    }

    pub fn lead_phone(&self, phone: &str) -> Option<&lead::Model> {
        self.leads.iter().find(|l| l.phone == phone)
    }
}

/// Demo data driven through the same service functions the API uses, so
/// seeded leads obey the lifecycle invariants.
pub async fn seed_demo(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
) -> Result<SeededRecords, DbErr> {
    let now: DateTimeWithTimeZone = Utc::now().into();

    let mut users = Vec::new();
    for (email, name, role, password) in [
        ("admin@mouldcare.test", "Admin", user::Role::Admin, "admin-dev-password"),
        ("tech@mouldcare.test", "Sam Taylor", user::Role::Technician, "tech-dev-password"),
    ] {
        let hash = crate::auth::hash_password(password)
            .map_err(|err| DbErr::Custom(format!("password hash failed: {}", err)))?;
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            display_name: Set(name.to_string()),
            password_hash: Set(hash),
            role: Set(role),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;
        users.push(model);
    }

    let mut technicians = Vec::new();
    for (name, email, phone) in [
        ("Jordan Lee", "jordan@mouldcare.test", Some("0400 111 222")),
        ("Priya Nair", "priya@mouldcare.test", None),
    ] {
        let model = technician::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            phone: Set(phone.map(|p| p.to_string())),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;
        technicians.push(model);
    }

    let admin_id = users.first().map(|u| u.id);

    let fresh = create_lead_internal(
        db,
        NewLeadFields {
            first_name: "Casey".to_string(),
            last_name: "Nguyen".to_string(),
            email: Some("casey@example.com".to_string()),
            phone: "0400 333 444".to_string(),
            address: "12 Fern St".to_string(),
            suburb: "Thornbury".to_string(),
            postcode: "3071".to_string(),
            service_type: lead::ServiceType::Inspection,
            urgency: lead::Urgency::High,
            source: lead::Source::Website,
            notes: Some("Visible mould in bathroom ceiling".to_string()),
            booking: None,
        },
    )
    .await
    .map_err(seed_error)?;

    let booked = create_lead_internal(
        db,
        NewLeadFields {
            first_name: "Morgan".to_string(),
            last_name: "Hill".to_string(),
            email: Some("morgan@example.com".to_string()),
            phone: "0400 555 666".to_string(),
            address: "3 Creek Rd".to_string(),
            suburb: "Preston".to_string(),
            postcode: "3072".to_string(),
            service_type: lead::ServiceType::Remediation,
            urgency: lead::Urgency::Urgent,
            source: lead::Source::Phone,
            notes: None,
            booking: None,
        },
    )
    .await
    .map_err(seed_error)?;

    let booking_date = Utc::now().date_naive() + chrono::Duration::days(3);
    let outcome = apply_lead_change_internal(
        db,
        booked.id,
        booked.version,
        LeadPatch {
            status: Some(lead::Status::Contacted),
            inspection_date: Some(booking_date),
            inspection_time: Some("09:00".to_string()),
            note: Some("Booked over the phone".to_string()),
            ..Default::default()
        },
        admin_id,
    )
    .await
    .map_err(seed_error)?;
    if let Some(intent) = &outcome.intent {
        dispatch_confirmation(db, dispatcher, intent, admin_id).await;
    }

    let mut leads = vec![fresh];
    if let Some(model) = lead::Entity::find_by_id(booked.id).one(db).await? {
        leads.push(model);
    }

    Ok(SeededRecords {
        users,
        technicians,
        leads,
    })
}

fn seed_error(err: LeadChangeError) -> DbErr {
    match err {
        LeadChangeError::Db(db) => db,
        other => DbErr::Custom(format!("seed data failed: {:?}", other)),
    }
}
