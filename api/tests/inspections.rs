mod common;

use common::{admin, assert_error_code, create_lead, exec_as, setup};
use entity::{activity, inspection};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

const SCHEDULE_MUTATION: &str = r#"
    mutation Schedule($input: ScheduleInspectionInput!) {
        leads {
            scheduleInspection(input: $input) {
                id
                status
                scheduledAt
                estimatedCostCents
            }
        }
    }
"#;

const COMPLETE_MUTATION: &str = r#"
    mutation Complete($input: CompleteInspectionInput!) {
        leads {
            completeInspection(input: $input) {
                id
                status
                completedAt
                findings
                finalCostCents
            }
        }
    }
"#;

async fn schedule(ctx: &common::TestContext, user: &api::auth::CurrentUser, lead_id: Uuid) -> Uuid {
    let resp = exec_as(
        ctx,
        user,
        SCHEDULE_MUTATION,
        json!({ "input": {
            "leadId": lead_id,
            "scheduledAt": "2025-01-22T09:00:00Z",
            "estimatedCostCents": 35000
        }}),
    )
    .await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    let node = &data["leads"]["scheduleInspection"];
    assert_eq!(node["status"], "SCHEDULED");
    node["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn completion_records_findings_and_activity() {
    let ctx = setup().await;
    let user = admin();
    let (lead_id, _) = create_lead(&ctx, &user, Some("dana@example.com")).await;
    let inspection_id = schedule(&ctx, &user, lead_id).await;

    let resp = exec_as(
        &ctx,
        &user,
        COMPLETE_MUTATION,
        json!({ "input": {
            "id": inspection_id,
            "findings": "Elevated spore count in subfloor",
            "recommendations": "Full subfloor treatment",
            "finalCostCents": 42000
        }}),
    )
    .await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    let node = &data["leads"]["completeInspection"];
    assert_eq!(node["status"], "COMPLETED");
    assert!(node["completedAt"].as_str().is_some());
    assert_eq!(node["finalCostCents"], 42000);

    let saved = inspection::Entity::find_by_id(inspection_id)
        .one(ctx.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.status, inspection::Status::Completed);
    assert_eq!(saved.findings.as_deref(), Some("Elevated spore count in subfloor"));

    let rows = activity::Entity::find()
        .filter(activity::Column::LeadId.eq(lead_id))
        .filter(activity::Column::Kind.eq(activity::Kind::InspectionCompleted))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].inspection_id, Some(inspection_id));
    assert_eq!(rows[0].meta_json["finalCostCents"], json!(42000));
}

#[tokio::test]
async fn completion_is_one_shot() {
    let ctx = setup().await;
    let user = admin();
    let (lead_id, _) = create_lead(&ctx, &user, Some("dana@example.com")).await;
    let inspection_id = schedule(&ctx, &user, lead_id).await;

    let input = json!({ "input": { "id": inspection_id, "findings": "done" } });
    let resp = exec_as(&ctx, &user, COMPLETE_MUTATION, input.clone()).await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);

    let resp = exec_as(&ctx, &user, COMPLETE_MUTATION, input).await;
    assert_error_code(&resp, "VALIDATION");
}

#[tokio::test]
async fn cancelled_inspection_cannot_complete() {
    let ctx = setup().await;
    let user = admin();
    let (lead_id, _) = create_lead(&ctx, &user, Some("dana@example.com")).await;
    let inspection_id = schedule(&ctx, &user, lead_id).await;

    let resp = exec_as(
        &ctx,
        &user,
        r#"
        mutation Cancel($id: ID!) {
            leads { cancelInspection(id: $id) { status } }
        }
        "#,
        json!({ "id": inspection_id }),
    )
    .await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    assert_eq!(data["leads"]["cancelInspection"]["status"], "CANCELLED");

    let resp = exec_as(
        &ctx,
        &user,
        COMPLETE_MUTATION,
        json!({ "input": { "id": inspection_id } }),
    )
    .await;
    assert_error_code(&resp, "VALIDATION");

    // No completion activity was ever written.
    let rows = activity::Entity::find()
        .filter(activity::Column::LeadId.eq(lead_id))
        .filter(activity::Column::Kind.eq(activity::Kind::InspectionCompleted))
        .all(ctx.db.as_ref())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn inspections_list_in_schedule_order() {
    let ctx = setup().await;
    let user = admin();
    let (lead_id, _) = create_lead(&ctx, &user, Some("dana@example.com")).await;

    for scheduled_at in ["2025-01-25T13:00:00Z", "2025-01-22T09:00:00Z"] {
        let resp = exec_as(
            &ctx,
            &user,
            SCHEDULE_MUTATION,
            json!({ "input": { "leadId": lead_id, "scheduledAt": scheduled_at } }),
        )
        .await;
        assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    }

    let resp = exec_as(
        &ctx,
        &user,
        r#"
        query List($leadId: ID!) {
            leads { inspections(leadId: $leadId) { scheduledAt } }
        }
        "#,
        json!({ "leadId": lead_id }),
    )
    .await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    let rows = data["leads"]["inspections"].as_array().cloned().unwrap();
    assert_eq!(rows.len(), 2);
    let first = rows[0]["scheduledAt"].as_str().unwrap();
    let second = rows[1]["scheduledAt"].as_str().unwrap();
    assert!(first < second, "{first} should sort before {second}");
}
