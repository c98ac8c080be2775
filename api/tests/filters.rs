mod common;

use api::auth::CurrentUser;
use common::{admin, assert_error_code, exec_as, setup, TestContext};
use serde_json::json;
use uuid::Uuid;

const LEADS_QUERY: &str = r#"
    query Board($filter: LeadFilter, $first: Int, $offset: Int) {
        leads {
            leads(filter: $filter, first: $first, offset: $offset) {
                id
                status
                suburb
                source
            }
        }
    }
"#;

async fn intake(
    ctx: &TestContext,
    user: &CurrentUser,
    first_name: &str,
    suburb: &str,
    source: &str,
) -> (Uuid, i32) {
    let mutation = r#"
        mutation Create($input: NewLeadInput!) {
            leads {
                createLead(input: $input) { id version }
            }
        }
    "#;
    let resp = exec_as(
        ctx,
        user,
        mutation,
        json!({
            "input": {
                "firstName": first_name,
                "lastName": "Wright",
                "phone": "0400 000 000",
                "address": "1 Damp St",
                "suburb": suburb,
                "postcode": "3056",
                "serviceType": "INSPECTION",
                "source": source
            }
        }),
    )
    .await;
    assert!(resp.errors.is_empty(), "create failed: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    let node = &data["leads"]["createLead"];
    (
        node["id"].as_str().unwrap().parse().unwrap(),
        node["version"].as_i64().unwrap() as i32,
    )
}

#[tokio::test]
async fn status_filter_narrows_the_board() {
    let ctx = setup().await;
    let user = admin();
    let (contacted_id, version) = intake(&ctx, &user, "Dana", "Brunswick", "PHONE").await;
    intake(&ctx, &user, "Alex", "Coburg", "PHONE").await;
    intake(&ctx, &user, "Sam", "Preston", "REFERRAL").await;

    let resp = exec_as(
        &ctx,
        &user,
        r#"
        mutation Move($input: MoveLeadStatusInput!) {
            leads { moveLeadStatus(input: $input) { lead { status } } }
        }
        "#,
        json!({ "input": {
            "id": contacted_id,
            "expectedVersion": version,
            "status": "CONTACTED",
            "inspectionDate": "2025-01-22",
            "inspectionTime": "09:00"
        }}),
    )
    .await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);

    let resp = exec_as(
        &ctx,
        &user,
        LEADS_QUERY,
        json!({ "filter": { "status": "CONTACTED" } }),
    )
    .await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    let rows = data["leads"]["leads"].as_array().cloned().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"].as_str().unwrap(), contacted_id.to_string());

    let resp = exec_as(
        &ctx,
        &user,
        LEADS_QUERY,
        json!({ "filter": { "source": "REFERRAL" } }),
    )
    .await;
    let data = resp.data.into_json().unwrap();
    let rows = data["leads"]["leads"].as_array().cloned().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["suburb"], "Preston");
}

#[tokio::test]
async fn free_text_search_matches_name_and_suburb() {
    let ctx = setup().await;
    let user = admin();
    intake(&ctx, &user, "Dana", "Brunswick", "PHONE").await;
    intake(&ctx, &user, "Alex", "Coburg", "PHONE").await;

    let resp = exec_as(&ctx, &user, LEADS_QUERY, json!({ "filter": { "q": "Coburg" } })).await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    let rows = data["leads"]["leads"].as_array().cloned().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["suburb"], "Coburg");

    let resp = exec_as(&ctx, &user, LEADS_QUERY, json!({ "filter": { "q": "Dana" } })).await;
    let data = resp.data.into_json().unwrap();
    let rows = data["leads"]["leads"].as_array().cloned().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["suburb"], "Brunswick");

    // Blank search terms are ignored rather than matching nothing.
    let resp = exec_as(&ctx, &user, LEADS_QUERY, json!({ "filter": { "q": "   " } })).await;
    let data = resp.data.into_json().unwrap();
    let rows = data["leads"]["leads"].as_array().cloned().unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn page_size_is_clamped() {
    let ctx = setup().await;
    let user = admin();
    for name in ["Dana", "Alex", "Sam"] {
        intake(&ctx, &user, name, "Brunswick", "PHONE").await;
    }

    let resp = exec_as(&ctx, &user, LEADS_QUERY, json!({ "first": 1 })).await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    assert_eq!(data["leads"]["leads"].as_array().unwrap().len(), 1);

    // Oversized requests are clamped to the cap, not rejected.
    let resp = exec_as(&ctx, &user, LEADS_QUERY, json!({ "first": 5000 })).await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    assert_eq!(data["leads"]["leads"].as_array().unwrap().len(), 3);

    let resp = exec_as(&ctx, &user, LEADS_QUERY, json!({ "first": 1, "offset": 1 })).await;
    let data = resp.data.into_json().unwrap();
    assert_eq!(data["leads"]["leads"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_lead_reports_not_found() {
    let ctx = setup().await;
    let user = admin();
    let resp = exec_as(
        &ctx,
        &user,
        r#"query One($id: ID!) { leads { lead(id: $id) { id } } }"#,
        json!({ "id": Uuid::new_v4() }),
    )
    .await;
    assert_error_code(&resp, "NOT_FOUND");

    let resp = exec_as(
        &ctx,
        &user,
        r#"query One($id: ID!) { leads { lead(id: $id) { id } } }"#,
        json!({ "id": "not-a-uuid" }),
    )
    .await;
    assert_error_code(&resp, "BAD_REQUEST");
}
