#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use api::auth::{AuthConfig, CurrentUser, StaffRole};
use api::notify::{Dispatcher, EmailMessage, MailError, Mailer, NullMailer, RetryPolicy};
use api::schema::{build_schema, seed_demo, AppSchema, SeededRecords};
use async_graphql::{Request, Schema, Variables};
use migration::Migrator;
use migration::MigratorTrait;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement};
use serde_json::json;
use url::Url;
use uuid::Uuid;

pub type TestSchema =
    Schema<api::schema::QueryRoot, api::schema::MutationRoot, async_graphql::EmptySubscription>;

/// Records every accepted message; optionally rejects everything to
/// exercise the failure path.
pub struct RecordingMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub reject: bool,
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if self.reject {
            return Err(MailError::Permanent("550 mailbox unavailable".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub schema: TestSchema,
    pub mailer: Arc<RecordingMailer>,
}

impl TestContext {
    pub fn sent_count(&self) -> usize {
        self.mailer.sent.lock().unwrap().len()
    }
}

pub async fn setup() -> TestContext {
    setup_with(false).await
}

pub async fn setup_rejecting_mailer() -> TestContext {
    setup_with(true).await
}

async fn setup_with(reject: bool) -> TestContext {
    let conn = Database::connect("sqlite::memory:").await.unwrap();
    let db = Arc::new(conn);
    bootstrap_sqlite(db.as_ref()).await;
    let mailer = Arc::new(RecordingMailer {
        sent: Mutex::new(Vec::new()),
        reject,
    });
    let dispatcher = Arc::new(Dispatcher::new(
        mailer.clone(),
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
        },
    ));
    let auth = Arc::new(AuthConfig {
        jwt_secret: "test-secret".into(),
        session_ttl_minutes: 60,
    });
    let AppSchema(schema) = build_schema(db.clone(), auth, dispatcher);
    TestContext { db, schema, mailer }
}

pub fn admin() -> CurrentUser {
    CurrentUser {
        user_id: Uuid::new_v4(),
        role: StaffRole::Admin,
    }
}

pub async fn exec_as(
    ctx: &TestContext,
    user: &CurrentUser,
    query: &str,
    vars: serde_json::Value,
) -> async_graphql::Response {
    ctx.schema
        .execute(
            Request::new(query)
                .variables(Variables::from_json(vars))
                .data(user.clone()),
        )
        .await
}

pub async fn exec_anonymous(
    ctx: &TestContext,
    query: &str,
    vars: serde_json::Value,
) -> async_graphql::Response {
    ctx.schema
        .execute(Request::new(query).variables(Variables::from_json(vars)))
        .await
}

pub fn assert_error_code(resp: &async_graphql::Response, code: &str) {
    let err = resp.errors.first().unwrap_or_else(|| {
        panic!("expected a {} error, got none", code);
    });
    let value = err.extensions.as_ref().and_then(|ext| ext.get("code"));
    match value {
        Some(async_graphql::Value::String(actual)) => assert_eq!(actual, code),
        other => panic!("missing code extension {:?}: {:?}", other, resp.errors),
    }
}

/// Create a lead through the staff intake mutation; returns (id, version).
pub async fn create_lead(ctx: &TestContext, user: &CurrentUser, email: Option<&str>) -> (Uuid, i32) {
    let mutation = r#"
        mutation Create($input: NewLeadInput!) {
            leads {
                createLead(input: $input) {
                    id
                    version
                    status
                }
            }
        }
    "#;
    let resp = exec_as(
        ctx,
        user,
        mutation,
        json!({
            "input": {
                "firstName": "Dana",
                "lastName": "Wright",
                "email": email,
                "phone": "0400 000 000",
                "address": "1 Damp St",
                "suburb": "Brunswick",
                "postcode": "3056",
                "serviceType": "INSPECTION",
                "urgency": "MEDIUM",
                "source": "PHONE"
            }
        }),
    )
    .await;
    assert!(resp.errors.is_empty(), "create failed: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    let node = &data["leads"]["createLead"];
    assert_eq!(node["status"], "NEW");
    (
        node["id"].as_str().unwrap().parse().unwrap(),
        node["version"].as_i64().unwrap() as i32,
    )
}

pub async fn bootstrap_sqlite(db: &DatabaseConnection) {
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "PRAGMA foreign_keys = ON;",
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE "user" (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'VIEWER',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE technician (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE lead (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT NOT NULL,
            address TEXT NOT NULL,
            suburb TEXT NOT NULL,
            postcode TEXT NOT NULL,
            service_type TEXT NOT NULL,
            urgency TEXT NOT NULL,
            source TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'NEW',
            inspection_date TEXT,
            inspection_time TEXT,
            email_sent BOOLEAN NOT NULL DEFAULT FALSE,
            notes TEXT,
            assigned_technician_id TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            contacted_at TEXT,
            qualified_at TEXT,
            converted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(assigned_technician_id) REFERENCES technician(id) ON DELETE SET NULL
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE inspection (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL,
            scheduled_at TEXT NOT NULL,
            completed_at TEXT,
            status TEXT NOT NULL DEFAULT 'SCHEDULED',
            findings TEXT,
            recommendations TEXT,
            estimated_cost_cents INTEGER,
            final_cost_cents INTEGER,
            technician_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(lead_id) REFERENCES lead(id) ON DELETE CASCADE,
            FOREIGN KEY(technician_id) REFERENCES technician(id) ON DELETE SET NULL
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE activity (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL,
            inspection_id TEXT,
            kind TEXT NOT NULL,
            description TEXT NOT NULL,
            notes TEXT,
            meta_json TEXT NOT NULL DEFAULT '{}',
            created_by TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(lead_id) REFERENCES lead(id) ON DELETE CASCADE,
            FOREIGN KEY(inspection_id) REFERENCES inspection(id) ON DELETE SET NULL
        );
        "#,
    ))
    .await
    .unwrap();
}

pub struct PgTestContext {
    pub db: Arc<DatabaseConnection>,
    pub schema: TestSchema,
    pub seeded: SeededRecords,
    admin_url: String,
    db_name: String,
}

impl PgTestContext {
    pub async fn new_seeded() -> Option<Self> {
        let base = std::env::var("TEST_DATABASE_URL").ok()?;
        let (admin_url, db_name, test_url) = build_urls(&base)?;
        let admin = Database::connect(&admin_url).await.ok()?;
        let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE);", db_name);
        let create_sql = format!("CREATE DATABASE \"{}\";", db_name);
        let _ = admin
            .execute(Statement::from_string(DatabaseBackend::Postgres, drop_sql))
            .await;
        admin
            .execute(Statement::from_string(
                DatabaseBackend::Postgres,
                create_sql,
            ))
            .await
            .ok()?;
        let conn = Database::connect(&test_url).await.ok()?;
        Migrator::up(&conn, None).await.ok()?;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(NullMailer),
            RetryPolicy::default(),
        ));
        let seeded = seed_demo(&conn, dispatcher.as_ref()).await.ok()?;
        let db = Arc::new(conn);
        let auth = Arc::new(AuthConfig {
            jwt_secret: "test-secret".into(),
            session_ttl_minutes: 60,
        });
        let AppSchema(schema) = build_schema(db.clone(), auth, dispatcher);
        Some(Self {
            db,
            schema,
            seeded,
            admin_url,
            db_name,
        })
    }

    pub async fn cleanup(self) {
        let Self {
            db,
            admin_url,
            db_name,
            ..
        } = self;
        drop(db);
        if let Ok(admin) = Database::connect(&admin_url).await {
            let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE);", db_name);
            let _ = admin
                .execute(Statement::from_string(DatabaseBackend::Postgres, drop_sql))
                .await;
        }
    }
}

fn build_urls(base: &str) -> Option<(String, String, String)> {
    let url = Url::parse(base).ok()?;
    let db_path = url.path().trim_start_matches('/').to_string();
    let base_name = if db_path.is_empty() {
        "mouldcare_test".to_string()
    } else {
        db_path
    };
    let db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
    let mut admin_url = url.clone();
    admin_url.set_path("/postgres");
    let mut test_url = url.clone();
    test_url.set_path(&format!("/{}", db_name));
    Some((admin_url.to_string(), db_name, test_url.to_string()))
}
