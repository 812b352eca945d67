//! Integration tests for the recoup-web crate.
//!
//! These spin up the real router on an OS-assigned port backed by an
//! on-disk database and call it with `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use recoup_engine::{
    EngineConfig, EngineError, NoopSendTrigger, Pipeline, SendSummary, SendTrigger,
};
use recoup_store::{
    AgingBucket, Database, InvoiceStatus, NewInvoice, NewOutreachError, NewWorkflowTemplate,
    OutreachErrorStore, ReceivablesStore, TemplateStore,
};
use recoup_web::{WebConfig, WebServer};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Notify;

// ── helpers ──────────────────────────────────────────────────────────

struct TestServer {
    base: String,
    db: Database,
    _dir: TempDir,
}

async fn seed(db: &Database) {
    let receivables = ReceivablesStore::new(db.clone());
    let owner = receivables.create_account("Acme Corp").await.unwrap();
    let debtor = receivables
        .create_debtor(&owner, "Globex", None)
        .await
        .unwrap();
    receivables
        .create_invoice(NewInvoice {
            owner_id: owner,
            debtor_id: debtor,
            invoice_number: "INV-1".into(),
            amount_cents: 5_000,
            currency: "USD".into(),
            due_date: chrono::NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(),
            status: InvoiceStatus::Open,
            payment_link: None,
        })
        .await
        .unwrap();
    TemplateStore::new(db.clone())
        .create_workflow_template(NewWorkflowTemplate {
            owner_id: None,
            aging_bucket: AgingBucket::Dpd1To30,
            name: "early".into(),
            tone: "friendly".into(),
            day_offsets: vec![0, 7],
        })
        .await
        .unwrap();
}

async fn start_server(config: EngineConfig, sender: Box<dyn SendTrigger>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_and_migrate(dir.path().join("recoup.db"))
        .await
        .unwrap();
    seed(&db).await;

    let pipeline = Arc::new(Pipeline::new(db.clone(), config, sender));
    let server = WebServer::new(WebConfig::default(), db.clone(), pipeline);
    let router = server.router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    TestServer {
        base: format!("http://{addr}"),
        db,
        _dir: dir,
    }
}

async fn default_server() -> TestServer {
    start_server(EngineConfig::default(), Box::new(NoopSendTrigger)).await
}

struct RefusingTrigger;

#[async_trait]
impl SendTrigger for RefusingTrigger {
    fn name(&self) -> &str {
        "refusing"
    }

    async fn trigger(&self) -> recoup_engine::Result<SendSummary> {
        Err(EngineError::SendFailed {
            reason: "delivery service offline".into(),
        })
    }
}

struct GatedTrigger {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl SendTrigger for GatedTrigger {
    fn name(&self) -> &str {
        "gated"
    }

    async fn trigger(&self) -> recoup_engine::Result<SendSummary> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(SendSummary::default())
    }
}

// ── config ───────────────────────────────────────────────────────────

#[test]
fn web_config_defaults() {
    let config = WebConfig::default();
    assert_eq!(config.bind_addr, "127.0.0.1");
    assert_eq!(config.port, 3000);
}

// ── GET /api/status ──────────────────────────────────────────────────

#[tokio::test]
async fn status_reports_healthy_database() {
    let server = default_server().await;
    let resp = reqwest::get(format!("{}/api/status", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], true);
    assert_eq!(body["busy"], false);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["active_workflows"], 0);
}

// ── POST /api/stages/{stage} ─────────────────────────────────────────

#[tokio::test]
async fn empty_body_runs_the_whole_chain() {
    let server = default_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/stages/assign_workflows", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["stage"], "assign_workflows");
    assert_eq!(body["summary"]["scanned"], 1);
    assert_eq!(body["next"]["stage"], "generate_drafts");
    assert_eq!(body["next"]["next"]["stage"], "trigger_send");
}

#[tokio::test]
async fn chained_run_as_of_a_date_drafts_the_invoice() {
    let server = default_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/stages/assign_workflows", server.base))
        .json(&serde_json::json!({ "today": "2026-03-01" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["summary"]["created"], 1);
    assert_eq!(body["next"]["summary"]["created"], 1);
    assert_eq!(body["next"]["next"]["summary"]["triggered"], false);
}

#[tokio::test]
async fn unchained_run_with_fixed_date() {
    let server = default_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/stages/assign_workflows", server.base))
        .json(&serde_json::json!({ "chain": false, "today": "2026-03-01" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body.get("next").is_none());

    let resp = client
        .post(format!("{}/api/stages/generate_drafts", server.base))
        .json(&serde_json::json!({ "chain": false, "today": "2026-03-01" }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["summary"]["created"], 1);
    assert_eq!(body["summary"]["created_pending"], 1);
}

#[tokio::test]
async fn unknown_stage_is_not_found() {
    let server = default_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/stages/collect_everything", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let server = default_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/stages/assign_workflows", server.base))
        .header("content-type", "application/json")
        .body("{\"chain\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn failed_stage_answers_500_with_partial_tree() {
    let config = EngineConfig::default().with_retry(1, 0);
    let server = start_server(config, Box::new(RefusingTrigger)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/stages/generate_drafts", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["next"]["status"], "failed");
    assert!(
        body["next"]["error"]
            .as_str()
            .unwrap()
            .contains("delivery service offline")
    );
}

#[tokio::test]
async fn concurrent_run_is_conflict() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let trigger = GatedTrigger {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    };
    let server = start_server(EngineConfig::default(), Box::new(trigger)).await;
    let client = reqwest::Client::new();

    let url = format!("{}/api/stages/trigger_send", server.base);
    let first = tokio::spawn({
        let client = client.clone();
        let url = url.clone();
        async move { client.post(url).send().await.unwrap().status() }
    });
    entered.notified().await;

    let second = client.post(&url).send().await.unwrap();
    assert_eq!(second.status(), 409);

    release.notify_one();
    assert_eq!(first.await.unwrap(), 200);
}

// ── GET /api/runs, GET /api/errors ───────────────────────────────────

#[tokio::test]
async fn runs_are_listed_newest_first() {
    let server = default_server().await;
    let client = reqwest::Client::new();
    client
        .post(format!("{}/api/stages/assign_workflows", server.base))
        .send()
        .await
        .unwrap();

    let runs: Vec<Value> = client
        .get(format!("{}/api/runs?limit=2", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["stage"], "trigger_send");
    assert_eq!(runs[1]["stage"], "generate_drafts");
}

#[tokio::test]
async fn recorded_errors_are_listed() {
    let server = default_server().await;
    OutreachErrorStore::new(server.db.clone())
        .record(NewOutreachError {
            stage: "generate_drafts".into(),
            invoice_id: Some("inv-1".into()),
            kind: "invalid_cadence".into(),
            message: "workflow cadence is empty".into(),
            ..NewOutreachError::default()
        })
        .await
        .unwrap();

    let errors: Vec<Value> = reqwest::get(format!("{}/api/errors", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["kind"], "invalid_cadence");
    assert_eq!(errors[0]["invoice_id"], "inv-1");
}
