//! Rule form integration tests.
//!
//! The router is driven with `oneshot` (no port binding) against an
//! in-memory SQLite control table and a scripted SQL generator.
//!
//! Endpoints covered:
//!   - GET  /health, /metrics, /
//!   - GET  /create, /read, /update_form, /delete_form
//!   - POST /create, /update, /delete  (success / not found / missing fields / upstream failure)

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt; // for .collect()
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt; // for .oneshot()

use dq_rules::api::flash::{self, Flash, FlashLevel};
use dq_rules::api::{build_app, AppState};
use dq_rules::db::models::rule::{InsertError, Rule, RuleSummary, RuleUpdate};
use dq_rules::db::sqlite::SqliteRuleStore;
use dq_rules::db::RuleStore;
use dq_rules::error::{AppError, AppResult};
use dq_rules::generator::{finalize_sql, SqlGenerator, NO_CONTENT_GENERATED};
use dq_rules::metrics::RuleMetrics;

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Replays a fixed model answer; `None` models an empty candidate list.
struct ScriptedGenerator {
    answer: Result<Option<String>, String>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn answering(raw: &str) -> Self {
        Self { answer: Ok(Some(raw.to_string())), calls: AtomicUsize::new(0) }
    }

    fn empty() -> Self {
        Self { answer: Ok(None), calls: AtomicUsize::new(0) }
    }

    fn failing(message: &str) -> Self {
        Self { answer: Err(message.to_string()), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl SqlGenerator for ScriptedGenerator {
    async fn generate(&self, _description: &str, _table: &str, _column: &str) -> AppResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Ok(raw) => Ok(finalize_sql(raw.as_deref())),
            Err(message) => Err(AppError::Generation(message.clone())),
        }
    }
}

/// Every call fails the way an unreachable warehouse would.
struct UnavailableStore;

#[async_trait]
impl RuleStore for UnavailableStore {
    async fn insert(&self, _rule: &Rule) -> AppResult<Vec<InsertError>> {
        Err(AppError::Store("permission denied".to_string()))
    }

    async fn list_recent(&self) -> AppResult<Vec<Rule>> {
        Err(AppError::Store("permission denied".to_string()))
    }

    async fn list_summaries(&self) -> AppResult<Vec<RuleSummary>> {
        Err(AppError::Store("permission denied".to_string()))
    }

    async fn update(&self, _update: &RuleUpdate) -> AppResult<u64> {
        Err(AppError::Store("permission denied".to_string()))
    }

    async fn delete(&self, _rule_id: &str) -> AppResult<u64> {
        Err(AppError::Store("permission denied".to_string()))
    }
}

/// Accepts the insert call but rejects the row, as `insertAll` does when
/// a field does not match the table schema.
struct RowRejectingStore;

#[async_trait]
impl RuleStore for RowRejectingStore {
    async fn insert(&self, _rule: &Rule) -> AppResult<Vec<InsertError>> {
        Ok(vec![InsertError {
            index: 0,
            reason: "invalid".to_string(),
            message: "no such field: rule_sqlx".to_string(),
        }])
    }

    async fn list_recent(&self) -> AppResult<Vec<Rule>> {
        Ok(Vec::new())
    }

    async fn list_summaries(&self) -> AppResult<Vec<RuleSummary>> {
        Ok(Vec::new())
    }

    async fn update(&self, _update: &RuleUpdate) -> AppResult<u64> {
        Ok(0)
    }

    async fn delete(&self, _rule_id: &str) -> AppResult<u64> {
        Ok(0)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

struct TestApp {
    app: axum::Router,
    store: Arc<SqliteRuleStore>,
    generator: Arc<ScriptedGenerator>,
    state: Arc<AppState>,
}

fn app_with(store: Arc<dyn RuleStore>, generator: Arc<dyn SqlGenerator>) -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState {
        store,
        generator,
        metrics: Arc::new(RuleMetrics::default()),
        project_id: "test-project".to_string(),
        dataset_id: "sprint".to_string(),
    });
    // CORS is irrelevant for same-origin form posts
    let app = build_app(state.clone(), tower_http::cors::CorsLayer::new());
    (app, state)
}

async fn build_test_app(generator: ScriptedGenerator) -> TestApp {
    let store = Arc::new(
        SqliteRuleStore::in_memory()
            .await
            .expect("Failed to create in-memory store"),
    );
    let generator = Arc::new(generator);
    let (app, state) = app_with(store.clone(), generator.clone());
    TestApp { app, store, generator, state }
}

fn default_generator() -> ScriptedGenerator {
    ScriptedGenerator::answering(
        "```sql\nSELECT * FROM `orders` WHERE NOT REGEXP_CONTAINS(customer_name, r'^\\S(.*\\S)?$')\n```",
    )
}

fn post_form(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = serde_urlencoded::to_string(fields).expect("Failed to encode form");
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

/// Assert a 302 to `location` and return the flash it carries.
fn expect_redirect_flash(resp: &Response, location: &str) -> Flash {
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[header::LOCATION], location);
    let cookie = resp.headers()[header::SET_COOKIE]
        .to_str()
        .expect("Set-Cookie should be ASCII");
    let value = cookie
        .strip_prefix("flash=")
        .and_then(|rest| rest.split(';').next())
        .expect("Redirect should carry a flash cookie");
    let mut flashes = flash::decode(value);
    assert_eq!(flashes.len(), 1, "Exactly one notification per POST");
    flashes.remove(0)
}

async fn body_text(resp: Response) -> String {
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("Failed to collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("Body is not valid UTF-8")
}

fn seeded_rule(description: &str, age_minutes: i64) -> Rule {
    Rule::generated(
        "test-project",
        "sprint",
        "orders",
        "customer_name",
        description,
        "SELECT 1".to_string(),
        Utc::now() - Duration::minutes(age_minutes),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health, metrics, home
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_health_check() {
    let t = build_test_app(default_generator()).await;
    let resp = t.app.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("\"ok\""));
}

#[tokio::test]
async fn test_home_redirects_to_create() {
    let t = build_test_app(default_generator()).await;
    let resp = t.app.oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[header::LOCATION], "/create");
}

#[tokio::test]
async fn test_create_form_renders() {
    let t = build_test_app(default_generator()).await;
    let resp = t.app.oneshot(get("/create")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get(header::SET_COOKIE).is_none());
    let html = body_text(resp).await;
    assert!(html.contains("action=\"/create\""));
    assert!(html.contains("name=\"description\""));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Create
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_create_inserts_generated_rule() {
    let t = build_test_app(default_generator()).await;

    let resp = t
        .app
        .clone()
        .oneshot(post_form(
            "/create",
            &[
                ("description", "no leading/trailing spaces"),
                ("table", "orders"),
                ("column", "customer_name"),
            ],
        ))
        .await
        .unwrap();

    let flash = expect_redirect_flash(&resp, "/create");
    assert_eq!(flash, Flash::success("Rule successfully added!"));

    let rules = t.store.list_recent().await.unwrap();
    assert_eq!(rules.len(), 1);
    let rule = &rules[0];
    assert_eq!(rule.source_table_id, "orders");
    assert_eq!(rule.metric_column, "customer_name");
    assert_eq!(rule.rule_description, "no leading/trailing spaces");
    assert_eq!(rule.rule_family, "String Formatting");
    assert_eq!(rule.source_project_id, "test-project");
    assert_eq!(rule.source_dataset_id, "sprint");
    assert!(rule.rule_sql.starts_with("SELECT * FROM `orders`"));
    assert!(!rule.rule_sql.contains("```"));
    assert!(uuid::Uuid::parse_str(&rule.rule_id).is_ok());
}

#[tokio::test]
async fn test_create_twice_yields_distinct_ids() {
    let t = build_test_app(default_generator()).await;
    let fields = [("description", "d"), ("table", "orders"), ("column", "c")];

    for _ in 0..2 {
        let resp = t.app.clone().oneshot(post_form("/create", &fields)).await.unwrap();
        assert_eq!(expect_redirect_flash(&resp, "/create").level, FlashLevel::Success);
    }

    let rules = t.store.list_recent().await.unwrap();
    assert_eq!(rules.len(), 2);
    assert_ne!(rules[0].rule_id, rules[1].rule_id);
}

#[tokio::test]
async fn test_create_with_empty_model_answer_stores_sentinel() {
    let t = build_test_app(ScriptedGenerator::empty()).await;

    let resp = t
        .app
        .oneshot(post_form("/create", &[("description", "d"), ("table", "t"), ("column", "c")]))
        .await
        .unwrap();
    assert_eq!(expect_redirect_flash(&resp, "/create").level, FlashLevel::Success);

    let rules = t.store.list_recent().await.unwrap();
    assert_eq!(rules[0].rule_sql, NO_CONTENT_GENERATED);
}

#[tokio::test]
async fn test_create_missing_field_warns_without_generating() {
    let t = build_test_app(default_generator()).await;

    let resp = t
        .app
        .oneshot(post_form("/create", &[("description", "d"), ("table", "orders"), ("column", "")]))
        .await
        .unwrap();

    let flash = expect_redirect_flash(&resp, "/create");
    assert_eq!(flash, Flash::warning("Please fill all fields"));
    assert_eq!(t.generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(t.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_create_generation_failure_is_flashed() {
    let t = build_test_app(ScriptedGenerator::failing("Vertex AI returned 403 Forbidden")).await;

    let resp = t
        .app
        .oneshot(post_form("/create", &[("description", "d"), ("table", "t"), ("column", "c")]))
        .await
        .unwrap();

    let flash = expect_redirect_flash(&resp, "/create");
    assert_eq!(flash.level, FlashLevel::Danger);
    assert_eq!(flash.message, "Error: Generation error: Vertex AI returned 403 Forbidden");
    assert_eq!(t.store.count().await.unwrap(), 0);
    assert_eq!(t.state.metrics.generation_failures.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_create_rejected_row_is_flashed_as_danger() {
    let (app, state) = app_with(Arc::new(RowRejectingStore), Arc::new(default_generator()));

    let resp = app
        .oneshot(post_form(
            "/create",
            &[("table", "orders"), ("column", "customer_name"), ("description", "no blanks")],
        ))
        .await
        .unwrap();

    assert_eq!(
        expect_redirect_flash(&resp, "/create"),
        Flash::danger("Error inserting rule: [row 0: no such field: rule_sqlx (invalid)]")
    );
    assert_eq!(state.metrics.rules_created.load(Ordering::Relaxed), 0);
    assert_eq!(state.metrics.store_failures.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_non_form_body_counts_as_missing_fields() {
    let t = build_test_app(default_generator()).await;

    let req = Request::builder()
        .method("POST")
        .uri("/create")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"table":"orders"}"#))
        .unwrap();
    let resp = t.app.oneshot(req).await.unwrap();

    assert_eq!(expect_redirect_flash(&resp, "/create"), Flash::warning("Please fill all fields"));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Read / flash lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_read_lists_newest_first() {
    let t = build_test_app(default_generator()).await;
    t.store.insert(&seeded_rule("oldest rule", 30)).await.unwrap();
    t.store.insert(&seeded_rule("newest rule", 1)).await.unwrap();
    t.store.insert(&seeded_rule("middle rule", 10)).await.unwrap();

    let resp = t.app.oneshot(get("/read")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_text(resp).await;

    let newest = html.find("newest rule").expect("newest listed");
    let middle = html.find("middle rule").expect("middle listed");
    let oldest = html.find("oldest rule").expect("oldest listed");
    assert!(newest < middle && middle < oldest);
}

#[tokio::test]
async fn test_flash_is_shown_once_then_cleared() {
    let t = build_test_app(default_generator()).await;
    let cookie = format!(
        "{}={}",
        flash::FLASH_COOKIE,
        flash::encode(&[Flash::success("Rule successfully added!")])
    );

    let req = Request::builder()
        .method("GET")
        .uri("/create")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let resp = t.app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let set_cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("flash=;"));
    assert!(set_cookie.contains("Max-Age=0"));
    let html = body_text(resp).await;
    assert!(html.contains("flash-success"));
    assert!(html.contains("Rule successfully added!"));
}

#[tokio::test]
async fn test_listing_failures_render_empty_pages_with_notice() {
    let (app, _) = app_with(Arc::new(UnavailableStore), Arc::new(default_generator()));

    for (uri, message) in [
        ("/read", "Error fetching rules: Store error: permission denied"),
        ("/update_form", "Error fetching rules for update: Store error: permission denied"),
        ("/delete_form", "Error fetching rules for deletion: Store error: permission denied"),
    ] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{uri} should still render");
        let html = body_text(resp).await;
        assert!(html.contains(message), "{uri} should show the failure");
        assert!(html.contains("No rules found."));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Update
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_update_regenerates_existing_rule() {
    let t = build_test_app(ScriptedGenerator::answering("```\nSELECT email FROM customers\n```")).await;
    let original = seeded_rule("old description", 60);
    t.store.insert(&original).await.unwrap();

    let resp = t
        .app
        .clone()
        .oneshot(post_form(
            "/update",
            &[
                ("rule_id", original.rule_id.as_str()),
                ("description", "must be lowercase"),
                ("table", "customers"),
                ("column", "email"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(
        expect_redirect_flash(&resp, "/update_form"),
        Flash::success("Rule successfully updated!")
    );

    let stored = t.store.get(&original.rule_id).await.unwrap().expect("rule kept");
    assert_eq!(stored.rule_description, "must be lowercase");
    assert_eq!(stored.rule_sql, "SELECT email FROM customers");
    assert_eq!(stored.metric_column, "email");
    assert_eq!(stored.source_table_id, "customers");
    assert!(stored.rule_generation_timestamp > original.rule_generation_timestamp);
    assert_eq!(stored.rule_family, original.rule_family);
    assert_eq!(stored.source_project_id, original.source_project_id);

    // The picker shows the new description
    let html = body_text(t.app.oneshot(get("/update_form")).await.unwrap()).await;
    assert!(html.contains("must be lowercase"));
}

#[tokio::test]
async fn test_update_unknown_id_warns_and_leaves_table() {
    let t = build_test_app(default_generator()).await;
    let existing = seeded_rule("keep me", 5);
    t.store.insert(&existing).await.unwrap();

    let resp = t
        .app
        .oneshot(post_form(
            "/update",
            &[("rule_id", "zzz"), ("description", "x"), ("table", "t"), ("column", "c")],
        ))
        .await
        .unwrap();

    assert_eq!(
        expect_redirect_flash(&resp, "/update_form"),
        Flash::warning("No rule found with that ID.")
    );
    let rules = t.store.list_recent().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0], t.store.get(&existing.rule_id).await.unwrap().unwrap());
    assert_eq!(rules[0].rule_description, "keep me");
    assert_eq!(t.state.metrics.rules_not_found.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_update_missing_fields_warns() {
    let t = build_test_app(default_generator()).await;

    let resp = t
        .app
        .oneshot(post_form("/update", &[("rule_id", "abc"), ("description", "x")]))
        .await
        .unwrap();

    assert_eq!(
        expect_redirect_flash(&resp, "/update_form"),
        Flash::warning("Please fill all fields")
    );
    assert_eq!(t.generator.calls.load(Ordering::SeqCst), 0);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Delete
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_delete_removes_only_target_row() {
    let t = build_test_app(default_generator()).await;
    let doomed = seeded_rule("delete me", 2);
    let survivor = seeded_rule("keep me", 1);
    t.store.insert(&doomed).await.unwrap();
    t.store.insert(&survivor).await.unwrap();

    let resp = t
        .app
        .clone()
        .oneshot(post_form("/delete", &[("rule_id", doomed.rule_id.as_str())]))
        .await
        .unwrap();

    assert_eq!(
        expect_redirect_flash(&resp, "/delete_form"),
        Flash::success("Rule successfully deleted!")
    );
    assert!(t.store.get(&doomed.rule_id).await.unwrap().is_none());
    assert!(t.store.get(&survivor.rule_id).await.unwrap().is_some());

    let html = body_text(t.app.oneshot(get("/delete_form")).await.unwrap()).await;
    assert!(!html.contains(&doomed.rule_id));
    assert!(html.contains(&survivor.rule_id));
}

#[tokio::test]
async fn test_delete_unknown_id_warns() {
    let t = build_test_app(default_generator()).await;
    t.store.insert(&seeded_rule("keep me", 1)).await.unwrap();

    let resp = t
        .app
        .oneshot(post_form("/delete", &[("rule_id", "does-not-exist")]))
        .await
        .unwrap();

    assert_eq!(
        expect_redirect_flash(&resp, "/delete_form"),
        Flash::warning("No rule found with that ID.")
    );
    assert_eq!(t.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_requires_rule_id() {
    let t = build_test_app(default_generator()).await;

    let resp = t.app.oneshot(post_form("/delete", &[])).await.unwrap();

    assert_eq!(
        expect_redirect_flash(&resp, "/delete_form"),
        Flash::warning("Rule ID required to delete.")
    );
}

#[tokio::test]
async fn test_store_failure_on_delete_is_flashed_as_danger() {
    let (app, state) = app_with(Arc::new(UnavailableStore), Arc::new(default_generator()));

    let resp = app.oneshot(post_form("/delete", &[("rule_id", "abc")])).await.unwrap();

    assert_eq!(
        expect_redirect_flash(&resp, "/delete_form"),
        Flash::danger("Error deleting rule: Store error: permission denied")
    );
    assert_eq!(state.metrics.store_failures.load(Ordering::Relaxed), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_metrics_count_outcomes() {
    let t = build_test_app(default_generator()).await;

    let resp = t
        .app
        .clone()
        .oneshot(post_form("/create", &[("description", "d"), ("table", "t"), ("column", "c")]))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    t.app
        .clone()
        .oneshot(post_form("/delete", &[("rule_id", "zzz")]))
        .await
        .unwrap();

    let resp = t.app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = body_text(resp).await;
    assert!(text.contains("dq_rules_mutations_total{outcome=\"created\"} 1"));
    assert!(text.contains("dq_rules_mutations_total{outcome=\"not_found\"} 1"));
}
