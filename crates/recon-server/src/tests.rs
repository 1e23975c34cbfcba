//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use recon_core::models::NewAccount;
use recon_core::{Database, MemoryModelStore, MockProvider, ProviderClient, ReconConfig};
use tower::ServiceExt;

fn test_service(provider: &MockProvider) -> Arc<ReconciliationService> {
    let mut config = ReconConfig::default();
    config.model.n_estimators = 5;
    Arc::new(ReconciliationService::new(
        Database::in_memory().unwrap(),
        ProviderClient::Mock(provider.clone()),
        Arc::new(MemoryModelStore::new()),
        config,
    ))
}

fn setup_test_app() -> (Router, Arc<ReconciliationService>, MockProvider) {
    let provider = MockProvider::new();
    let service = test_service(&provider);
    let config = ServerConfig {
        require_auth: false,
        allowed_origins: vec![],
        ..Default::default()
    };
    (create_router(service.clone(), config), service, provider)
}

fn add_account(service: &ReconciliationService, external_ref: &str, balance: f64) -> i64 {
    service
        .create_account(&NewAccount {
            external_ref: external_ref.to_string(),
            name: format!("Account {}", external_ref),
            current_balance: balance,
        })
        .unwrap()
        .id
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ========== Health ==========

#[tokio::test]
async fn test_health() {
    let (app, _, _) = setup_test_app();

    let response = app.oneshot(get("/api/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["model_trained"], false);
    assert_eq!(json["provider"], "mock");
}

// ========== Account API Tests ==========

#[tokio::test]
async fn test_create_and_list_accounts() {
    let (app, _, _) = setup_test_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/accounts",
            serde_json::json!({
                "external_ref": "acc_1",
                "name": "Operating",
                "current_balance": 250.0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = get_body_json(response).await;
    assert_eq!(created["external_ref"], "acc_1");
    assert_eq!(created["current_balance"], 250.0);

    let response = app.oneshot(get("/api/accounts")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["name"], "Operating");
}

#[tokio::test]
async fn test_create_account_requires_ref() {
    let (app, _, _) = setup_test_app();

    let response = app
        .oneshot(post_json(
            "/api/accounts",
            serde_json::json!({ "external_ref": "  ", "name": "Operating" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "external_ref is required");
}

#[tokio::test]
async fn test_account_history_newest_first() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 100.0);
    service.reconcile_account(id).await;
    provider.set_balance("acc_1", 40.0);
    service.reconcile_account(id).await;

    let response = app
        .oneshot(get(&format!("/api/accounts/{}/reconciliations?limit=1", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let outcomes = json.as_array().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["external_balance"], 40.0);
    assert_eq!(outcomes[0]["status"], "pending");
}

#[tokio::test]
async fn test_account_history_unknown_account() {
    let (app, _, _) = setup_test_app();

    let response = app
        .oneshot(get("/api/accounts/99/reconciliations"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Reconciliation API Tests ==========

#[tokio::test]
async fn test_reconcile_account_within_tolerance() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 100.0);

    let response = app
        .oneshot(post_empty(&format!("/api/accounts/{}/reconcile", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "completed");
    assert!(json["reconciliation_id"].is_i64());
    assert!(json.get("error").is_none());
    assert!(provider.adjustments().is_empty());
}

#[tokio::test]
async fn test_reconcile_account_untrained_holds() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 90.0);

    let response = app
        .oneshot(post_empty(&format!("/api/accounts/{}/reconcile", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["insights"]["auto_adjust_recommended"], false);
    assert!(provider.adjustments().is_empty());
}

#[tokio::test]
async fn test_reconcile_unknown_account() {
    let (app, _, _) = setup_test_app();

    let response = app
        .oneshot(post_empty("/api/accounts/42/reconcile"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reconcile_unreachable_account() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 100.0);
    provider.deactivate("acc_1");

    let response = app
        .oneshot(post_empty(&format!("/api/accounts/{}/reconcile", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("not reachable"));
    assert!(service.reconciliation_status().unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_reconcile_adjusts_and_resolves_hold() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 90.0);
    let held = service.reconcile_account(id).await;
    assert_eq!(held.status, Some(recon_core::models::ReconciliationStatus::Pending));

    let response = app.clone()
        .oneshot(post_empty(&format!("/api/accounts/{}/reconcile/manual", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "completed");
    assert!(json.get("insights").is_none());
    assert_eq!(provider.adjustments().len(), 1);

    let history = service.account_history(id, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reconciliation_type.as_str(), "manual");

    let response = app
        .oneshot(get(&format!("/api/accounts/{}/adjustments", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["amount"], 10.0);
    assert_eq!(json[0]["reconciliation_id"], history[0].id);
    assert!(history.iter().all(|o| o.status.as_str() == "completed"));
}

#[tokio::test]
async fn test_manual_reconcile_unknown_account() {
    let (app, _, _) = setup_test_app();

    let response = app
        .oneshot(post_empty("/api/accounts/42/reconcile/manual"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reconcile_all_reports_each_account() {
    let (app, service, provider) = setup_test_app();
    add_account(&service, "acc_1", 100.0);
    add_account(&service, "acc_2", 100.0);
    provider.set_balance("acc_1", 100.0);
    // acc_2 unknown to the provider

    let response = app.oneshot(post_empty("/api/reconcile")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["succeeded"], 1);
    assert_eq!(json["failed"], 1);
}

#[tokio::test]
async fn test_reconciliation_status() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 100.0);
    service.reconcile_account(id).await;

    let response = app
        .oneshot(get("/api/reconciliation/status"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["account_id"], id);
}

// ========== Model API Tests ==========

#[tokio::test]
async fn test_insights_untrained() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 100.0);

    let response = app
        .oneshot(get(&format!("/api/accounts/{}/insights", id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["account_id"], id);
    assert_eq!(json["model_trained"], false);
    assert_eq!(json["reconciliation_count"], 0);
}

#[tokio::test]
async fn test_train_without_history() {
    let (app, _, _) = setup_test_app();

    let response = app.oneshot(post_empty("/api/ai/train")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_train_with_history() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 100.0);
    for _ in 0..50 {
        service.reconcile_account(id).await;
    }

    let response = app
        .clone()
        .oneshot(post_empty("/api/ai/train"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["outcomes"], 50);
    assert_eq!(json["from_feedback"], 50);

    let response = app.oneshot(get("/api/ai/status")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["trained"], true);
    assert_eq!(json["features"].as_array().unwrap().len(), 9);
}

#[tokio::test]
async fn test_retrain_skipped() {
    let (app, service, provider) = setup_test_app();
    let id = add_account(&service, "acc_1", 100.0);
    provider.set_balance("acc_1", 100.0);
    service.reconcile_account(id).await;

    let response = app
        .oneshot(post_json(
            "/api/ai/retrain",
            serde_json::json!({ "hours": 1, "min_new": 5 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["outcome"], "skipped");
    assert_eq!(json["recent"], 1);
}

#[tokio::test]
async fn test_retrain_rejects_oversized_window() {
    let (app, _, _) = setup_test_app();

    let response = app
        .oneshot(post_json(
            "/api/ai/retrain",
            serde_json::json!({ "hours": 3_000_000_000_000_000u64 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("out of range"));
}

#[tokio::test]
async fn test_model_status_untrained() {
    let (app, _, _) = setup_test_app();

    let response = app.oneshot(get("/api/ai/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["trained"], false);
    assert!(json["metrics"].is_null());
}

#[tokio::test]
async fn test_policy_evaluation() {
    let (app, _, _) = setup_test_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/ai/policy",
            serde_json::json!({
                "predicted_difference": 15.0,
                "confidence": 0.95,
                "risk_level": "high"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["auto_adjust"], true);
    assert_eq!(json["thresholds"]["max_abs_amount"], 20.0);

    let response = app
        .oneshot(post_json(
            "/api/ai/policy",
            serde_json::json!({
                "predicted_difference": 15.0,
                "confidence": 0.75,
                "risk_level": "unknown"
            }),
        ))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["auto_adjust"], false);
    assert_eq!(json["hold_reason"], "low_confidence");
    assert_eq!(json["thresholds"]["min_confidence"], 0.8);
}

// ========== Auth Tests ==========

fn auth_app() -> Router {
    let provider = MockProvider::new();
    let config = ServerConfig {
        require_auth: true,
        api_keys: vec!["secret-key".to_string()],
        ..Default::default()
    };
    create_router(test_service(&provider), config)
}

#[tokio::test]
async fn test_auth_required() {
    let response = auth_app().oneshot(get("/api/accounts")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_wrong_key() {
    let response = auth_app()
        .oneshot(
            Request::builder()
                .uri("/api/accounts")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_with_key() {
    let response = auth_app()
        .oneshot(
            Request::builder()
                .uri("/api/accounts")
                .header("authorization", "Bearer secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_is_public() {
    let response = auth_app().oneshot(get("/api/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_security_headers() {
    let (app, _, _) = setup_test_app();

    let response = app.oneshot(get("/api/health")).await.unwrap();

    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}

#[test]
fn test_parse_list() {
    assert_eq!(parse_list("a, b,,c "), vec!["a", "b", "c"]);
    assert!(parse_list(" , ").is_empty());
}
