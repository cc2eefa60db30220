use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use tidyops_api::config::ApiConfig;
use tidyops_auth::JwtClaims;
use tidyops_core::UserId;

const OWNER_EMAIL: &str = "platform@tidyops.test";
const OWNER_PASSWORD: &str = "owner-password-1";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Same router as prod, in-memory backend, ephemeral port.
        let config = ApiConfig::in_memory(jwt_secret).with_owner(OWNER_EMAIL, OWNER_PASSWORD);
        let app = tidyops_api::app::build_app(&config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(jwt_secret: &str, sub: UserId, ttl: ChronoDuration) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub,
        email: format!("{sub}@tidyops.test"),
        iat: (now - ChronoDuration::seconds(1)).timestamp(),
        exp: (now + ttl).timestamp(),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn sign_in(client: &reqwest::Client, base_url: &str, email: &str, password: &str) -> String {
    let res = client
        .post(format!("{}/auth/sign-in", base_url))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK, "sign-in failed for {email}");
    let body: serde_json::Value = res.json().await.unwrap();
    body["access_token"].as_str().unwrap().to_string()
}

async fn check(client: &reqwest::Client, base_url: &str, token: &str, path: &str) -> serde_json::Value {
    let res = client
        .get(format!("{}/access/check", base_url))
        .query(&[("path", path)])
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn("test-secret").await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/access/landing", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn expired_or_foreign_tokens_are_rejected() {
    let srv = TestServer::spawn("test-secret").await;
    let client = reqwest::Client::new();

    let expired = mint_jwt("test-secret", UserId::new(), ChronoDuration::seconds(-30));
    let foreign = mint_jwt("other-secret", UserId::new(), ChronoDuration::minutes(10));

    for token in [expired, foreign] {
        let res = client
            .get(format!("{}/whoami", srv.base_url))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn unassigned_identity_lands_on_cleaner_view() {
    let srv = TestServer::spawn("test-secret").await;
    let token = mint_jwt("test-secret", UserId::new(), ChronoDuration::minutes(10));
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/access/landing", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["to"], "/my-jobs");

    let body = check(&client, &srv.base_url, &token, "/schedule").await;
    assert_eq!(body["state"], "denied");
    assert_eq!(body["to"], "/my-jobs");
    assert_eq!(body["reason"]["kind"], "role_not_allowed");

    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["role"], "cleaner");
    assert!(body["company"].is_null());
}

#[tokio::test]
async fn complete_onboarding_is_idempotent() {
    let srv = TestServer::spawn("test-secret").await;
    let token = mint_jwt("test-secret", UserId::new(), ChronoDuration::minutes(10));
    let client = reqwest::Client::new();

    let request = json!({
        "company_name": "Sunrise Cleaning",
        "phone": "555-0199",
        "selected_plan": "trial",
        "full_name": "Alex Kim",
    });

    let res = client
        .post(format!("{}/functions/v1/complete-onboarding", srv.base_url))
        .bearer_auth(&token)
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let first: serde_json::Value = res.json().await.unwrap();
    assert_eq!(first["success"], true);
    assert_eq!(first["company"]["subscription_status"], "trialing");

    let res = client
        .post(format!("{}/functions/v1/complete-onboarding", srv.base_url))
        .bearer_auth(&token)
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let second: serde_json::Value = res.json().await.unwrap();
    assert_eq!(second["created"], false);
    assert_eq!(second["company"]["id"], first["company"]["id"]);

    let res = client
        .get(format!("{}/access/landing", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["to"], "/dashboard");
}

#[tokio::test]
async fn manage_company_is_owner_only() {
    let srv = TestServer::spawn("test-secret").await;
    let token = mint_jwt("test-secret", UserId::new(), ChronoDuration::minutes(10));
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/functions/v1/manage-company", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "action": "list" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn provisioned_admin_can_unlock_a_module() {
    let srv = TestServer::spawn("test-secret").await;
    let client = reqwest::Client::new();
    let owner = sign_in(&client, &srv.base_url, OWNER_EMAIL, OWNER_PASSWORD).await;

    // Owner provisions a company with an admin.
    let res = client
        .post(format!("{}/functions/v1/manage-company", srv.base_url))
        .bearer_auth(&owner)
        .json(&json!({
            "action": "create",
            "company_name": "Gleam Team",
            "plan": "pro",
            "admin_email": "admin@gleam.test",
            "admin_full_name": "Sam Ortiz",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created: serde_json::Value = res.json().await.unwrap();
    let temporary = created["temporary_password"].as_str().unwrap().to_string();
    let company_id = created["company"]["id"].as_str().unwrap().to_string();

    let admin = sign_in(&client, &srv.base_url, "admin@gleam.test", &temporary).await;

    // Route module is off for a new company.
    let body = check(&client, &srv.base_url, &admin, "/routes").await;
    assert_eq!(body["state"], "denied");
    assert_eq!(body["to"], "/settings/billing?upgrade=route");

    let res = client
        .patch(format!("{}/company", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "route_enabled": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = check(&client, &srv.base_url, &admin, "/routes").await;
    assert_eq!(body["state"], "permitted");

    // Suspend through the owner console.
    let res = client
        .post(format!("{}/functions/v1/manage-company", srv.base_url))
        .bearer_auth(&owner)
        .json(&json!({ "action": "suspend", "company_id": company_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["company"]["subscription_status"], "canceled");

    // Status belongs to the owner console, not to company settings.
    let res = client
        .patch(format!("{}/company", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "subscription_status": "active" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Admin replaces the one-time password.
    let res = client
        .post(format!("{}/auth/update-password", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "password": "a-better-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    sign_in(&client, &srv.base_url, "admin@gleam.test", "a-better-password").await;
}

#[tokio::test]
async fn explain_reports_each_check() {
    let srv = TestServer::spawn("test-secret").await;
    let token = mint_jwt("test-secret", UserId::new(), ChronoDuration::minutes(10));
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/access/explain", srv.base_url))
        .query(&[("path", "/reports")])
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let checks = body["checks"].as_array().unwrap();
    assert!(checks.iter().any(|c| c["check"] == "role" && c["outcome"] == "failed"));
    assert!(checks.iter().any(|c| c["check"] == "tier" && c["outcome"] == "skipped"));
}

#[tokio::test]
async fn bad_credentials_and_reset_requests() {
    let srv = TestServer::spawn("test-secret").await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/auth/sign-in", srv.base_url))
        .json(&json!({ "email": OWNER_EMAIL, "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(format!("{}/auth/reset-password", srv.base_url))
        .json(&json!({ "email": "nobody@tidyops.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn signed_out_token_is_rejected() {
    let srv = TestServer::spawn("test-secret").await;
    let client = reqwest::Client::new();
    let token = sign_in(&client, &srv.base_url, OWNER_EMAIL, OWNER_PASSWORD).await;

    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(format!("{}/auth/sign-out", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
}
