// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{
        cookie::DEFAULT_SESSION_COOKIE,
        middleware::{require_admin, require_session, resolve_session},
        AuthorizationPolicy,
    },
    models::{AddAllowedEmailRequest, AllowedEmail, Identity, SessionSummary},
    state::AppState,
};

pub mod admin;
pub mod auth;
pub mod health;

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let public = Router::new()
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", post(auth::logout));

    let authenticated = Router::new()
        .route("/auth/status", get(auth::status))
        .route("/auth/refresh", post(auth::refresh))
        .route(
            "/auth/sessions",
            get(auth::list_sessions).delete(auth::revoke_all_sessions),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    let resolved = Router::new()
        .route("/auth/whoami", get(auth::whoami))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_session));

    let admin_routes = Router::new()
        .route(
            "/admin/allowed-emails",
            get(admin::list_allowed_emails).post(admin::add_allowed_email),
        )
        .route(
            "/admin/allowed-emails/{id}",
            delete(admin::remove_allowed_email),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let mut v1_routes = public.merge(authenticated).merge(resolved);
    // Only the allow-list policy reads the list it manages.
    if matches!(state.policy(), AuthorizationPolicy::AllowList(_)) {
        v1_routes = v1_routes.merge(admin_routes);
    }
    let v1_routes = v1_routes.with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(allowed_origins))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Cross-origin access is off unless origins are listed. Listed origins may
/// send credentials, so the session cookie reaches the API from the frontend.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

struct SessionSecurity;

impl Modify for SessionSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "session",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "session_cookie",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(DEFAULT_SESSION_COOKIE))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::login,
        auth::callback,
        auth::logout,
        auth::status,
        auth::refresh,
        auth::list_sessions,
        auth::revoke_all_sessions,
        auth::whoami,
        admin::list_allowed_emails,
        admin::add_allowed_email,
        admin::remove_allowed_email,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            Identity,
            SessionSummary,
            AllowedEmail,
            AddAllowedEmailRequest,
            auth::LoginResponse,
            auth::LoginCompleted,
            auth::StatusResponse,
            auth::RefreshResponse,
            auth::RevokeAllResponse,
            auth::WhoAmIResponse,
            admin::AllowedEmailListResponse,
            admin::RemoveAllowedEmailResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SessionSecurity),
    tags(
        (name = "Auth", description = "Google login and sessions"),
        (name = "Admin", description = "Allow-list administration"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{HeaderMap, Request, StatusCode},
    };
    use chrono::Duration;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use url::Url;

    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::state::test_support::{self, BASE_ADMIN};
    use crate::storage::{AllowListRepository, IdentityRepository, MemoryStore, SessionRepository};

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    impl Reply {
        fn set_cookie(&self) -> &str {
            self.headers
                .get(header::SET_COOKIE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> Reply {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply { status, headers, body }
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn with_bearer(method: Method, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn start_login(app: &Router) -> String {
        let reply = send(app, get_req("/v1/auth/login")).await;
        assert_eq!(reply.status, StatusCode::OK);
        let url = Url::parse(reply.body["auth_url"].as_str().unwrap()).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn callback(app: &Router, state: &str, code: &str) -> Reply {
        send(app, get_req(&format!("/v1/auth/callback?state={state}&code={code}"))).await
    }

    async fn log_in(app: &Router, code: &str) -> String {
        let state = start_login(app).await;
        let reply = callback(app, &state, code).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        reply.body["session_token"].as_str().unwrap().to_string()
    }

    type Fixture = (Arc<ManualClock>, Arc<MemoryStore>);

    fn app() -> (Router, Fixture) {
        let (state, clock, store) = test_support::state();
        (router(state, &[]), (clock, store))
    }

    #[tokio::test]
    async fn login_returns_authorization_url_with_pkce() {
        let (app, _) = app();
        let reply = send(&app, get_req("/v1/auth/login")).await;

        assert_eq!(reply.status, StatusCode::OK);
        let auth_url = reply.body["auth_url"].as_str().unwrap();
        assert!(auth_url.starts_with("https://idp.example.test/auth?state="));
        assert!(auth_url.contains("code_challenge="));
        assert!(reply.body["expires_at"].is_string());
    }

    #[tokio::test]
    async fn callback_sets_cookie_and_state_is_single_use() {
        let (app, _) = app();
        let state = start_login(&app).await;

        let reply = callback(&app, &state, &format!("root:{BASE_ADMIN}")).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["identity"]["email"], BASE_ADMIN);
        assert_eq!(reply.body["identity"]["display_name"], "ROOT");
        let cookie = reply.set_cookie();
        assert!(cookie.starts_with(&format!("{DEFAULT_SESSION_COOKIE}=")));
        assert!(cookie.contains("HttpOnly"));

        let replay = callback(&app, &state, &format!("root:{BASE_ADMIN}")).await;
        assert_eq!(replay.status, StatusCode::BAD_REQUEST);
        assert_eq!(replay.body["error_code"], "invalid_or_expired_challenge");
    }

    #[tokio::test]
    async fn callback_rejects_unknown_state() {
        let (app, _) = app();
        let reply = callback(&app, "never-issued", &format!("root:{BASE_ADMIN}")).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(reply.set_cookie().is_empty());
    }

    #[tokio::test]
    async fn callback_rejects_identity_outside_allow_list() {
        let (app, (_, store)) = app();
        let state = start_login(&app).await;

        let reply = callback(&app, &state, "eve:eve@example.com").await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);
        assert!(reply.set_cookie().is_empty());
        assert!(store.find_identity_by_email("eve@example.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn callback_reports_provider_outage_as_retryable() {
        let (app, _) = app();
        let state = start_login(&app).await;

        let reply = callback(&app, &state, "unavailable").await;
        assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn callback_redirects_to_frontend_when_configured() {
        let settings = test_support::settings(&[("FRONTEND_BASE_URL", "https://app.example.test/")]);
        let (state, _, _) = test_support::state_with(&settings);
        let app = router(state, &[]);

        let state = start_login(&app).await;
        let ok = callback(&app, &state, &format!("root:{BASE_ADMIN}")).await;
        assert_eq!(ok.status, StatusCode::SEE_OTHER);
        assert_eq!(ok.headers[header::LOCATION], "https://app.example.test/");
        assert!(!ok.set_cookie().is_empty());

        let state = start_login(&app).await;
        let denied = callback(&app, &state, "eve:eve@example.com").await;
        assert_eq!(denied.status, StatusCode::SEE_OTHER);
        assert_eq!(
            denied.headers[header::LOCATION],
            "https://app.example.test/?error=unauthorized"
        );
    }

    #[tokio::test]
    async fn status_requires_session() {
        let (app, _) = app();
        let reply = send(&app, get_req("/v1/auth/status")).await;

        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["error_code"], "missing_credential");
    }

    #[tokio::test]
    async fn status_accepts_cookie_and_bearer() {
        let (app, _) = app();
        let token = log_in(&app, &format!("root:{BASE_ADMIN}")).await;

        let by_bearer = send(&app, with_bearer(Method::GET, "/v1/auth/status", &token)).await;
        assert_eq!(by_bearer.status, StatusCode::OK);
        assert_eq!(by_bearer.body["identity"]["email"], BASE_ADMIN);

        let by_cookie = Request::get("/v1/auth/status")
            .header(header::COOKIE, format!("{DEFAULT_SESSION_COOKIE}={token}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, by_cookie).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let (app, (clock, _)) = app();
        let token = log_in(&app, &format!("root:{BASE_ADMIN}")).await;

        clock.advance(Duration::hours(25));
        let reply = send(&app, with_bearer(Method::GET, "/v1/auth/status", &token)).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["error_code"], "session_expired");
    }

    #[tokio::test]
    async fn refresh_extends_expiry() {
        let (app, (clock, _)) = app();
        let token = log_in(&app, &format!("root:{BASE_ADMIN}")).await;
        let before = send(&app, with_bearer(Method::GET, "/v1/auth/status", &token)).await;

        clock.advance(Duration::hours(12));
        let refreshed = send(&app, with_bearer(Method::POST, "/v1/auth/refresh", &token)).await;
        assert_eq!(refreshed.status, StatusCode::OK);
        assert_ne!(refreshed.body["expires_at"], before.body["session_expires_at"]);
        assert!(!refreshed.set_cookie().is_empty());

        clock.advance(Duration::hours(20));
        let still_valid = send(&app, with_bearer(Method::GET, "/v1/auth/status", &token)).await;
        assert_eq!(still_valid.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn logout_revokes_and_clears_cookie() {
        let (app, _) = app();
        let token = log_in(&app, &format!("root:{BASE_ADMIN}")).await;

        let reply = send(&app, with_bearer(Method::POST, "/v1/auth/logout", &token)).await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);
        assert!(reply.set_cookie().contains("Max-Age=0"));

        let after = send(&app, with_bearer(Method::GET, "/v1/auth/status", &token)).await;
        assert_eq!(after.status, StatusCode::UNAUTHORIZED);
        assert_eq!(after.body["error_code"], "invalid_session");
    }

    #[tokio::test]
    async fn logout_without_session_still_succeeds() {
        let (app, _) = app();
        let reply = send(&app, Request::post("/v1/auth/logout").body(Body::empty()).unwrap()).await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn sessions_list_and_revoke_all() {
        let (app, _) = app();
        let first = log_in(&app, &format!("root:{BASE_ADMIN}")).await;
        let second = log_in(&app, &format!("root:{BASE_ADMIN}")).await;

        let listed = send(&app, with_bearer(Method::GET, "/v1/auth/sessions", &first)).await;
        assert_eq!(listed.status, StatusCode::OK);
        let sessions = listed.body.as_array().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(
            sessions.iter().filter(|s| s["current"] == json!(true)).count(),
            1
        );

        let revoked = send(&app, with_bearer(Method::DELETE, "/v1/auth/sessions", &first)).await;
        assert_eq!(revoked.status, StatusCode::OK);
        assert_eq!(revoked.body["revoked"], 2);

        let after = send(&app, with_bearer(Method::GET, "/v1/auth/status", &second)).await;
        assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn whoami_is_anonymous_without_session() {
        let (app, _) = app();

        let anonymous = send(&app, get_req("/v1/auth/whoami")).await;
        assert_eq!(anonymous.status, StatusCode::OK);
        assert_eq!(anonymous.body, json!({ "authenticated": false }));

        let stale = send(&app, with_bearer(Method::GET, "/v1/auth/whoami", "stale")).await;
        assert_eq!(stale.status, StatusCode::OK);
        assert_eq!(stale.body["authenticated"], false);

        let token = log_in(&app, &format!("root:{BASE_ADMIN}")).await;
        let known = send(&app, with_bearer(Method::GET, "/v1/auth/whoami", &token)).await;
        assert_eq!(known.body["authenticated"], true);
        assert_eq!(known.body["identity"]["email"], BASE_ADMIN);
    }

    #[tokio::test]
    async fn admin_routes_follow_policy() {
        let (app, (_, store)) = app();

        let anonymous = send(&app, get_req("/v1/admin/allowed-emails")).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

        store.add_allowed("ada@example.com", chrono::Utc::now()).unwrap();
        let root = log_in(&app, &format!("root:{BASE_ADMIN}")).await;
        let ada = log_in(&app, "ada:ada@example.com").await;

        let listed = send(&app, with_bearer(Method::GET, "/v1/admin/allowed-emails", &root)).await;
        assert_eq!(listed.status, StatusCode::OK);
        assert_eq!(listed.body["total"], 2);
        assert_eq!(listed.body["emails"][0]["email"], BASE_ADMIN);

        // Allow-listed users are admitted by the policy, so they administer too.
        let by_ada = send(&app, with_bearer(Method::GET, "/v1/admin/allowed-emails", &ada)).await;
        assert_eq!(by_ada.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn single_principal_forbids_other_sessions() {
        let settings = test_support::settings(&[
            ("AUTH_POLICY", "single_principal"),
            ("AUTHORIZED_EMAIL", "owner@example.com"),
        ]);
        let (state, _, _) = test_support::state_with(&settings);
        let app = router(state, &[]);

        let owner = log_in(&app, "owner:owner@example.com").await;
        let status = send(&app, with_bearer(Method::GET, "/v1/auth/status", &owner)).await;
        assert_eq!(status.status, StatusCode::OK);

        let state = start_login(&app).await;
        let other = callback(&app, &state, &format!("root:{BASE_ADMIN}")).await;
        assert_eq!(other.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn allow_list_admin_is_not_mounted_for_single_principal() {
        let settings = test_support::settings(&[
            ("AUTH_POLICY", "single_principal"),
            ("AUTHORIZED_EMAIL", "owner@example.com"),
        ]);
        let (state, _, _) = test_support::state_with(&settings);
        let app = router(state, &[]);
        let owner = log_in(&app, "owner:owner@example.com").await;

        let list = send(&app, with_bearer(Method::GET, "/v1/admin/allowed-emails", &owner)).await;
        assert_eq!(list.status, StatusCode::NOT_FOUND);

        let add = send(
            &app,
            Request::post("/v1/admin/allowed-emails")
                .header(header::AUTHORIZATION, format!("Bearer {owner}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "email": "ada@example.com" }).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(add.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn add_and_remove_allowed_email() {
        let (app, (_, store)) = app();
        let root = log_in(&app, &format!("root:{BASE_ADMIN}")).await;

        let add = |email: &str| {
            Request::post("/v1/admin/allowed-emails")
                .header(header::AUTHORIZATION, format!("Bearer {root}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "email": email }).to_string()))
                .unwrap()
        };

        let created = send(&app, add(" Ada@Example.com ")).await;
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(created.body["email"], "ada@example.com");

        assert_eq!(send(&app, add("ada@example.com")).await.status, StatusCode::CONFLICT);
        assert_eq!(send(&app, add("not-an-email")).await.status, StatusCode::BAD_REQUEST);

        let ada = log_in(&app, "ada:ada@example.com").await;
        let id = created.body["id"].as_str().unwrap();
        let removed = send(
            &app,
            with_bearer(Method::DELETE, &format!("/v1/admin/allowed-emails/{id}"), &root),
        )
        .await;
        assert_eq!(removed.status, StatusCode::OK);
        assert_eq!(removed.body["revoked_sessions"], 1);
        assert!(store.get_session(&ada).unwrap().is_none());

        let base_id = store
            .list_allowed()
            .unwrap()
            .into_iter()
            .find(|e| e.is_base_admin)
            .unwrap()
            .id;
        let protected = send(
            &app,
            with_bearer(Method::DELETE, &format!("/v1/admin/allowed-emails/{base_id}"), &root),
        )
        .await;
        assert_eq!(protected.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_reports_store() {
        let (app, _) = app();
        let reply = send(&app, get_req("/health")).await;

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["checks"]["store"], "ok");
        assert!(reply.body["checks"].get("jwks").is_none());
        assert_eq!(send(&app, get_req("/health/live")).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let (app, _) = app();
        let reply = send(&app, get_req("/health/live")).await;
        assert!(reply.headers.contains_key("x-request-id"));
    }

    #[test]
    fn cors_ignores_invalid_origins() {
        let _ = cors_layer(&["https://app.example.test".into(), "bad\norigin".into()]);
        let _ = cors_layer(&[]);
    }
}
