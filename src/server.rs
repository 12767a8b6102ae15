//!
//! tenant-identity HTTP server
//! ---------------------------
//! Axum JSON surface over `IdentityService`.
//!
//! Responsibilities:
//! - Session token transport: `Authorization: Bearer <token>` or the `tenant_session` cookie.
//! - Login/logout endpoints backed by the standalone session store.
//! - Tenant-scoped user management and lookup.
//! - Identity resolution and tenant-context assertion for downstream gates.
//!
//! Every failure is answered as `{"status":"error","code":..,"message":..}` with the
//! status taken from `AppError::http_status`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::error::{AppError, IdentityError, IdentityResult};
use crate::ident::{token_fingerprint, Page};
use crate::identity::{Credentials, IdentityService, NewUser, UserPatch};

pub const SESSION_COOKIE: &str = "tenant_session";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IdentityService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "tenant-identity ok" }))
        .route("/users", post(create_user))
        .route("/tenants/{tenant}/users", get(list_users))
        .route("/tenants/{tenant}/users/{user}", get(get_user).patch(update_user).delete(delete_user))
        .route("/tenants/{tenant}/users/{user}/logout-all", post(logout_all))
        .route("/tenants/{tenant}/lookup", get(lookup_user))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(validate_session))
        .route("/auth/identity", get(resolve_identity))
        .route("/auth/context", get(tenant_context))
        .with_state(state)
}

/// Bind `bind` and serve until the listener fails.
pub async fn serve(service: Arc<IdentityService>, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "tenant_identity::server", mode = service.mode().name(), "Starting server on {}", listener.local_addr()?);
    axum::serve(listener, router(AppState { service })).await?;
    Ok(())
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie")?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some((k, v)) = p.split_once('=') {
            if k == name { return Some(v.to_string()); }
        }
    }
    None
}

/// Bearer header wins over the cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    bearer.or_else(|| parse_cookie(headers, SESSION_COOKIE))
}

fn set_session_cookie(sid: &str, max_age_secs: i64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}", SESSION_COOKIE, sid, max_age_secs)).ok()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("tenant_session=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/")
}

fn error_response(err: IdentityError) -> Response {
    if let IdentityError::Backend(e) = &err {
        error!(target: "tenant_identity::server", "backend failure: {e:#}");
    }
    let app = AppError::from(err);
    let status = StatusCode::from_u16(app.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"status":"error","code": app.code_str(),"message": app.message()}))).into_response()
}

fn reply<T: Serialize>(result: IdentityResult<T>, key: &str) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(json!({"status":"ok", key: value}))).into_response(),
        Err(e) => error_response(e),
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"status":"unauthorized"}))).into_response()
}

// ---- users ----

async fn create_user(State(state): State<AppState>, Json(payload): Json<NewUser>) -> Response {
    match state.service.create_user(payload).await {
        Ok(user) => (StatusCode::CREATED, Json(json!({"status":"ok","user": user}))).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery { limit: Option<usize>, offset: Option<usize> }

async fn list_users(State(state): State<AppState>, Path(tenant): Path<String>, Query(q): Query<PageQuery>) -> Response {
    let page = match (q.limit, q.offset) {
        (None, None) => None,
        (limit, offset) => Some(Page::new(limit.unwrap_or(state.service.config().default_page_size), offset.unwrap_or(0))),
    };
    reply(state.service.list_users(&tenant, page).await, "users")
}

async fn get_user(State(state): State<AppState>, Path((tenant, user)): Path<(String, String)>) -> Response {
    match state.service.get_user(&tenant, &user).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(json!({"status":"ok","user": profile}))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"status":"not_found"}))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_user(
    State(state): State<AppState>,
    Path((tenant, user)): Path<(String, String)>,
    Json(patch): Json<UserPatch>,
) -> Response {
    reply(state.service.update_user(&tenant, &user, patch).await, "user")
}

async fn delete_user(State(state): State<AppState>, Path((tenant, user)): Path<(String, String)>) -> Response {
    reply(state.service.delete_user(&tenant, &user).await, "deleted")
}

async fn logout_all(State(state): State<AppState>, Path((tenant, user)): Path<(String, String)>) -> Response {
    reply(state.service.logout_all(&tenant, &user).await, "revoked")
}

#[derive(Debug, Deserialize)]
struct LookupQuery { phone: Option<String>, email: Option<String> }

async fn lookup_user(State(state): State<AppState>, Path(tenant): Path<String>, Query(q): Query<LookupQuery>) -> Response {
    let found = match (q.phone, q.email) {
        (Some(phone), None) => state.service.get_user_by_phone(&tenant, &phone).await,
        (None, Some(email)) => state.service.get_user_by_email(&tenant, &email).await,
        _ => Err(IdentityError::invalid_input("lookup", "exactly one of phone or email is required")),
    };
    match found {
        Ok(Some(profile)) => (StatusCode::OK, Json(json!({"status":"ok","user": profile}))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"status":"not_found"}))).into_response(),
        Err(e) => error_response(e),
    }
}

// ---- sessions ----

#[derive(Debug, Deserialize)]
struct LoginPayload {
    #[serde(flatten)]
    credentials: Credentials,
    #[serde(default)]
    roles: Vec<String>,
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> Response {
    match state.service.authenticate(&payload.credentials, payload.roles).await {
        Ok(session) => {
            let mut headers = HeaderMap::new();
            let max_age = (session.expires_at - session.issued_at).num_seconds();
            if let Some(cookie) = set_session_cookie(session.session_id.as_str(), max_age) {
                headers.insert("Set-Cookie", cookie);
            }
            (StatusCode::OK, headers, Json(json!({"status":"ok","session": session}))).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else { return unauthorized(); };
    match state.service.logout(&token).await {
        Ok(removed) => {
            info!(target: "tenant_identity::server", sid = %token_fingerprint(&token), removed, "logout");
            let mut h = HeaderMap::new();
            h.insert("Set-Cookie", clear_session_cookie());
            (StatusCode::OK, h, Json(json!({"status":"ok","removed": removed}))).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn validate_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else { return unauthorized(); };
    reply(state.service.validate_session(&token).await, "session")
}

async fn resolve_identity(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else { return unauthorized(); };
    reply(state.service.resolve_identity(&token).await, "identity")
}

async fn tenant_context(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else { return unauthorized(); };
    reply(state.service.assert_tenant_context(&token).await, "context")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut h = HeaderMap::new();
        h.insert("cookie", HeaderValue::from_static("other=1; tenant_session=from-cookie"));
        assert_eq!(session_token(&h).as_deref(), Some("from-cookie"));
        h.insert("authorization", HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&h).as_deref(), Some("from-header"));
    }

    #[test]
    fn empty_bearer_falls_back_to_cookie() {
        let mut h = HeaderMap::new();
        h.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(session_token(&h), None);
        h.insert("cookie", HeaderValue::from_static("tenant_session=abc"));
        assert_eq!(session_token(&h).as_deref(), Some("abc"));
    }

    #[test]
    fn cookie_values_may_contain_equals() {
        let mut h = HeaderMap::new();
        h.insert("cookie", HeaderValue::from_static("tenant_session=a=b"));
        assert_eq!(parse_cookie(&h, SESSION_COOKIE).as_deref(), Some("a=b"));
    }
}
