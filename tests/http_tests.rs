//! HTTP surface end to end: a standalone service behind the axum router on an
//! ephemeral port, driven with reqwest.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use tenant_identity::config::IdentityConfig;
use tenant_identity::credentials::PasswordVault;
use tenant_identity::identity::{DeploymentMode, IdentityService};
use tenant_identity::server::{router, AppState};
use tenant_identity::storage::{MemorySessionStore, MemoryUserStore};

async fn spawn_server() -> Result<String> {
    let mode = DeploymentMode::standalone(
        Arc::new(MemoryUserStore::new()),
        Arc::new(MemorySessionStore::new()),
        Arc::new(PasswordVault::new()),
    );
    let service = Arc::new(IdentityService::new(mode, IdentityConfig::default()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(AppState { service })).await;
    });
    Ok(format!("http://{}", addr))
}

async fn create(client: &reqwest::Client, base: &str, tenant: &str, phone: &str) -> Result<Value> {
    let body = json!({"tenant_id": tenant, "phone": phone, "email": "ada@example.com", "secret": "pw"});
    let resp = client.post(format!("{base}/users")).json(&body).send().await?;
    assert_eq!(resp.status(), 201);
    Ok(resp.json::<Value>().await?["user"].clone())
}

async fn login(client: &reqwest::Client, base: &str, tenant: &str, phone: &str, secret: &str) -> Result<reqwest::Response> {
    let body = json!({"tenant_id": tenant, "phone": phone, "secret": secret, "roles": ["member"]});
    Ok(client.post(format!("{base}/auth/login")).json(&body).send().await?)
}

#[tokio::test]
async fn health_route_answers() -> Result<()> {
    let base = spawn_server().await?;
    let text = reqwest::get(format!("{base}/")).await?.text().await?;
    assert_eq!(text, "tenant-identity ok");
    Ok(())
}

#[tokio::test]
async fn login_then_resolve_with_bearer_or_cookie() -> Result<()> {
    let base = spawn_server().await?;
    let client = reqwest::Client::new();
    let user = create(&client, &base, "t1", "08012345678").await?;
    assert_eq!(user["canonical_phone"], "+2348012345678");

    let resp = login(&client, &base, "t1", "0801 234 5678", "pw").await?;
    assert_eq!(resp.status(), 200);
    let cookie = resp.headers().get("set-cookie").and_then(|v| v.to_str().ok()).map(String::from).unwrap_or_default();
    assert!(cookie.starts_with("tenant_session="));
    assert!(cookie.contains("HttpOnly"));
    let body: Value = resp.json().await?;
    let token = body["session"]["session_id"].as_str().unwrap_or_default().to_string();
    assert_eq!(token.len(), 43);

    let identity: Value = client.get(format!("{base}/auth/identity")).bearer_auth(&token).send().await?.json().await?;
    assert_eq!(identity["status"], "ok");
    assert_eq!(identity["identity"]["tenant_id"], "t1");
    assert_eq!(identity["identity"]["roles"], json!(["member"]));
    assert_eq!(identity["identity"]["profile"]["user_id"], user["user_id"]);

    let ctx = client
        .get(format!("{base}/auth/context"))
        .header("cookie", format!("tenant_session={token}"))
        .send()
        .await?;
    assert_eq!(ctx.status(), 200);
    assert_eq!(ctx.json::<Value>().await?["context"]["user_id"], user["user_id"]);

    let session: Value = client.get(format!("{base}/auth/session")).bearer_auth(&token).send().await?.json().await?;
    assert_eq!(session["session"]["status"], "valid");
    Ok(())
}

#[tokio::test]
async fn failures_map_to_status_codes() -> Result<()> {
    let base = spawn_server().await?;
    let client = reqwest::Client::new();
    create(&client, &base, "t1", "08012345678").await?;

    let dup = client.post(format!("{base}/users")).json(&json!({"tenant_id": "t1", "phone": "+2348012345678"})).send().await?;
    assert_eq!(dup.status(), 409);
    assert_eq!(dup.json::<Value>().await?["code"], "duplicate_user");

    let bad_phone = client.post(format!("{base}/users")).json(&json!({"tenant_id": "t1", "phone": "12"})).send().await?;
    assert_eq!(bad_phone.status(), 400);

    let wrong = login(&client, &base, "t1", "08012345678", "nope").await?;
    assert_eq!(wrong.status(), 401);

    let no_token = client.get(format!("{base}/auth/context")).send().await?;
    assert_eq!(no_token.status(), 401);

    let unknown = client.get(format!("{base}/auth/context")).bearer_auth("never-issued").send().await?;
    assert_eq!(unknown.status(), 401);
    assert_eq!(unknown.json::<Value>().await?["status"], "error");

    let unresolvable = client.get(format!("{base}/auth/identity")).bearer_auth("never-issued").send().await?;
    assert_eq!(unresolvable.status(), 404);

    let invalid: Value = client.get(format!("{base}/auth/session")).bearer_auth("never-issued").send().await?.json().await?;
    assert_eq!(invalid["session"], json!({"status": "invalid", "detail": "not_found"}));
    Ok(())
}

#[tokio::test]
async fn tenant_routes_are_scoped() -> Result<()> {
    let base = spawn_server().await?;
    let client = reqwest::Client::new();
    let user = create(&client, &base, "t1", "08012345678").await?;
    let id = user["user_id"].as_str().unwrap_or_default().to_string();

    assert_eq!(client.get(format!("{base}/tenants/t1/users/{id}")).send().await?.status(), 200);
    assert_eq!(client.get(format!("{base}/tenants/t2/users/{id}")).send().await?.status(), 404);

    let by_phone = client.get(format!("{base}/tenants/t1/lookup")).query(&[("phone", "08012345678")]).send().await?;
    assert_eq!(by_phone.status(), 200);
    let by_email = client.get(format!("{base}/tenants/t2/lookup")).query(&[("email", "ada@example.com")]).send().await?;
    assert_eq!(by_email.status(), 404);
    let neither = client.get(format!("{base}/tenants/t1/lookup")).send().await?;
    assert_eq!(neither.status(), 400);

    let listed: Value = client.get(format!("{base}/tenants/t1/users")).query(&[("limit", "10")]).send().await?.json().await?;
    assert_eq!(listed["users"].as_array().map(Vec::len), Some(1));
    let too_big = client.get(format!("{base}/tenants/t1/users")).query(&[("limit", "100000")]).send().await?;
    assert_eq!(too_big.status(), 400);

    let patched: Value = client
        .patch(format!("{base}/tenants/t1/users/{id}"))
        .json(&json!({"display_name": "Ada"}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(patched["user"]["display_name"], "Ada");
    Ok(())
}

#[tokio::test]
async fn logout_and_delete_revoke_sessions() -> Result<()> {
    let base = spawn_server().await?;
    let client = reqwest::Client::new();
    let user = create(&client, &base, "t1", "08012345678").await?;
    let id = user["user_id"].as_str().unwrap_or_default().to_string();

    let token_of = |v: Value| v["session"]["session_id"].as_str().unwrap_or_default().to_string();
    let first = token_of(login(&client, &base, "t1", "08012345678", "pw").await?.json().await?);
    let second = token_of(login(&client, &base, "t1", "08012345678", "pw").await?.json().await?);

    let out = client.post(format!("{base}/auth/logout")).bearer_auth(&first).send().await?;
    assert_eq!(out.status(), 200);
    assert!(out.headers().get("set-cookie").is_some());
    assert_eq!(out.json::<Value>().await?["removed"], true);
    assert_eq!(client.get(format!("{base}/auth/context")).bearer_auth(&first).send().await?.status(), 401);

    let deleted: Value = client.delete(format!("{base}/tenants/t1/users/{id}")).send().await?.json().await?;
    assert_eq!(deleted["deleted"], true);
    assert_eq!(client.get(format!("{base}/auth/context")).bearer_auth(&second).send().await?.status(), 401);
    let revoked: Value = client.post(format!("{base}/tenants/t1/users/{id}/logout-all")).send().await?.json().await?;
    assert_eq!(revoked["revoked"], 0);
    Ok(())
}
