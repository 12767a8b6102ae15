//! Delegated-mode integration tests: an external identity provider owns users,
//! sessions and organization membership. Covers claims mapping, membership gating
//! of global lookups, fail-closed behaviour and the operations the provider owns.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration};
use serde_json::json;

use tenant_identity::clock::ManualClock;
use tenant_identity::config::IdentityConfig;
use tenant_identity::error::{AppError, IdentityError};
use tenant_identity::ident::{Page, TenantId};
use tenant_identity::identity::{
    Credentials, DeploymentMode, IdentityService, InvalidReason, NewUser, ProviderClaims, SessionValidation, UserPatch,
};
use tenant_identity::storage::{ExternalUser, MemoryIdentityProvider};

const NOW_SECS: i64 = 1_700_000_100;

struct Harness {
    service: IdentityService,
    idp: Arc<MemoryIdentityProvider>,
    clock: Arc<ManualClock>,
}

fn harness_with(config: IdentityConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(NOW_SECS, 0).unwrap()));
    let idp = Arc::new(MemoryIdentityProvider::new(clock.clone()));
    let service = IdentityService::with_clock(DeploymentMode::delegated(idp.clone()), config, clock.clone());
    Harness { service, idp, clock }
}

fn harness() -> Harness { harness_with(IdentityConfig::default()) }

fn external(id: &str, phone: &str, email: &str) -> ExternalUser {
    ExternalUser {
        id: id.into(),
        phone_number: Some(phone.into()),
        email: Some(email.into()),
        first_name: Some("Ada".into()),
        last_name: Some("Obi".into()),
        metadata: None,
        created_at: 1_690_000_000_000,
        updated_at: 1_690_000_000_000,
    }
}

fn claims(sub: &str, org: Option<&str>, role: Option<&str>, roles: &[&str]) -> ProviderClaims {
    ProviderClaims {
        sub: sub.into(),
        sid: format!("sess_{sub}"),
        org_id: org.map(String::from),
        org_role: role.map(String::from),
        metadata: json!({ "roles": roles }).as_object().cloned(),
        iat: NOW_SECS - 100,
        exp: NOW_SECS + 3_600,
    }
}

/// user_1 is a member of orgA only.
fn seeded() -> Harness {
    let h = harness();
    h.idp.upsert_user(external("user_1", "+2348012345678", "ada@example.com"));
    h.idp.add_member(&TenantId::new("orgA").unwrap(), "user_1");
    h.idp.issue_session("tok_1", claims("user_1", Some("orgA"), Some("admin"), &["billing"]));
    h
}

#[tokio::test]
async fn claims_become_tenant_context_in_role_order() -> Result<()> {
    let h = seeded();
    let ctx = h.service.assert_tenant_context("tok_1").await?;
    assert_eq!(ctx.tenant_id.as_str(), "orgA");
    assert_eq!(ctx.user_id.as_str(), "user_1");
    assert_eq!(ctx.roles, vec!["admin", "billing"]);
    assert_eq!(ctx.session_id.as_str(), "sess_user_1");
    assert_eq!(ctx.expires_at.timestamp(), NOW_SECS + 3_600);

    let v = h.service.validate_session("tok_1").await?;
    let session = v.context().expect("valid");
    assert_eq!(session.metadata.as_ref().and_then(|m| m.get("roles")), Some(&json!(["billing"])));
    Ok(())
}

#[tokio::test]
async fn get_user_is_gated_by_membership() -> Result<()> {
    let h = seeded();
    let in_a = h.service.get_user("orgA", "user_1").await?.expect("member of orgA");
    assert_eq!(in_a.tenant_id.as_str(), "orgA");
    assert_eq!(in_a.canonical_phone.as_str(), "+2348012345678");
    assert_eq!(in_a.display_name.as_deref(), Some("Ada Obi"));
    assert_eq!(in_a.created_at.timestamp_millis(), 1_690_000_000_000);

    assert_eq!(h.service.get_user("orgB", "user_1").await?, None);
    Ok(())
}

#[tokio::test]
async fn phone_and_email_lookups_do_not_leak_across_tenants() -> Result<()> {
    let h = seeded();
    let by_phone = h.service.get_user_by_phone("orgA", "08012345678").await?;
    assert_eq!(by_phone.map(|u| u.user_id.as_str().to_string()).as_deref(), Some("user_1"));
    assert_eq!(h.service.get_user_by_phone("orgB", "08012345678").await?, None);

    assert!(h.service.get_user_by_email("orgA", "ADA@example.com").await?.is_some());
    assert_eq!(h.service.get_user_by_email("orgB", "ada@example.com").await?, None);
    assert_eq!(h.service.get_user_by_email("orgA", "nobody@example.com").await?, None);
    Ok(())
}

#[tokio::test]
async fn revoked_membership_takes_effect_on_next_call() -> Result<()> {
    let h = seeded();
    let org_a = TenantId::new("orgA")?;
    assert!(h.service.resolve_identity("tok_1").await.is_ok());

    h.idp.remove_member(&org_a, "user_1");
    let err = h.service.resolve_identity("tok_1").await.unwrap_err();
    assert!(matches!(err, IdentityError::UnresolvableIdentity { .. }));
    assert_eq!(h.service.get_user("orgA", "user_1").await?, None);
    Ok(())
}

#[tokio::test]
async fn unreachable_directory_hides_users_instead_of_failing_open() -> Result<()> {
    let h = seeded();
    h.idp.set_directory_reachable(false);

    assert_eq!(h.service.get_user("orgA", "user_1").await?, None);
    assert_eq!(h.service.get_user_by_phone("orgA", "08012345678").await?, None);
    assert!(matches!(h.service.resolve_identity("tok_1").await, Err(IdentityError::UnresolvableIdentity { .. })));

    // Listing has no per-user fallback, so the outage surfaces as a backend error.
    let err = h.service.list_users("orgA", None).await.unwrap_err();
    assert!(matches!(err, IdentityError::Backend(_)));
    let app = AppError::from(err);
    assert_eq!(app.http_status(), 503);
    assert!(!app.message().contains("unreachable"));
    Ok(())
}

#[tokio::test]
async fn unknown_or_expired_provider_tokens_are_invalid() -> Result<()> {
    let h = seeded();
    assert_eq!(h.service.validate_session("tok_missing").await?, SessionValidation::Invalid(InvalidReason::Rejected));
    let err = h.service.assert_tenant_context("tok_missing").await.unwrap_err();
    assert!(matches!(err, IdentityError::Unauthorized { ref reason } if reason == "invalid or expired session"));

    h.clock.advance(Duration::seconds(3_601));
    assert!(!h.service.validate_session("tok_1").await?.is_valid());

    h.clock.set(DateTime::from_timestamp(NOW_SECS, 0).unwrap());
    assert!(h.idp.revoke_session("tok_1"));
    assert!(matches!(h.service.resolve_identity("tok_1").await, Err(IdentityError::UnresolvableIdentity { .. })));
    Ok(())
}

#[tokio::test]
async fn malformed_claims_are_reported_not_swallowed() -> Result<()> {
    let h = seeded();
    let mut bad = claims("user_1", Some("orgA"), None, &[]);
    bad.iat = -5;
    h.idp.issue_session("tok_bad", bad);
    let err = h.service.validate_session("tok_bad").await.unwrap_err();
    assert!(matches!(err, IdentityError::MalformedClaims(_)));
    Ok(())
}

#[tokio::test]
async fn unscoped_sessions_resolve_to_no_tenant_and_can_be_refused() -> Result<()> {
    let lenient = harness();
    lenient.idp.issue_session("tok_free", claims("user_9", None, None, &[]));
    let ctx = lenient.service.assert_tenant_context("tok_free").await?;
    assert!(ctx.tenant_id.is_no_tenant());
    assert!(!ctx.has_tenant());
    // Nobody is a member of the sentinel, even if the provider says otherwise.
    lenient.idp.upsert_user(external("user_9", "+2348000000009", "n@example.com"));
    lenient.idp.add_member(&TenantId::no_tenant(), "user_9");
    assert!(lenient.service.resolve_identity("tok_free").await.is_err());
    assert!(lenient.service.list_users("default", None).await?.is_empty());

    let strict = harness_with(IdentityConfig { reject_unscoped_claims: true, ..IdentityConfig::default() });
    strict.idp.issue_session("tok_free", claims("user_9", None, None, &[]));
    let err = strict.service.assert_tenant_context("tok_free").await.unwrap_err();
    assert!(matches!(err, IdentityError::Unauthorized { ref reason } if reason == "session has no tenant"));
    Ok(())
}

#[tokio::test]
async fn list_users_pages_over_member_list() -> Result<()> {
    let h = harness();
    let org = TenantId::new("orgA")?;
    for i in 0..4 {
        let id = format!("user_{i}");
        h.idp.upsert_user(external(&id, &format!("+23480000000{i:02}"), &format!("{id}@example.com")));
        h.idp.add_member(&org, &id);
    }
    h.idp.upsert_user(external("outsider", "+2348000000099", "out@example.com"));
    // Member with no provider record is skipped.
    h.idp.add_member(&org, "ghost");

    let all = h.service.list_users("orgA", None).await?;
    let ids: Vec<&str> = all.iter().map(|u| u.user_id.as_str()).collect();
    assert_eq!(ids, vec!["user_0", "user_1", "user_2", "user_3"]);
    assert!(all.iter().all(|u| u.tenant_id.as_str() == "orgA"));

    let page = h.service.list_users("orgA", Some(Page::new(2, 1))).await?;
    assert_eq!(page.iter().map(|u| u.user_id.as_str()).collect::<Vec<_>>(), vec!["user_1", "user_2"]);
    assert!(h.service.list_users("orgB", None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn provider_owned_operations_are_unsupported() -> Result<()> {
    let h = seeded();
    let unsupported = |r: Result<(), IdentityError>, op: &str| match r {
        Err(IdentityError::UnsupportedInMode { operation, mode }) => {
            assert_eq!(operation, op);
            assert_eq!(mode, "delegated");
        }
        other => panic!("expected UnsupportedInMode for {op}, got {other:?}"),
    };

    let new_user = NewUser { tenant_id: "orgA".into(), phone: "08012345678".into(), ..Default::default() };
    unsupported(h.service.create_user(new_user).await.map(|_| ()), "create_user");
    unsupported(h.service.update_user("orgA", "user_1", UserPatch::default()).await.map(|_| ()), "update_user");
    unsupported(h.service.delete_user("orgA", "user_1").await.map(|_| ()), "delete_user");
    let creds = Credentials { tenant_id: "orgA".into(), phone: "08012345678".into(), secret: "pw".into() };
    unsupported(h.service.authenticate(&creds, vec![]).await.map(|_| ()), "authenticate");
    unsupported(h.service.logout("tok_1").await.map(|_| ()), "logout");
    unsupported(h.service.logout_all("orgA", "user_1").await.map(|_| ()), "logout_all");

    // Input is still validated first.
    let bad = NewUser { tenant_id: "orgA".into(), phone: "nope".into(), ..Default::default() };
    assert!(matches!(h.service.create_user(bad).await, Err(IdentityError::InvalidPhoneFormat(_))));
    assert_eq!(h.service.mode().name(), "delegated");
    Ok(())
}

#[tokio::test]
async fn concurrent_membership_checks_each_query_the_directory() -> Result<()> {
    let h = seeded();
    let before = h.idp.membership_queries();
    let calls = (0..10).map(|_| h.service.get_user("orgA", "user_1"));
    for r in futures::future::join_all(calls).await {
        assert!(r?.is_some());
    }
    assert_eq!(h.idp.membership_queries() - before, 10);
    Ok(())
}
