//! In-process collaborators.
//!
//! Each store keeps its primary table and secondary indices behind one lock so an
//! insert or delete updates all of them together. Locks are never held across an await.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{ExternalUser, IdentityProvider, SessionStore, UserStore};
use crate::clock::Clock;
use crate::error::{IdentityError, IdentityResult};
use crate::ident::{Page, SessionId, TenantId, UserId};
use crate::identity::{ProviderClaims, SessionContext, UserPatch, UserProfile};
use crate::phone::{CanonicalPhone, PhoneNormalizer};

// ---- users ----

#[derive(Default)]
struct UserTables {
    rows: BTreeMap<(TenantId, UserId), UserProfile>,
    by_phone: HashMap<(TenantId, CanonicalPhone), UserId>,
    by_email: HashMap<(TenantId, String), UserId>,
}

impl UserTables {
    fn lookup(&self, tenant: &TenantId, user: Option<&UserId>) -> Option<UserProfile> {
        let user = user?;
        self.rows.get(&(tenant.clone(), user.clone())).cloned()
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    tables: RwLock<UserTables>,
}

impl MemoryUserStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.tables.read().rows.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, profile: UserProfile) -> IdentityResult<UserProfile> {
        let mut t = self.tables.write();
        let tenant = profile.tenant_id.clone();
        let key = (tenant.clone(), profile.user_id.clone());
        if t.rows.contains_key(&key) {
            return Err(IdentityError::duplicate(&tenant, "user_id"));
        }
        let phone_key = (tenant.clone(), profile.canonical_phone.clone());
        if t.by_phone.contains_key(&phone_key) {
            return Err(IdentityError::duplicate(&tenant, "phone"));
        }
        let email_key = profile.email.clone().map(|e| (tenant.clone(), e));
        if let Some(k) = &email_key {
            if t.by_email.contains_key(k) {
                return Err(IdentityError::duplicate(&tenant, "email"));
            }
        }
        t.by_phone.insert(phone_key, profile.user_id.clone());
        if let Some(k) = email_key {
            t.by_email.insert(k, profile.user_id.clone());
        }
        t.rows.insert(key, profile.clone());
        Ok(profile)
    }

    async fn get_user(&self, tenant: &TenantId, user: &UserId) -> IdentityResult<Option<UserProfile>> {
        Ok(self.tables.read().lookup(tenant, Some(user)))
    }

    async fn get_user_by_phone(&self, tenant: &TenantId, phone: &CanonicalPhone) -> IdentityResult<Option<UserProfile>> {
        let t = self.tables.read();
        let user = t.by_phone.get(&(tenant.clone(), phone.clone()));
        Ok(t.lookup(tenant, user))
    }

    async fn get_user_by_email(&self, tenant: &TenantId, email: &str) -> IdentityResult<Option<UserProfile>> {
        let t = self.tables.read();
        let user = t.by_email.get(&(tenant.clone(), email.to_string()));
        Ok(t.lookup(tenant, user))
    }

    async fn update_user(&self, tenant: &TenantId, user: &UserId, patch: &UserPatch, now: DateTime<Utc>) -> IdentityResult<UserProfile> {
        let mut t = self.tables.write();
        let key = (tenant.clone(), user.clone());
        let Some(current_email) = t.rows.get(&key).map(|p| p.email.clone()) else {
            return Err(IdentityError::user_not_found(tenant, user));
        };
        if let Some(new_email) = patch.email.as_ref().filter(|e| Some(*e) != current_email.as_ref()) {
            let new_key = (tenant.clone(), new_email.clone());
            if t.by_email.get(&new_key).is_some_and(|owner| owner != user) {
                return Err(IdentityError::duplicate(tenant, "email"));
            }
            if let Some(old) = current_email {
                t.by_email.remove(&(tenant.clone(), old));
            }
            t.by_email.insert(new_key, user.clone());
        }
        let row = t.rows.get_mut(&key).ok_or_else(|| IdentityError::user_not_found(tenant, user))?;
        if let Some(email) = &patch.email {
            row.email = Some(email.clone());
        }
        if let Some(name) = &patch.display_name {
            row.display_name = Some(name.clone());
        }
        if let Some(metadata) = &patch.metadata {
            row.metadata = Some(metadata.clone());
        }
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn delete_user(&self, tenant: &TenantId, user: &UserId) -> IdentityResult<bool> {
        let mut t = self.tables.write();
        let Some(profile) = t.rows.remove(&(tenant.clone(), user.clone())) else {
            return Ok(false);
        };
        t.by_phone.remove(&(tenant.clone(), profile.canonical_phone));
        if let Some(email) = profile.email {
            t.by_email.remove(&(tenant.clone(), email));
        }
        Ok(true)
    }

    async fn list_users(&self, tenant: &TenantId, page: Page) -> IdentityResult<Vec<UserProfile>> {
        let t = self.tables.read();
        let start = (tenant.clone(), UserId::trusted(""));
        let out = t
            .rows
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|((row_tenant, _), _)| row_tenant == tenant)
            .skip(page.offset)
            .take(page.limit)
            .map(|(_, p)| p.clone())
            .collect();
        Ok(out)
    }
}

// ---- sessions ----

#[derive(Default)]
struct SessionTables {
    sessions: HashMap<SessionId, SessionContext>,
    by_user: HashMap<(TenantId, UserId), HashSet<SessionId>>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    tables: RwLock<SessionTables>,
}

impl MemorySessionStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.tables.read().sessions.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: SessionContext) -> IdentityResult<()> {
        let mut t = self.tables.write();
        t.by_user
            .entry((session.tenant_id.clone(), session.user_id.clone()))
            .or_default()
            .insert(session.session_id.clone());
        t.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> IdentityResult<Option<SessionContext>> {
        Ok(self.tables.read().sessions.get(id).cloned())
    }

    async fn delete_session(&self, id: &SessionId) -> IdentityResult<bool> {
        let mut t = self.tables.write();
        let Some(session) = t.sessions.remove(id) else {
            return Ok(false);
        };
        let owner = (session.tenant_id, session.user_id);
        if let Some(set) = t.by_user.get_mut(&owner) {
            set.remove(id);
            if set.is_empty() {
                t.by_user.remove(&owner);
            }
        }
        Ok(true)
    }

    async fn delete_user_sessions(&self, tenant: &TenantId, user: &UserId) -> IdentityResult<usize> {
        let mut t = self.tables.write();
        let Some(ids) = t.by_user.remove(&(tenant.clone(), user.clone())) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| t.sessions.remove(*id).is_some()).count())
    }
}

// ---- identity provider ----

#[derive(Default)]
struct ProviderTables {
    users: HashMap<String, ExternalUser>,
    by_email: HashMap<String, String>,
    by_phone: HashMap<String, String>,
    sessions: HashMap<String, ProviderClaims>,
    members: HashMap<TenantId, Vec<String>>,
}

/// Stand-in for an external identity provider. Users are global; organizations
/// hold member lists. The member directory can be switched off to simulate an outage.
pub struct MemoryIdentityProvider {
    tables: RwLock<ProviderTables>,
    clock: Arc<dyn Clock>,
    phones: PhoneNormalizer,
    directory_reachable: AtomicBool,
    membership_queries: AtomicUsize,
}

impl MemoryIdentityProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(ProviderTables::default()),
            clock,
            phones: PhoneNormalizer::default(),
            directory_reachable: AtomicBool::new(true),
            membership_queries: AtomicUsize::new(0),
        }
    }

    /// Phone index key: canonical when the stored value normalises, raw otherwise.
    fn phone_key(&self, raw: &str) -> String {
        self.phones.normalize(raw).map(|p| p.as_str().to_string()).unwrap_or_else(|_| raw.to_string())
    }

    /// Insert or replace a user, keeping email/phone indices in step.
    /// The stored phone may be in any accepted shape.
    pub fn upsert_user(&self, user: ExternalUser) {
        let phone = user.phone_number.as_deref().map(|p| self.phone_key(p));
        let mut t = self.tables.write();
        if let Some(old) = t.users.remove(&user.id) {
            if let Some(e) = old.email { t.by_email.remove(&e.to_lowercase()); }
            if let Some(p) = old.phone_number { t.by_phone.remove(&self.phone_key(&p)); }
        }
        if let Some(e) = &user.email { t.by_email.insert(e.to_lowercase(), user.id.clone()); }
        if let Some(p) = phone { t.by_phone.insert(p, user.id.clone()); }
        t.users.insert(user.id.clone(), user);
    }

    pub fn remove_user(&self, id: &str) -> bool {
        let mut t = self.tables.write();
        let Some(old) = t.users.remove(id) else { return false; };
        if let Some(e) = old.email { t.by_email.remove(&e.to_lowercase()); }
        if let Some(p) = old.phone_number { t.by_phone.remove(&self.phone_key(&p)); }
        for members in t.members.values_mut() {
            members.retain(|m| m != id);
        }
        true
    }

    pub fn add_member(&self, tenant: &TenantId, user_id: &str) {
        let mut t = self.tables.write();
        let members = t.members.entry(tenant.clone()).or_default();
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_string());
        }
    }

    pub fn remove_member(&self, tenant: &TenantId, user_id: &str) {
        if let Some(members) = self.tables.write().members.get_mut(tenant) {
            members.retain(|m| m != user_id);
        }
    }

    pub fn issue_session(&self, token: impl Into<String>, claims: ProviderClaims) {
        self.tables.write().sessions.insert(token.into(), claims);
    }

    pub fn revoke_session(&self, token: &str) -> bool {
        self.tables.write().sessions.remove(token).is_some()
    }

    pub fn set_directory_reachable(&self, reachable: bool) {
        self.directory_reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of member-list queries served (or refused) so far.
    pub fn membership_queries(&self) -> usize { self.membership_queries.load(Ordering::SeqCst) }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn verify_session(&self, token: &str) -> anyhow::Result<Option<ProviderClaims>> {
        let now_ms = self.clock.now().timestamp_millis();
        let t = self.tables.read();
        let claims = t
            .sessions
            .get(token)
            .filter(|c| c.exp.saturating_mul(1000) >= now_ms)
            .cloned();
        Ok(claims)
    }

    async fn get_user(&self, external_id: &str) -> anyhow::Result<Option<ExternalUser>> {
        Ok(self.tables.read().users.get(external_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<ExternalUser>> {
        let t = self.tables.read();
        Ok(t.by_email.get(&email.to_lowercase()).and_then(|id| t.users.get(id)).cloned())
    }

    async fn get_user_by_phone(&self, phone: &CanonicalPhone) -> anyhow::Result<Option<ExternalUser>> {
        let t = self.tables.read();
        Ok(t.by_phone.get(phone.as_str()).and_then(|id| t.users.get(id)).cloned())
    }

    async fn list_organization_members(&self, tenant: &TenantId) -> anyhow::Result<Vec<String>> {
        self.membership_queries.fetch_add(1, Ordering::SeqCst);
        if !self.directory_reachable.load(Ordering::SeqCst) {
            return Err(anyhow!("organization directory unreachable"));
        }
        Ok(self.tables.read().members.get(tenant).cloned().unwrap_or_default())
    }
}
