//! Cached role/tenant resolution.
//!
//! Each resolver wraps a [`ResolverCache`] keyed by user id. Entries expire after
//! a TTL, concurrent misses for the same key share one backend call, and an
//! invalidation racing an in-flight fetch for the same key wins (the stale
//! result is returned to its caller but never stored). Expired entries are
//! pruned on insert.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tidyops_auth::{Role, Tenant, effective_role};
use tidyops_core::{TenantId, UserId};

use crate::backend::{BackendError, Directory};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
}

/// One key's fetch queue plus its invalidation counter.
#[derive(Debug, Default)]
struct Inflight {
    turn: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
}

#[derive(Debug)]
pub struct ResolverCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    inflight: Mutex<HashMap<K, Arc<Inflight>>>,
    /// Bumped by bulk invalidation; per-key invalidation bumps the key's slot.
    generation: AtomicU64,
}

impl<K, V> ResolverCache<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value if it has not expired.
    pub fn get_fresh(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Cached value regardless of age.
    pub fn peek(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).map(|e| e.value.clone())
    }

    /// Store `value`, dropping every other entry that has outlived the TTL.
    pub fn insert(&self, key: K, value: V) {
        if let Ok(mut entries) = self.entries.lock() {
            let ttl = self.ttl;
            entries.retain(|_, e| e.fetched_at.elapsed() < ttl);
            entries.insert(
                key,
                CacheEntry {
                    value,
                    fetched_at: Instant::now(),
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self, key: &K) {
        if let Ok(inflight) = self.inflight.lock() {
            if let Some(slot) = inflight.get(key) {
                slot.epoch.fetch_add(1, Ordering::SeqCst);
            }
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    /// Drop every entry whose value matches `pred`.
    pub fn invalidate_where(&self, pred: impl Fn(&V) -> bool) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, e| !pred(&e.value));
        }
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Return the fresh cached value or run `fetch`, sharing one fetch between
    /// concurrent callers for the same key. Errors are never cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V, BackendError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, BackendError>>,
    {
        if let Some(v) = self.get_fresh(&key) {
            return Ok(v);
        }

        let slot = self.slot(key)?;
        let _turn = slot.turn.lock().await;

        // Someone ahead of us in the queue may have filled the slot.
        if let Some(v) = self.get_fresh(&key) {
            self.release_slot(key, &slot);
            return Ok(v);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let epoch = slot.epoch.load(Ordering::SeqCst);
        let result = fetch().await;
        if let Ok(value) = &result {
            let unchanged = self.generation.load(Ordering::SeqCst) == generation
                && slot.epoch.load(Ordering::SeqCst) == epoch;
            if unchanged {
                self.insert(key, value.clone());
            }
        }
        self.release_slot(key, &slot);
        result
    }

    fn slot(&self, key: K) -> Result<Arc<Inflight>, BackendError> {
        let mut inflight = self
            .inflight
            .lock()
            .map_err(|_| BackendError::unavailable("resolver lock poisoned"))?;
        Ok(inflight.entry(key).or_default().clone())
    }

    fn release_slot(&self, key: K, slot: &Arc<Inflight>) {
        if let Ok(mut inflight) = self.inflight.lock() {
            // Only the last holder (map + this handle) removes the slot.
            let idle = inflight
                .get(&key)
                .is_some_and(|s| Arc::ptr_eq(s, slot) && Arc::strong_count(s) <= 2);
            if idle {
                inflight.remove(&key);
            }
        }
    }
}

/// Resolves a user's effective role from their role assignments.
pub struct RoleResolver {
    directory: Arc<dyn Directory>,
    cache: ResolverCache<UserId, Role>,
}

impl RoleResolver {
    pub fn new(directory: Arc<dyn Directory>, ttl: Duration) -> Self {
        Self {
            directory,
            cache: ResolverCache::new(ttl),
        }
    }

    /// Zero assignments resolve to the least-privileged role.
    pub async fn resolve(&self, user_id: UserId) -> Result<Role, BackendError> {
        let directory = self.directory.clone();
        self.cache
            .get_or_fetch(user_id, || async move {
                let assignments = directory.fetch_role_assignments(user_id).await?;
                let role = effective_role(&assignments);
                tracing::debug!(%user_id, role = %role, assignments = assignments.len(), "resolved role");
                Ok(role)
            })
            .await
    }

    /// Bypass the cache; used where a stale role would be a privilege leak.
    pub async fn resolve_fresh(&self, user_id: UserId) -> Result<Role, BackendError> {
        self.cache.invalidate(&user_id);
        self.resolve(user_id).await
    }

    pub fn cached(&self, user_id: UserId) -> Option<Role> {
        self.cache.peek(&user_id)
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.cache.invalidate(&user_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Resolves the tenant a user belongs to: profile first, then the company record.
pub struct TenantResolver {
    directory: Arc<dyn Directory>,
    cache: ResolverCache<UserId, Option<Tenant>>,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn Directory>, ttl: Duration) -> Self {
        Self {
            directory,
            cache: ResolverCache::new(ttl),
        }
    }

    /// `Ok(None)` when the user has no profile, no tenant link, or the linked
    /// company is gone.
    pub async fn resolve(&self, user_id: UserId) -> Result<Option<Tenant>, BackendError> {
        let directory = self.directory.clone();
        self.cache
            .get_or_fetch(user_id, || async move {
                let Some(profile) = directory.fetch_profile(user_id).await? else {
                    tracing::debug!(%user_id, "no profile; tenant unresolved to none");
                    return Ok(None);
                };
                let Some(tenant_id) = profile.tenant_id else {
                    return Ok(None);
                };
                directory.fetch_tenant(tenant_id).await
            })
            .await
    }

    pub fn cached(&self, user_id: UserId) -> Option<Option<Tenant>> {
        self.cache.peek(&user_id)
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.cache.invalidate(&user_id);
    }

    /// Drop every cached view of `tenant_id` (after a settings or status change).
    pub fn invalidate_tenant(&self, tenant_id: TenantId) {
        self.cache
            .invalidate_where(|t| t.as_ref().is_some_and(|t| t.id == tenant_id));
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, Operation};
    use chrono::Utc;
    use tidyops_auth::{Hs256Jwt, NewTenant, Profile, SubscriptionStatus, Tier};

    fn backend() -> Arc<InMemoryBackend> {
        Arc::new(
            InMemoryBackend::new(Hs256Jwt::new(b"k"), chrono::Duration::minutes(5))
                .with_latency(Duration::from_millis(20)),
        )
    }

    async fn seed_tenant(b: &InMemoryBackend, user_id: UserId) -> Tenant {
        let tenant = b
            .insert_tenant(&NewTenant {
                name: "Sparkle".to_string(),
                phone: None,
                subscription_tier: Tier::Pro,
                subscription_status: SubscriptionStatus::Active,
            })
            .await
            .unwrap();
        b.upsert_profile(&Profile {
            user_id,
            tenant_id: Some(tenant.id),
            full_name: None,
            phone: None,
        })
        .await
        .unwrap();
        tenant
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let b = backend();
        let user = UserId::new();
        b.insert_role_assignment(user, Role::Manager).await.unwrap();
        let resolver = RoleResolver::new(b.clone(), Duration::from_secs(60));

        let (a, c) = tokio::join!(resolver.resolve(user), resolver.resolve(user));
        assert_eq!(a.unwrap(), Role::Manager);
        assert_eq!(c.unwrap(), Role::Manager);
        assert_eq!(b.role_fetches(), 1);

        resolver.resolve(user).await.unwrap();
        assert_eq!(b.role_fetches(), 1);
    }

    #[tokio::test]
    async fn zero_ttl_always_refetches() {
        let b = backend();
        let user = UserId::new();
        let resolver = RoleResolver::new(b.clone(), Duration::ZERO);

        resolver.resolve(user).await.unwrap();
        resolver.resolve(user).await.unwrap();
        assert_eq!(b.role_fetches(), 2);
    }

    #[tokio::test]
    async fn no_assignments_resolve_to_cleaner() {
        let b = backend();
        let resolver = RoleResolver::new(b, Duration::from_secs(60));
        assert_eq!(resolver.resolve(UserId::new()).await.unwrap(), Role::Cleaner);
    }

    #[tokio::test]
    async fn multiple_assignments_resolve_to_most_privileged() {
        let b = backend();
        let user = UserId::new();
        b.insert_role_assignment(user, Role::Cleaner).await.unwrap();
        b.insert_role_assignment(user, Role::Admin).await.unwrap();
        let resolver = RoleResolver::new(b, Duration::from_secs(60));
        assert_eq!(resolver.resolve(user).await.unwrap(), Role::Admin);
    }

    #[tokio::test]
    async fn errors_propagate_and_are_not_cached() {
        let b = backend();
        let user = UserId::new();
        let resolver = RoleResolver::new(b.clone(), Duration::from_secs(60));

        b.fail_on(Operation::FetchRoles);
        assert!(matches!(
            resolver.resolve(user).await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(resolver.cached(user).is_none());

        b.recover(Operation::FetchRoles);
        assert_eq!(resolver.resolve(user).await.unwrap(), Role::Cleaner);
    }

    #[tokio::test]
    async fn resolve_fresh_sees_role_changes() {
        let b = backend();
        let user = UserId::new();
        let resolver = RoleResolver::new(b.clone(), Duration::from_secs(60));
        assert_eq!(resolver.resolve(user).await.unwrap(), Role::Cleaner);

        b.insert_role_assignment(user, Role::Owner).await.unwrap();
        assert_eq!(resolver.resolve(user).await.unwrap(), Role::Cleaner);
        assert_eq!(resolver.resolve_fresh(user).await.unwrap(), Role::Owner);
    }

    #[tokio::test]
    async fn invalidation_during_fetch_is_not_overwritten() {
        let b = backend();
        let user = UserId::new();
        let resolver = Arc::new(RoleResolver::new(b.clone(), Duration::from_secs(60)));

        let r = resolver.clone();
        let pending = tokio::spawn(async move { r.resolve(user).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        resolver.invalidate(user);

        assert_eq!(pending.await.unwrap().unwrap(), Role::Cleaner);
        assert!(resolver.cached(user).is_none());
    }

    #[tokio::test]
    async fn tenant_resolves_through_profile() {
        let b = backend();
        let user = UserId::new();
        let tenant = seed_tenant(&b, user).await;
        let resolver = TenantResolver::new(b.clone(), Duration::from_secs(60));

        assert_eq!(resolver.resolve(user).await.unwrap(), Some(tenant));
        assert_eq!(b.profile_fetches(), 1);
        assert_eq!(b.tenant_fetches(), 1);
    }

    #[tokio::test]
    async fn missing_profile_or_link_resolves_to_none() {
        let b = backend();
        let resolver = TenantResolver::new(b.clone(), Duration::from_secs(60));

        assert_eq!(resolver.resolve(UserId::new()).await.unwrap(), None);

        let unlinked = UserId::new();
        b.upsert_profile(&Profile {
            user_id: unlinked,
            tenant_id: None,
            full_name: Some("Pat".to_string()),
            phone: None,
        })
        .await
        .unwrap();
        assert_eq!(resolver.resolve(unlinked).await.unwrap(), None);
        assert_eq!(b.tenant_fetches(), 0);
    }

    #[tokio::test]
    async fn tenant_invalidation_drops_every_member_view() {
        let b = backend();
        let owner = UserId::new();
        let tenant = seed_tenant(&b, owner).await;
        let resolver = TenantResolver::new(b.clone(), Duration::from_secs(60));
        resolver.resolve(owner).await.unwrap();

        b.update_tenant(tenant.id, &tidyops_auth::TenantPatch::module(tidyops_auth::Module::Shield, true))
            .await
            .unwrap();
        resolver.invalidate_tenant(tenant.id);

        let refreshed = resolver.resolve(owner).await.unwrap().unwrap();
        assert!(refreshed.shield_enabled);
        assert!(refreshed.created_at <= Utc::now());
    }

    #[tokio::test]
    async fn invalidating_one_user_keeps_another_users_fetch() {
        let b = backend();
        let (alice, bob) = (UserId::new(), UserId::new());
        b.insert_role_assignment(bob, Role::TeamLead).await.unwrap();
        let resolver = Arc::new(RoleResolver::new(b.clone(), Duration::from_secs(60)));

        let r = resolver.clone();
        let pending = tokio::spawn(async move { r.resolve(bob).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        resolver.invalidate(alice);

        assert_eq!(pending.await.unwrap().unwrap(), Role::TeamLead);
        assert_eq!(resolver.cached(bob), Some(Role::TeamLead));
    }

    #[tokio::test]
    async fn bulk_invalidation_during_fetch_is_not_overwritten() {
        let b = backend();
        let user = UserId::new();
        let resolver = Arc::new(RoleResolver::new(b.clone(), Duration::from_secs(60)));

        let r = resolver.clone();
        let pending = tokio::spawn(async move { r.resolve(user).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        resolver.invalidate_all();

        assert_eq!(pending.await.unwrap().unwrap(), Role::Cleaner);
        assert!(resolver.cached(user).is_none());
    }

    #[test]
    fn insert_prunes_expired_entries() {
        let cache: ResolverCache<u32, &str> = ResolverCache::new(Duration::from_millis(10));
        cache.insert(1, "stale");
        cache.insert(2, "stale");
        std::thread::sleep(Duration::from_millis(20));

        cache.insert(3, "fresh");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(&1), None);
        assert_eq!(cache.get_fresh(&3), Some("fresh"));
    }
}
