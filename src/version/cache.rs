//! Process-wide cache of update check results
//!
//! Entries never expire on their own. Callers decide staleness (`stale_images`)
//! and drop entries after a pull (`invalidate`). Concurrent refreshes of one image
//! share a single registry round trip, and a failed refresh leaves the previous
//! entry in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, Shared, join_all};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::FETCH_STAGGER_DELAY_MS;
use crate::version::checker::ImageChecker;
use crate::version::error::{CacheError, RegistryError};
use crate::version::resolver::VersionInfo;
use crate::version::store::VersionStore;

type CheckResult = Result<VersionInfo, Arc<RegistryError>>;
type InFlightCheck = Shared<BoxFuture<'static, CheckResult>>;

pub struct UpdateCache {
    checker: Arc<dyn ImageChecker>,
    store: Option<Arc<dyn VersionStore>>,
    /// Latest successful result per image; `checked_at` is the staleness clock
    entries: RwLock<HashMap<String, VersionInfo>>,
    /// Checks currently running, shared by every caller refreshing the same image.
    /// Lock order: `in_flight` before `entries`.
    in_flight: Mutex<HashMap<String, InFlightCheck>>,
}

impl UpdateCache {
    /// In-memory cache without persistence
    pub fn new(checker: Arc<dyn ImageChecker>) -> Self {
        Self {
            checker,
            store: None,
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Cache preloaded from `store` and writing every change through to it
    pub fn with_store(checker: Arc<dyn ImageChecker>, store: Arc<dyn VersionStore>) -> Self {
        let entries = match store.load_all() {
            Ok(loaded) => {
                info!("Loaded {} cached version entries", loaded.len());
                loaded
                    .into_iter()
                    .map(|info| (info.image.clone(), info))
                    .collect()
            }
            Err(e) => {
                error!("Failed to load cached version entries: {}", e);
                HashMap::new()
            }
        };

        Self {
            checker,
            store: Some(store),
            entries: RwLock::new(entries),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, image: &str) -> Option<VersionInfo> {
        self.entries.read().get(image).cloned()
    }

    /// All entries, ordered by image
    pub fn get_all(&self) -> Vec<VersionInfo> {
        let mut all: Vec<VersionInfo> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| a.image.cmp(&b.image));
        all
    }

    /// Entries for `images`, in the given order; images without an entry are skipped
    pub fn get_many(&self, images: &[String]) -> Vec<VersionInfo> {
        let entries = self.entries.read();
        images
            .iter()
            .filter_map(|image| entries.get(image).cloned())
            .collect()
    }

    /// Images among `candidates` with no entry or one older than `max_age`
    pub fn stale_images(&self, candidates: &[String], max_age: Duration) -> Vec<String> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(max_age);
        let entries = self.entries.read();
        let mut seen = HashSet::new();

        candidates
            .iter()
            .filter(|image| seen.insert(image.as_str()))
            .filter(|image| match (entries.get(image.as_str()), cutoff) {
                (None, _) => true,
                (Some(info), Some(cutoff)) => info.checked_at < cutoff,
                (Some(_), None) => false,
            })
            .cloned()
            .collect()
    }

    /// Check `image` and store the result.
    ///
    /// Joins a check already running for the same image instead of starting another.
    /// On failure the previous entry is kept and the error is returned.
    pub async fn refresh(&self, image: &str) -> Result<VersionInfo, CacheError> {
        let check = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(image) {
                Some(check) => {
                    debug!("Joining in-flight check for {}", image);
                    check.clone()
                }
                None => {
                    let checker = Arc::clone(&self.checker);
                    let key = image.to_string();
                    let check = async move { checker.check(&key).await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    in_flight.insert(image.to_string(), check.clone());
                    check
                }
            }
        };

        let result = check.clone().await;
        self.publish(image, &check, &result);

        result.map_err(|source| {
            warn!("Update check failed for {}: {}", image, source);
            CacheError::CheckFailed {
                image: image.to_string(),
                source,
            }
        })
    }

    /// Store the outcome of `check` if it is still the registered check for `image`.
    ///
    /// The first waiter to get here unregisters the check. A check that was abandoned by
    /// `invalidate` is no longer registered and its result is dropped.
    fn publish(&self, image: &str, check: &InFlightCheck, result: &CheckResult) {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get(image) {
            Some(registered) if registered.ptr_eq(check) => {
                in_flight.remove(image);
            }
            _ => return,
        }

        let Ok(info) = result else {
            return;
        };

        self.entries.write().insert(image.to_string(), info.clone());
        if let Some(store) = &self.store {
            let _ = store
                .save(info)
                .inspect_err(|e| error!("Failed to persist version info for {}: {}", image, e));
        }
    }

    /// Refresh `images` in parallel with staggered starts.
    ///
    /// Results come back in input order; one failure does not affect the others.
    pub async fn refresh_many(&self, images: &[String]) -> Vec<Result<VersionInfo, CacheError>> {
        let checks = images.iter().enumerate().map(|(i, image)| {
            let delay = Duration::from_millis(FETCH_STAGGER_DELAY_MS * i as u64);
            async move {
                sleep(delay).await;
                self.refresh(image).await
            }
        });

        join_all(checks).await
    }

    /// Remove entries for `images`, or every entry when `None`.
    ///
    /// Checks still running for those images are abandoned so they cannot put
    /// pre-invalidation results back.
    pub fn invalidate(&self, images: Option<&[String]>) {
        let mut in_flight = self.in_flight.lock();
        let mut entries = self.entries.write();

        match images {
            Some(images) => {
                for image in images {
                    in_flight.remove(image);
                    entries.remove(image);
                }
                debug!("Invalidated {} cache entries", images.len());
            }
            None => {
                in_flight.clear();
                entries.clear();
                debug!("Invalidated all cache entries");
            }
        }

        if let Some(store) = &self.store {
            let result = match images {
                Some(images) => store.delete(images),
                None => store.clear(),
            };
            let _ = result.inspect_err(|e| error!("Failed to remove persisted entries: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::checker::MockImageChecker;
    use crate::version::store::MockVersionStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn info(image: &str, update_available: bool) -> VersionInfo {
        VersionInfo {
            image: image.to_string(),
            current_version: Some("1.0.0".to_string()),
            latest_version: Some("1.1.0".to_string()),
            current_digest: None,
            latest_digest: None,
            update_available,
            source_url: None,
            checked_at: Utc::now(),
        }
    }

    /// Checker that blocks until released and counts its calls
    struct GatedChecker {
        calls: AtomicUsize,
        gate: Notify,
    }

    impl GatedChecker {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: Notify::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl ImageChecker for GatedChecker {
        async fn check(&self, image: &str) -> Result<VersionInfo, RegistryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(info(image, call == 0))
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_check() {
        let checker = Arc::new(GatedChecker::new());
        let cache = UpdateCache::new(checker.clone());

        let first = cache.refresh("nginx:1.25");
        let second = cache.refresh("nginx:1.25");
        let release = async {
            tokio::task::yield_now().await;
            checker.gate.notify_one();
        };
        let (first, second, _) = tokio::join!(first, second, release);

        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap(), second.unwrap());
        assert!(cache.get("nginx:1.25").is_some());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entry() {
        let mut checker = MockImageChecker::new();
        let mut seq = mockall::Sequence::new();
        checker
            .expect_check()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|image| Ok(info(image, true)));
        checker
            .expect_check()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(RegistryError::InvalidResponse("boom".to_string())));
        let cache = UpdateCache::new(Arc::new(checker));

        let stored = cache.refresh("redis:7").await.unwrap();
        let failed = cache.refresh("redis:7").await;

        assert!(matches!(
            failed,
            Err(CacheError::CheckFailed { ref image, .. }) if image == "redis:7"
        ));
        assert_eq!(cache.get("redis:7"), Some(stored));
    }

    #[tokio::test]
    async fn failed_first_refresh_leaves_no_entry() {
        let mut checker = MockImageChecker::new();
        checker.expect_check().returning(|_| {
            Err(RegistryError::Unauthorized {
                registry: "ghcr.io".to_string(),
                status: 401,
            })
        });
        let cache = UpdateCache::new(Arc::new(checker));

        assert!(cache.refresh("ghcr.io/org/private").await.is_err());
        assert!(cache.get("ghcr.io/org/private").is_none());
        assert!(cache.get_all().is_empty());
    }

    #[tokio::test]
    async fn invalidate_abandons_in_flight_check() {
        let checker = Arc::new(GatedChecker::new());
        let cache = UpdateCache::new(checker.clone());

        let refresh = cache.refresh("nginx:latest");
        let invalidate_then_release = async {
            tokio::task::yield_now().await;
            cache.invalidate(Some(&["nginx:latest".to_string()]));
            checker.gate.notify_one();
        };
        let (result, _) = tokio::join!(refresh, invalidate_then_release);

        assert!(result.is_ok());
        assert!(cache.get("nginx:latest").is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_named_or_all_entries() {
        let mut checker = MockImageChecker::new();
        checker
            .expect_check()
            .returning(|image| Ok(info(image, false)));
        let cache = UpdateCache::new(Arc::new(checker));
        for image in ["a:1", "b:1", "c:1"] {
            cache.refresh(image).await.unwrap();
        }

        cache.invalidate(Some(&["b:1".to_string()]));
        let remaining: Vec<String> = cache.get_all().into_iter().map(|i| i.image).collect();
        assert_eq!(remaining, vec!["a:1", "c:1"]);

        cache.invalidate(None);
        assert!(cache.get_all().is_empty());
    }

    #[tokio::test]
    async fn refresh_many_contains_failures() {
        let mut checker = MockImageChecker::new();
        checker.expect_check().returning(|image| {
            if image == "broken:1" {
                Err(RegistryError::Status {
                    status: 502,
                    url: "https://registry.test".to_string(),
                })
            } else {
                Ok(info(image, true))
            }
        });
        let cache = UpdateCache::new(Arc::new(checker));
        let images = vec![
            "a:1".to_string(),
            "broken:1".to_string(),
            "b:1".to_string(),
        ];

        let results = cache.refresh_many(&images).await;

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        let cached: Vec<String> = cache.get_many(&images).into_iter().map(|i| i.image).collect();
        assert_eq!(cached, vec!["a:1", "b:1"]);
    }

    #[tokio::test]
    async fn stale_images_reports_missing_and_old_entries() {
        let mut checker = MockImageChecker::new();
        checker.expect_check().returning(|image| {
            let mut result = info(image, false);
            if image == "old:1" {
                result.checked_at = Utc::now() - chrono::Duration::hours(12);
            }
            Ok(result)
        });
        let cache = UpdateCache::new(Arc::new(checker));
        cache.refresh("fresh:1").await.unwrap();
        cache.refresh("old:1").await.unwrap();

        let candidates = vec![
            "fresh:1".to_string(),
            "old:1".to_string(),
            "new:1".to_string(),
            "new:1".to_string(),
        ];
        let stale = cache.stale_images(&candidates, Duration::from_secs(6 * 60 * 60));

        assert_eq!(stale, vec!["old:1", "new:1"]);
    }

    #[tokio::test]
    async fn with_store_preloads_and_writes_through() {
        let mut store = MockVersionStore::new();
        store
            .expect_load_all()
            .returning(|| Ok(vec![info("persisted:1", true)]));
        store
            .expect_save()
            .withf(|saved| saved.image == "fresh:2")
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_delete()
            .withf(|images| images == ["persisted:1".to_string()])
            .times(1)
            .returning(|_| Ok(()));
        let mut checker = MockImageChecker::new();
        checker
            .expect_check()
            .returning(|image| Ok(info(image, false)));

        let cache = UpdateCache::with_store(Arc::new(checker), Arc::new(store));
        assert!(cache.get("persisted:1").is_some());

        cache.refresh("fresh:2").await.unwrap();
        cache.invalidate(Some(&["persisted:1".to_string()]));

        assert!(cache.get("persisted:1").is_none());
        assert!(cache.get("fresh:2").is_some());
    }

    #[tokio::test]
    async fn store_failures_do_not_fail_refresh() {
        let mut store = MockVersionStore::new();
        store.expect_load_all().returning(|| Err(crate::version::error::StoreError::LockPoisoned));
        store
            .expect_save()
            .returning(|_| Err(crate::version::error::StoreError::LockPoisoned));
        let mut checker = MockImageChecker::new();
        checker
            .expect_check()
            .returning(|image| Ok(info(image, true)));

        let cache = UpdateCache::with_store(Arc::new(checker), Arc::new(store));
        let result = cache.refresh("nginx:1").await;

        assert!(result.is_ok());
        assert!(cache.get("nginx:1").is_some());
    }
}
