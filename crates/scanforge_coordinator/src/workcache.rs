//! In-memory skip-decision layer sitting in front of the persisted
//! Work-Version Cache. Loaded lazily, one key at a time, on first request
//! for that key; a read failure degrades to "never skip" rather than
//! blocking or poisoning the cache with a stale negative.

use scanforge_db::{workcache, DbError, DbPool};
use scanforge_ids::{ModulePath, ModuleVersion};
use scanforge_protocol::{WorkState, WorkVersion};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

type Key = (String, String, String);

pub struct SkipCache {
    pool: DbPool,
    entries: Mutex<HashMap<Key, Option<WorkState>>>,
}

impl SkipCache {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(module: &ModulePath, version: &ModuleVersion, binary: &str) -> Key {
        (module.as_str().to_string(), version.as_str().to_string(), binary.to_string())
    }

    /// Should a scan with work-version `current` be skipped?
    pub async fn should_skip(
        &self,
        module: &ModulePath,
        version: &ModuleVersion,
        binary: &str,
        current: &WorkVersion,
    ) -> bool {
        let key = Self::key(module, version, binary);

        if let Some(cached) = self.entries.lock().await.get(&key) {
            return cached.as_ref().is_some_and(|s| s.should_skip(current));
        }

        let loaded = match workcache::get(&self.pool, module, version, binary).await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, module = %module, version = %version, "work-version cache load failed, not skipping");
                return false;
            }
        };

        let skip = loaded.as_ref().is_some_and(|s| s.should_skip(current));
        self.entries.lock().await.insert(key, loaded);
        skip
    }

    /// Record the outcome of a scan, writing through to the persisted
    /// store and updating the in-memory entry.
    pub async fn record(
        &self,
        module: &ModulePath,
        version: &ModuleVersion,
        binary: &str,
        state: WorkState,
    ) -> Result<(), DbError> {
        workcache::set(&self.pool, module, version, &state).await?;
        let key = Self::key(module, version, binary);
        self.entries.lock().await.insert(key, Some(state));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanforge_db::pool::{create_pool, DbConfig};
    use scanforge_protocol::ErrorCategory;

    async fn fresh_pool() -> DbPool {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        scanforge_db::run_migrations(&pool).await.unwrap();
        pool
    }

    fn wv(tag: &str) -> WorkVersion {
        WorkVersion {
            binary_args: vec![],
            analyzer_version: tag.to_string(),
            schema_version: "s1".to_string(),
            binary_hash: None,
            vuln_db_last_modified: None,
            go_version: None,
        }
    }

    #[tokio::test]
    async fn absent_entry_never_skips() {
        let cache = SkipCache::new(fresh_pool().await);
        let module = ModulePath::new("golang.org/x/net").unwrap();
        let version = ModuleVersion::new("v1.0.0").unwrap();
        assert!(!cache.should_skip(&module, &version, "", &wv("v1")).await);
    }

    #[tokio::test]
    async fn recorded_success_is_skipped_on_matching_work_version() {
        let cache = SkipCache::new(fresh_pool().await);
        let module = ModulePath::new("golang.org/x/net").unwrap();
        let version = ModuleVersion::new("v1.0.0").unwrap();
        cache
            .record(
                &module,
                &version,
                "",
                WorkState {
                    work_version: wv("v1"),
                    error_category: None,
                },
            )
            .await
            .unwrap();

        assert!(cache.should_skip(&module, &version, "", &wv("v1")).await);
        assert!(!cache.should_skip(&module, &version, "", &wv("v2")).await);
    }

    #[tokio::test]
    async fn recorded_unrecoverable_error_is_skipped() {
        let cache = SkipCache::new(fresh_pool().await);
        let module = ModulePath::new("golang.org/x/net").unwrap();
        let version = ModuleVersion::new("v1.0.0").unwrap();
        cache
            .record(
                &module,
                &version,
                "",
                WorkState {
                    work_version: wv("v1"),
                    error_category: Some(ErrorCategory::LoadNoGoMod),
                },
            )
            .await
            .unwrap();

        assert!(cache.should_skip(&module, &version, "", &wv("v1")).await);
    }
}
