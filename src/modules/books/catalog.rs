//! Read-through caching and invalidation in front of the book store.
//!
//! Every read and write of the books module goes through [`BookCatalog`]. Reads
//! consult the cache first and fall back to the repository, writing the result
//! back with a TTL. Mutations invalidate only after the repository accepted
//! them. Collection pages are addressed through a version counter, so one
//! atomic increment retires every cached page.
//!
//! The cache is never authoritative. Faults, timeouts and undecodable payloads
//! are logged and treated as misses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use libris_cache::{Cache, CacheError, CacheExt, CacheResult};
use libris_kernel::settings::CacheSettings;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::keys::{self, COLLECTION_VERSION_KEY};
use super::models::{BookFilter, BookPage, BookPatch, BookRecord, NewBook};
use super::pagination::{Pagination, PaginationError};
use super::repository::{BookRepository, RepoError};
use super::validation::{BookValidator, FieldError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("book not found")]
    NotFound,

    #[error(transparent)]
    Storage(RepoError),
}

impl CatalogError {
    fn invalid_fields(fields: Vec<FieldError>) -> Self {
        Self::Validation {
            message: "validation failed".to_string(),
            fields,
        }
    }

    fn no_changes() -> Self {
        Self::Validation {
            message: "no changes provided".to_string(),
            fields: Vec::new(),
        }
    }
}

impl From<RepoError> for CatalogError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => Self::NotFound,
            RepoError::InvalidInput { message } => Self::Validation {
                message,
                fields: Vec::new(),
            },
            other => Self::Storage(other),
        }
    }
}

impl From<PaginationError> for CatalogError {
    fn from(err: PaginationError) -> Self {
        Self::Validation {
            message: err.to_string(),
            fields: Vec::new(),
        }
    }
}

/// Where a read was answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Cache { key: String },
    Store,
}

/// A read result tagged with its origin, so a caller that fails to render a
/// cached value can [`BookCatalog::discard`] the entry.
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T> Served<T> {
    fn store(value: T) -> Self {
        Self {
            value,
            origin: Origin::Store,
        }
    }

    fn cached(value: T, key: &str) -> Self {
        Self {
            value,
            origin: Origin::Cache {
                key: key.to_string(),
            },
        }
    }

    pub fn cache_key(&self) -> Option<&str> {
        match &self.origin {
            Origin::Cache { key } => Some(key),
            Origin::Store => None,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// TTLs and the per-call time budget for cache round trips.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub item_ttl: Duration,
    pub collection_ttl: Duration,
    pub op_timeout: Duration,
}

impl From<&CacheSettings> for CachePolicy {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            item_ttl: Duration::from_secs(settings.item_ttl_secs),
            collection_ttl: Duration::from_secs(settings.collection_ttl_secs),
            op_timeout: Duration::from_millis(settings.op_timeout_ms),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

pub struct BookCatalog {
    repo: Arc<dyn BookRepository>,
    cache: Option<Arc<dyn Cache>>,
    validator: BookValidator,
    policy: CachePolicy,
}

impl BookCatalog {
    /// `cache: None` serves everything from the repository.
    pub fn new(
        repo: Arc<dyn BookRepository>,
        cache: Option<Arc<dyn Cache>>,
        validator: BookValidator,
        policy: CachePolicy,
    ) -> Self {
        Self {
            repo,
            cache,
            validator,
            policy,
        }
    }

    pub fn repository_backend(&self) -> &'static str {
        self.repo.backend()
    }

    pub fn cache_backend(&self) -> Option<&'static str> {
        self.cache.as_ref().map(|cache| cache.backend())
    }

    /// One page of books. Filtered queries skip the cache in both directions.
    pub async fn list(
        &self,
        pagination: Pagination,
        filter: &BookFilter,
    ) -> Result<Served<BookPage>, CatalogError> {
        pagination.validate()?;

        if filter.is_active() {
            tracing::debug!(?filter, "filtered list bypasses cache");
            let records = self.repo.search(filter).await?;
            return Ok(Served::store(BookPage::window(records, pagination)));
        }

        let load = || async move {
            let (data, total) = self.repo.list(pagination).await?;
            Ok::<_, RepoError>(BookPage::new(data, pagination, total))
        };

        match self.collection_version().await {
            Some(version) => {
                let key = keys::collection(version, pagination);
                self.read_through(&key, self.policy.collection_ttl, load)
                    .await
            }
            None => Ok(Served::store(load().await?)),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Served<BookRecord>, CatalogError> {
        let key = keys::item(id);
        self.read_through(&key, self.policy.item_ttl, || async move {
            self.repo.get_by_id(id).await
        })
        .await
    }

    pub async fn create(&self, book: NewBook) -> Result<BookRecord, CatalogError> {
        self.validator
            .validate_new(&book)
            .map_err(CatalogError::invalid_fields)?;

        let created = self.repo.create(book).await?;
        tracing::info!(book_id = %created.id, "book created");

        self.invalidate(None).await;
        Ok(created)
    }

    /// Apply the fields of `patch` that differ from the stored record. A patch
    /// that changes nothing is rejected.
    pub async fn update(&self, id: Uuid, patch: BookPatch) -> Result<BookRecord, CatalogError> {
        self.validator
            .validate_patch(&patch)
            .map_err(CatalogError::invalid_fields)?;
        if patch.is_empty() {
            return Err(CatalogError::no_changes());
        }

        let current = self.repo.get_by_id(id).await?;
        let changes = patch.changes_from(&current);
        if changes.is_empty() {
            return Err(CatalogError::no_changes());
        }

        let updated = self.repo.update(id, changes).await?;
        tracing::info!(book_id = %id, "book updated");

        self.invalidate(Some(id)).await;
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), CatalogError> {
        self.repo.delete(id).await?;
        tracing::info!(book_id = %id, "book deleted");

        self.invalidate(Some(id)).await;
        Ok(())
    }

    /// Drop one entry, typically a cached value that could not be rendered.
    pub async fn discard(&self, key: &str) {
        let Some(cache) = &self.cache else {
            return;
        };

        if let Err(err) = self.bounded(cache.delete(key)).await {
            tracing::warn!(key, error = %err, "failed to discard cache entry");
        }
    }

    /// Flush every cache entry. Returns `false` when no cache is configured.
    ///
    /// The collection version is written back one past its old value, so a
    /// page stored by a read still in flight stays unreachable.
    pub async fn clear_cache(&self) -> CacheResult<bool> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };

        let version: CacheResult<Option<u64>> =
            self.bounded(cache.get_json(COLLECTION_VERSION_KEY)).await;
        let next = match version {
            Ok(version) => version.unwrap_or(0) + 1,
            Err(err) if err.is_payload_error() => {
                tracing::warn!(error = %err, "collection version unreadable; restarting at 1");
                1
            }
            Err(err) => return Err(err),
        };

        self.bounded(cache.clear()).await?;
        self.bounded(cache.set_counter(COLLECTION_VERSION_KEY, next)).await?;

        tracing::info!(backend = cache.backend(), version = next, "cache flushed");
        Ok(true)
    }

    pub async fn close(&self) -> CacheResult<()> {
        match &self.cache {
            Some(cache) => cache.close().await,
            None => Ok(()),
        }
    }

    async fn read_through<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        load: F,
    ) -> Result<Served<T>, CatalogError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        let Some(cache) = &self.cache else {
            return Ok(Served::store(load().await?));
        };

        let cached: CacheResult<Option<T>> = self.bounded(cache.get_json(key)).await;
        match cached {
            Ok(Some(value)) => {
                tracing::debug!(key, "cache hit");
                return Ok(Served::cached(value, key));
            }
            Ok(None) => tracing::debug!(key, "cache miss"),
            Err(err) if err.is_payload_error() => {
                tracing::warn!(key, error = %err, "undecodable cache entry; reading from store")
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "cache read failed; reading from store")
            }
        }

        let value = load().await?;

        if let Err(err) = self.bounded(cache.set_json(key, &value, ttl)).await {
            tracing::warn!(key, error = %err, "failed to populate cache");
        }

        Ok(Served::store(value))
    }

    /// Current collection version; a missing counter is version 0. `None`
    /// means the version is unknown and the cache must not be used.
    async fn collection_version(&self) -> Option<u64> {
        let cache = self.cache.as_ref()?;

        let version: CacheResult<Option<u64>> =
            self.bounded(cache.get_json(COLLECTION_VERSION_KEY)).await;
        match version {
            Ok(version) => Some(version.unwrap_or(0)),
            Err(err) => {
                tracing::warn!(error = %err, "collection version unavailable; bypassing cache");
                None
            }
        }
    }

    async fn invalidate(&self, item: Option<Uuid>) {
        let Some(cache) = &self.cache else {
            return;
        };

        if let Some(id) = item {
            let key = keys::item(id);
            if let Err(err) = self.bounded(cache.delete(&key)).await {
                tracing::warn!(key = %key, error = %err, "failed to invalidate item");
            }
        }

        match self.bounded(cache.incr(COLLECTION_VERSION_KEY)).await {
            Ok(version) => tracing::debug!(version, "collection version bumped"),
            Err(err) => tracing::warn!(error = %err, "failed to bump collection version"),
        }
    }

    async fn bounded<T>(&self, op: impl Future<Output = CacheResult<T>>) -> CacheResult<T> {
        match tokio::time::timeout(self.policy.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.policy.op_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use libris_cache::InMemoryCache;

    use super::*;
    use crate::modules::books::repository::InMemoryBookRepository;

    /// In-memory store that counts reads and can refuse writes.
    #[derive(Default)]
    struct CountingRepo {
        inner: InMemoryBookRepository,
        lists: AtomicUsize,
        gets: AtomicUsize,
        searches: AtomicUsize,
        reject_writes: bool,
    }

    impl CountingRepo {
        fn rejecting_writes() -> Self {
            Self {
                reject_writes: true,
                ..Default::default()
            }
        }

        fn write_guard(&self) -> Result<(), RepoError> {
            if self.reject_writes {
                Err(RepoError::from_persistence("connection reset"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl BookRepository for CountingRepo {
        fn backend(&self) -> &'static str {
            "counting"
        }

        async fn list(&self, pagination: Pagination) -> Result<(Vec<BookRecord>, u64), RepoError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list(pagination).await
        }

        async fn get_by_id(&self, id: Uuid) -> Result<BookRecord, RepoError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get_by_id(id).await
        }

        async fn create(&self, book: NewBook) -> Result<BookRecord, RepoError> {
            self.write_guard()?;
            self.inner.create(book).await
        }

        async fn update(&self, id: Uuid, patch: BookPatch) -> Result<BookRecord, RepoError> {
            self.write_guard()?;
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
            self.write_guard()?;
            self.inner.delete(id).await
        }

        async fn search(&self, filter: &BookFilter) -> Result<Vec<BookRecord>, RepoError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner.search(filter).await
        }
    }

    /// Cache whose backend is always down.
    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        fn backend(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn incr(&self, _key: &str) -> CacheResult<u64> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn set_counter(&self, _key: &str, _value: u64) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn clear(&self) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn close(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    fn new_book(title: &str, author: &str, year: i32) -> NewBook {
        NewBook {
            title: title.to_string(),
            author: author.to_string(),
            year,
        }
    }

    fn catalog_with(repo: Arc<CountingRepo>, cache: Option<Arc<dyn Cache>>) -> BookCatalog {
        BookCatalog::new(repo, cache, BookValidator::default(), CachePolicy::default())
    }

    fn setup() -> (BookCatalog, Arc<CountingRepo>, Arc<InMemoryCache>) {
        let repo = Arc::new(CountingRepo::default());
        let cache = Arc::new(InMemoryCache::new());
        let catalog = catalog_with(repo.clone(), Some(cache.clone()));
        (catalog, repo, cache)
    }

    #[tokio::test]
    async fn cache_hit_skips_repository() {
        let (catalog, repo, _cache) = setup();
        let book = catalog.create(new_book("1984", "George Orwell", 1949)).await.unwrap();

        let first = catalog.get(book.id).await.unwrap();
        assert_eq!(first.origin, Origin::Store);

        let second = catalog.get(book.id).await.unwrap();
        assert_eq!(second.cache_key(), Some(keys::item(book.id).as_str()));
        assert_eq!(second.value, book);
        assert_eq!(repo.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn filtered_lists_never_touch_cache() {
        let (catalog, repo, cache) = setup();
        repo.inner
            .create(new_book("Animal Farm", "George Orwell", 1945))
            .await
            .unwrap();

        let filter = BookFilter {
            author: Some("orwell".to_string()),
            ..Default::default()
        };
        for _ in 0..2 {
            let page = catalog.list(Pagination::default(), &filter).await.unwrap();
            assert_eq!(page.origin, Origin::Store);
            assert_eq!(page.value.meta.total_items, 1);
        }

        assert_eq!(repo.searches.load(Ordering::SeqCst), 2);
        assert_eq!(repo.lists.load(Ordering::SeqCst), 0);
        assert!(cache.keys().is_empty());
    }

    #[tokio::test]
    async fn create_retires_cached_pages() {
        let (catalog, repo, _cache) = setup();
        catalog.create(new_book("1984", "George Orwell", 1949)).await.unwrap();

        let before = catalog
            .list(Pagination::default(), &BookFilter::default())
            .await
            .unwrap();
        let hit = catalog
            .list(Pagination::default(), &BookFilter::default())
            .await
            .unwrap();
        assert!(hit.cache_key().is_some());
        assert_eq!(repo.lists.load(Ordering::SeqCst), 1);

        catalog
            .create(new_book("Animal Farm", "George Orwell", 1945))
            .await
            .unwrap();

        let after = catalog
            .list(Pagination::default(), &BookFilter::default())
            .await
            .unwrap();
        assert_eq!(after.origin, Origin::Store);
        assert_eq!(before.value.meta.total_items, 1);
        assert_eq!(after.value.meta.total_items, 2);
        assert_eq!(repo.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flush_keeps_the_collection_version_moving_forward() {
        let (catalog, _repo, cache) = setup();
        catalog.create(new_book("1984", "George Orwell", 1949)).await.unwrap();

        let pre_flush = catalog
            .list(Pagination::default(), &BookFilter::default())
            .await
            .unwrap();
        let stale_key = keys::collection(1, Pagination::default());
        assert_eq!(pre_flush.origin, Origin::Store);

        assert!(catalog.clear_cache().await.unwrap());
        assert_eq!(cache.keys(), vec![COLLECTION_VERSION_KEY.to_string()]);

        // a read that started before the flush stores its page afterwards
        cache
            .set_json(&stale_key, &pre_flush.value, Duration::from_secs(60))
            .await
            .unwrap();

        catalog
            .create(new_book("Animal Farm", "George Orwell", 1945))
            .await
            .unwrap();

        let after = catalog
            .list(Pagination::default(), &BookFilter::default())
            .await
            .unwrap();
        assert_eq!(after.origin, Origin::Store);
        assert_eq!(after.value.meta.total_items, 2);
        assert_ne!(after.cache_key(), Some(stale_key.as_str()));
    }

    #[tokio::test]
    async fn update_and_delete_invalidate_the_item() {
        let (catalog, repo, _cache) = setup();
        let book = catalog.create(new_book("1984", "Orwell", 1949)).await.unwrap();
        catalog.get(book.id).await.unwrap();

        let patch = BookPatch {
            author: Some("George Orwell".to_string()),
            ..Default::default()
        };
        catalog.update(book.id, patch).await.unwrap();

        let fresh = catalog.get(book.id).await.unwrap();
        assert_eq!(fresh.origin, Origin::Store);
        assert_eq!(fresh.value.author, "George Orwell");
        assert_eq!(repo.gets.load(Ordering::SeqCst), 3);

        catalog.delete(book.id).await.unwrap();
        assert!(matches!(catalog.get(book.id).await, Err(CatalogError::NotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn item_entries_expire_after_ttl() {
        let (catalog, repo, _cache) = setup();
        let book = catalog.create(new_book("1984", "George Orwell", 1949)).await.unwrap();

        catalog.get(book.id).await.unwrap();
        catalog.get(book.id).await.unwrap();
        assert_eq!(repo.gets.load(Ordering::SeqCst), 1);

        tokio::time::advance(CachePolicy::default().item_ttl + Duration::from_secs(1)).await;

        let served = catalog.get(book.id).await.unwrap();
        assert_eq!(served.origin, Origin::Store);
        assert_eq!(repo.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn broken_cache_falls_back_to_repository() {
        let repo = Arc::new(CountingRepo::default());
        let catalog = catalog_with(repo.clone(), Some(Arc::new(BrokenCache)));

        let book = catalog.create(new_book("1984", "George Orwell", 1949)).await.unwrap();
        assert_eq!(catalog.get(book.id).await.unwrap().value, book);

        let page = catalog
            .list(Pagination::default(), &BookFilter::default())
            .await
            .unwrap();
        assert_eq!(page.value.data, vec![book.clone()]);

        catalog.delete(book.id).await.unwrap();
        assert!(catalog.clear_cache().await.is_err());
    }

    #[tokio::test]
    async fn undecodable_entry_is_a_miss() {
        let (catalog, repo, cache) = setup();
        let book = catalog.create(new_book("1984", "George Orwell", 1949)).await.unwrap();
        cache
            .set(&keys::item(book.id), b"{not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let served = catalog.get(book.id).await.unwrap();
        assert_eq!(served.origin, Origin::Store);
        assert_eq!(repo.gets.load(Ordering::SeqCst), 1);

        // repaired by the write-back
        assert!(catalog.get(book.id).await.unwrap().cache_key().is_some());
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_untouched() {
        let repo = Arc::new(CountingRepo::rejecting_writes());
        let cache = Arc::new(InMemoryCache::new());
        let catalog = catalog_with(repo.clone(), Some(cache.clone()));

        let book = repo.inner.create(new_book("1984", "Orwell", 1949)).await.unwrap();
        catalog.get(book.id).await.unwrap();

        assert!(matches!(
            catalog.delete(book.id).await,
            Err(CatalogError::Storage(_))
        ));
        assert!(matches!(
            catalog.create(new_book("Dune", "Frank Herbert", 1965)).await,
            Err(CatalogError::Storage(_))
        ));
        assert_eq!(cache.keys(), vec![keys::item(book.id)]);
    }

    #[tokio::test]
    async fn update_without_changes_is_rejected() {
        let (catalog, _repo, _cache) = setup();
        let book = catalog.create(new_book("1984", "George Orwell", 1949)).await.unwrap();

        let same_title = BookPatch {
            title: Some("1984".to_string()),
            ..Default::default()
        };
        for patch in [BookPatch::default(), same_title] {
            match catalog.update(book.id, patch).await {
                Err(CatalogError::Validation { message, .. }) => {
                    assert_eq!(message, "no changes provided")
                }
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_storage() {
        let (catalog, repo, _cache) = setup();

        let err = catalog.create(new_book("", "Anon", 1990)).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation { ref fields, .. } if fields[0].field == "title"));

        let err = catalog
            .list(Pagination::new(1, 20_000), &BookFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation { .. }));
        assert_eq!(repo.lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn works_without_a_cache() {
        let repo = Arc::new(CountingRepo::default());
        let catalog = catalog_with(repo.clone(), None);

        let book = catalog.create(new_book("1984", "George Orwell", 1949)).await.unwrap();
        catalog.get(book.id).await.unwrap();
        catalog.get(book.id).await.unwrap();

        assert_eq!(repo.gets.load(Ordering::SeqCst), 2);
        assert!(!catalog.clear_cache().await.unwrap());
    }
}
