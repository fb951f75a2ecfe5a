//! Composition root: picks backends from settings and drives the module
//! lifecycle for each CLI command.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use libris_cache::{Cache, InMemoryCache, RedisCache};
use libris_kernel::{
    settings::{CacheBackend, CacheSettings, DatabaseBackend, Settings},
    InitCtx, ModuleRegistry,
};
use sqlx::PgPool;

use crate::modules::{
    self,
    books::{
        catalog::{BookCatalog, CachePolicy},
        repository::{BookRepository, InMemoryBookRepository, PostgresBookRepository},
        seed::seed_catalog,
        validation::BookValidator,
    },
};

pub struct App {
    settings: Settings,
    registry: ModuleRegistry,
    catalog: Arc<BookCatalog>,
    pool: Option<PgPool>,
}

impl App {
    /// Connect the configured backends and register every module.
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let (repo, pool): (Arc<dyn BookRepository>, Option<PgPool>) =
            match settings.database.backend {
                DatabaseBackend::Postgres => {
                    let pool = libris_db::connect(&settings.database).await?;
                    let repo: Arc<dyn BookRepository> =
                        Arc::new(PostgresBookRepository::new(pool.clone()));
                    (repo, Some(pool))
                }
                DatabaseBackend::Memory => {
                    tracing::warn!("using in-memory book store; data is lost on exit");
                    let repo: Arc<dyn BookRepository> = Arc::new(InMemoryBookRepository::new());
                    (repo, None)
                }
            };

        let cache = connect_cache(&settings.cache).await;
        let catalog = Arc::new(BookCatalog::new(
            repo,
            cache,
            BookValidator::new(&settings.catalog),
            CachePolicy::from(&settings.cache),
        ));

        let mut registry = ModuleRegistry::new();
        modules::register_all(&mut registry, catalog.clone());

        Ok(Self {
            settings,
            registry,
            catalog,
            pool,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Arc<BookCatalog> {
        &self.catalog
    }

    /// The full HTTP surface without binding a socket.
    pub fn router(&self) -> Router {
        libris_http::build_router(&self.registry, &self.settings)
    }

    /// Apply pending module migrations. A no-op for the in-memory store.
    pub async fn migrate(&self) -> anyhow::Result<usize> {
        let Some(pool) = &self.pool else {
            tracing::info!("in-memory book store; no migrations to run");
            return Ok(0);
        };

        let migrations = self.registry.collect_migrations();
        let applied = libris_db::run_migrations(pool, &migrations).await?;
        tracing::info!(applied, total = migrations.len(), "migrations complete");
        Ok(applied)
    }

    pub async fn seed(&self) -> anyhow::Result<usize> {
        seed_catalog(&self.catalog)
            .await
            .context("failed to seed catalog")
    }

    /// Drop every cache entry. Returns `false` when caching is disabled.
    pub async fn flush_cache(&self) -> anyhow::Result<bool> {
        self.catalog
            .clear_cache()
            .await
            .context("failed to flush cache")
    }

    /// Run the HTTP server until a shutdown signal, then stop every module.
    pub async fn serve(self, seed: bool) -> anyhow::Result<()> {
        let ctx = InitCtx {
            settings: &self.settings,
        };

        self.registry.init_all(&ctx).await?;
        self.migrate().await?;

        if seed {
            self.seed().await?;
        }

        let served = libris_http::start_server(&self.registry, &self.settings).await;
        let stopped = self.shutdown().await;

        served.and(stopped)
    }

    /// Stop modules in reverse order and release the database pool.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let stopped = self.registry.stop_all().await;

        if let Some(pool) = self.pool {
            pool.close().await;
            tracing::info!("database pool closed");
        }

        stopped
    }
}

/// A cache that cannot be reached at startup is logged and skipped; the
/// catalog then reads straight from the store.
async fn connect_cache(settings: &CacheSettings) -> Option<Arc<dyn Cache>> {
    match settings.backend {
        CacheBackend::Disabled => {
            tracing::info!("cache disabled");
            None
        }
        CacheBackend::Memory => Some(Arc::new(InMemoryCache::new())),
        CacheBackend::Redis => match RedisCache::connect(&settings.redis_url).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(err) => {
                tracing::warn!(error = %err, "redis unavailable; serving without cache");
                None
            }
        },
    }
}
