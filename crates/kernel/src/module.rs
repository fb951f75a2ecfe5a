//! Pluggable feature modules.
//!
//! A module owns one slice of the HTTP surface (mounted under
//! `/api/<name>`), the schema it needs, and whatever resources must be
//! released when the server drains.

use async_trait::async_trait;
use axum::Router;

use crate::settings::Settings;

/// Borrowed view of the loaded settings handed to [`Module::init`].
pub struct InitCtx<'a> {
    pub settings: &'a Settings,
}

/// Idempotent DDL. `id` is recorded once applied, so it must never be
/// reused for different SQL.
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: &'static str,
    pub up: &'static str,
}

#[async_trait]
pub trait Module: Sync + Send {
    /// Route prefix and log field; unique within a registry.
    fn name(&self) -> &'static str;

    /// Runs before migrations. Fail here to abort startup.
    async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
    }

    /// Paths relative to the module prefix plus any component schemas.
    fn openapi(&self) -> Option<serde_json::Value> {
        None
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![]
    }

    /// Runs after the listener stopped accepting requests.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
