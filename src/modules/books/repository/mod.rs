//! Durable book storage.

mod memory;
mod postgres;

pub use memory::InMemoryBookRepository;
pub use postgres::PostgresBookRepository;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::models::{BookFilter, BookPatch, BookRecord, NewBook};
use super::pagination::Pagination;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("book not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Capability set every book store provides. Lists are ordered newest first.
#[async_trait]
pub trait BookRepository: Send + Sync {
    fn backend(&self) -> &'static str;

    /// One page of books and the total number of books.
    async fn list(&self, pagination: Pagination) -> Result<(Vec<BookRecord>, u64), RepoError>;

    async fn get_by_id(&self, id: Uuid) -> Result<BookRecord, RepoError>;

    async fn create(&self, book: NewBook) -> Result<BookRecord, RepoError>;

    /// Apply `patch` and stamp `updated_at`.
    async fn update(&self, id: Uuid, patch: BookPatch) -> Result<BookRecord, RepoError>;

    async fn delete(&self, id: Uuid) -> Result<(), RepoError>;

    /// Every book matching `filter`.
    async fn search(&self, filter: &BookFilter) -> Result<Vec<BookRecord>, RepoError>;
}
