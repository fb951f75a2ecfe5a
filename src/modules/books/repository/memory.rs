use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{BookRepository, RepoError};
use crate::modules::books::models::{BookFilter, BookPatch, BookRecord, NewBook};
use crate::modules::books::pagination::Pagination;

struct Stored {
    seq: u64,
    record: BookRecord,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    books: HashMap<Uuid, Stored>,
}

impl State {
    /// Newest first; insertion order breaks timestamp ties.
    fn ordered(&self) -> Vec<&Stored> {
        let mut all: Vec<&Stored> = self.books.values().collect();
        all.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        all
    }
}

/// Process-local book store.
#[derive(Default)]
pub struct InMemoryBookRepository {
    state: RwLock<State>,
}

impl InMemoryBookRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, RepoError> {
        self.state
            .read()
            .map_err(|_| RepoError::from_persistence("book store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, RepoError> {
        self.state
            .write()
            .map_err(|_| RepoError::from_persistence("book store lock poisoned"))
    }
}

#[async_trait]
impl BookRepository for InMemoryBookRepository {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, pagination: Pagination) -> Result<(Vec<BookRecord>, u64), RepoError> {
        let state = self.read()?;
        let total = state.books.len() as u64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);

        let page = state
            .ordered()
            .into_iter()
            .skip(offset)
            .take(pagination.limit() as usize)
            .map(|stored| stored.record.clone())
            .collect();

        Ok((page, total))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<BookRecord, RepoError> {
        self.read()?
            .books
            .get(&id)
            .map(|stored| stored.record.clone())
            .ok_or(RepoError::NotFound)
    }

    async fn create(&self, book: NewBook) -> Result<BookRecord, RepoError> {
        let record = BookRecord {
            id: Uuid::new_v4(),
            title: book.title,
            author: book.author,
            year: book.year,
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
        };

        let mut state = self.write()?;
        state.next_seq += 1;
        let seq = state.next_seq;
        state.books.insert(
            record.id,
            Stored {
                seq,
                record: record.clone(),
            },
        );

        Ok(record)
    }

    async fn update(&self, id: Uuid, patch: BookPatch) -> Result<BookRecord, RepoError> {
        let mut state = self.write()?;
        let stored = state.books.get_mut(&id).ok_or(RepoError::NotFound)?;

        patch.apply_to(&mut stored.record);
        let now = OffsetDateTime::now_utc();
        let floor = stored.record.updated_at.unwrap_or(stored.record.created_at);
        stored.record.updated_at = Some(now.max(floor));

        Ok(stored.record.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.write()?
            .books
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }

    async fn search(&self, filter: &BookFilter) -> Result<Vec<BookRecord>, RepoError> {
        let state = self.read()?;
        Ok(state
            .ordered()
            .into_iter()
            .filter(|stored| filter.matches(&stored.record))
            .map(|stored| stored.record.clone())
            .collect())
    }
}
