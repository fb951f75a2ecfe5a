use async_trait::async_trait;
use sqlx::{postgres::PgPool, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{BookRepository, RepoError};
use crate::modules::books::models::{BookFilter, BookPatch, BookRecord, NewBook};
use crate::modules::books::pagination::Pagination;

const BOOK_COLUMNS: &str = "id, title, author, year, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct BookRow {
    id: Uuid,
    title: String,
    author: String,
    year: i32,
    created_at: OffsetDateTime,
    updated_at: Option<OffsetDateTime>,
}

impl From<BookRow> for BookRecord {
    fn from(row: BookRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            author: row.author,
            year: row.year,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db)
            if db.message().contains("violates") || db.message().contains("invalid input syntax") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        other => RepoError::from_persistence(other),
    }
}

/// Escape `%`, `_` and `\` so user input matches literally inside ILIKE.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Book store over the `books` table.
#[derive(Clone)]
pub struct PostgresBookRepository {
    pool: PgPool,
}

impl PostgresBookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BookRepository for PostgresBookRepository {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn list(&self, pagination: Pagination) -> Result<(Vec<BookRecord>, u64), RepoError> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if total == 0 {
            return Ok((Vec::new(), 0));
        }

        let offset = i64::try_from(pagination.offset()).unwrap_or(i64::MAX);
        let rows: Vec<BookRow> = sqlx::query_as(&format!(
            "SELECT {BOOK_COLUMNS} FROM books ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(pagination.limit()))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok((
            rows.into_iter().map(BookRecord::from).collect(),
            u64::try_from(total).unwrap_or_default(),
        ))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<BookRecord, RepoError> {
        let row: BookRow = sqlx::query_as(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn create(&self, book: NewBook) -> Result<BookRecord, RepoError> {
        let row: BookRow = sqlx::query_as(&format!(
            "INSERT INTO books (id, title, author, year, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {BOOK_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.year)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update(&self, id: Uuid, patch: BookPatch) -> Result<BookRecord, RepoError> {
        // GREATEST keeps updated_at from moving backwards under clock skew
        let row: BookRow = sqlx::query_as(&format!(
            "UPDATE books SET \
                title = COALESCE($1, title), \
                author = COALESCE($2, author), \
                year = COALESCE($3, year), \
                updated_at = GREATEST($4, COALESCE(updated_at, created_at)) \
             WHERE id = $5 RETURNING {BOOK_COLUMNS}"
        ))
        .bind(patch.title)
        .bind(patch.author)
        .bind(patch.year)
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn search(&self, filter: &BookFilter) -> Result<Vec<BookRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT {BOOK_COLUMNS} FROM books WHERE 1=1"));

        if let Some(title) = filter.title.as_ref() {
            qb.push(" AND title ILIKE ");
            qb.push_bind(like_pattern(title));
        }

        if let Some(author) = filter.author.as_ref() {
            qb.push(" AND author ILIKE ");
            qb.push_bind(like_pattern(author));
        }

        if let Some(year) = filter.year {
            qb.push(" AND year = ");
            qb.push_bind(year);
        }

        qb.push(" ORDER BY created_at DESC, id DESC");

        let rows = qb
            .build_query_as::<BookRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(BookRecord::from).collect())
    }
}
