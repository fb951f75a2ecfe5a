use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::pagination::{PageMeta, Pagination};

/// A persisted book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Assigned at creation, never changes
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub year: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// `None` until the first update
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub updated_at: Option<OffsetDateTime>,
}

/// Input for creating a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub year: i32,
}

/// Partial update; each present field replaces the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

impl BookPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.author.is_none() && self.year.is_none()
    }

    /// Keep only the fields whose value differs from `current`.
    pub fn changes_from(&self, current: &BookRecord) -> BookPatch {
        BookPatch {
            title: self.title.clone().filter(|title| *title != current.title),
            author: self.author.clone().filter(|author| *author != current.author),
            year: self.year.filter(|year| *year != current.year),
        }
    }

    pub fn apply_to(&self, record: &mut BookRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(author) = &self.author {
            record.author = author.clone();
        }
        if let Some(year) = self.year {
            record.year = year;
        }
    }
}

/// Search criteria; any present field makes the query filtered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i32>,
}

impl BookFilter {
    /// Read `title`, `author` and `year` query parameters. Blank values are
    /// ignored; a non-numeric year is returned as the offending raw value.
    pub fn from_request_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let text = |name: &str| {
            params
                .get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let year = match text("year") {
            Some(raw) => Some(raw.parse::<i32>().map_err(|_| raw)?),
            None => None,
        };

        Ok(Self {
            title: text("title"),
            author: text("author"),
            year,
        })
    }

    pub fn is_active(&self) -> bool {
        self.title.is_some() || self.author.is_some() || self.year.is_some()
    }

    /// Case-insensitive substring match on title/author, exact match on year.
    pub fn matches(&self, book: &BookRecord) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_ref()
                .map_or(true, |needle| haystack.to_lowercase().contains(&needle.to_lowercase()))
        }

        contains(&book.title, &self.title)
            && contains(&book.author, &self.author)
            && self.year.map_or(true, |year| book.year == year)
    }
}

/// One page of books plus paging metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPage {
    pub data: Vec<BookRecord>,
    pub meta: PageMeta,
}

impl BookPage {
    pub fn new(data: Vec<BookRecord>, pagination: Pagination, total_items: u64) -> Self {
        Self {
            data,
            meta: PageMeta::new(pagination, total_items),
        }
    }

    /// Page through an already materialized result set.
    pub fn window(records: Vec<BookRecord>, pagination: Pagination) -> Self {
        let total_items = records.len() as u64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let data = records
            .into_iter()
            .skip(offset)
            .take(pagination.limit() as usize)
            .collect();
        Self::new(data, pagination, total_items)
    }
}
