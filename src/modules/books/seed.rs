//! Sample data for demos and local development.

use super::catalog::{BookCatalog, CatalogError};
use super::models::{BookFilter, NewBook};
use super::pagination::Pagination;

pub const SAMPLE_BOOKS: [(&str, &str, i32); 5] = [
    ("1984", "George Orwell", 1949),
    ("Animal Farm", "George Orwell", 1945),
    ("Brave New World", "Aldous Huxley", 1932),
    ("To Kill a Mockingbird", "Harper Lee", 1960),
    ("The Great Gatsby", "F. Scott Fitzgerald", 1925),
];

/// Insert [`SAMPLE_BOOKS`] through the catalog when it holds no books yet.
/// Returns how many books were created.
pub async fn seed_catalog(catalog: &BookCatalog) -> Result<usize, CatalogError> {
    let existing = catalog
        .list(Pagination::new(1, 1), &BookFilter::default())
        .await?
        .into_inner();
    if existing.meta.total_items > 0 {
        tracing::info!(
            books = existing.meta.total_items,
            "catalog already populated; skipping seed"
        );
        return Ok(0);
    }

    for (title, author, year) in SAMPLE_BOOKS {
        catalog
            .create(NewBook {
                title: title.to_string(),
                author: author.to_string(),
                year,
            })
            .await?;
    }

    tracing::info!(books = SAMPLE_BOOKS.len(), "catalog seeded");
    Ok(SAMPLE_BOOKS.len())
}
