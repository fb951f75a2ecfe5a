//! Cache key schema.
//!
//! Collection pages embed the collection version, so bumping
//! [`COLLECTION_VERSION_KEY`] orphans every cached page at once.

use uuid::Uuid;

use super::pagination::Pagination;

pub const COLLECTION_VERSION_KEY: &str = "collection:version";

pub fn item(id: Uuid) -> String {
    format!("item:{id}")
}

pub fn collection(version: u64, pagination: Pagination) -> String {
    format!(
        "collection:v{}:page:{}:limit:{}",
        version,
        pagination.page(),
        pagination.limit()
    )
}
