//! Page/limit parsing and page arithmetic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 15000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    #[error("page must be greater than 0")]
    InvalidPage,
    #[error("limit must be between 1 and {MAX_LIMIT}")]
    InvalidLimit,
}

/// Requested page window. Construction never fails; call [`Pagination::validate`]
/// before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    page: u32,
    limit: u32,
}

impl Pagination {
    pub const fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Read `page` and `limit`; missing, blank, non-numeric, or non-positive
    /// values fall back to the defaults.
    pub fn from_request_params(params: &HashMap<String, String>) -> Self {
        let positive = |name: &str, default: u32| {
            params
                .get(name)
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };

        Self {
            page: positive("page", DEFAULT_PAGE),
            limit: positive("limit", DEFAULT_LIMIT),
        }
    }

    pub fn validate(&self) -> Result<(), PaginationError> {
        if self.page < 1 {
            return Err(PaginationError::InvalidPage);
        }
        if self.limit < 1 || self.limit > MAX_LIMIT {
            return Err(PaginationError::InvalidLimit);
        }
        Ok(())
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        if self.page > 1 {
            u64::from(self.page - 1) * u64::from(self.limit)
        } else {
            0
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_LIMIT)
    }
}

/// Pages needed for `total_items`; an empty collection still has one page.
pub fn total_pages(total_items: u64, limit: u32) -> u64 {
    if limit == 0 {
        return 0;
    }
    if total_items == 0 {
        return 1;
    }
    total_items.div_ceil(u64::from(limit))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub per_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageMeta {
    pub fn new(pagination: Pagination, total_items: u64) -> Self {
        let total_pages = total_pages(total_items, pagination.limit());
        Self {
            current_page: pagination.page(),
            per_page: pagination.limit(),
            total_pages,
            total_items,
            has_next: u64::from(pagination.page()) < total_pages,
            has_prev: pagination.page() > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_replace_missing_and_invalid_values() {
        let cases = [
            params(&[]),
            params(&[("page", ""), ("limit", "")]),
            params(&[("page", "abc"), ("limit", "ten")]),
            params(&[("page", "0"), ("limit", "-5")]),
        ];

        for case in &cases {
            assert_eq!(Pagination::from_request_params(case), Pagination::new(1, 10));
        }
    }

    #[test]
    fn explicit_values_are_kept() {
        let pagination = Pagination::from_request_params(&params(&[("page", "3"), ("limit", "25")]));
        assert_eq!(pagination.page(), 3);
        assert_eq!(pagination.limit(), 25);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        assert_eq!(Pagination::new(0, 10).validate(), Err(PaginationError::InvalidPage));
        assert_eq!(Pagination::new(1, 0).validate(), Err(PaginationError::InvalidLimit));
        assert_eq!(
            Pagination::new(1, MAX_LIMIT + 1).validate(),
            Err(PaginationError::InvalidLimit)
        );
        assert!(Pagination::new(1, MAX_LIMIT).validate().is_ok());
    }

    #[test]
    fn oversized_limit_survives_parsing_and_fails_validation() {
        let pagination = Pagination::from_request_params(&params(&[("limit", "20000")]));
        assert_eq!(pagination.limit(), 20000);
        assert!(pagination.validate().is_err());
    }

    #[test]
    fn offset_is_zero_on_first_page() {
        for limit in [1, 10, 15000] {
            assert_eq!(Pagination::new(1, limit).offset(), 0);
        }
        for page in 2..20u32 {
            for limit in [1u32, 7, 10, 15000] {
                assert_eq!(
                    Pagination::new(page, limit).offset(),
                    u64::from(page - 1) * u64::from(limit)
                );
            }
        }
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 1);
        assert_eq!(total_pages(15, 0), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(15, 10), 2);
        assert_eq!(total_pages(1, 15000), 1);
    }

    #[test]
    fn meta_for_last_partial_page() {
        let meta = PageMeta::new(Pagination::new(2, 10), 15);
        assert_eq!(
            meta,
            PageMeta {
                current_page: 2,
                per_page: 10,
                total_pages: 2,
                total_items: 15,
                has_next: false,
                has_prev: true,
            }
        );
    }

    #[test]
    fn empty_collection_is_page_one_of_one() {
        let meta = PageMeta::new(Pagination::default(), 0);
        assert_eq!(meta.total_pages, 1);
        assert!(!meta.has_next);
        assert!(!meta.has_prev);
    }
}
