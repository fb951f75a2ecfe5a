//! Field rules for book input.

use libris_kernel::settings::CatalogSettings;
use serde::Serialize;

use super::models::{BookPatch, NewBook};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub error: String,
}

/// Validates book input against configured bounds. Built once and owned by
/// the catalog.
#[derive(Debug, Clone)]
pub struct BookValidator {
    max_title_len: usize,
    max_author_len: usize,
    min_year: i32,
    max_year: i32,
}

impl BookValidator {
    pub fn new(settings: &CatalogSettings) -> Self {
        Self {
            max_title_len: settings.max_title_len,
            max_author_len: settings.max_author_len,
            min_year: settings.min_year,
            max_year: settings.max_year,
        }
    }

    pub fn validate_new(&self, book: &NewBook) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        self.check_text(&mut errors, "title", &book.title, self.max_title_len);
        self.check_text(&mut errors, "author", &book.author, self.max_author_len);
        self.check_year(&mut errors, book.year);
        into_result(errors)
    }

    pub fn validate_patch(&self, patch: &BookPatch) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if let Some(title) = &patch.title {
            self.check_text(&mut errors, "title", title, self.max_title_len);
        }
        if let Some(author) = &patch.author {
            self.check_text(&mut errors, "author", author, self.max_author_len);
        }
        if let Some(year) = patch.year {
            self.check_year(&mut errors, year);
        }
        into_result(errors)
    }

    fn check_text(&self, errors: &mut Vec<FieldError>, field: &'static str, value: &str, max: usize) {
        if value.trim().is_empty() {
            errors.push(FieldError {
                field,
                error: "must not be empty".to_string(),
            });
        } else if value.chars().count() > max {
            errors.push(FieldError {
                field,
                error: format!("must be at most {max} characters"),
            });
        }
    }

    fn check_year(&self, errors: &mut Vec<FieldError>, year: i32) {
        if year < self.min_year || year > self.max_year {
            errors.push(FieldError {
                field: "year",
                error: format!("must be between {} and {}", self.min_year, self.max_year),
            });
        }
    }
}

impl Default for BookValidator {
    fn default() -> Self {
        Self::new(&CatalogSettings::default())
    }
}

fn into_result(errors: Vec<FieldError>) -> Result<(), Vec<FieldError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
