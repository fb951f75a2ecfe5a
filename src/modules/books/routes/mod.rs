//! HTTP handlers for the books module.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::Response,
    routing::get,
    Json, Router,
};
use libris_http::{
    error::{method_not_allowed, AppError},
    response::ApiResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{BookCatalog, CatalogError, Served};
use super::models::{BookFilter, BookPatch, NewBook};
use super::pagination::Pagination;
use super::validation::FieldError;

type Catalog = Arc<BookCatalog>;

/// Absent fields decode to empty values so they are reported per field
/// instead of failing the whole body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    pub year: Option<i32>,
}

impl TryFrom<CreateBookRequest> for NewBook {
    type Error = CatalogError;

    fn try_from(req: CreateBookRequest) -> Result<Self, Self::Error> {
        let Some(year) = req.year else {
            let mut fields: Vec<FieldError> = [("title", &req.title), ("author", &req.author)]
                .into_iter()
                .filter(|(_, value)| value.trim().is_empty())
                .map(|(field, _)| FieldError {
                    field,
                    error: "is required".to_string(),
                })
                .collect();
            fields.push(FieldError {
                field: "year",
                error: "is required".to_string(),
            });
            return Err(CatalogError::Validation {
                message: "validation failed".to_string(),
                fields,
            });
        };

        Ok(Self {
            title: req.title,
            author: req.author,
            year,
        })
    }
}

/// Body for PUT and PATCH; both apply only the fields present.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i32>,
}

impl From<UpdateBookRequest> for BookPatch {
    fn from(req: UpdateBookRequest) -> Self {
        Self {
            title: req.title,
            author: req.author,
            year: req.year,
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation { message, fields } => {
                let details = fields
                    .iter()
                    .filter_map(|field| serde_json::to_value(field).ok())
                    .collect();
                AppError::validation(details, message)
            }
            CatalogError::NotFound => AppError::not_found("book not found"),
            CatalogError::Storage(err) => {
                AppError::Internal(anyhow::Error::new(err).context("book store failure"))
            }
        }
    }
}

pub fn router(catalog: Catalog) -> Router {
    Router::new()
        .route(
            "/",
            get(list_books)
                .post(create_book)
                .fallback(method_not_allowed),
        )
        .route("/health", get(health))
        .route(
            "/{id}",
            get(get_book)
                .put(update_book)
                .patch(update_book)
                .delete(delete_book)
                .fallback(method_not_allowed),
        )
        .with_state(catalog)
}

async fn list_books(
    State(catalog): State<Catalog>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let pagination = Pagination::from_request_params(&params);
    let filter = BookFilter::from_request_params(&params)
        .map_err(|raw| AppError::bad_request(format!("invalid year: {raw}")))?;

    let served = catalog.list(pagination, &filter).await?;
    respond(&catalog, served).await
}

async fn get_book(
    State(catalog): State<Catalog>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let served = catalog.get(id).await?;
    respond(&catalog, served).await
}

async fn create_book(
    State(catalog): State<Catalog>,
    payload: Result<Json<CreateBookRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(invalid_json)?;

    let created = catalog.create(NewBook::try_from(req)?).await?;
    ApiResponse::ok(created)
        .with_message("Book created successfully")
        .render()
        .map_err(render_failed)
}

async fn update_book(
    State(catalog): State<Catalog>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateBookRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let Json(req) = payload.map_err(invalid_json)?;

    let updated = catalog.update(id, req.into()).await?;
    ApiResponse::ok(updated)
        .with_message("Book updated successfully")
        .render()
        .map_err(render_failed)
}

async fn delete_book(
    State(catalog): State<Catalog>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    catalog.delete(id).await?;

    ApiResponse::message("Book deleted successfully")
        .render()
        .map_err(render_failed)
}

async fn health(State(catalog): State<Catalog>) -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "repository": catalog.repository_backend(),
        "cache": catalog.cache_backend().unwrap_or("disabled"),
    })))
}

/// Render a read result. A cached value that fails to render is dropped so
/// the next request reloads it from the store.
async fn respond<T: Serialize>(catalog: &BookCatalog, served: Served<T>) -> Result<Response, AppError> {
    let cache_key = served.cache_key().map(str::to_string);

    let rendered = ApiResponse::ok(served.into_inner()).render();
    match rendered {
        Ok(response) => Ok(response),
        Err(err) => {
            if let Some(key) = cache_key {
                catalog.discard(&key).await;
            }
            Err(render_failed(err))
        }
    }
}

/// Ids are UUIDs, so anything else cannot name an existing book.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found("book not found"))
}

fn invalid_json(rejection: JsonRejection) -> AppError {
    tracing::debug!(error = %rejection.body_text(), "rejected request body");
    AppError::bad_request("invalid JSON format")
}

fn render_failed(err: serde_json::Error) -> AppError {
    AppError::internal(format!("failed to render response: {err}"))
}
