pub mod catalog;
pub mod keys;
pub mod models;
pub mod pagination;
pub mod repository;
pub mod routes;
pub mod seed;
pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use libris_kernel::{InitCtx, Migration, Module};

use catalog::BookCatalog;

const CREATE_BOOKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS books (
    id UUID PRIMARY KEY,
    title VARCHAR(200) NOT NULL,
    author VARCHAR(200) NOT NULL,
    year INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS books_created_at_idx ON books (created_at DESC, id DESC);
"#;

/// Book catalog: CRUD and listing over `/api/books`, served through the
/// read-through cache.
pub struct BooksModule {
    catalog: Arc<BookCatalog>,
}

impl BooksModule {
    pub fn new(catalog: Arc<BookCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            repository = self.catalog.repository_backend(),
            cache = self.catalog.cache_backend().unwrap_or("disabled"),
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.catalog.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi_fragment())
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_create_books",
            up: CREATE_BOOKS_TABLE,
        }]
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.catalog.close().await?;
        tracing::info!(module = self.name(), "book cache closed");
        Ok(())
    }
}

pub fn create_module(catalog: Arc<BookCatalog>) -> Arc<dyn Module> {
    Arc::new(BooksModule::new(catalog))
}

fn openapi_fragment() -> serde_json::Value {
    let error = |description: &str| {
        serde_json::json!({
            "description": description,
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                }
            }
        })
    };
    let envelope = |data: serde_json::Value| {
        serde_json::json!({
            "description": "OK",
            "content": {
                "application/json": {
                    "schema": {
                        "type": "object",
                        "properties": {
                            "success": { "type": "boolean" },
                            "message": { "type": "string" },
                            "data": data
                        }
                    }
                }
            }
        })
    };
    let id_param = serde_json::json!({
        "name": "id",
        "in": "path",
        "required": true,
        "schema": { "type": "string", "format": "uuid" }
    });
    let query_param = |name: &str, kind: &str| {
        serde_json::json!({
            "name": name,
            "in": "query",
            "required": false,
            "schema": { "type": kind }
        })
    };
    let body = |schema: &str| {
        serde_json::json!({
            "required": true,
            "content": {
                "application/json": {
                    "schema": { "$ref": format!("#/components/schemas/{schema}") }
                }
            }
        })
    };
    let book_ref = serde_json::json!({ "$ref": "#/components/schemas/Book" });

    serde_json::json!({
        "paths": {
            "": {
                "get": {
                    "summary": "List books, newest first",
                    "tags": ["Books"],
                    "parameters": [
                        query_param("page", "integer"),
                        query_param("limit", "integer"),
                        query_param("title", "string"),
                        query_param("author", "string"),
                        query_param("year", "integer")
                    ],
                    "responses": {
                        "200": envelope(serde_json::json!({ "$ref": "#/components/schemas/BookPage" })),
                        "400": error("Invalid pagination or filter"),
                        "500": error("Internal server error")
                    }
                },
                "post": {
                    "summary": "Create a book",
                    "tags": ["Books"],
                    "requestBody": body("CreateBook"),
                    "responses": {
                        "200": envelope(book_ref.clone()),
                        "400": error("Validation error"),
                        "500": error("Internal server error")
                    }
                }
            },
            "/health": {
                "get": {
                    "summary": "Books module health",
                    "tags": ["Books"],
                    "responses": {
                        "200": envelope(serde_json::json!({ "type": "object" }))
                    }
                }
            },
            "/{id}": {
                "parameters": [id_param],
                "get": {
                    "summary": "Get a book",
                    "tags": ["Books"],
                    "responses": {
                        "200": envelope(book_ref.clone()),
                        "404": error("Book not found")
                    }
                },
                "put": {
                    "summary": "Update a book",
                    "tags": ["Books"],
                    "requestBody": body("UpdateBook"),
                    "responses": {
                        "200": envelope(book_ref.clone()),
                        "400": error("Validation error or no changes"),
                        "404": error("Book not found")
                    }
                },
                "patch": {
                    "summary": "Update a book",
                    "tags": ["Books"],
                    "requestBody": body("UpdateBook"),
                    "responses": {
                        "200": envelope(book_ref),
                        "400": error("Validation error or no changes"),
                        "404": error("Book not found")
                    }
                },
                "delete": {
                    "summary": "Delete a book",
                    "tags": ["Books"],
                    "responses": {
                        "200": envelope(serde_json::json!({})),
                        "404": error("Book not found")
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "Book": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "format": "uuid" },
                        "title": { "type": "string", "maxLength": 200 },
                        "author": { "type": "string", "maxLength": 200 },
                        "year": { "type": "integer" },
                        "created_at": { "type": "string", "format": "date-time" },
                        "updated_at": { "type": ["string", "null"], "format": "date-time" }
                    },
                    "required": ["id", "title", "author", "year", "created_at", "updated_at"]
                },
                "BookPage": {
                    "type": "object",
                    "properties": {
                        "data": { "type": "array", "items": { "$ref": "#/components/schemas/Book" } },
                        "meta": {
                            "type": "object",
                            "properties": {
                                "current_page": { "type": "integer" },
                                "per_page": { "type": "integer" },
                                "total_pages": { "type": "integer" },
                                "total_items": { "type": "integer" },
                                "has_next": { "type": "boolean" },
                                "has_prev": { "type": "boolean" }
                            }
                        }
                    }
                },
                "CreateBook": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "year": { "type": "integer" }
                    },
                    "required": ["title", "author", "year"]
                },
                "UpdateBook": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "year": { "type": "integer" }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::catalog::CachePolicy;
    use crate::modules::books::repository::InMemoryBookRepository;
    use crate::modules::books::validation::BookValidator;
    use libris_cache::{Cache, InMemoryCache};

    fn module_with_cache(cache: Arc<InMemoryCache>) -> BooksModule {
        let catalog = BookCatalog::new(
            Arc::new(InMemoryBookRepository::new()),
            Some(cache),
            BookValidator::default(),
            CachePolicy::default(),
        );
        BooksModule::new(Arc::new(catalog))
    }

    #[test]
    fn contributes_books_migration() {
        let module = module_with_cache(Arc::new(InMemoryCache::new()));
        let migrations = module.migrations();

        assert_eq!(migrations.len(), 1);
        assert!(migrations[0].up.contains("CREATE TABLE IF NOT EXISTS books"));
    }

    #[test]
    fn openapi_fragment_documents_every_route() {
        let doc = openapi_fragment();
        let paths = doc["paths"].as_object().unwrap();

        assert!(paths.contains_key(""));
        assert!(paths.contains_key("/{id}"));
        assert!(doc["components"]["schemas"]["Book"].is_object());
    }

    #[tokio::test]
    async fn stop_closes_the_cache() {
        let cache = Arc::new(InMemoryCache::new());
        let module = module_with_cache(cache.clone());

        module.stop().await.unwrap();
        assert!(cache.get("item:any").await.is_err());
    }
}
