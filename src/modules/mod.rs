pub mod books;

use std::sync::Arc;

use libris_kernel::ModuleRegistry;

use books::catalog::BookCatalog;

/// Register all project-specific modules with the registry
pub fn register_all(registry: &mut ModuleRegistry, catalog: Arc<BookCatalog>) {
    registry.register(books::create_module(catalog));
}
