//! Libris application library: the books module, its read-through catalog,
//! and the composition root used by the binaries.

pub mod app;
pub mod modules;

pub use app::App;
