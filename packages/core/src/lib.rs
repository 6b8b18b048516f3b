// Library root: exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod db;
pub mod error;
pub mod file_store;
pub mod insights;
pub mod metrics;
pub mod repository;
pub mod scheduler;
pub mod store;

// Binary-only concerns, public so `main.rs` can reach them through the library.
pub mod cli;
pub mod config;
pub mod logging;
