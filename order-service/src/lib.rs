pub mod api;
pub mod error;
pub mod memory_store;
pub mod models;
pub mod outbox;
pub mod pg_store;
pub mod processor;
pub mod reaper;
pub mod schema;
pub mod settlement;
pub mod store;
pub mod webhook;
