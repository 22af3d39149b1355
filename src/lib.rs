// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod clock;
pub mod context;
pub mod error;
pub mod ingest;

pub use crate::api::create_router;
pub use crate::context::ServiceContext;
pub use crate::error::CrawlError;
