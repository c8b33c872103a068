//! service-core: Shared infrastructure for the credit relay and its clients.
pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod middleware;
pub mod observability;

pub use async_trait;
pub use axum;
pub use ethers;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use validator;
