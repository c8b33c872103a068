pub use service_core::api::{BillingStatus, ErrorBody, QUERY_PATH, QueryRequest, QueryResponse};
