//! API module - HTTP interface of the question engine

pub mod ask_api;
pub mod status_api;

// Re-export API handlers
pub use ask_api::{ask, AskBody, ApiError, ErrorResponse};
pub use status_api::{status, usage, StatusResponse, UsageResponse};
