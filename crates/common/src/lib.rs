//! Shared building blocks for the inventory and sales services.
//!
//! Identifiers and money, the response envelope, the API error taxonomy,
//! event topics and payloads, bearer-token handling, and the operational
//! endpoints and tracing setup shared by the service binaries.

pub mod auth;
pub mod dto;
pub mod envelope;
pub mod error;
pub mod messages;
pub mod ops;
pub mod telemetry;
pub mod types;

pub use auth::{AuthError, Claims, JwtConfig, JwtManager, Role, require_auth};
pub use dto::{ProductResponse, StockChangeRequest};
pub use envelope::ApiResponse;
pub use error::ApiError;
pub use messages::topics;
pub use telemetry::LogFormat;
pub use types::{CustomerId, Money, OrderId, ProductId};
