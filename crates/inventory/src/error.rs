use common::{ApiError, ProductId};
use thiserror::Error;

/// Errors from a product ledger backend.
#[derive(Debug, Error)]
pub enum ProductStoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value does not fit the domain type.
    #[error("Corrupt row for product {id}: {reason}")]
    CorruptRow { id: i64, reason: String },
}

/// Errors surfaced by the inventory service.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Product {0} not found")]
    NotFound(ProductId),

    #[error("Invalid product data")]
    Validation(Vec<String>),

    #[error("Quantity must be greater than zero")]
    InvalidQuantity,

    #[error("Reservation key must be between 1 and 100 characters")]
    InvalidReservationKey,

    #[error(transparent)]
    Store(#[from] ProductStoreError),
}

/// Result type for product ledger operations.
pub type Result<T> = std::result::Result<T, ProductStoreError>;

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            InventoryError::Validation(errors) => {
                ApiError::validation("Invalid product data", errors)
            }
            InventoryError::InvalidQuantity | InventoryError::InvalidReservationKey => {
                ApiError::bad_request(err.to_string())
            }
            InventoryError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}
