use common::{ApiError, OrderId};
use thiserror::Error;

/// Errors from an order ledger backend.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value does not fit the domain type.
    #[error("Corrupt row for order {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    /// A sum of order totals does not fit in `Money`.
    #[error("Sales total does not fit in a 64-bit cent amount")]
    TotalOverflow,
}

/// Errors surfaced by the order workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed request; nothing was looked up or stored.
    #[error("Invalid order request")]
    Validation(Vec<String>),

    /// At least one requested line failed its stock check. One entry per
    /// problem line; nothing was reserved or stored.
    #[error("Order could not be placed")]
    Rejected(Vec<String>),

    /// Reserving a line failed after validation passed. Reserved lines
    /// were given back and the order was cancelled.
    #[error("Could not reserve stock for product {product_name}: {reason}")]
    ReservationFailed {
        order_id: OrderId,
        product_name: String,
        reason: String,
    },

    #[error("Order {0} not found")]
    NotFound(OrderId),

    #[error("Period start must not be after its end")]
    InvalidPeriod,

    #[error("Limit must be between 1 and {max}")]
    InvalidLimit { max: usize },

    #[error(transparent)]
    Store(#[from] OrderStoreError),
}

/// Result type for order ledger operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(errors) => ApiError::validation(err_message(&errors), errors),
            WorkflowError::Rejected(errors) => {
                ApiError::validation("Order could not be placed", errors)
            }
            WorkflowError::ReservationFailed { .. } => {
                let message = err.to_string();
                ApiError::Validation {
                    errors: vec![message.clone()],
                    message: "Order could not be placed".to_string(),
                }
            }
            WorkflowError::NotFound(_) => ApiError::NotFound(err.to_string()),
            WorkflowError::InvalidPeriod | WorkflowError::InvalidLimit { .. } => {
                ApiError::bad_request(err.to_string())
            }
            WorkflowError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

fn err_message(errors: &[String]) -> String {
    match errors {
        [single] => single.clone(),
        _ => "Invalid order request".to_string(),
    }
}
