//! Error types for spanorm

use thiserror::Error;

/// Result type alias for spanorm operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for query construction and execution
#[derive(Debug, Error)]
pub enum OrmError {
    /// `add_binding` was called with an unrecognized binding category
    #[error("Invalid binding category: {category}")]
    InvalidBindingCategory { category: String },

    /// Operator outside the allow-list, or a null value paired with an operator
    #[error("Illegal operator or value combination: {operator}")]
    InvalidOperatorOrValue { operator: String },

    /// Order direction other than `asc` or `desc`
    #[error("Order direction must be \"asc\" or \"desc\", got: {direction}")]
    InvalidOrderDirection { direction: String },

    /// A subquery position received something that is not a query or SQL string
    #[error("Invalid subquery: {reason}")]
    InvalidSubqueryArgument { reason: String },

    /// Database/transport error raised by the executor, passed through unchanged
    #[error("Database error: {0}")]
    Database(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl OrmError {
    /// Create an invalid-operator error
    pub fn invalid_operator(operator: impl Into<String>) -> Self {
        Self::InvalidOperatorOrValue {
            operator: operator.into(),
        }
    }

    /// Create an invalid-subquery error
    pub fn invalid_subquery(reason: impl Into<String>) -> Self {
        Self::InvalidSubqueryArgument {
            reason: reason.into(),
        }
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is a database error from the executor boundary
    pub fn is_database(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}
