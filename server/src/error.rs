use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersonaError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} '{id}' already exists")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error in {operation}: {message}")]
    Internal { operation: String, message: String },
}

pub type Result<T> = std::result::Result<T, PersonaError>;

impl PersonaError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists { entity, id: id.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn internal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal { operation: operation.into(), message: message.into() }
    }

    /// Machine-readable code used in JSON-RPC `data` and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// JSON-RPC error code for the stdio transport.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::NotFound { .. } => -32004,
            Self::AlreadyExists { .. } => -32009,
            Self::InvalidRequest(_) => -32602,
            Self::Internal { .. } => -32603,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Runs one operation, re-tagging `Internal` errors with its name.
pub fn guard<T>(operation: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match f() {
        Ok(v) => Ok(v),
        Err(err @ (PersonaError::NotFound { .. } | PersonaError::AlreadyExists { .. } | PersonaError::InvalidRequest(_))) => Err(err),
        Err(PersonaError::Internal { message, .. }) => {
            tracing::error!(operation, %message, "operation failed");
            Err(PersonaError::internal(operation, message))
        }
    }
}

impl From<serde_json::Error> for PersonaError {
    fn from(err: serde_json::Error) -> Self {
        PersonaError::InvalidRequest(err.to_string())
    }
}
