use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("missing required claim: {0}")]
    MissingClaim(String),

    #[error("rate limit exceeded for {scope} '{key}'")]
    RateLimited { scope: String, key: String },

    #[error("budget exceeded for tenant '{tenant_id}' resource {resource}")]
    BudgetExceeded { tenant_id: String, resource: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SecurityError>;
