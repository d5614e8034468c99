use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use mercury::MercuryError;

#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    /// Bad pubkey, chain or path shape
    #[error("{0}")]
    MalformedInput(String),
    /// Missing contract or claim
    #[error("{0}")]
    NotFound(String),
    /// Missing voucher, bad signature or key mismatch
    #[error("{0}")]
    Unauthorized(String),
    /// Voucher exceeds the funded capacity of its contract
    #[error("{0}")]
    InsufficientAllowance(String),
    /// Contract absent or not open at the current height
    #[error("{0}")]
    ContractClosed(String),
    /// Backend could not be reached
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MercuryError> for SentinelError {
    fn from(e: MercuryError) -> Self {
        match e {
            MercuryError::InvalidPubKey(_) | MercuryError::InvalidChain(_) => {
                SentinelError::MalformedInput(e.to_string())
            }
            MercuryError::InvalidVoucher(_) | MercuryError::SignatureError(_) => {
                SentinelError::Unauthorized(e.to_string())
            }
            MercuryError::SerdeError(e) => SentinelError::Serialization(e),
            other => SentinelError::Internal(other.to_string()),
        }
    }
}

impl ResponseError for SentinelError {
    fn status_code(&self) -> StatusCode {
        match self {
            SentinelError::MalformedInput(_) | SentinelError::NotFound(_) => {
                StatusCode::BAD_REQUEST
            }
            SentinelError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SentinelError::InsufficientAllowance(_) => StatusCode::PAYMENT_REQUIRED,
            SentinelError::ContractClosed(_) => StatusCode::FORBIDDEN,
            SentinelError::Upstream(_) => StatusCode::BAD_GATEWAY,
            SentinelError::Serialization(_)
            | SentinelError::Database(_)
            | SentinelError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let reason = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            match self {
                SentinelError::Upstream(_) => "failed to reach upstream service".to_string(),
                _ => "an internal error occurred".to_string(),
            }
        } else {
            self.to_string()
        };

        HttpResponse::build(status)
            .content_type("text/plain; charset=utf-8")
            .body(reason)
    }
}
