use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::responses::RequestMeta;

pub const E_BAD_AMOUNT: &str = "BAD_AMOUNT";
pub const E_BAD_CURRENCY: &str = "BAD_CURRENCY";
pub const E_UNKNOWN_PROJECT: &str = "UNKNOWN_PROJECT";
pub const E_UNKNOWN_PURCHASE: &str = "UNKNOWN_PURCHASE";
pub const E_DB_FAILURE: &str = "DB_FAILURE";
pub const E_INGEST_FAILURE: &str = "INGEST_FAILURE";
pub const E_REFUND_FAILURE: &str = "REFUND_FAILURE";
pub const E_PAYOUT_FAILURE: &str = "PAYOUT_FAILURE";
pub const E_REWARD_FAILURE: &str = "REWARD_FAILURE";
pub const E_UNKNOWN_GRANT: &str = "UNKNOWN_GRANT";
pub const E_GRANT_CONFLICT: &str = "GRANT_CONFLICT";

/// Typed failures raised by the engine components. Anything transport- or
/// storage-shaped travels as `anyhow::Error` and is wrapped at the HTTP
/// boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown project {0}")]
    UnknownProject(Uuid),

    #[error("unknown purchase")]
    UnknownPurchase,

    #[error("invalid commission rate: {0}")]
    InvalidRate(f64),

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("missing currency")]
    MissingCurrency,

    #[error("unknown {kind}: {value}")]
    UnknownStatus { kind: &'static str, value: String },

    #[error("unknown reward grant")]
    UnknownGrant,

    #[error("grant cannot move from {from} to {to}")]
    InvalidGrantTransition { from: &'static str, to: &'static str },
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
