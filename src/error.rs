use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::checkout::CheckoutError;
use crate::responses::RequestMeta;

pub const E_BAD_CHECKOUT: &str = "BAD_CHECKOUT";
pub const E_DB_FAILURE: &str = "DB_FAILURE";
pub const E_NOT_FOUND: &str = "NOT_FOUND";
pub const E_ORDER_NOT_PLACED: &str = "ORDER_NOT_PLACED";
pub const E_ORDER_INCONSISTENT: &str = "ORDER_INCONSISTENT";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
    /// Server-side failure with a message that is safe to show.
    Failed {
        message: String,
        source: anyhow::Error,
    },
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
    order_number: Option<String>,
    referral_cleared: Option<bool>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
            order_number: None,
            referral_cleared: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn status(&self) -> StatusCode {
        match &self.error {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) | ApiError::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Maps a rejected checkout onto the API error envelope.
pub fn checkout_error(err: CheckoutError, meta: RequestMeta) -> ApiErrorWithMeta {
    let message = err.user_message();
    match err {
        CheckoutError::Invalid(msg) => ApiError::BadRequest(msg)
            .with_meta(meta)
            .with_code(E_BAD_CHECKOUT),
        CheckoutError::OrderNotPlaced(e) => ApiError::Failed {
            message,
            source: e.into(),
        }
        .with_meta(meta)
        .with_code(E_ORDER_NOT_PLACED),
        CheckoutError::OrderWithoutItems {
            order_id,
            order_number,
            referral_cleared,
            source,
        } => {
            let mut api = ApiError::Failed {
                message,
                source: anyhow::Error::new(source)
                    .context(format!("order {order_id} has no line items")),
            }
            .with_meta(meta)
            .with_code(E_ORDER_INCONSISTENT);
            api.order_number = Some(order_number);
            api.referral_cleared = Some(referral_cleared);
            api
        }
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self.error {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => msg,
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                "internal server error".to_string()
            }
            ApiError::Failed { message, source } => {
                error!("request failed: {:?}", source);
                message
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }
        if let Some(order_number) = self.order_number {
            body["order_number"] = json!(order_number);
        }
        if let Some(cleared) = self.referral_cleared {
            body["referral_cleared"] = json!(cleared);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::store::StoreError;

    fn meta() -> RequestMeta {
        RequestMeta {
            request_id: "req-1".into(),
            request_at: "2024-01-01T00:00:00Z".into(),
            timestamp: 1_704_067_200,
        }
    }

    #[test]
    fn invalid_checkout_is_bad_request() {
        let api = checkout_error(CheckoutError::Invalid("cart is empty".into()), meta());
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.code.as_deref(), Some(E_BAD_CHECKOUT));
    }

    #[test]
    fn missing_items_is_distinguishable_from_header_failure() {
        let header = checkout_error(
            CheckoutError::OrderNotPlaced(StoreError::Unavailable("down".into())),
            meta(),
        );
        let items = checkout_error(
            CheckoutError::OrderWithoutItems {
                order_id: Uuid::new_v4(),
                order_number: "ORD-20240101-ABCDEF01".into(),
                referral_cleared: false,
                source: StoreError::Unavailable("down".into()),
            },
            meta(),
        );
        assert_eq!(header.code.as_deref(), Some(E_ORDER_NOT_PLACED));
        assert_eq!(items.code.as_deref(), Some(E_ORDER_INCONSISTENT));
        assert_eq!(items.order_number.as_deref(), Some("ORD-20240101-ABCDEF01"));
        assert_eq!(items.referral_cleared, Some(false));
        assert_eq!(header.referral_cleared, None);
    }

    #[tokio::test]
    async fn not_found_response() {
        let response = ApiError::NotFound("affiliate not found".into())
            .with_meta(meta())
            .with_code(E_NOT_FOUND)
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
