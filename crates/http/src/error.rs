use axum::Json;
use axum::response::{IntoResponse, Response};
use http::header::RETRY_AFTER;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tenantguard_core::{AppError, ErrorKind};
use tenantguard_domain::{CorrelationId, GuardRejection};
use tracing::error;

/// Error details carried in the response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable code. This is the contract; messages are not.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured extras such as `retry_after_seconds`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Uniform response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error details on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Correlation id of the request.
    pub correlation_id: String,
}

impl<T: Serialize> ResponseEnvelope<T> {
    /// Successful envelope around `data`.
    pub fn ok(data: T, correlation_id: &CorrelationId) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// HTTP error rendered as the failure envelope.
///
/// When the correlation id is not known at the point of failure, the
/// request-context middleware fills it in on the way out.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    retry_after_seconds: Option<u64>,
    correlation_id: Option<CorrelationId>,
}

/// Marker left on responses whose envelope still lacks a correlation id.
#[derive(Debug, Clone)]
pub(crate) struct UncorrelatedError(pub(crate) ApiError);

impl ApiError {
    /// Creates an error with an explicit status and code.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            },
            retry_after_seconds: None,
            correlation_id: None,
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    /// Attaches the request's correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// HTTP status of the error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        self.body.code.as_str()
    }
}

impl From<GuardRejection> for ApiError {
    fn from(value: GuardRejection) -> Self {
        let status =
            StatusCode::from_u16(value.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut api_error = Self::new(status, value.code(), value.to_string());

        if let Some(retry_after_seconds) = value.retry_after_seconds() {
            api_error.retry_after_seconds = Some(retry_after_seconds);
            api_error = api_error.with_details(serde_json::json!({
                "retry_after_seconds": retry_after_seconds,
            }));
        }

        api_error
    }
}

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        if value.kind() == ErrorKind::Dependency {
            error!(error = %value, "request failed on a dependency");
        }

        match value {
            AppError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            AppError::Unauthorized(message) => {
                Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
            }
            AppError::Forbidden(message) => Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
            AppError::RateLimited(message) => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
            }
            AppError::Dependency(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "DEPENDENCY_UNAVAILABLE",
                "a backing service is unavailable",
            ),
            AppError::Internal(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ResponseEnvelope::<()> {
            success: false,
            data: None,
            error: Some(self.body.clone()),
            correlation_id: self
                .correlation_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        };

        let mut response = (self.status, Json(envelope)).into_response();

        if let Some(retry_after_seconds) = self.retry_after_seconds {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_seconds));
        }

        if self.correlation_id.is_none() {
            response.extensions_mut().insert(UncorrelatedError(self));
        }

        response
    }
}

/// Standard API result type.
pub type ApiResult<T> = Result<T, ApiError>;
