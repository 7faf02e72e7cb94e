use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::web::handlers::{IrisRequest, PredictJsonRequest};

/// 验证的JSON提取器
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: for<'de> Deserialize<'de> + Validate,
    S: Send + Sync,
{
    type Rejection = ValidationError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|err| {
                if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ValidationError::TooLarge(err.body_text())
                } else {
                    ValidationError::JsonParse(err.body_text())
                }
            })?;

        value.validate().map_err(ValidationError::Validation)?;

        Ok(ValidatedJson(value))
    }
}

/// 请求体验证
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// 验证错误类型
#[derive(Debug)]
pub enum ValidationError {
    JsonParse(String),
    Validation(String),
    /// 请求体超过 `DefaultBodyLimit`
    TooLarge(String),
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            ValidationError::TooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            _ => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        };
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": self.to_string()
            }
        });

        tracing::warn!("Request validation failed: {}", self);
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::JsonParse(msg) => write!(f, "JSON parse error: {}", msg),
            ValidationError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ValidationError::TooLarge(msg) => write!(f, "Request body too large: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl Validate for PredictJsonRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(features) = &self.features {
            if features.is_empty() {
                return Err("Feature vector cannot be empty".to_string());
            }
            if features.iter().any(|f| !f.is_finite()) {
                return Err("Features must be finite numbers".to_string());
            }
        }

        if let Some(image) = &self.image {
            if image.trim().is_empty() {
                return Err("Image data cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

impl Validate for IrisRequest {
    fn validate(&self) -> Result<(), String> {
        // 物理测量值，只要求非负
        let fields = [
            ("sepal_length", self.sepal_length),
            ("sepal_width", self.sepal_width),
            ("petal_length", self.petal_length),
            ("petal_width", self.petal_width),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a non-negative number, got {}", name, value));
            }
        }
        Ok(())
    }
}

/// 请求ID提取器：沿用 `X-Request-ID`，否则生成新的 UUID
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get("X-Request-ID")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(RequestId(request_id))
    }
}
