use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GardenError {
    /// 启动阶段的模型加载失败，该模型不会进入注册表
    #[error("Failed to load model '{model}': {reason}")]
    Load { model: String, reason: String },

    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request body too large, max allowed: {0} bytes")]
    FileTooLarge(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GardenError {
    pub fn load(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        GardenError::Load {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GardenError::NotFound(_) => StatusCode::NOT_FOUND,
            GardenError::Decode(_) => StatusCode::BAD_REQUEST,
            GardenError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GardenError::Base64(_) => StatusCode::BAD_REQUEST,
            GardenError::Json(_) => StatusCode::BAD_REQUEST,
            GardenError::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GardenError::Load { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            GardenError::Load { .. } => "MODEL_LOAD_ERROR",
            GardenError::NotFound(_) => "MODEL_NOT_FOUND",
            GardenError::Decode(_) => "DECODE_ERROR",
            GardenError::Prediction(_) => "PREDICTION_ERROR",
            GardenError::InvalidInput(_) => "INVALID_INPUT",
            GardenError::FileTooLarge(_) => "FILE_TOO_LARGE",
            GardenError::Config(_) => "CONFIG_ERROR",
            GardenError::Io(_) => "IO_ERROR",
            GardenError::Json(_) => "JSON_ERROR",
            GardenError::Base64(_) => "BASE64_DECODE_ERROR",
            GardenError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<image::ImageError> for GardenError {
    fn from(err: image::ImageError) -> Self {
        GardenError::Decode(err.to_string())
    }
}

impl From<::config::ConfigError> for GardenError {
    fn from(err: ::config::ConfigError) -> Self {
        GardenError::Config(err.to_string())
    }
}

impl IntoResponse for GardenError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        });

        if status.is_server_error() {
            tracing::error!("Request failed: {} ({})", self, status);
        } else {
            tracing::warn!("Request rejected: {} ({})", self, status);
        }

        (status, axum::Json(error_response)).into_response()
    }
}
