use crate::{
    image::ImageLoader,
    inference::{ImageMetadata, PredictionRequest, PredictionResult},
    utils::error::GardenError,
    web::{
        extractors::{RequestId, ValidatedJson},
        AppState,
    },
    Result,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// 默认的表格模型名称
pub const IRIS_MODEL: &str = "iris-model";
/// 默认的图像模型名称
pub const FLOWERS_MODEL: &str = "flowers-model";

/// 通用JSON预测请求：特征向量或base64图像二选一
#[derive(Debug, Deserialize)]
pub struct PredictJsonRequest {
    #[serde(default)]
    pub features: Option<Vec<f32>>,

    /// Base64编码的图像数据
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub lat: Option<f64>,

    #[serde(default)]
    pub lng: Option<f64>,
}

impl PredictJsonRequest {
    pub fn into_request(self) -> Result<PredictionRequest> {
        match (self.features, self.image) {
            (Some(features), None) => Ok(PredictionRequest::tabular(features)),
            (None, Some(image)) => {
                let bytes = ImageLoader::bytes_from_base64(&image)?;
                Ok(PredictionRequest::image(bytes).with_metadata(ImageMetadata {
                    lat: self.lat,
                    lng: self.lng,
                }))
            }
            _ => Err(GardenError::InvalidInput(
                "Provide exactly one of 'features' or 'image'".to_string(),
            )),
        }
    }
}

/// 鸢尾花测量值
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IrisRequest {
    pub sepal_length: f32,
    pub sepal_width: f32,
    pub petal_length: f32,
    pub petal_width: f32,
}

impl IrisRequest {
    pub fn to_features(&self) -> Vec<f32> {
        vec![
            self.sepal_length,
            self.sepal_width,
            self.petal_length,
            self.petal_width,
        ]
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelQuery {
    pub model_name: Option<String>,
}

/// JSON响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, request_id: String) -> Self {
        Self {
            success: true,
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
        }
    }
}

type PredictionResponse = Result<Json<ApiResponse<PredictionResult>>>;

/// 通用预测：JSON特征或base64图像
pub async fn predict_json_handler(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
    RequestId(request_id): RequestId,
    ValidatedJson(body): ValidatedJson<PredictJsonRequest>,
) -> PredictionResponse {
    let request = body.into_request()?;
    run_prediction(&state, model_name, request, request_id).await
}

/// 通用预测：multipart图像上传
pub async fn predict_upload_handler(
    State(state): State<AppState>,
    Path(model_name): Path<String>,
    RequestId(request_id): RequestId,
    mut multipart: Multipart,
) -> PredictionResponse {
    let request = read_image_upload(&mut multipart, state.config.server_config.max_request_size).await?;
    run_prediction(&state, model_name, request, request_id).await
}

/// 鸢尾花预测，可通过 `?model_name=` 指定模型
pub async fn iris_predict_handler(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    RequestId(request_id): RequestId,
    ValidatedJson(body): ValidatedJson<IrisRequest>,
) -> PredictionResponse {
    let model_name = query.model_name.unwrap_or_else(|| IRIS_MODEL.to_string());
    let request = PredictionRequest::tabular(body.to_features());
    run_prediction(&state, model_name, request, request_id).await
}

/// 花卉图像预测
pub async fn flowers_predict_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    mut multipart: Multipart,
) -> PredictionResponse {
    let request = read_image_upload(&mut multipart, state.config.server_config.max_request_size).await?;
    run_prediction(&state, FLOWERS_MODEL.to_string(), request, request_id).await
}

async fn run_prediction(
    state: &AppState,
    model_name: String,
    request: PredictionRequest,
    request_id: String,
) -> PredictionResponse {
    let start_time = Instant::now();

    tracing::info!(
        "Processing prediction: request_id={}, model={}, input={}",
        request_id,
        model_name,
        request.kind()
    );

    let result = state.predictor.predict_blocking(model_name, request).await?;

    tracing::info!(
        "Prediction completed: request_id={}, model={}, top={:?}, time={:.3}s",
        request_id,
        result.model,
        result.top().map(|p| p.label.as_str()),
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(ApiResponse::success(result, request_id)))
}

/// 解析multipart：`image`（或 `file`）字段为图像，`lat`/`lng` 为可选元数据
async fn read_image_upload(multipart: &mut Multipart, max_size: usize) -> Result<PredictionRequest> {
    let mut image_data = None;
    let mut metadata = ImageMetadata::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_size, "Failed to read multipart field"))?
    {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "image" | "file" => {
                if let Some(content_type) = field.content_type() {
                    if !content_type.starts_with("image/") && content_type != "application/octet-stream" {
                        return Err(GardenError::InvalidInput(format!(
                            "Unsupported content type: {}",
                            content_type
                        )));
                    }
                }

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, max_size, "Failed to read file data"))?;

                tracing::debug!("Received image: {} bytes", data.len());
                image_data = Some(data);
            }
            "lat" | "lng" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, max_size, "Failed to read form field"))?;
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }

                let parsed: f64 = value
                    .parse()
                    .map_err(|_| GardenError::InvalidInput(format!("Invalid {}: {}", field_name, value)))?;
                if field_name == "lat" {
                    metadata.lat = Some(parsed);
                } else {
                    metadata.lng = Some(parsed);
                }
            }
            _ => {
                tracing::debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    let image_data =
        image_data.ok_or_else(|| GardenError::InvalidInput("No image file provided".to_string()))?;

    Ok(PredictionRequest::image(image_data).with_metadata(metadata))
}

/// `DefaultBodyLimit` 触发时 multer 报 413，其余按输入错误处理
fn multipart_error(err: MultipartError, max_size: usize, context: &str) -> GardenError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GardenError::FileTooLarge(max_size)
    } else {
        GardenError::InvalidInput(format!("{}: {}", context, err))
    }
}
