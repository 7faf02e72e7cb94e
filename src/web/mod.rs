pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod ui;

use crate::{
    inference::Predictor,
    models::{ModelLoader, ModelRegistry},
    utils::error::GardenError,
    Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub predictor: Predictor,
}

impl AppState {
    pub fn new(config: Config, registry: ModelRegistry) -> Self {
        Self {
            config: Arc::new(config),
            predictor: Predictor::new(Arc::new(registry)),
        }
    }
}

/// 启动阶段：加载全部模型，检查结果后冻结注册表
pub fn load_registry(config: &Config, loader: ModelLoader) -> Result<ModelRegistry> {
    tracing::info!(
        "Loading {} models from {}",
        config.models.len(),
        loader.models_dir().display()
    );
    let registry = ModelRegistry::load_all(loader, config.models.iter().cloned());
    let report = registry.report();

    if registry.is_empty() {
        return Err(GardenError::Config(format!(
            "No models could be loaded ({} failed)",
            report.failed.len()
        )));
    }

    if config.strict && report.has_failures() {
        let names: Vec<&str> = report.failed.iter().map(|f| f.model.as_str()).collect();
        return Err(GardenError::Config(format!(
            "Strict mode: failed to load {}",
            names.join(", ")
        )));
    }

    for failure in &report.failed {
        tracing::warn!(model = %failure.model, "Serving without model: {}", failure.reason);
    }

    Ok(registry)
}

pub async fn serve(config: Config) -> Result<()> {
    // 在接受请求之前完成模型加载
    let loader = ModelLoader::onnx(&config.models_dir, config.session_options())?;
    let registry = load_registry(&config, loader)?;

    // 解析绑定地址
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| GardenError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e)))?;

    let state = AppState::new(config, registry);
    let app = create_app(state);

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /models/:name/predict        - JSON features or base64 image");
    tracing::info!("  POST /models/:name/predict/upload - Multipart image upload");
    tracing::info!("  POST /iris-model/predict          - Iris measurements");
    tracing::info!("  POST /flowers-model/predict       - Flower image upload");
    tracing::info!("  GET  /api/models                  - Loaded models");
    tracing::info!("  GET  /health                      - Health check");

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GardenError::Internal(format!("Failed to bind to address {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GardenError::Internal(format!("Server failed: {}", e)))?;

    tracing::info!("Server stopped");
    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let server_config = state.config.server_config.clone();

    Router::new()
        // 预测路由
        .route("/models/:name/predict", post(handlers::predict_json_handler))
        .route("/models/:name/predict/upload", post(handlers::predict_upload_handler))
        .route("/iris-model/predict", post(handlers::iris_predict_handler))
        .route("/flowers-model/predict", post(handlers::flowers_predict_handler))
        // Web UI
        .route("/", get(ui::index_handler))
        // 系统路由
        .route("/hi", get(hi_handler))
        .route("/health", get(health_handler))
        .route("/api/models", get(models_handler))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        // 超限由各提取器报告，返回统一的 JSON 413
        .layer(DefaultBodyLimit::max(server_config.max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(server_config.request_timeout)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn hi_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": "Hi from the model garden API" }))
}

/// 健康检查端点
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.predictor.registry();
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "models_loaded": registry.len(),
    }))
}

/// 已加载模型信息
async fn models_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.predictor.registry();
    let models: Vec<_> = registry.descriptors().collect();
    Json(json!({
        "service": "Model Garden",
        "version": env!("CARGO_PKG_VERSION"),
        "models": models,
        "failed": registry.report().failed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::inference::postprocess::rounded_sum_tolerance;
    use crate::models::test_support::{artifact_dir, encode_jpeg, encode_patterned_jpeg, StubFactory};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> (tempfile::TempDir, Router) {
        test_app_with_limit(ServerConfig::default().max_request_size)
    }

    fn test_app_with_limit(max_request_size: usize) -> (tempfile::TempDir, Router) {
        let dir = artifact_dir(&["iris-model/model.onnx", "flowers-model/model.onnx"]);
        let mut config = Config::new(
            "127.0.0.1:0".into(),
            Some(dir.path().to_string_lossy().into_owned()),
            None,
            false,
        )
        .unwrap();
        config.server_config.max_request_size = max_request_size;
        let loader = ModelLoader::new(&config.models_dir, Arc::new(StubFactory::new()));
        let registry = load_registry(&config, loader).unwrap();
        (dir, create_app(AppState::new(config, registry)))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_request(uri: &str, image: &[u8]) -> Request<Body> {
        let boundary = "garden-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"sunflowers.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
                b = boundary
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(
            format!(
                "\r\n--{b}\r\nContent-Disposition: form-data; name=\"lat\"\r\n\r\n-90.00\r\n--{b}--\r\n",
                b = boundary
            )
            .as_bytes(),
        );

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["models_loaded"], 2);
    }

    #[tokio::test]
    async fn test_unknown_model_returns_404() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(json_request(
                "/models/nonexistent-model/predict",
                json!({ "features": [5.1, 3.5, 1.4, 0.2] }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "MODEL_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_predict_features() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(json_request(
                "/models/iris-model/predict",
                json!({ "features": [5.1, 3.5, 1.4, 0.2] }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["model"], "iris-model");
        assert_eq!(json["data"]["predictions"][0]["label"], "setosa");
        assert_eq!(json["data"]["predictions"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_iris_route_with_model_name_query() {
        let (_dir, app) = test_app();
        let body = json!({
            "sepal_length": 6.7,
            "sepal_width": 3.0,
            "petal_length": 5.2,
            "petal_width": 2.3
        });

        let response = app
            .clone()
            .oneshot(json_request("/iris-model/predict?model_name=iris-model", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(json_request("/iris-model/predict?model_name=missing", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_flowers_upload() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(multipart_request(
                "/flowers-model/predict",
                &encode_jpeg(64, 64, [250, 200, 20]),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let predictions = json["data"]["predictions"].as_array().unwrap();
        assert_eq!(predictions.len(), 5);
        let sum: f64 = predictions
            .iter()
            .map(|p| p["probability"].as_f64().unwrap())
            .sum();
        assert!((sum - 1.0).abs() <= rounded_sum_tolerance(5) as f64);
    }

    #[tokio::test]
    async fn test_malformed_upload_returns_400() {
        let (_dir, app) = test_app();
        let jpeg = encode_jpeg(64, 64, [1, 2, 3]);
        let response = app
            .oneshot(multipart_request("/models/flowers-model/predict/upload", &jpeg[..24]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "DECODE_ERROR");
    }

    #[tokio::test]
    async fn test_upload_cut_inside_scan_data_returns_400() {
        let (_dir, app) = test_app();
        let jpeg = encode_patterned_jpeg(256, 256);
        let response = app
            .oneshot(multipart_request("/flowers-model/predict", &jpeg[..jpeg.len() / 2]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "DECODE_ERROR");
    }

    #[tokio::test]
    async fn test_oversized_upload_returns_413() {
        let (_dir, app) = test_app_with_limit(1024);
        let response = app
            .oneshot(multipart_request(
                "/models/flowers-model/predict/upload",
                &encode_patterned_jpeg(256, 256),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "FILE_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_oversized_json_returns_413() {
        let (_dir, app) = test_app_with_limit(64);
        let features: Vec<f32> = vec![1.0; 100];
        let response = app
            .oneshot(json_request("/models/iris-model/predict", json!({ "features": features })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "FILE_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_models_listing() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/api/models").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = body_json(response).await;
        let names: Vec<_> = json["models"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["iris-model", "flowers-model"]);
        assert!(json["failed"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_load_registry_requires_a_model() {
        let dir = artifact_dir(&[]);
        let config = Config::new(
            "127.0.0.1:0".into(),
            Some(dir.path().to_string_lossy().into_owned()),
            None,
            false,
        )
        .unwrap();
        let loader = ModelLoader::new(&config.models_dir, Arc::new(StubFactory::new()));
        assert!(matches!(load_registry(&config, loader), Err(GardenError::Config(_))));
    }

    #[test]
    fn test_strict_mode_fails_on_partial_startup() {
        let dir = artifact_dir(&["iris-model/model.onnx"]);
        let mut config = Config::new(
            "127.0.0.1:0".into(),
            Some(dir.path().to_string_lossy().into_owned()),
            None,
            true,
        )
        .unwrap();

        let loader = ModelLoader::new(&config.models_dir, Arc::new(StubFactory::new()));
        assert!(load_registry(&config, loader.clone()).is_err());

        config.strict = false;
        let registry = load_registry(&config, loader).unwrap();
        assert_eq!(registry.names(), vec!["iris-model"]);
    }
}
