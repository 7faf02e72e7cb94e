use crate::inference::{PredictionRequest, PredictionResult};
use crate::models::ModelRegistry;
use crate::utils::error::GardenError;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;

/// 统一预测入口：按名称查找模型并分派到对应后端，不缓存结果
#[derive(Clone)]
pub struct Predictor {
    registry: Arc<ModelRegistry>,
}

impl Predictor {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn predict(&self, model_name: &str, request: &PredictionRequest) -> Result<PredictionResult> {
        let model = self.registry.get(model_name)?;

        let start_time = Instant::now();
        let result = model.predict(request);

        match &result {
            Ok(prediction) => tracing::debug!(
                model = %model_name,
                input = request.kind(),
                top = ?prediction.top().map(|p| p.label.as_str()),
                elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0,
                "Prediction completed"
            ),
            Err(e) => tracing::warn!(model = %model_name, error = %e, "Prediction failed"),
        }

        result
    }

    /// 在阻塞线程池中执行推理，供异步处理器调用
    pub async fn predict_blocking(&self, model_name: String, request: PredictionRequest) -> Result<PredictionResult> {
        // 查找失败无需占用阻塞线程
        if !self.registry.contains(&model_name) {
            return Err(GardenError::NotFound(model_name));
        }

        let predictor = self.clone();
        tokio::task::spawn_blocking(move || predictor.predict(&model_name, &request))
            .await
            .map_err(|e| GardenError::Internal(format!("Inference task failed: {}", e)))?
    }
}
