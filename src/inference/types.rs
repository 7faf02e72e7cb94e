use axum::body::Bytes;
use serde::{Deserialize, Serialize};

/// 图像请求附带的元数据，只透传不参与计算
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl ImageMetadata {
    pub fn is_empty(&self) -> bool {
        self.lat.is_none() && self.lng.is_none()
    }
}

/// 后端相关的预测输入
#[derive(Debug, Clone)]
pub enum PredictionRequest {
    /// 定长特征向量
    Tabular(Vec<f32>),
    /// 未解码的图像字节
    Image {
        bytes: Bytes,
        metadata: Option<ImageMetadata>,
    },
}

impl PredictionRequest {
    pub fn tabular(features: impl Into<Vec<f32>>) -> Self {
        PredictionRequest::Tabular(features.into())
    }

    pub fn image(bytes: impl Into<Bytes>) -> Self {
        PredictionRequest::Image {
            bytes: bytes.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(self, metadata: ImageMetadata) -> Self {
        match self {
            PredictionRequest::Image { bytes, .. } => PredictionRequest::Image {
                bytes,
                metadata: (!metadata.is_empty()).then_some(metadata),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PredictionRequest::Tabular(_) => "tabular",
            PredictionRequest::Image { .. } => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f32,
}

/// 一次预测的完整结果，顺序与描述中的类别顺序一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub model: String,
    pub version: u32,
    pub predictions: Vec<ClassProbability>,
}

impl PredictionResult {
    /// 概率最高的类别
    pub fn top(&self) -> Option<&ClassProbability> {
        self.predictions
            .iter()
            .fold(None, |best: Option<&ClassProbability>, current| match best {
                Some(b) if b.probability >= current.probability => Some(b),
                _ => Some(current),
            })
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(probs: &[(&str, f32)]) -> PredictionResult {
        PredictionResult {
            model: "m".to_string(),
            version: 1,
            predictions: probs
                .iter()
                .map(|(label, probability)| ClassProbability {
                    label: label.to_string(),
                    probability: *probability,
                })
                .collect(),
        }
    }

    #[test]
    fn test_top_prefers_first_on_tie() {
        let r = result(&[("a", 0.4), ("b", 0.4), ("c", 0.2)]);
        assert_eq!(r.top().unwrap().label, "a");
    }

    #[test]
    fn test_empty_metadata_dropped() {
        let request = PredictionRequest::image(vec![1u8, 2, 3]).with_metadata(ImageMetadata::default());
        match request {
            PredictionRequest::Image { metadata, .. } => assert!(metadata.is_none()),
            _ => panic!("expected image request"),
        }
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(result(&[("setosa", 0.98)])).unwrap();
        assert_eq!(json["predictions"][0]["label"], "setosa");
        assert_eq!(json["version"], 1);
    }
}
