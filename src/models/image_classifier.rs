use crate::image::{ImageLoader, ImageTransforms};
use crate::inference::{postprocess, PredictionRequest};
use crate::models::{Classifier, InferenceSession, TensorLayout};
use crate::utils::error::GardenError;
use crate::Result;
use ndarray::Array4;

/// 图像分类器：解码 -> 缩放 -> 归一化 -> 推理 -> softmax
pub struct ImageClassifier {
    session: Box<dyn InferenceSession>,
    /// (height, width)
    target_size: (u32, u32),
    layout: TensorLayout,
}

impl ImageClassifier {
    pub fn new(session: Box<dyn InferenceSession>, input_size: [u32; 2], layout: TensorLayout) -> Self {
        Self {
            session,
            target_size: (input_size[0], input_size[1]),
            layout,
        }
    }

    /// 把原始图像字节转换为带 batch 维度的输入张量
    pub fn preprocess(&self, image_bytes: &[u8]) -> Result<Array4<f32>> {
        let image = ImageLoader::from_bytes(image_bytes)?;
        let (height, width) = self.target_size;
        let resized = ImageTransforms::resize_exact(&image, width, height);
        Ok(ImageTransforms::to_tensor(&resized, self.layout))
    }

    pub fn predict_bytes(&self, image_bytes: &[u8]) -> Result<Vec<f32>> {
        let input = self.preprocess(image_bytes)?;

        let logits = self.session.run(input.into_dyn())?;
        if logits.nrows() != 1 {
            return Err(GardenError::Prediction(format!(
                "Expected batch size 1, got {}",
                logits.nrows()
            )));
        }

        let scores = logits.row(0).to_vec();
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(GardenError::Prediction("Model returned non-finite logits".to_string()));
        }

        Ok(postprocess::softmax(&scores))
    }
}

impl Classifier for ImageClassifier {
    fn predict(&self, request: &PredictionRequest) -> Result<Vec<f32>> {
        match request {
            PredictionRequest::Image { bytes, metadata } => {
                if let Some(metadata) = metadata {
                    tracing::debug!(lat = ?metadata.lat, lng = ?metadata.lng, "Image metadata received");
                }
                self.predict_bytes(bytes)
            }
            other => Err(GardenError::Prediction(format!(
                "Image model cannot handle {} input",
                other.kind()
            ))),
        }
    }
}
