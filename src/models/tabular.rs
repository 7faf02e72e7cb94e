use crate::inference::PredictionRequest;
use crate::models::{Classifier, InferenceSession};
use crate::utils::error::GardenError;
use crate::Result;
use ndarray::Array2;

/// 表格概率分类器：特征向量原样送入模型，模型直接输出类别概率
pub struct TabularClassifier {
    session: Box<dyn InferenceSession>,
    feature_count: usize,
}

impl TabularClassifier {
    pub fn new(session: Box<dyn InferenceSession>, feature_count: usize) -> Self {
        Self {
            session,
            feature_count,
        }
    }

    pub fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>> {
        if features.len() != self.feature_count {
            return Err(GardenError::Prediction(format!(
                "Expected {} features, got {}",
                self.feature_count,
                features.len()
            )));
        }

        let input = Array2::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| GardenError::Prediction(e.to_string()))?;

        let probabilities = self.session.run(input.into_dyn())?;
        if probabilities.nrows() != 1 {
            return Err(GardenError::Prediction(format!(
                "Expected batch size 1, got {}",
                probabilities.nrows()
            )));
        }

        Ok(probabilities.row(0).to_vec())
    }
}

impl Classifier for TabularClassifier {
    fn predict(&self, request: &PredictionRequest) -> Result<Vec<f32>> {
        match request {
            PredictionRequest::Tabular(features) => self.predict_proba(features),
            other => Err(GardenError::Prediction(format!(
                "Tabular model cannot handle {} input",
                other.kind()
            ))),
        }
    }
}
