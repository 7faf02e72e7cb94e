use crate::inference::PredictionRequest;
use crate::models::{ImageClassifier, TabularClassifier};
use crate::Result;

/// 统一的预测能力：返回按类别顺序排列、未取整的概率
pub trait Classifier: Send + Sync {
    fn predict(&self, request: &PredictionRequest) -> Result<Vec<f32>>;
}

/// 已加载的后端实现
pub enum Backend {
    Tabular(TabularClassifier),
    Image(ImageClassifier),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Tabular(_) => "tabular",
            Backend::Image(_) => "image",
        }
    }
}

impl Classifier for Backend {
    fn predict(&self, request: &PredictionRequest) -> Result<Vec<f32>> {
        match self {
            Backend::Tabular(classifier) => classifier.predict(request),
            Backend::Image(classifier) => classifier.predict(request),
        }
    }
}
