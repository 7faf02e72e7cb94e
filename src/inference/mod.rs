pub mod pipeline;
pub mod postprocess;
pub mod types;

pub use pipeline::Predictor;
pub use types::{ClassProbability, ImageMetadata, PredictionRequest, PredictionResult};
