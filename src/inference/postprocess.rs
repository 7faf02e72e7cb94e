use crate::inference::{ClassProbability, PredictionResult};
use crate::models::ModelDescriptor;
use crate::utils::error::GardenError;
use crate::Result;

/// 输出概率保留的小数位数
pub const PROBABILITY_DECIMALS: i32 = 3;

/// 数值稳定的 softmax：p_i = exp(s_i - max) / Σ exp(s_j - max)
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

/// 每类四舍五入最多偏移半个单位，n 类之和与 1 的最大偏差
pub fn rounded_sum_tolerance(classes: usize) -> f32 {
    let half_unit = 0.5 / 10f32.powi(PROBABILITY_DECIMALS);
    classes as f32 * half_unit + 1e-4
}

pub fn round_probability(p: f32) -> f32 {
    let factor = 10f64.powi(PROBABILITY_DECIMALS);
    ((p as f64 * factor).round() / factor) as f32
}

/// 按描述中的类别顺序组装结果
pub fn format_result(descriptor: &ModelDescriptor, probabilities: &[f32]) -> Result<PredictionResult> {
    if probabilities.len() != descriptor.classes.len() {
        return Err(GardenError::Prediction(format!(
            "Model '{}' returned {} scores for {} classes",
            descriptor.name,
            probabilities.len(),
            descriptor.classes.len()
        )));
    }

    if let Some(bad) = probabilities.iter().find(|p| !(0.0..=1.0 + 1e-4).contains(*p)) {
        return Err(GardenError::Prediction(format!(
            "Model '{}' returned probability outside [0,1]: {}",
            descriptor.name, bad
        )));
    }

    let predictions: Vec<ClassProbability> = descriptor
        .classes
        .iter()
        .zip(probabilities)
        .map(|(label, p)| ClassProbability {
            label: label.clone(),
            probability: round_probability(p.min(1.0)),
        })
        .collect();

    let sum: f32 = predictions.iter().map(|p| p.probability).sum();
    if (sum - 1.0).abs() > rounded_sum_tolerance(predictions.len()) {
        return Err(GardenError::Prediction(format!(
            "Model '{}' returned probabilities summing to {}",
            descriptor.name, sum
        )));
    }

    Ok(PredictionResult {
        model: descriptor.name.clone(),
        version: descriptor.version,
        predictions,
    })
}
