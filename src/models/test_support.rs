//! 单元测试用的推理会话桩

use crate::models::{Framework, InferenceSession, ModelDescriptor, SessionFactory};
use crate::utils::error::GardenError;
use crate::Result;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, ArrayD};
use parking_lot::Mutex;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

/// 无论输入是什么都返回同一行分数
pub struct FixedScores(Vec<f32>);

impl FixedScores {
    pub fn new(scores: &[f32]) -> Self {
        Self(scores.to_vec())
    }
}

impl InferenceSession for FixedScores {
    fn run(&self, _input: ArrayD<f32>) -> Result<Array2<f32>> {
        Array2::from_shape_vec((1, self.0.len()), self.0.clone())
            .map_err(|e| GardenError::Prediction(e.to_string()))
    }
}

/// 把输入展平后原样返回
pub struct EchoSession;

impl InferenceSession for EchoSession {
    fn run(&self, input: ArrayD<f32>) -> Result<Array2<f32>> {
        let values: Vec<f32> = input.iter().copied().collect();
        Array2::from_shape_vec((1, values.len()), values)
            .map_err(|e| GardenError::Prediction(e.to_string()))
    }
}

/// 记录每次调用的输入形状
pub struct ShapeRecorder {
    scores: Vec<f32>,
    shapes: Arc<Mutex<Vec<Vec<usize>>>>,
}

impl ShapeRecorder {
    pub fn new(scores: &[f32]) -> Self {
        Self {
            scores: scores.to_vec(),
            shapes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn shapes(&self) -> Arc<Mutex<Vec<Vec<usize>>>> {
        Arc::clone(&self.shapes)
    }
}

impl InferenceSession for ShapeRecorder {
    fn run(&self, input: ArrayD<f32>) -> Result<Array2<f32>> {
        self.shapes.lock().push(input.shape().to_vec());
        Array2::from_shape_vec((1, self.scores.len()), self.scores.clone())
            .map_err(|e| GardenError::Prediction(e.to_string()))
    }
}

/// 最近质心分类器，用鸢尾花三类的特征均值近似一个训练好的模型
pub struct IrisCentroids;

const IRIS_CENTROIDS: [[f32; 4]; 3] = [
    [5.006, 3.428, 1.462, 0.246],
    [5.936, 2.770, 4.260, 1.326],
    [6.588, 2.974, 5.552, 2.026],
];

impl InferenceSession for IrisCentroids {
    fn run(&self, input: ArrayD<f32>) -> Result<Array2<f32>> {
        let features: Vec<f32> = input.iter().copied().collect();
        if features.len() != 4 {
            return Err(GardenError::Prediction("expected 4 features".to_string()));
        }

        let weights: Vec<f32> = IRIS_CENTROIDS
            .iter()
            .map(|centroid| {
                let distance: f32 = centroid
                    .iter()
                    .zip(&features)
                    .map(|(c, x)| (c - x).powi(2))
                    .sum();
                (-distance).exp()
            })
            .collect();
        let total: f32 = weights.iter().sum();

        Array2::from_shape_vec((1, 3), weights.iter().map(|w| w / total).collect())
            .map_err(|e| GardenError::Prediction(e.to_string()))
    }
}

/// 不读取文件的会话工厂
#[derive(Default)]
pub struct StubFactory {
    failure: Option<String>,
}

impl StubFactory {
    /// 表格模型用质心会话，图像模型输出递增的 logits
    pub fn new() -> Self {
        Self { failure: None }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
        }
    }
}

impl SessionFactory for StubFactory {
    fn open(&self, descriptor: &ModelDescriptor, _artifact: &Path) -> Result<Box<dyn InferenceSession>> {
        if let Some(reason) = &self.failure {
            return Err(GardenError::Internal(reason.clone()));
        }

        Ok(match descriptor.framework {
            Framework::TabularProbabilistic => Box::new(IrisCentroids),
            _ => {
                let logits: Vec<f32> = (0..descriptor.classes.len()).map(|i| i as f32 * 0.5).collect();
                Box::new(FixedScores(logits))
            }
        })
    }
}

/// 创建包含指定（内容无意义的）模型文件的临时目录
pub fn artifact_dir(files: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for file in files {
        let path = dir.path().join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stub").unwrap();
    }
    dir
}

fn encode(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image).write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

/// 带纹理的 JPEG，扫描数据足够长，可以在中间截断
pub fn encode_patterned_jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
    });
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image).write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
    buffer.into_inner()
}

pub fn encode_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(width, height, color, ImageFormat::Jpeg)
}

pub fn encode_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(width, height, color, ImageFormat::Png)
}
