use crate::models::ModelDescriptor;
use crate::utils::error::GardenError;
use crate::Result;
use ndarray::{Array2, ArrayD, Axis, Ix2};
use ort::{
    memory::Allocator,
    session::{builder::GraphOptimizationLevel, Session, SessionOutputs},
    value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor},
};
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 推理会话抽象：一次前向计算，返回 [batch, n] 的分数矩阵。
///
/// 实现必须允许多线程同时调用 `run`。
pub trait InferenceSession: Send + Sync {
    fn run(&self, input: ArrayD<f32>) -> Result<Array2<f32>>;
}

/// 为描述符打开推理会话
pub trait SessionFactory: Send + Sync {
    fn open(&self, descriptor: &ModelDescriptor, artifact: &Path) -> Result<Box<dyn InferenceSession>>;
}

/// ONNX Runtime 会话参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub intra_threads: usize,
    pub pool_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            intra_threads: 1,
            pool_size: 1,
        }
    }
}

/// 固定大小的会话池。
///
/// ort 的 `Session::run` 需要 `&mut self`，同一模型的并发请求
/// 各自占用一个空闲槽位，全部忙碌时才等待。
pub struct SessionPool<T> {
    slots: Vec<Mutex<T>>,
    next: AtomicUsize,
}

impl<T> SessionPool<T> {
    pub fn new(items: Vec<T>) -> Self {
        assert!(!items.is_empty(), "session pool needs at least one slot");
        Self {
            slots: items.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn acquire(&self) -> MutexGuard<'_, T> {
        let len = self.slots.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            if let Some(guard) = self.slots[(start + offset) % len].try_lock() {
                return guard;
            }
        }

        self.slots[start].lock()
    }
}

pub struct OnnxSession {
    pool: SessionPool<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    pub fn load(descriptor: &ModelDescriptor, path: &Path, options: &SessionOptions) -> Result<Self> {
        let model = descriptor.name.as_str();
        tracing::info!(
            model = %model,
            path = %path.display(),
            threads = options.intra_threads,
            pool = options.pool_size,
            "Loading ONNX model"
        );

        let pool_size = options.pool_size.max(1);
        let mut sessions = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let session = Session::builder()
                .map_err(|e| GardenError::load(model, e))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| GardenError::load(model, e))?
                .with_intra_threads(options.intra_threads)
                .map_err(|e| GardenError::load(model, e))?
                .commit_from_file(path)
                .map_err(|e| GardenError::load(model, e))?;
            sessions.push(session);
        }

        let (input_name, output_name) = {
            let session = &sessions[0];
            if session.outputs.is_empty() {
                return Err(GardenError::load(model, "model has no outputs"));
            }

            let input_name = match &descriptor.input_name {
                Some(name) => name.clone(),
                None => session
                    .inputs
                    .first()
                    .map(|i| i.name.clone())
                    .ok_or_else(|| GardenError::load(model, "model has no inputs"))?,
            };

            // skl2onnx 输出 label + probabilities，Keras 只有一个 logits 输出
            let output_name = session
                .outputs
                .iter()
                .find(|o| o.name.contains("prob"))
                .or_else(|| session.outputs.last())
                .map(|o| o.name.clone())
                .unwrap_or_default();

            for (i, output) in session.outputs.iter().enumerate() {
                tracing::debug!(model = %model, "output[{}]: '{}'", i, output.name);
            }

            (input_name, output_name)
        };

        tracing::info!(
            model = %model,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(Self {
            pool: SessionPool::new(sessions),
            input_name,
            output_name,
        })
    }

    fn extract(&self, outputs: &SessionOutputs) -> Result<Array2<f32>> {
        let output = match outputs.get(self.output_name.as_str()) {
            Some(output) => output,
            None => {
                let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                return Err(GardenError::Prediction(format!(
                    "output '{}' not found. Available outputs: {:?}",
                    self.output_name, available
                )));
            }
        };

        if let Ok(array) = output.try_extract_array::<f32>() {
            return to_matrix(array.into_owned());
        }

        // sklearn ZipMap: seq(map(int64, float))
        let dtype = output.dtype();
        if DynSequenceValueType::can_downcast(&dtype) {
            return extract_zipmap(output);
        }

        Err(GardenError::Prediction(format!(
            "unsupported output type for '{}'",
            self.output_name
        )))
    }
}

impl InferenceSession for OnnxSession {
    fn run(&self, input: ArrayD<f32>) -> Result<Array2<f32>> {
        let tensor = Tensor::from_array(input).map_err(|e| GardenError::Prediction(e.to_string()))?;

        let mut session = self.pool.acquire();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| GardenError::Prediction(e.to_string()))?;

        self.extract(&outputs)
    }
}

/// 默认工厂：从文件加载 ONNX 模型
pub struct OnnxSessionFactory {
    options: SessionOptions,
}

impl OnnxSessionFactory {
    pub fn new(options: SessionOptions) -> Result<Self> {
        ort::init()
            .commit()
            .map_err(|e| GardenError::Internal(format!("Failed to initialize ONNX Runtime: {}", e)))?;
        tracing::info!(
            intra_threads = options.intra_threads,
            pool_size = options.pool_size,
            "ONNX Runtime initialized"
        );
        Ok(Self { options })
    }
}

impl SessionFactory for OnnxSessionFactory {
    fn open(&self, descriptor: &ModelDescriptor, artifact: &Path) -> Result<Box<dyn InferenceSession>> {
        Ok(Box::new(OnnxSession::load(descriptor, artifact, &self.options)?))
    }
}

/// 统一成 [batch, n]
pub(crate) fn to_matrix(array: ArrayD<f32>) -> Result<Array2<f32>> {
    match array.ndim() {
        1 => array
            .insert_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|e| GardenError::Prediction(e.to_string())),
        2 => array
            .into_dimensionality::<Ix2>()
            .map_err(|e| GardenError::Prediction(e.to_string())),
        n => Err(GardenError::Prediction(format!(
            "Expected 1D or 2D output tensor, got {}D",
            n
        ))),
    }
}

fn extract_zipmap(output: &DynValue) -> Result<Array2<f32>> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| GardenError::Prediction(format!("Failed to downcast to sequence: {}", e)))?;
    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(|e| GardenError::Prediction(e.to_string()))?;

    if maps.is_empty() {
        return Err(GardenError::Prediction("Empty probability sequence".to_string()));
    }

    let mut rows: Vec<Vec<f32>> = Vec::with_capacity(maps.len());
    for map in &maps {
        let mut pairs = map
            .try_extract_key_values::<i64, f32>()
            .map_err(|e| GardenError::Prediction(e.to_string()))?;
        pairs.sort_by_key(|(class_id, _)| *class_id);
        rows.push(pairs.into_iter().map(|(_, prob)| prob).collect());
    }

    let width = rows[0].len();
    if rows.iter().any(|row| row.len() != width) {
        return Err(GardenError::Prediction(
            "Inconsistent class count across batch".to_string(),
        ));
    }

    Array2::from_shape_vec((rows.len(), width), rows.concat())
        .map_err(|e| GardenError::Prediction(e.to_string()))
}
