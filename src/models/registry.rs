use crate::inference::{postprocess, PredictionRequest, PredictionResult};
use crate::models::{
    Backend, Classifier, Framework, ImageClassifier, ModelDescriptor, OnnxSessionFactory,
    SessionFactory, SessionOptions, TabularClassifier,
};
use crate::utils::error::GardenError;
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 注册表中的一个模型：描述 + 已加载的后端
pub struct LoadedModel {
    descriptor: ModelDescriptor,
    backend: Backend,
}

impl LoadedModel {
    pub fn new(descriptor: ModelDescriptor, backend: Backend) -> Self {
        Self { descriptor, backend }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult> {
        let probabilities = self.backend.predict(request)?;
        postprocess::format_result(&self.descriptor, &probabilities)
    }
}

/// 根据描述加载模型文件
#[derive(Clone)]
pub struct ModelLoader {
    models_dir: PathBuf,
    factory: Arc<dyn SessionFactory>,
}

impl ModelLoader {
    pub fn new(models_dir: impl Into<PathBuf>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            models_dir: models_dir.into(),
            factory,
        }
    }

    /// 使用 ONNX Runtime 的默认加载器
    pub fn onnx(models_dir: impl Into<PathBuf>, options: SessionOptions) -> Result<Self> {
        Ok(Self::new(models_dir, Arc::new(OnnxSessionFactory::new(options)?)))
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn resolve(&self, artifact: &Path) -> PathBuf {
        if artifact.is_absolute() {
            artifact.to_path_buf()
        } else {
            self.models_dir.join(artifact)
        }
    }

    pub fn load(&self, descriptor: ModelDescriptor) -> Result<LoadedModel> {
        let name = descriptor.name.clone();

        if name.trim().is_empty() {
            return Err(GardenError::load(name, "model name is empty"));
        }
        if descriptor.classes.is_empty() {
            return Err(GardenError::load(name, "class list is empty"));
        }
        if descriptor.framework == Framework::Unsupported {
            return Err(GardenError::load(name, "framework not supported"));
        }

        let path = self.resolve(&descriptor.artifact);
        if !path.exists() {
            return Err(GardenError::load(
                name,
                format!("artifact not found: {}", path.display()),
            ));
        }

        let session = self.factory.open(&descriptor, &path).map_err(|e| match e {
            GardenError::Load { .. } => e,
            other => GardenError::load(&name, other),
        })?;

        let backend = match descriptor.framework {
            Framework::TabularProbabilistic => {
                Backend::Tabular(TabularClassifier::new(session, descriptor.feature_count))
            }
            Framework::NeuralImage => Backend::Image(ImageClassifier::new(
                session,
                descriptor.input_size,
                descriptor.layout,
            )),
            Framework::Unsupported => {
                return Err(GardenError::load(name, "framework not supported"));
            }
        };

        Ok(LoadedModel::new(descriptor, backend))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoadFailure {
    pub model: String,
    pub reason: String,
}

/// 启动加载结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

impl StartupReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// 启动阶段使用的可变构建器，`build` 之后注册表不再变化
pub struct RegistryBuilder {
    loader: ModelLoader,
    models: Vec<LoadedModel>,
    index: HashMap<String, usize>,
    report: StartupReport,
}

impl RegistryBuilder {
    /// 加载并注册一个模型；失败时记录一次并返回 LoadError
    pub fn register(&mut self, descriptor: ModelDescriptor) -> Result<()> {
        let name = descriptor.name.clone();

        let taken = descriptor
            .lookup_names()
            .find(|n| self.index.contains_key(*n))
            .map(str::to_string);

        let result = match taken {
            Some(taken) => Err(GardenError::load(
                &name,
                format!("name '{}' is already registered", taken),
            )),
            None => self.loader.load(descriptor),
        };

        match result {
            Ok(model) => {
                let slot = self.models.len();
                for lookup in model.descriptor().lookup_names() {
                    self.index.insert(lookup.to_string(), slot);
                }
                tracing::info!(
                    model = %name,
                    version = model.descriptor().version,
                    backend = model.backend().kind(),
                    "Model registered"
                );
                self.report.loaded.push(name);
                self.models.push(model);
                Ok(())
            }
            Err(err) => {
                tracing::error!(model = %name, error = %err, "Model registration failed");
                let reason = match &err {
                    GardenError::Load { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                self.report.failed.push(LoadFailure {
                    model: name,
                    reason,
                });
                Err(err)
            }
        }
    }

    /// 逐个注册，单个失败不影响其余模型
    pub fn register_all(&mut self, descriptors: impl IntoIterator<Item = ModelDescriptor>) -> &StartupReport {
        for descriptor in descriptors {
            let _ = self.register(descriptor);
        }
        &self.report
    }

    pub fn report(&self) -> &StartupReport {
        &self.report
    }

    pub fn build(self) -> ModelRegistry {
        tracing::info!(
            loaded = self.report.loaded.len(),
            failed = self.report.failed.len(),
            "Model registry initialized"
        );
        ModelRegistry {
            models: self.models,
            index: self.index,
            report: self.report,
        }
    }
}

/// 只读模型注册表，通过 `Arc` 在请求间共享，查找无锁
pub struct ModelRegistry {
    models: Vec<LoadedModel>,
    index: HashMap<String, usize>,
    report: StartupReport,
}

impl ModelRegistry {
    pub fn builder(loader: ModelLoader) -> RegistryBuilder {
        RegistryBuilder {
            loader,
            models: Vec::new(),
            index: HashMap::new(),
            report: StartupReport::default(),
        }
    }

    /// 便捷函数：加载全部描述并冻结
    pub fn load_all(loader: ModelLoader, descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let mut builder = Self::builder(loader);
        builder.register_all(descriptors);
        builder.build()
    }

    pub fn get(&self, name: &str) -> Result<&LoadedModel> {
        self.index
            .get(name)
            .map(|&slot| &self.models[slot])
            .ok_or_else(|| GardenError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(LoadedModel::name).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter().map(LoadedModel::descriptor)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn report(&self) -> &StartupReport {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{artifact_dir, StubFactory};

    fn loader(dir: &Path) -> ModelLoader {
        ModelLoader::new(dir, Arc::new(StubFactory::new()))
    }

    #[test]
    fn test_register_and_get() {
        let dir = artifact_dir(&["iris-model/model.onnx"]);
        let mut builder = ModelRegistry::builder(loader(dir.path()));
        builder.register(ModelDescriptor::iris()).unwrap();
        let registry = builder.build();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("iris-model").unwrap().name(), "iris-model");
        assert!(matches!(registry.get("flowers-model"), Err(GardenError::NotFound(_))));
    }

    #[test]
    fn test_missing_artifact_is_load_error() {
        let dir = artifact_dir(&[]);
        let mut builder = ModelRegistry::builder(loader(dir.path()));
        let err = builder.register(ModelDescriptor::iris()).unwrap_err();

        assert!(matches!(err, GardenError::Load { .. }));
        assert!(err.to_string().contains("artifact not found"));
        assert_eq!(builder.report().failed.len(), 1);
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_partial_startup_serves_valid_model() {
        let dir = artifact_dir(&["flowers-model/model.onnx"]);
        let registry = ModelRegistry::load_all(
            loader(dir.path()),
            vec![ModelDescriptor::iris(), ModelDescriptor::flowers()],
        );

        assert_eq!(registry.names(), vec!["flowers-model"]);
        assert!(registry.get("flowers-model").is_ok());
        assert!(matches!(registry.get("iris-model"), Err(GardenError::NotFound(_))));
        assert_eq!(registry.report().loaded, vec!["flowers-model".to_string()]);
        assert_eq!(registry.report().failed[0].model, "iris-model");
    }

    #[test]
    fn test_unsupported_framework() {
        let dir = artifact_dir(&["torch/model.pt"]);
        let mut descriptor = ModelDescriptor::iris();
        descriptor.framework = Framework::Unsupported;
        descriptor.artifact = "torch/model.pt".into();

        let mut builder = ModelRegistry::builder(loader(dir.path()));
        let err = builder.register(descriptor).unwrap_err();
        assert!(err.to_string().contains("framework not supported"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let dir = artifact_dir(&["iris-model/model.onnx"]);
        let mut builder = ModelRegistry::builder(loader(dir.path()));
        builder.register(ModelDescriptor::iris()).unwrap();

        let err = builder.register(ModelDescriptor::iris()).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(builder.build().len(), 1);
    }

    #[test]
    fn test_alias_resolves_to_same_model() {
        let dir = artifact_dir(&["iris-model/model.onnx"]);
        let registry = ModelRegistry::load_all(
            loader(dir.path()),
            vec![ModelDescriptor::iris().with_aliases(&["iris-classification-model"])],
        );

        let by_name = registry.get("iris-model").unwrap() as *const LoadedModel;
        let by_alias = registry.get("iris-classification-model").unwrap() as *const LoadedModel;
        assert_eq!(by_name, by_alias);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_factory_error_becomes_load_error() {
        let dir = artifact_dir(&["iris-model/model.onnx"]);
        let loader = ModelLoader::new(dir.path(), Arc::new(StubFactory::failing("corrupt protobuf")));
        let err = loader.load(ModelDescriptor::iris()).err().unwrap();

        match err {
            GardenError::Load { model, reason } => {
                assert_eq!(model, "iris-model");
                assert!(reason.contains("corrupt protobuf"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_absolute_path_untouched() {
        let loader = loader(Path::new("models"));
        let absolute = std::env::temp_dir().join("model.onnx");
        assert_eq!(loader.resolve(&absolute), absolute);
        assert_eq!(
            loader.resolve(Path::new("iris/model.onnx")),
            PathBuf::from("models/iris/model.onnx")
        );
    }
}
