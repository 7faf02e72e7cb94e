use crate::models::{ModelDescriptor, SessionOptions};
use crate::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 模型文件目录
    pub models_dir: PathBuf,

    /// 任一模型加载失败即终止启动
    pub strict: bool,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,

    /// 启动时注册的模型
    pub models: Vec<ModelDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 每个模型的会话池大小
    pub sessions_per_model: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        let cpu_cores = num_cpus::get();
        Self {
            intra_threads: (cpu_cores / 2).max(1),
            sessions_per_model: cpu_cores.clamp(1, 4),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: 60,
            max_request_size: 20 * 1024 * 1024, // 20MB
        }
    }
}

/// 未指定时的模型目录
pub const DEFAULT_MODELS_DIR: &str = "models";

/// TOML 配置文件结构
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    models_dir: Option<PathBuf>,
    #[serde(default)]
    server: Option<ServerConfig>,
    #[serde(default)]
    onnx: Option<OnnxConfig>,
    #[serde(default)]
    models: Vec<ModelDescriptor>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

impl Config {
    /// 模型目录优先级：命令行 > 配置文件 > `models`
    pub fn new(
        bind_addr: String,
        models_dir: Option<String>,
        config_file: Option<PathBuf>,
        strict: bool,
    ) -> Result<Self> {
        let file = match &config_file {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path.display());
                FileConfig::load(path)?
            }
            None => FileConfig::default(),
        };

        let models = if file.models.is_empty() {
            Self::default_models()
        } else {
            file.models
        };

        Ok(Self {
            bind_addr,
            models_dir: models_dir
                .map(PathBuf::from)
                .or(file.models_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR)),
            strict,
            onnx_config: file.onnx.unwrap_or_default(),
            server_config: file.server.unwrap_or_default(),
            models,
        })
    }

    /// 内置模型：iris 表格分类器和 flowers 图像分类器
    pub fn default_models() -> Vec<ModelDescriptor> {
        vec![ModelDescriptor::iris(), ModelDescriptor::flowers()]
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            intra_threads: self.onnx_config.intra_threads,
            pool_size: self.onnx_config.sessions_per_model.max(1),
        }
    }
}
