use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 模型后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framework {
    /// 直接输出类别概率的表格分类器（如 skl2onnx 导出的 sklearn 模型）
    TabularProbabilistic,
    /// 输出 logits 的图像卷积网络（如 tf2onnx 导出的 Keras 模型）
    NeuralImage,
    /// 配置中出现的未知框架，注册时报 LoadError
    #[serde(other)]
    Unsupported,
}

/// 图像输入张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// [1, H, W, C]，Keras 默认
    #[default]
    Nhwc,
    /// [1, C, H, W]
    Nchw,
}

/// 静态模型描述，启动后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub framework: Framework,
    pub version: u32,
    pub classes: Vec<String>,
    /// 模型文件路径，相对路径基于 models_dir 解析
    pub artifact: PathBuf,

    /// 额外的查找名称
    #[serde(default)]
    pub aliases: Vec<String>,

    /// 表格模型的特征数量
    #[serde(default = "default_feature_count")]
    pub feature_count: usize,

    /// 图像模型输入尺寸 [height, width]
    #[serde(default = "default_input_size")]
    pub input_size: [u32; 2],

    #[serde(default)]
    pub layout: TensorLayout,

    /// 覆盖自动发现的 ONNX 输入名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_name: Option<String>,
}

fn default_feature_count() -> usize {
    4
}

fn default_input_size() -> [u32; 2] {
    [180, 180]
}

impl ModelDescriptor {
    pub fn new(
        name: impl Into<String>,
        framework: Framework,
        version: u32,
        classes: &[&str],
        artifact: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            framework,
            version,
            classes: classes.iter().map(|c| c.to_string()).collect(),
            artifact: artifact.into(),
            aliases: Vec::new(),
            feature_count: default_feature_count(),
            input_size: default_input_size(),
            layout: TensorLayout::default(),
            input_name: None,
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// 鸢尾花表格分类器
    pub fn iris() -> Self {
        Self::new(
            "iris-model",
            Framework::TabularProbabilistic,
            1,
            &["setosa", "versicolor", "virginica"],
            "iris-model/model.onnx",
        )
    }

    /// 花卉图像分类器
    pub fn flowers() -> Self {
        Self::new(
            "flowers-model",
            Framework::NeuralImage,
            1,
            &["daisy", "dandelion", "roses", "sunflowers", "tulips"],
            "flowers-model/model.onnx",
        )
    }

    /// 该描述注册后可用的全部名称
    pub fn lookup_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}
