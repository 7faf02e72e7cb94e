pub mod classifier;
pub mod descriptor;
pub mod image_classifier;
pub mod registry;
pub mod session;
pub mod tabular;

pub use classifier::{Backend, Classifier};
pub use descriptor::{Framework, ModelDescriptor, TensorLayout};
pub use image_classifier::ImageClassifier;
pub use registry::{LoadFailure, LoadedModel, ModelLoader, ModelRegistry, RegistryBuilder, StartupReport};
pub use session::{InferenceSession, OnnxSession, OnnxSessionFactory, SessionFactory, SessionOptions};
pub use tabular::TabularClassifier;

#[cfg(test)]
pub(crate) mod test_support;
