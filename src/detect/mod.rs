mod adapter;
mod backend;
mod backends;
mod registry;
mod result;

pub use adapter::{AdapterSettings, InferenceAdapter};
pub use backend::{DetectionModel, ModelLoader};
pub use backends::{MotionBackend, MotionLoader, StubBackend, StubLoader};
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractLoader};
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Detection, DetectionSet};
