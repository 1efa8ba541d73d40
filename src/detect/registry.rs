use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::ModelLoader;
use super::backends::{MotionLoader, StubLoader};
#[cfg(feature = "backend-tract")]
use super::backends::TractLoader;
use crate::Dimensions;

/// Named collection of model loaders.
pub struct BackendRegistry {
    loaders: BTreeMap<String, Arc<dyn ModelLoader>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            loaders: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    ///
    /// `tract` is only registered when a model path is given.
    pub fn with_builtin(model_path: Option<&Path>, input: Dimensions) -> Self {
        let mut registry = Self::new();
        registry.register(StubLoader::new());
        registry.register(MotionLoader);
        #[cfg(feature = "backend-tract")]
        if let Some(path) = model_path {
            registry.register(TractLoader::new(path, input.width, input.height));
        }
        #[cfg(not(feature = "backend-tract"))]
        let _ = (model_path, input);
        registry
    }

    /// Register a loader. The first registered loader becomes the default.
    pub fn register<L: ModelLoader + 'static>(&mut self, loader: L) {
        let name = loader.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.loaders.insert(name, Arc::new(loader));
    }

    /// Set default loader by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.loaders.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelLoader>> {
        self.loaders.get(name).cloned()
    }

    pub fn default_loader(&self) -> Option<Arc<dyn ModelLoader>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Loader for `name`, with the registered names in the error.
    pub fn loader(&self, name: &str) -> Result<Arc<dyn ModelLoader>> {
        self.get(name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not available (registered: {})",
                name,
                self.list().join(", ")
            )
        })
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.loaders.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
