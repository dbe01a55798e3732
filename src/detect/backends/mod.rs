pub mod synthetic;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use synthetic::{synthetic_output, SyntheticBackend, SyntheticObject};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use anyhow::{anyhow, Result};

use crate::config::{BackendKind, PipelineConfig};
use crate::detect::backend::InferenceBackend;

/// Build the inference backend named by the configuration.
pub fn from_config(config: &PipelineConfig) -> Result<Box<dyn InferenceBackend>> {
    match config.backend.kind {
        BackendKind::Synthetic => Ok(Box::new(
            SyntheticBackend::new(config.tensor.features, config.tensor.slots, config.decoder)
                .with_objects(config.backend.synthetic_objects.clone())?
                .with_jitter(config.backend.jitter, config.backend.seed),
        )),
        BackendKind::Tract => tract_backend(config),
    }
}

#[cfg(feature = "backend-tract")]
fn tract_backend(config: &PipelineConfig) -> Result<Box<dyn InferenceBackend>> {
    let path = config
        .backend
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires backend.model_path"))?;
    Ok(Box::new(TractBackend::new(path, config.tensor.input_size)?))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_backend(_config: &PipelineConfig) -> Result<Box<dyn InferenceBackend>> {
    Err(anyhow!("tract backend requires the backend-tract feature"))
}
