#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array4, ArrayD, IxDyn};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;

/// Tract-based backend for ONNX detection models.
///
/// Loads a local model once and runs it on `[1, 3, S, S]` inputs. The first
/// model output is returned as the raw `[1, F, N]` tensor.
pub struct TractBackend {
    model: Option<SimplePlan<TypedFact, Box<dyn TypedOp>>>,
    input_size: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, input_size, input_size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract: loaded {} with input [1, 3, {}, {}]",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self {
            model: Some(model),
            input_size,
        })
    }

    fn build_input(&self, input: &Array4<f32>) -> Result<Tensor> {
        let shape = input.shape();
        if shape != [1, 3, self.input_size, self.input_size] {
            return Err(anyhow!(
                "input shape {:?} does not match model input [1, 3, {}, {}]",
                shape,
                self.input_size,
                self.input_size
            ));
        }
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = tract_ndarray::Array4::from_shape_vec(
            (1, 3, self.input_size, self.input_size),
            data,
        )
        .context("failed to build tract input")?;
        Ok(tensor.into_tensor())
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let tensor = self.build_input(input)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend used after release"))?;
        let outputs = model.run(tvec!(tensor.into())).context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        ArrayD::from_shape_vec(IxDyn(&shape), data).context("failed to copy model output")
    }

    fn release(&mut self) {
        if self.model.take().is_some() {
            log::info!("tract: model released");
        }
    }
}
