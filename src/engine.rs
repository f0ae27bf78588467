// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime engine.
//!
//! [`OrtEngine`] wraps a session built from in-memory model bytes. The rest
//! of the pipeline only sees the [`InferenceEngine`] trait.

use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;

use crate::device::ExecutionProvider;
use crate::error::{InferenceError, Result};
use crate::inference::InferenceConfig;
use crate::verbose;

/// A loaded model that maps an NCHW tensor to a flat output buffer.
pub trait InferenceEngine: Send {
    /// Name of the tensor slot the input is fed to.
    fn input_name(&self) -> &str;

    /// Name of the tensor slot the output is read from.
    fn output_name(&self) -> &str;

    /// Run the model once.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError` if the engine fails.
    fn run(&mut self, input: &Array4<f32>) -> Result<Vec<f32>>;
}

/// ONNX Runtime session with its discovered input/output names.
pub struct OrtEngine {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OrtEngine {
    /// Build a session from model bytes.
    ///
    /// Execution providers are registered in the configured order; ONNX
    /// Runtime falls through to the next one, and finally to CPU, when a
    /// provider is unavailable at runtime.
    ///
    /// # Errors
    ///
    /// Returns `EngineConstructionFailed` for malformed or incompatible bytes,
    /// or a model without inputs/outputs.
    pub fn from_bytes(bytes: &[u8], config: &InferenceConfig) -> Result<Self> {
        let providers = dispatch_providers(&config.providers);

        let session = Session::builder()
            .map_err(|e| construction(format!("Failed to create session builder: {e}")))?
            .with_execution_providers(providers)
            .map_err(|e| construction(format!("Failed to register execution providers: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| construction(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(config.num_threads)
            .map_err(|e| construction(format!("Failed to set intra-thread count: {e}")))?
            .commit_from_memory(bytes)
            .map_err(|e| construction(format!("Failed to load model: {e}")))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| construction("Model declares no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| construction("Model declares no outputs".to_string()))?;

        verbose!("Loaded detector: input '{input_name}', output '{output_name}'");

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}

fn construction(msg: String) -> InferenceError {
    InferenceError::EngineConstructionFailed(msg)
}

/// Translate the preference list into ort providers, skipping those not
/// compiled in. CPU is always appended as the final fallback.
fn dispatch_providers(preference: &[ExecutionProvider]) -> Vec<ExecutionProviderDispatch> {
    let mut providers: Vec<ExecutionProviderDispatch> = preference
        .iter()
        .filter(|provider| {
            let compiled = provider.is_compiled();
            if !compiled {
                verbose!("Execution provider '{provider}' not compiled in, skipping");
            }
            compiled
        })
        .filter_map(|&provider| to_dispatch(provider))
        .collect();
    if !preference.contains(&ExecutionProvider::Cpu) {
        providers.push(CPUExecutionProvider::default().build());
    }
    providers
}

/// ort provider for a compiled-in [`ExecutionProvider`].
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn to_dispatch(provider: ExecutionProvider) -> Option<ExecutionProviderDispatch> {
    match provider {
        ExecutionProvider::Cpu => Some(CPUExecutionProvider::default().build()),
        #[cfg(feature = "cuda")]
        ExecutionProvider::Cuda(i) => Some(
            ort::execution_providers::CUDAExecutionProvider::default()
                .with_device_id(i as i32)
                .build(),
        ),
        #[cfg(feature = "tensorrt")]
        ExecutionProvider::TensorRt(i) => Some(
            ort::execution_providers::TensorRTExecutionProvider::default()
                .with_device_id(i as i32)
                .build(),
        ),
        #[cfg(feature = "coreml")]
        ExecutionProvider::CoreMl => Some(
            ort::execution_providers::CoreMLExecutionProvider::default()
                .with_subgraphs(true)
                .build(),
        ),
        #[cfg(feature = "directml")]
        ExecutionProvider::DirectMl(i) => Some(
            ort::execution_providers::DirectMLExecutionProvider::default()
                .with_device_id(i as i32)
                .build(),
        ),
        #[cfg(feature = "openvino")]
        ExecutionProvider::OpenVino => {
            Some(ort::execution_providers::OpenVINOExecutionProvider::default().build())
        }
        #[cfg(feature = "rocm")]
        ExecutionProvider::Rocm(i) => Some(
            ort::execution_providers::ROCmExecutionProvider::default()
                .with_device_id(i as i32)
                .build(),
        ),
        #[cfg(feature = "xnnpack")]
        ExecutionProvider::Xnnpack => {
            Some(ort::execution_providers::XNNPACKExecutionProvider::default().build())
        }
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

impl InferenceEngine for OrtEngine {
    fn input_name(&self) -> &str {
        &self.input_name
    }

    fn output_name(&self) -> &str {
        &self.output_name
    }

    fn run(&mut self, input: &Array4<f32>) -> Result<Vec<f32>> {
        let input_contiguous = input.as_standard_layout();
        let input_tensor = TensorRef::from_array_view(&input_contiguous).map_err(|e| {
            InferenceError::InferenceError(format!("Failed to create input tensor: {e}"))
        })?;

        let inputs = ort::inputs![self.input_name.as_str() => input_tensor];
        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| InferenceError::InferenceError(format!("Inference failed: {e}")))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            InferenceError::InferenceError(format!("Output '{}' not found", self.output_name))
        })?;

        let (_shape, data) = output.try_extract_tensor::<f32>().map_err(|e| {
            InferenceError::InferenceError(format!("Failed to extract output: {e}"))
        })?;

        Ok(data.to_vec())
    }
}

impl std::fmt::Debug for OrtEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtEngine")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .finish_non_exhaustive()
    }
}
