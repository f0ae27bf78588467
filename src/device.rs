// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Execution provider preference for the ONNX Runtime session.
use std::fmt;
use std::str::FromStr;

/// Hardware backend the engine may run on, in the order the caller prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    /// Portable CPU fallback. Always available.
    Cpu,
    /// CUDA for NVIDIA GPUs. The argument is the device index.
    Cuda(usize),
    /// `TensorRT` on NVIDIA GPUs. The argument is the device index.
    TensorRt(usize),
    /// `CoreML` (Apple Neural Engine / GPU).
    CoreMl,
    /// `DirectML` on Windows. The argument is the device index.
    DirectMl(usize),
    /// `OpenVINO` for Intel hardware.
    OpenVino,
    /// `ROCm` for AMD GPUs. The argument is the device index.
    Rocm(usize),
    /// XNNPACK optimized CPU kernels.
    Xnnpack,
}

impl ExecutionProvider {
    /// Default preference: accelerator, then GPU compute, then portable CPU.
    #[must_use]
    pub fn default_preference() -> Vec<Self> {
        vec![Self::CoreMl, Self::Cuda(0), Self::DirectMl(0), Self::Cpu]
    }

    /// Whether support for this provider was compiled into the crate.
    #[must_use]
    pub const fn is_compiled(self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Cuda(_) => cfg!(feature = "cuda"),
            Self::TensorRt(_) => cfg!(feature = "tensorrt"),
            Self::CoreMl => cfg!(feature = "coreml"),
            Self::DirectMl(_) => cfg!(feature = "directml"),
            Self::OpenVino => cfg!(feature = "openvino"),
            Self::Rocm(_) => cfg!(feature = "rocm"),
            Self::Xnnpack => cfg!(feature = "xnnpack"),
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(i) => write!(f, "cuda:{i}"),
            Self::TensorRt(i) => write!(f, "tensorrt:{i}"),
            Self::CoreMl => write!(f, "coreml"),
            Self::DirectMl(i) => write!(f, "directml:{i}"),
            Self::OpenVino => write!(f, "openvino"),
            Self::Rocm(i) => write!(f, "rocm:{i}"),
            Self::Xnnpack => write!(f, "xnnpack"),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "cpu" | "wasm" => return Ok(Self::Cpu),
            "coreml" | "webnn" => return Ok(Self::CoreMl),
            "openvino" => return Ok(Self::OpenVino),
            "xnnpack" => return Ok(Self::Xnnpack),
            _ => {}
        }

        let (name, rest) = s.split_at(s.find(':').unwrap_or(s.len()));
        let index = parse_device_index(rest).ok_or_else(|| format!("Invalid device index in: {s}"))?;
        match name {
            "cuda" | "webgpu" => Ok(Self::Cuda(index)),
            "tensorrt" => Ok(Self::TensorRt(index)),
            "directml" => Ok(Self::DirectMl(index)),
            "rocm" => Ok(Self::Rocm(index)),
            _ => Err(format!("Unknown execution provider: {s}")),
        }
    }
}

/// Parse an optional `:N` suffix. An empty suffix means device 0.
fn parse_device_index(s: &str) -> Option<usize> {
    if s.is_empty() {
        return Some(0);
    }
    s.strip_prefix(':')
        .and_then(|index_str| index_str.parse::<usize>().ok())
}

/// Parse a comma separated preference list such as `"coreml,cuda:0,cpu"`.
///
/// # Errors
///
/// Returns the first entry that fails to parse.
pub fn parse_preference(list: &str) -> Result<Vec<ExecutionProvider>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
