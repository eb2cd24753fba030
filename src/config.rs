/// Pipeline configuration
///
/// Loaded from TOML; every field has a default so a partial file is enough.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding the bundled kernel sources.
pub const DEFAULT_KERNEL_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels");

/// Capability markers accepted as "supports double precision".
pub const DEFAULT_FP64_EXTENSIONS: &[&str] = &["SHADER_F64"];

/// Which class of compute unit discovery may select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Software rasterizers / CPU implementations
    Cpu,
    /// Integrated, discrete or virtual GPUs
    Gpu,
    /// Anything the runtime exposes
    Any,
}

impl DeviceClass {
    pub fn admits(&self, device_type: wgpu::DeviceType) -> bool {
        match self {
            DeviceClass::Any => true,
            DeviceClass::Cpu => matches!(device_type, wgpu::DeviceType::Cpu),
            DeviceClass::Gpu => matches!(
                device_type,
                wgpu::DeviceType::IntegratedGpu
                    | wgpu::DeviceType::DiscreteGpu
                    | wgpu::DeviceType::VirtualGpu
            ),
        }
    }
}

/// Which kernel implementation backs the compute stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Discovered compute device (wgpu)
    Device,
    /// CPU reference kernel
    Host,
}

/// Configuration for the offload pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory the kernel source is loaded from
    pub kernel_dir: PathBuf,
    /// Kernel source file name inside `kernel_dir`
    pub kernel_file: String,
    /// Kernel entry point
    pub entry_point: String,
    /// Device class discovery is restricted to
    pub device_class: DeviceClass,
    /// A device passes if it reports at least one of these
    pub required_extensions: Vec<String>,
    /// Elements per generated array
    pub array_len: usize,
    /// Region tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Stop after this many producer ticks (0 = run until interrupted)
    pub max_ticks: u64,
    /// Kernel implementation
    pub backend: Backend,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kernel_dir: PathBuf::from(DEFAULT_KERNEL_DIR),
            kernel_file: "kernels.wgsl".to_string(),
            entry_point: "add".to_string(),
            device_class: DeviceClass::Gpu,
            required_extensions: DEFAULT_FP64_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            array_len: 10,
            tick_interval_ms: 10,
            max_ticks: 0,
            backend: Backend::Device,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate().map_err(|message| Error::Config {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.entry_point.trim().is_empty() {
            return Err("entry_point must not be empty".to_string());
        }
        if self.kernel_file.trim().is_empty() {
            return Err("kernel_file must not be empty".to_string());
        }
        if self.required_extensions.is_empty() {
            return Err("required_extensions needs at least one marker".to_string());
        }
        Ok(())
    }

    /// Full path of the kernel source
    pub fn kernel_path(&self) -> PathBuf {
        self.kernel_dir.join(&self.kernel_file)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    /// `None` when the run is unbounded
    pub fn tick_limit(&self) -> Option<u64> {
        (self.max_ticks > 0).then_some(self.max_ticks)
    }
}
