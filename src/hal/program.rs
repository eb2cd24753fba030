//! Program builder
//!
//! Compiles kernel source for the selected device and extracts one named
//! entry point. Runs once per compute stage, never per event.

use super::{capture_errors, ComputeContext};
use crate::error::{BuildError, BuildStage, Error};
use std::path::Path;

/// Source language every program is built as.
pub const SHADER_LANGUAGE: &str = "wgsl";

/// Options applied to a program build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Entry point extracted as the kernel
    pub entry_point: String,
    /// Debug label attached to the device objects
    pub label: String,
}

impl BuildOptions {
    pub fn new(entry_point: impl Into<String>) -> Self {
        let entry_point = entry_point.into();
        Self {
            label: format!("offload::{}", entry_point),
            entry_point,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::new("add")
    }
}

/// Compiled kernel source
pub struct Program {
    module: wgpu::ShaderModule,
    source: String,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn module(&self) -> &wgpu::ShaderModule {
        &self.module
    }
}

/// Invocable entry point extracted from a [`Program`]
pub struct Kernel {
    name: String,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl Kernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }
}

/// Read kernel source text from disk.
pub fn load_kernel_source(path: &Path) -> Result<String, Error> {
    log::debug!("Loading kernel source from {}", path.display());
    std::fs::read_to_string(path).map_err(|source| Error::KernelSource {
        path: path.to_path_buf(),
        source,
    })
}

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Build `source` for the context's device and extract `options.entry_point`.
///
/// On failure the build log is logged before the error is returned, and no
/// kernel is produced.
pub fn build_program(
    context: &ComputeContext,
    source: &str,
    options: &BuildOptions,
) -> Result<(Program, Kernel), BuildError> {
    let device = context.device();

    let fail = |err: BuildError| {
        log::error!("Kernel build error ({})\n{}", err.stage, err.log);
        err
    };

    if source.trim().is_empty() {
        return Err(fail(BuildError::new(
            BuildStage::Source,
            "kernel source is empty",
        )));
    }

    log::info!(
        "Compiling {} program '{}' for {}",
        SHADER_LANGUAGE,
        options.label,
        context.primary_device_info().name
    );

    let (module, compile_error) = capture_errors(device, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&options.label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
    });
    if let Some(err) = compile_error {
        return Err(fail(BuildError::new(BuildStage::Compile, error_log(&err))));
    }
    let program = Program {
        module,
        source: source.to_string(),
    };

    let ((pipeline, bind_group_layout), link_error) = capture_errors(device, || {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Bind Group Layout", options.label)),
            entries: &[
                // Element count
                buffer_entry(0, wgpu::BufferBindingType::Uniform),
                // Operand A
                buffer_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                // Operand B
                buffer_entry(2, wgpu::BufferBindingType::Storage { read_only: true }),
                // Result C
                buffer_entry(3, wgpu::BufferBindingType::Storage { read_only: false }),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", options.label)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("{} Pipeline", options.label)),
            layout: Some(&pipeline_layout),
            module: program.module(),
            entry_point: &options.entry_point,
        });

        (pipeline, bind_group_layout)
    });
    if let Some(err) = link_error {
        return Err(fail(BuildError::new(
            BuildStage::Link,
            format!(
                "entry point '{}' could not be extracted\n{}",
                options.entry_point,
                error_log(&err)
            ),
        )));
    }

    log::info!("Kernel '{}' ready", options.entry_point);

    Ok((
        program,
        Kernel {
            name: options.entry_point.clone(),
            pipeline,
            bind_group_layout,
        },
    ))
}

fn error_log(err: &wgpu::Error) -> String {
    match err {
        wgpu::Error::Validation { description, .. } => description.clone(),
        other => other.to_string(),
    }
}
