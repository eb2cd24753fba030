//! Device-backed kernel
//!
//! One invocation runs four steps against the selected device:
//! 1. allocate: upload operands A and B, reserve result C
//! 2. bind: count, A, B, C in slots 0..3
//! 3. dispatch: one invocation per element, then block until done
//! 4. read back: copy C into a fresh host array
//!
//! All device buffers belong to the invocation and are destroyed when it
//! ends, whichever step it ended at.

use super::{operand_len, workgroup_grid, ElementwiseKernel, ELEMENT_SIZE, WORKGROUP_SIZE};
use crate::error::{BuildError, ComputeError, ErrorCode};
use crate::hal::{build_program, capture_errors, BuildOptions, ComputeContext, Discovery, Kernel, Program};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

/// Contents of the count slot
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct KernelParams {
    count_lo: u32,
    count_hi: u32,
    _pad: [u32; 2],
}

impl KernelParams {
    fn new(count: u64) -> Self {
        Self {
            count_lo: count as u32,
            count_hi: (count >> 32) as u32,
            _pad: [0; 2],
        }
    }
}

/// Buffers scoped to a single invocation
struct InvocationBuffers {
    params: wgpu::Buffer,
    a: wgpu::Buffer,
    b: wgpu::Buffer,
    c: wgpu::Buffer,
    staging: wgpu::Buffer,
}

impl Drop for InvocationBuffers {
    fn drop(&mut self) {
        self.params.destroy();
        self.a.destroy();
        self.b.destroy();
        self.c.destroy();
        self.staging.destroy();
    }
}

/// Elementwise kernel executed on the discovered device.
pub struct DeviceKernel {
    context: ComputeContext,
    queue: wgpu::Queue,
    program: Program,
    kernel: Kernel,
    limits: wgpu::Limits,
}

impl DeviceKernel {
    pub fn new(discovery: Discovery, program: Program, kernel: Kernel) -> Self {
        let limits = discovery.context.limits();
        Self {
            context: discovery.context,
            queue: discovery.queue,
            program,
            kernel,
            limits,
        }
    }

    /// Build `source` on the discovered device and wrap the resulting kernel.
    pub fn build(
        discovery: Discovery,
        source: &str,
        options: &BuildOptions,
    ) -> Result<Self, BuildError> {
        let (program, kernel) = build_program(&discovery.context, source, options)?;
        Ok(Self::new(discovery, program, kernel))
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Largest operand length a single buffer can hold on this device.
    pub fn max_elements(&self) -> usize {
        let max_bytes = (self.limits.max_storage_buffer_binding_size as u64).min(self.limits.max_buffer_size);
        (max_bytes / ELEMENT_SIZE as u64) as usize
    }

    fn allocate(&self, a: &[f64], b: &[f64], byte_len: u64) -> Result<InvocationBuffers, ComputeError> {
        let device = self.context.device();
        let count = a.len() as u64;

        let (buffers, error) = capture_errors(device, || {
            let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Offload Params"),
                contents: bytemuck::bytes_of(&KernelParams::new(count)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let a = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Offload Operand A"),
                contents: bytemuck::cast_slice(a),
                usage: wgpu::BufferUsages::STORAGE,
            });
            let b = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Offload Operand B"),
                contents: bytemuck::cast_slice(b),
                usage: wgpu::BufferUsages::STORAGE,
            });
            let c = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Offload Result C"),
                size: byte_len,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Offload Readback"),
                size: byte_len,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            InvocationBuffers {
                params,
                a,
                b,
                c,
                staging,
            }
        });

        match error {
            Some(err) => Err(device_error(err, ErrorCode::InvalidBufferSize, "allocate")),
            None => Ok(buffers),
        }
    }

    fn bind(&self, buffers: &InvocationBuffers) -> Result<wgpu::BindGroup, ComputeError> {
        let device = self.context.device();

        let (bind_group, error) = capture_errors(device, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Offload Bind Group"),
                layout: self.kernel.bind_group_layout(),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffers.params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffers.a.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: buffers.b.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: buffers.c.as_entire_binding(),
                    },
                ],
            })
        });

        match error {
            Some(err) => Err(device_error(err, ErrorCode::InvalidKernelArgs, "bind")),
            None => Ok(bind_group),
        }
    }

    fn dispatch(
        &self,
        buffers: &InvocationBuffers,
        bind_group: &wgpu::BindGroup,
        grid: (u32, u32),
        byte_len: u64,
    ) -> Result<(), ComputeError> {
        let device = self.context.device();

        let ((), error) = capture_errors(device, || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Offload Encoder"),
            });

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Offload Pass"),
                    timestamp_writes: None,
                });

                pass.set_pipeline(self.kernel.pipeline());
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(grid.0, grid.1, 1);
            }

            // Copy result to readback buffer
            encoder.copy_buffer_to_buffer(&buffers.c, 0, &buffers.staging, 0, byte_len);

            self.queue.submit(std::iter::once(encoder.finish()));
        });

        match error {
            Some(err) => Err(device_error(err, ErrorCode::InvalidKernelArgs, "dispatch")),
            None => Ok(()),
        }
    }

    fn read_back(&self, buffers: &InvocationBuffers, len: usize) -> Result<Vec<f64>, ComputeError> {
        let slice = buffers.staging.slice(..);
        let (tx, rx) = crossbeam::channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        // Blocks until the dispatch and the copy have finished
        self.context.device().poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ComputeError::new(ErrorCode::MapFailed, e.to_string())),
            Err(_) => {
                return Err(ComputeError::new(
                    ErrorCode::MapFailed,
                    "mapping callback was dropped",
                ))
            }
        }

        let mut out = vec![0.0f64; len];
        {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice_mut::<f64, u8>(&mut out).copy_from_slice(&data);
        }
        buffers.staging.unmap();

        Ok(out)
    }
}

impl ElementwiseKernel for DeviceKernel {
    fn name(&self) -> &str {
        self.kernel.name()
    }

    fn launch(&mut self, a: &[f64], b: &[f64]) -> Result<Vec<f64>, ComputeError> {
        let len = operand_len(a, b)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        if len > self.max_elements() {
            return Err(ComputeError::new(
                ErrorCode::InvalidBufferSize,
                format!(
                    "{} elements exceed the device buffer limit of {}",
                    len,
                    self.max_elements()
                ),
            ));
        }
        let byte_len = (len * ELEMENT_SIZE) as u64;

        let grid = workgroup_grid(len, self.limits.max_compute_workgroups_per_dimension)
            .ok_or_else(|| {
                ComputeError::new(
                    ErrorCode::InvalidWorkSize,
                    format!(
                        "{} elements need more than {}x{} workgroups of {}",
                        len,
                        self.limits.max_compute_workgroups_per_dimension,
                        self.limits.max_compute_workgroups_per_dimension,
                        WORKGROUP_SIZE
                    ),
                )
            })?;

        let buffers = self.allocate(a, b, byte_len)?;
        let bind_group = self.bind(&buffers)?;
        self.dispatch(&buffers, &bind_group, grid, byte_len)?;
        self.read_back(&buffers, len)
    }
}

/// Map a captured device error onto a status code. Out-of-memory always wins
/// over the step's own code.
fn device_error(err: wgpu::Error, otherwise: ErrorCode, step: &str) -> ComputeError {
    let code = match err {
        wgpu::Error::OutOfMemory { .. } => ErrorCode::OutOfMemory,
        _ => otherwise,
    };
    ComputeError::new(code, format!("{} failed: {}", step, err))
}
