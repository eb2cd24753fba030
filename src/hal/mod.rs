/// Hardware Abstraction Layer
///
/// Enumerates compute platforms (wgpu backends) and their adapters, selects
/// exactly one usable device and opens it. Runs once, before the compute
/// stage is built.

pub mod program;
pub mod select;

pub use program::{build_program, load_kernel_source, BuildOptions, Kernel, Program};
pub use select::{
    evaluate, open_first, select_device, DeviceCandidate, PlatformCandidates, Rejection, SelectionCriteria,
    Selected,
};

use crate::error::DiscoveryError;
use std::sync::Arc;
use wgpu::{Adapter, Device, Instance, Queue};

/// Platforms are scanned in this order.
pub const PLATFORM_ORDER: &[wgpu::Backend] = &[
    wgpu::Backend::Vulkan,
    wgpu::Backend::Metal,
    wgpu::Backend::Dx12,
    wgpu::Backend::Gl,
];

/// Hardware capabilities of a probed or selected device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub available: bool,
    pub extensions: Vec<String>,
}

impl DeviceInfo {
    fn from_adapter(adapter: &Adapter) -> Self {
        let info = adapter.get_info();
        let available = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);

        Self {
            name: info.name,
            backend: info.backend,
            device_type: info.device_type,
            available,
            extensions: feature_names(adapter.features()),
        }
    }
}

/// Names of the feature flags, used as the device's extension set.
pub fn feature_names(features: wgpu::Features) -> Vec<String> {
    features
        .iter_names()
        .map(|(name, _)| name.to_string())
        .collect()
}

/// An adapter found during probing
pub struct AdapterCandidate {
    adapter: Adapter,
    info: DeviceInfo,
}

impl AdapterCandidate {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl DeviceCandidate for DeviceInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> wgpu::DeviceType {
        self.device_type
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

impl DeviceCandidate for AdapterCandidate {
    fn name(&self) -> &str {
        self.info.name()
    }

    fn device_type(&self) -> wgpu::DeviceType {
        self.info.device_type()
    }

    fn is_available(&self) -> bool {
        self.info.is_available()
    }

    fn extensions(&self) -> &[String] {
        self.info.extensions()
    }
}

pub fn platform_name(backend: wgpu::Backend) -> String {
    format!("{:?}", backend)
}

fn backend_bits(backend: wgpu::Backend) -> wgpu::Backends {
    match backend {
        wgpu::Backend::Vulkan => wgpu::Backends::VULKAN,
        wgpu::Backend::Metal => wgpu::Backends::METAL,
        wgpu::Backend::Dx12 => wgpu::Backends::DX12,
        wgpu::Backend::Gl => wgpu::Backends::GL,
        wgpu::Backend::BrowserWebGpu => wgpu::Backends::BROWSER_WEBGPU,
        _ => wgpu::Backends::empty(),
    }
}

/// Create an instance over every backend.
pub fn create_instance() -> Instance {
    Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Enumerate platforms in [`PLATFORM_ORDER`]. A backend with no adapters is
/// not a platform.
pub fn probe_platforms(instance: &Instance) -> Vec<PlatformCandidates<AdapterCandidate>> {
    let mut platforms = Vec::new();

    for backend in PLATFORM_ORDER {
        let adapters = instance.enumerate_adapters(backend_bits(*backend));
        if adapters.is_empty() {
            continue;
        }

        let devices: Vec<AdapterCandidate> = adapters
            .into_iter()
            .map(|adapter| {
                let info = DeviceInfo::from_adapter(&adapter);
                log::debug!(
                    "Found device: {} ({:?}, {:?})",
                    info.name,
                    info.backend,
                    info.device_type
                );
                AdapterCandidate { adapter, info }
            })
            .collect();

        platforms.push(PlatformCandidates {
            name: platform_name(*backend),
            devices,
        });
    }

    platforms
}

/// Probed platforms, for diagnostics.
pub fn list_devices(instance: &Instance) -> Vec<PlatformCandidates<DeviceInfo>> {
    probe_platforms(instance)
        .into_iter()
        .map(|platform| PlatformCandidates {
            name: platform.name,
            devices: platform.devices.into_iter().map(|d| d.info).collect(),
        })
        .collect()
}

/// Opened device bound to the selected adapter.
///
/// Cloning shares the same device; buffers, programs and kernels created
/// against it borrow it read-only.
#[derive(Clone)]
pub struct ComputeContext {
    device: Arc<Device>,
    devices: Arc<[DeviceInfo]>,
}

impl ComputeContext {
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Devices bound to this context (always exactly one).
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn primary_device_info(&self) -> &DeviceInfo {
        &self.devices[0]
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }
}

/// Run `f` inside out-of-memory and validation error scopes and return the
/// error either scope caught, out-of-memory first.
pub(crate) fn capture_errors<T>(device: &Device, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let value = f();

    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    (value, out_of_memory.or(validation))
}

/// Result of a successful discovery: the context plus the device's only
/// command queue, which the compute stage takes ownership of.
pub struct Discovery {
    pub context: ComputeContext,
    pub queue: Queue,
}

/// Probe, select and open a device.
///
/// Returns exactly one of [`DiscoveryError::NoPlatform`] or
/// [`DiscoveryError::NoDevice`] on failure; a device that passes every
/// filter but cannot be opened is skipped like the rest of its platform.
pub fn discover(criteria: &SelectionCriteria) -> Result<Discovery, DiscoveryError> {
    log::info!("Initializing compute device discovery...");

    let instance = create_instance();
    let platforms = probe_platforms(&instance);
    log::debug!("{} platform(s) reported", platforms.len());

    let Selected {
        platform,
        device: (info, device, queue),
    } = open_first(platforms, criteria, |candidate| open_adapter(candidate, criteria))?;

    device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
        log::error!("Uncaptured device error: {}", err);
    }));

    log::info!("Selected compute device: {} ({})", info.name, platform);

    Ok(Discovery {
        context: ComputeContext {
            device: Arc::new(device),
            devices: Arc::from(vec![info]),
        },
        queue,
    })
}

/// Request a device from `candidate` with the matched double-precision
/// feature enabled.
fn open_adapter(
    candidate: AdapterCandidate,
    criteria: &SelectionCriteria,
) -> Result<(DeviceInfo, Device, Queue), wgpu::RequestDeviceError> {
    let AdapterCandidate { adapter, info } = candidate;

    let required_features = criteria
        .matching_extension(&info)
        .and_then(wgpu::Features::from_name)
        .unwrap_or_else(wgpu::Features::empty);

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some(&format!("Offload Device: {}", info.name)),
            required_features,
            required_limits: adapter.limits(),
        },
        None,
    ))?;

    Ok((info, device, queue))
}
