//! First-match device selection
//!
//! Works over whatever the probe gathered, so it holds no runtime handles of
//! its own and can be exercised with plain data.

use crate::config::DeviceClass;
use crate::error::DiscoveryError;

/// What selection needs to know about a device.
pub trait DeviceCandidate {
    fn name(&self) -> &str;
    fn device_type(&self) -> wgpu::DeviceType;
    fn is_available(&self) -> bool;
    fn extensions(&self) -> &[String];
}

/// One platform's devices, in runtime order.
#[derive(Debug, Clone)]
pub struct PlatformCandidates<D> {
    pub name: String,
    pub devices: Vec<D>,
}

/// Filters applied to every device.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub class: DeviceClass,
    /// At least one must be present in the device's extension set
    pub required_extensions: Vec<String>,
}

impl SelectionCriteria {
    pub fn new(class: DeviceClass, required_extensions: Vec<String>) -> Self {
        Self {
            class,
            required_extensions,
        }
    }

    /// First required marker the device reports, if any.
    pub fn matching_extension<'a, D: DeviceCandidate>(&self, device: &'a D) -> Option<&'a str> {
        device
            .extensions()
            .iter()
            .find(|ext| self.required_extensions.iter().any(|req| ext.contains(req.as_str())))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    WrongClass,
    Unavailable,
    MissingExtension,
}

/// Check one device against the criteria.
pub fn evaluate<D: DeviceCandidate>(
    device: &D,
    criteria: &SelectionCriteria,
) -> Result<(), Rejection> {
    if !criteria.class.admits(device.device_type()) {
        return Err(Rejection::WrongClass);
    }
    if !device.is_available() {
        return Err(Rejection::Unavailable);
    }
    if criteria.matching_extension(device).is_none() {
        return Err(Rejection::MissingExtension);
    }
    Ok(())
}

/// Device picked by [`select_device`] or opened by [`open_first`].
#[derive(Debug)]
pub struct Selected<D> {
    pub platform: String,
    pub device: D,
}

/// Scan platforms in order and take the first device passing every filter.
///
/// No scoring between candidates and no second pass: an empty platform list
/// is [`DiscoveryError::NoPlatform`], a scan without a match is
/// [`DiscoveryError::NoDevice`].
pub fn select_device<D: DeviceCandidate>(
    platforms: Vec<PlatformCandidates<D>>,
    criteria: &SelectionCriteria,
) -> Result<Selected<D>, DiscoveryError> {
    open_first(platforms, criteria, Ok::<D, std::convert::Infallible>)
}

/// Like [`select_device`], but also opens the first passing device with
/// `open`.
///
/// A device that fails to open gives up the rest of its platform; the scan
/// resumes with the next platform and ends in [`DiscoveryError::NoDevice`]
/// if nothing opens.
pub fn open_first<D, T, E>(
    platforms: Vec<PlatformCandidates<D>>,
    criteria: &SelectionCriteria,
    mut open: impl FnMut(D) -> Result<T, E>,
) -> Result<Selected<T>, DiscoveryError>
where
    D: DeviceCandidate,
    E: std::fmt::Display,
{
    if platforms.is_empty() {
        return Err(DiscoveryError::NoPlatform);
    }

    'platforms: for platform in platforms {
        for device in platform.devices {
            if let Err(reason) = evaluate(&device, criteria) {
                log::debug!(
                    "Skipping {} on {}: {:?}",
                    device.name(),
                    platform.name,
                    reason
                );
                continue;
            }

            let name = device.name().to_string();
            match open(device) {
                Ok(opened) => {
                    return Ok(Selected {
                        platform: platform.name,
                        device: opened,
                    })
                }
                Err(e) => {
                    log::warn!(
                        "Failed to open {} on {}: {}; trying next platform",
                        name,
                        platform.name,
                        e
                    );
                    continue 'platforms;
                }
            }
        }
    }

    Err(DiscoveryError::NoDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct FakeDevice {
        name: &'static str,
        device_type: wgpu::DeviceType,
        available: bool,
        extensions: Vec<String>,
    }

    impl FakeDevice {
        fn gpu(name: &'static str, extensions: &[&str]) -> Self {
            Self {
                name,
                device_type: wgpu::DeviceType::DiscreteGpu,
                available: true,
                extensions: extensions.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn unavailable(mut self) -> Self {
            self.available = false;
            self
        }

        fn of_type(mut self, device_type: wgpu::DeviceType) -> Self {
            self.device_type = device_type;
            self
        }
    }

    impl DeviceCandidate for FakeDevice {
        fn name(&self) -> &str {
            self.name
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

    fn platform(name: &str, devices: Vec<FakeDevice>) -> PlatformCandidates<FakeDevice> {
        PlatformCandidates {
            name: name.to_string(),
            devices,
        }
    }

    fn fp64(class: DeviceClass) -> SelectionCriteria {
        SelectionCriteria::new(
            class,
            vec!["SHADER_F64".to_string(), "FP64_ALT".to_string()],
        )
    }

    #[test]
    fn test_no_platform() {
        let result = select_device::<FakeDevice>(vec![], &fp64(DeviceClass::Any));
        assert!(matches!(result, Err(DiscoveryError::NoPlatform)));
    }

    #[test]
    fn test_platforms_without_devices() {
        let result = select_device(
            vec![platform("Vulkan", vec![]), platform("Gl", vec![])],
            &fp64(DeviceClass::Any),
        );
        assert!(matches!(result, Err(DiscoveryError::NoDevice)));
    }

    #[test]
    fn test_skips_unavailable_and_missing_extension() {
        let platforms = vec![platform(
            "Vulkan",
            vec![
                FakeDevice::gpu("busy", &["SHADER_F64"]).unavailable(),
                FakeDevice::gpu("single", &["TIMESTAMP_QUERY"]),
                FakeDevice::gpu("double", &["TIMESTAMP_QUERY", "SHADER_F64"]),
            ],
        )];

        let selected = select_device(platforms, &fp64(DeviceClass::Gpu)).unwrap();
        assert_eq!(selected.device.name, "double");
        assert_eq!(selected.platform, "Vulkan");
    }

    #[test]
    fn test_first_match_wins_across_platforms() {
        let platforms = vec![
            platform("Vulkan", vec![FakeDevice::gpu("no-fp64", &[])]),
            platform("Metal", vec![FakeDevice::gpu("first", &["FP64_ALT"])]),
            platform("Gl", vec![FakeDevice::gpu("second", &["SHADER_F64"])]),
        ];

        let selected = select_device(platforms, &fp64(DeviceClass::Any)).unwrap();
        assert_eq!(selected.device.name, "first");
        assert_eq!(selected.platform, "Metal");
    }

    #[test]
    fn test_class_filter() {
        let devices = vec![
            FakeDevice::gpu("gpu", &["SHADER_F64"]),
            FakeDevice::gpu("llvmpipe", &["SHADER_F64"]).of_type(wgpu::DeviceType::Cpu),
        ];

        let cpu = select_device(vec![platform("Vulkan", devices.clone())], &fp64(DeviceClass::Cpu))
            .unwrap();
        assert_eq!(cpu.device.name, "llvmpipe");

        let gpu = select_device(vec![platform("Vulkan", devices)], &fp64(DeviceClass::Gpu)).unwrap();
        assert_eq!(gpu.device.name, "gpu");
    }

    #[test]
    fn test_evaluate_reasons() {
        let criteria = fp64(DeviceClass::Gpu);
        let cpu = FakeDevice::gpu("cpu", &["SHADER_F64"]).of_type(wgpu::DeviceType::Cpu);
        assert_eq!(evaluate(&cpu, &criteria), Err(Rejection::WrongClass));

        let off = FakeDevice::gpu("off", &["SHADER_F64"]).unavailable();
        assert_eq!(evaluate(&off, &criteria), Err(Rejection::Unavailable));

        let bare = FakeDevice::gpu("bare", &[]);
        assert_eq!(evaluate(&bare, &criteria), Err(Rejection::MissingExtension));
    }

    #[test]
    fn test_open_failure_moves_to_next_platform() {
        let platforms = vec![
            platform(
                "Vulkan",
                vec![
                    FakeDevice::gpu("broken", &["SHADER_F64"]),
                    FakeDevice::gpu("same-platform", &["SHADER_F64"]),
                ],
            ),
            platform("Gl", vec![FakeDevice::gpu("fallback", &["SHADER_F64"])]),
        ];

        let mut attempts = Vec::new();
        let opened = open_first(platforms, &fp64(DeviceClass::Any), |device| {
            attempts.push(device.name);
            if device.name == "broken" {
                Err("device lost")
            } else {
                Ok(device.name)
            }
        })
        .unwrap();

        assert_eq!(opened.device, "fallback");
        assert_eq!(opened.platform, "Gl");
        assert_eq!(attempts, vec!["broken", "fallback"]);
    }

    #[test]
    fn test_nothing_opens_is_no_device() {
        let platforms = vec![
            platform("Vulkan", vec![FakeDevice::gpu("a", &["SHADER_F64"])]),
            platform("Metal", vec![FakeDevice::gpu("b", &["SHADER_F64"])]),
        ];

        let result = open_first(platforms, &fp64(DeviceClass::Any), |_device| {
            Err::<(), _>("request rejected")
        });
        assert!(matches!(result, Err(DiscoveryError::NoDevice)));
    }

    #[test]
    fn test_matching_extension_reports_marker() {
        let criteria = fp64(DeviceClass::Any);
        let device = FakeDevice::gpu("d", &["PUSH_CONSTANTS", "FP64_ALT"]);
        assert_eq!(criteria.matching_extension(&device), Some("FP64_ALT"));
    }
}
