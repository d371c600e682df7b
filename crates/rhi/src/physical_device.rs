//! Physical device (GPU) selection.
//!
//! Selection is a two-stage filter:
//! 1. A hard eligibility gate: graphics, transfer and present queue families
//!    all found, every required device extension supported, and at least one
//!    surface format and present mode available.
//! 2. A preference score applied to eligible devices only. The highest
//!    score wins.
//!
//! The queue family search, the gate and the score are plain functions over
//! Vulkan property structs so they can be checked without a GPU.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::required_device_extensions;
use crate::error::{RhiError, RhiResult};
use crate::instance::missing_names;
use crate::swapchain::SwapchainSupportDetails;

/// Queue family indices collected while scanning a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family supporting graphics operations.
    pub graphics_family: Option<u32>,
    /// First family supporting transfer operations.
    pub transfer_family: Option<u32>,
    /// First family that can present to the surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks whether all three roles have been found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some()
            && self.transfer_family.is_some()
            && self.present_family.is_some()
    }

    /// Converts into [`QueueFamilies`] once every role is filled.
    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics_family?,
            transfer: self.transfer_family?,
            present: self.present_family?,
        })
    }
}

/// Resolved queue family indices of a selected device. Any two may alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub transfer: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Returns the distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics, self.transfer, self.present] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Finds queue families in enumeration order.
///
/// Each role takes the first family that satisfies it and the scan stops as
/// soon as all three roles are filled. Families exposing zero queues are
/// skipped. `present_support` is only queried while no present family has
/// been found yet.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut present_support: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(i);
        }

        if indices.transfer_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
        {
            indices.transfer_family = Some(i);
        }

        if indices.present_family.is_none() && present_support(i) {
            indices.present_family = Some(i);
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// The hard eligibility gate.
///
/// `swapchain_support` is `None` when it was not queried, which happens when
/// the swapchain extension itself is missing.
pub fn is_eligible(
    families: &QueueFamilyIndices,
    missing_extensions: &[String],
    swapchain_support: Option<&SwapchainSupportDetails>,
) -> bool {
    families.is_complete()
        && missing_extensions.is_empty()
        && swapchain_support.is_some_and(SwapchainSupportDetails::is_adequate)
}

/// Preference score for an eligible device.
///
/// Discrete GPUs get a flat bonus of 1000, then the 2D image dimension limit
/// and the base-2 logarithm of the total heap memory are added.
pub fn rate_device(
    properties: &vk::PhysicalDeviceProperties,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> u64 {
    let mut score = 0u64;

    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 1000;
    }

    score += u64::from(properties.limits.max_image_dimension2_d);

    let total_memory = total_heap_memory(memory_properties);
    if total_memory > 0 {
        score += u64::from(total_memory.ilog2());
    }

    score
}

/// Sums the size of every memory heap the device reports.
pub fn total_heap_memory(memory_properties: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory_properties
        .memory_heaps
        .iter()
        .take(memory_properties.memory_heap_count as usize)
        .map(|heap| heap.size)
        .sum()
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved queue families.
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{major}.{minor}.{patch}"))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the highest-scoring eligible physical device.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device passes the gate.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut best: Option<(PhysicalDeviceInfo, u64)> = None;

    for device in devices {
        let Some(candidate) = check_device_eligibility(instance, device, surface, surface_loader)?
        else {
            continue;
        };

        let score = rate_device(&candidate.properties, &candidate.memory_properties);
        debug!(
            "GPU '{}' ({}) - Score: {}",
            candidate.device_name(),
            candidate.device_type_name(),
            score
        );

        // Ties keep the earlier device.
        if best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
            best = Some((candidate, score));
        }
    }

    let Some((selected, score)) = best else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected)
}

/// Runs the eligibility gate against a real device.
fn check_device_eligibility(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Option<PhysicalDeviceInfo>> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let device_name = properties
        .device_name_as_c_str()
        .map(CStr::to_string_lossy)
        .unwrap_or_default();

    let family_properties =
        unsafe { instance.get_physical_device_queue_family_properties(device) };
    let indices = find_queue_families(&family_properties, |i| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, i, surface)
            .unwrap_or(false)
    });

    let extension_properties = unsafe { instance.enumerate_device_extension_properties(device)? };
    let available: Vec<&CStr> = extension_properties
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .collect();
    let missing = missing_names(&available, &required_device_extensions());

    let support = if missing.is_empty() {
        Some(SwapchainSupportDetails::query(surface_loader, device, surface)?)
    } else {
        None
    };

    if !is_eligible(&indices, &missing, support.as_ref()) {
        debug!(
            "GPU '{}' skipped: families={:?}, missing extensions={:?}, swapchain adequate={}",
            device_name,
            indices,
            missing,
            support.as_ref().is_some_and(SwapchainSupportDetails::is_adequate)
        );
        return Ok(None);
    }

    let Some(queue_families) = indices.resolve() else {
        return Ok(None);
    };

    Ok(Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn adequate_support() -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn test_single_family_serves_all_roles() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            16,
        )];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(
            indices.resolve(),
            Some(QueueFamilies {
                graphics: 0,
                transfer: 0,
                present: 0
            })
        );
    }

    #[test]
    fn test_first_match_wins_per_role() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let indices = find_queue_families(&families, |i| i >= 1);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.transfer_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_scan_stops_once_complete() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let mut queried = Vec::new();
        let indices = find_queue_families(&families, |i| {
            queried.push(i);
            true
        });
        assert!(indices.is_complete());
        assert_eq!(queried, vec![0]);
    }

    #[test]
    fn test_empty_families_are_skipped() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 0),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 4),
        ];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1)];
        let indices = find_queue_families(&families, |_| false);
        assert!(!indices.is_complete());
        assert!(indices.resolve().is_none());
    }

    #[test]
    fn test_unique_families() {
        let aliased = QueueFamilies {
            graphics: 0,
            transfer: 0,
            present: 0,
        };
        assert_eq!(aliased.unique(), vec![0]);

        let split = QueueFamilies {
            graphics: 0,
            transfer: 2,
            present: 1,
        };
        assert_eq!(split.unique(), vec![0, 2, 1]);

        let partial = QueueFamilies {
            graphics: 1,
            transfer: 0,
            present: 1,
        };
        assert_eq!(partial.unique(), vec![1, 0]);
    }

    #[test]
    fn test_eligibility_gate() {
        let complete = QueueFamilyIndices {
            graphics_family: Some(0),
            transfer_family: Some(0),
            present_family: Some(0),
        };
        let support = adequate_support();

        assert!(is_eligible(&complete, &[], Some(&support)));
        assert!(!is_eligible(&QueueFamilyIndices::default(), &[], Some(&support)));
        assert!(!is_eligible(
            &complete,
            &["VK_KHR_swapchain".to_string()],
            None
        ));
        assert!(!is_eligible(&complete, &[], None));

        let no_formats = SwapchainSupportDetails {
            formats: Vec::new(),
            ..adequate_support()
        };
        assert!(!is_eligible(&complete, &[], Some(&no_formats)));
    }

    fn properties(
        device_type: vk::PhysicalDeviceType,
        max_dimension: u32,
    ) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            device_type,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension2_d: max_dimension,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn memory(heaps: &[u64]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: heaps.len() as u32,
            ..Default::default()
        };
        for (slot, size) in memory.memory_heaps.iter_mut().zip(heaps) {
            slot.size = *size;
        }
        memory
    }

    #[test]
    fn test_rate_device_components() {
        let gib = 1u64 << 30;
        let discrete = rate_device(
            &properties(vk::PhysicalDeviceType::DISCRETE_GPU, 16384),
            &memory(&[8 * gib, gib]),
        );
        // floor(log2(9 GiB)) = 33
        assert_eq!(discrete, 1000 + 16384 + 33);

        let integrated = rate_device(
            &properties(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384),
            &memory(&[8 * gib, gib]),
        );
        assert_eq!(integrated, 16384 + 33);
    }

    #[test]
    fn test_rate_device_prefers_discrete() {
        let gib = 1u64 << 30;
        let discrete = rate_device(
            &properties(vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
            &memory(&[4 * gib]),
        );
        let integrated = rate_device(
            &properties(vk::PhysicalDeviceType::INTEGRATED_GPU, 8192),
            &memory(&[16 * gib]),
        );
        assert!(discrete > integrated);
    }

    #[test]
    fn test_rate_device_without_memory() {
        let score = rate_device(&properties(vk::PhysicalDeviceType::CPU, 4096), &memory(&[]));
        assert_eq!(score, 4096);
    }

    #[test]
    fn test_total_heap_memory_respects_heap_count() {
        let mut props = memory(&[100, 200]);
        props.memory_heaps[2].size = 1000;
        assert_eq!(total_heap_memory(&props), 300);
    }
}
