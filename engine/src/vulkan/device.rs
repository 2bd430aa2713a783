use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use log::*;
use thiserror::Error;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSurfaceExtension;

use crate::error::{CreationContext, EngineError};
use crate::hooks::Hooks;

use super::{constants, context::VulkanContext, instance::VulkanInstance, swapchain::SwapchainSupport};

#[derive(Debug)]
pub struct VulkanDevice {
    pub vk_device: Device,
}

#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

/// What the suitability policy and rating hooks know about a physical device.
#[derive(Clone, Debug, Default)]
pub struct DeviceCandidate {
    pub name: String,
    pub discrete: bool,
    pub has_graphics_queue: bool,
    pub has_present_queue: bool,
    pub missing_extensions: Vec<String>,
    pub surface_formats: usize,
    pub present_modes: usize,
    pub sampler_anisotropy: bool,
}

impl DeviceCandidate {
    pub fn check(&self) -> Result<(), SuitabilityError> {
        if !self.has_graphics_queue {
            return Err(SuitabilityError("graphics queue family"));
        }
        if !self.has_present_queue {
            return Err(SuitabilityError("presentation queue family"));
        }
        if !self.missing_extensions.is_empty() {
            return Err(SuitabilityError("required device extensions"));
        }
        if self.surface_formats == 0 || self.present_modes == 0 {
            return Err(SuitabilityError("swapchain support"));
        }
        if !self.sampler_anisotropy {
            return Err(SuitabilityError("sampler anisotropy support"));
        }
        Ok(())
    }
}

/// Zero for unusable devices, otherwise at least one with a bonus for
/// discrete GPUs.
pub fn rate_device_suitability(candidate: &DeviceCandidate) -> u32 {
    match candidate.check() {
        Ok(()) if candidate.discrete => 1 + constants::DISCRETE_GPU_BONUS,
        Ok(()) => 1,
        Err(_) => 0,
    }
}

/// Index of the highest non-zero score; the earliest device wins ties.
pub fn select_best(scores: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (index, score) in scores.iter().copied().enumerate() {
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

/// Scores every candidate through the built-in policy and the rating hooks,
/// then picks the winner.
pub fn choose_device(candidates: &[DeviceCandidate], hooks: &mut Hooks) -> Result<usize, EngineError> {
    let scores = candidates
        .iter()
        .map(|candidate| {
            if let Err(error) = candidate.check() {
                warn!("Physical device `{}` is unsuitable: {}", candidate.name, error);
            }
            let score = match rate_device_suitability(candidate) {
                0 => 0,
                base => hooks.rate_device(candidate, base),
            };
            debug!("Physical device `{}` scored {}.", candidate.name, score);
            score
        })
        .collect::<Vec<_>>();

    select_best(&scores).ok_or(EngineError::NoSuitableGpu)
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    /// Aliases `graphics` when no transfer-only family exists.
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Resolves the three queue roles from a device's family list.
    pub fn find(
        properties: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
    ) -> Result<Self, EngineError> {
        let graphics = properties
            .iter()
            .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32)
            .ok_or(EngineError::MissingQueueFamily("graphics"))?;

        let present = (0..properties.len() as u32)
            .find(|i| supports_present(*i))
            .ok_or(EngineError::MissingQueueFamily("present"))?;

        let transfer = properties
            .iter()
            .position(|p| {
                p.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !p.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|i| i as u32)
            .unwrap_or(graphics);

        Ok(Self {
            graphics,
            present,
            transfer,
        })
    }

    pub unsafe fn get(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, EngineError> {
        let properties = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);

        Self::find(&properties, |index| {
            instance
                .vk_instance
                .get_physical_device_surface_support_khr(physical_device, index, surface)
                .unwrap_or(false)
        })
    }

    /// Distinct family indices, one queue is created per entry.
    pub fn uniques(&self) -> BTreeSet<u32> {
        [self.graphics, self.present, self.transfer].into_iter().collect()
    }
}

impl VulkanDevice {
    unsafe fn describe(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<DeviceCandidate> {
        let properties = instance
            .vk_instance
            .get_physical_device_properties(physical_device);
        let features = instance
            .vk_instance
            .get_physical_device_features(physical_device);

        let queue_families = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);
        let has_present_queue = (0..queue_families.len() as u32).any(|index| {
            instance
                .vk_instance
                .get_physical_device_surface_support_khr(physical_device, index, surface)
                .unwrap_or(false)
        });

        let available = instance
            .vk_instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<HashSet<_>>();
        let missing_extensions = constants::DEVICE_EXTENSIONS
            .iter()
            .filter(|e| !available.contains(*e))
            .map(|e| e.to_string())
            .collect();

        // Only meaningful once the device can present to the surface.
        let (surface_formats, present_modes) = if has_present_queue {
            let support = SwapchainSupport::get(instance, surface, physical_device)?;
            (support.formats.len(), support.present_modes.len())
        } else {
            (0, 0)
        };

        Ok(DeviceCandidate {
            name: properties.device_name.to_string(),
            discrete: properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
            has_graphics_queue: queue_families
                .iter()
                .any(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS)),
            has_present_queue,
            missing_extensions,
            surface_formats,
            present_modes,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        })
    }

    unsafe fn pick_physical_device(
        instance: &VulkanInstance,
        context: &mut VulkanContext,
        hooks: &mut Hooks,
    ) -> Result<()> {
        let physical_devices = instance.vk_instance.enumerate_physical_devices()?;

        let mut candidates = Vec::with_capacity(physical_devices.len());
        for physical_device in &physical_devices {
            candidates.push(Self::describe(instance, context.surface, *physical_device)?);
        }

        let chosen = choose_device(&candidates, hooks)?;
        context.physical_device = physical_devices[chosen];
        info!("Selected physical device (`{}`).", candidates[chosen].name);

        Ok(())
    }

    pub unsafe fn new(
        entry: &Entry,
        instance: &VulkanInstance,
        context: &mut VulkanContext,
        hooks: &mut Hooks,
    ) -> Result<VulkanDevice> {
        VulkanDevice::pick_physical_device(instance, context, hooks)?;

        let indices = QueueFamilyIndices::get(instance, context.surface, context.physical_device)?;

        let queue_priorities = &[1.0];
        let queue_infos = indices
            .uniques()
            .iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*index)
                    .queue_priorities(queue_priorities)
            })
            .collect::<Vec<_>>();

        let layers = if instance.validation {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = constants::DEVICE_EXTENSIONS
            .iter()
            .map(|n| n.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos") && entry.version()? >= constants::PORTABILITY_MACOS_VERSION {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .vk_instance
            .create_device(context.physical_device, &info, None)
            .creating("logical device")?;

        let properties = instance
            .vk_instance
            .get_physical_device_properties(context.physical_device);
        context.max_sampler_anisotropy = properties.limits.max_sampler_anisotropy;
        context.memory_properties = instance
            .vk_instance
            .get_physical_device_memory_properties(context.physical_device);

        context.queue_families = indices;
        context.graphics_queue = device.get_device_queue(indices.graphics, 0);
        context.present_queue = device.get_device_queue(indices.present, 0);
        context.transfer_queue = device.get_device_queue(indices.transfer, 0);

        debug!(
            "Queue families: graphics {}, present {}, transfer {}.",
            indices.graphics, indices.present, indices.transfer
        );

        Ok(VulkanDevice { vk_device: device })
    }

    pub unsafe fn destroy(&mut self) {
        self.vk_device.destroy_device(None);
    }
}
