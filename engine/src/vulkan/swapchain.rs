use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{Handle, KhrSurfaceExtension, KhrSwapchainExtension};

use crate::config::PresentModePreference;
use crate::error::CreationContext;
use crate::window::Extent;

use super::constants;
use super::context::VulkanContext;
use super::device::VulkanDevice;
use super::image;
use super::instance::VulkanInstance;

/// What a surface offers a particular physical device.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .vk_instance
                .get_physical_device_surface_capabilities_khr(physical_device, surface)?,
            formats: instance
                .vk_instance
                .get_physical_device_surface_formats_khr(physical_device, surface)?,
            present_modes: instance
                .vk_instance
                .get_physical_device_surface_present_modes_khr(physical_device, surface)?,
        })
    }
}

/// Prefers 8-bit sRGB with a non-linear color space, else the first offered.
///
/// Callers only get here for devices that offer at least one format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == constants::PREFERRED_SURFACE_FORMAT.format
                && f.color_space == constants::PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
        .unwrap_or(constants::PREFERRED_SURFACE_FORMAT)
}

/// FIFO is always available, so it is the fallback for every preference.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::LowLatency if present_modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// Uses the surface's extent unless it reports the `u32::MAX` sentinel, in
/// which case the framebuffer size is clamped into the supported range.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, framebuffer: Extent) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D::builder()
        .width(framebuffer.width.clamp(min.width, max.width))
        .height(framebuffer.height.clamp(min.height, max.height))
        .build()
}

/// One more than the minimum, capped by the maximum when there is one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

pub unsafe fn create(
    instance: &VulkanInstance,
    device: &VulkanDevice,
    context: &mut VulkanContext,
    framebuffer: Extent,
    preference: PresentModePreference,
) -> Result<()> {
    let support = SwapchainSupport::get(instance, context.surface, context.physical_device)?;

    let surface_format = choose_surface_format(&support.formats);
    let present_mode = choose_present_mode(&support.present_modes, preference);
    let extent = choose_extent(&support.capabilities, framebuffer);
    let image_count = choose_image_count(&support.capabilities);

    let families = &context.queue_families;
    let (sharing_mode, family_indices) = if families.graphics != families.present {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, vec![])
    };

    let info = vk::SwapchainCreateInfoKHR::builder()
        .surface(context.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing_mode)
        .queue_family_indices(&family_indices)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(vk::SwapchainKHR::null());

    context.swapchain = device
        .vk_device
        .create_swapchain_khr(&info, None)
        .creating("swapchain")?;
    context.swapchain_images = device
        .vk_device
        .get_swapchain_images_khr(context.swapchain)
        .creating("swapchain images")?;
    context.swapchain_format = surface_format.format;
    context.swapchain_extent = extent;

    info!(
        "Created swapchain ({} images, {:?}, {:?}, {}x{}).",
        context.swapchain_images.len(),
        surface_format.format,
        present_mode,
        extent.width,
        extent.height
    );

    create_image_views(device, context)
}

unsafe fn create_image_views(device: &VulkanDevice, context: &mut VulkanContext) -> Result<()> {
    for swapchain_image in context.swapchain_images.clone() {
        let view = image::create_image_view(
            device,
            swapchain_image,
            context.swapchain_format,
            vk::ImageAspectFlags::COLOR,
        )?;
        context.swapchain_image_views.push(view);
    }
    Ok(())
}

pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
    context
        .swapchain_image_views
        .drain(..)
        .for_each(|v| device.vk_device.destroy_image_view(v, None));
    context.swapchain_images.clear();
    device
        .vk_device
        .destroy_swapchain_khr(context.swapchain, None);
    context.swapchain = vk::SwapchainKHR::null();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 48,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        }
    }

    #[test]
    fn unbounded_surface_gets_one_extra_image() {
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }

    #[test]
    fn image_count_stays_within_surface_limits() {
        for min in 1..6 {
            for max in [0, min, min + 1, min + 4] {
                let count = choose_image_count(&capabilities(min, max));
                assert!(count >= min, "min {} max {} -> {}", min, max, count);
                assert!(max == 0 || count <= max, "min {} max {} -> {}", min, max, count);
            }
        }
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
    }

    #[test]
    fn sentinel_extent_clamps_framebuffer() {
        let caps = capabilities(2, 0);
        let cases = [
            (Extent::new(800, 600), (800, 600)),
            (Extent::new(4000, 600), (1920, 600)),
            (Extent::new(10, 10), (64, 48)),
            (Extent::new(5000, 5000), (1920, 1080)),
        ];
        for (framebuffer, (width, height)) in cases {
            let extent = choose_extent(&caps, framebuffer);
            assert_eq!((extent.width, extent.height), (width, height));
        }
    }

    #[test]
    fn defined_extent_is_used_verbatim() {
        let mut caps = capabilities(2, 0);
        caps.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let extent = choose_extent(&caps, Extent::new(10, 10));
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn prefers_srgb_surface_format() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = constants::PREFERRED_SURFACE_FORMAT;

        assert_eq!(choose_surface_format(&[unorm, srgb]).format, srgb.format);
        assert_eq!(choose_surface_format(&[unorm]).format, unorm.format);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::LowLatency),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::Vsync),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], PresentModePreference::LowLatency),
            vk::PresentModeKHR::FIFO
        );
    }
}
