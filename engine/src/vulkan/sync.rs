use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::error::CreationContext;

use super::{context::VulkanContext, device::VulkanDevice};

/// Per-slot synchronization primitives.
#[derive(Copy, Clone, Debug, Default)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on each slot returns at once.
    pub in_flight: vk::Fence,
}

pub unsafe fn create_sync_objects(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    frames_in_flight: usize,
) -> Result<()> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

    for _ in 0..frames_in_flight {
        // Pushed first so a partially created slot is still torn down.
        context.frames.push(FrameSlot::default());
        let last = context.frames.len() - 1;
        let slot = &mut context.frames[last];

        slot.image_available = device
            .vk_device
            .create_semaphore(&semaphore_info, None)
            .creating("semaphore")?;
        slot.render_finished = device
            .vk_device
            .create_semaphore(&semaphore_info, None)
            .creating("semaphore")?;
        slot.in_flight = device
            .vk_device
            .create_fence(&fence_info, None)
            .creating("fence")?;
    }

    Ok(())
}

pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
    for slot in context.frames.drain(..) {
        device.vk_device.destroy_fence(slot.in_flight, None);
        device.vk_device.destroy_semaphore(slot.render_finished, None);
        device.vk_device.destroy_semaphore(slot.image_available, None);
    }
}
