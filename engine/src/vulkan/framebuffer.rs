use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::error::CreationContext;

use super::{context::VulkanContext, device::VulkanDevice};

/// One framebuffer per swapchain image view, sharing the depth view.
pub unsafe fn create(device: &VulkanDevice, context: &mut VulkanContext, depth_buffer: bool) -> Result<()> {
    for view in context.swapchain_image_views.clone() {
        let attachments = if depth_buffer {
            vec![view, context.depth_image.view]
        } else {
            vec![view]
        };
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(context.render_pass)
            .attachments(&attachments)
            .width(context.swapchain_extent.width)
            .height(context.swapchain_extent.height)
            .layers(1);

        let framebuffer = device
            .vk_device
            .create_framebuffer(&create_info, None)
            .creating("framebuffer")?;
        context.framebuffers.push(framebuffer);
    }

    Ok(())
}

pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
    context
        .framebuffers
        .drain(..)
        .for_each(|f| device.vk_device.destroy_framebuffer(f, None));
}
