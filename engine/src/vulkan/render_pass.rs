use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::error::CreationContext;

use super::context::VulkanContext;
use super::device::VulkanDevice;

/// One subpass writing the swapchain color attachment, plus the depth
/// attachment when depth testing is on.
pub unsafe fn create(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    depth_buffer: bool,
) -> Result<()> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(context.swapchain_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let depth_stencil_attachment = vk::AttachmentDescription::builder()
        .format(context.depth_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_stencil_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_attachments = &[color_attachment_ref];
    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments);
    if depth_buffer {
        subpass = subpass.depth_stencil_attachment(&depth_stencil_attachment_ref);
    }

    // Both stages also wrote during the previous frame.
    let (stages, access) = if depth_buffer {
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
    } else {
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
    };

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(access);

    let attachments = if depth_buffer {
        vec![color_attachment, depth_stencil_attachment]
    } else {
        vec![color_attachment]
    };
    let subpasses = &[subpass];
    let dependencies = &[dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    context.render_pass = device
        .vk_device
        .create_render_pass(&info, None)
        .creating("render pass")?;

    Ok(())
}

pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
    device
        .vk_device
        .destroy_render_pass(context.render_pass, None);
    context.render_pass = vk::RenderPass::default();
}
