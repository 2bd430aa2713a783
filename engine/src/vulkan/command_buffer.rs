use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::Handle;

use crate::error::CreationContext;

use super::{constants, context::VulkanContext, device::VulkanDevice};

/// Creates the graphics pool, and a separate transfer pool only when the
/// transfer queue lives in another family.
pub unsafe fn create_command_pools(device: &VulkanDevice, context: &mut VulkanContext) -> Result<()> {
    let families = context.queue_families;

    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(families.graphics);

    context.command_pool = device
        .vk_device
        .create_command_pool(&info, None)
        .creating("command pool")?;

    context.transfer_command_pool = if families.transfer != families.graphics {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(families.transfer);
        device
            .vk_device
            .create_command_pool(&info, None)
            .creating("transfer command pool")?
    } else {
        context.command_pool
    };

    Ok(())
}

/// One primary command buffer per frame slot, re-recorded every frame.
pub unsafe fn create_command_buffers(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    frames_in_flight: usize,
) -> Result<()> {
    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(context.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(frames_in_flight as u32);

    context.command_buffers = device
        .vk_device
        .allocate_command_buffers(&allocate_info)
        .creating("command buffers")?;

    Ok(())
}

/// Records the full draw for `slot` into the framebuffer of `image_index`.
pub unsafe fn record(
    device: &VulkanDevice,
    context: &VulkanContext,
    slot: usize,
    image_index: usize,
    depth_buffer: bool,
) -> Result<()> {
    let command_buffer = context.command_buffers[slot];

    let info = vk::CommandBufferBeginInfo::builder();
    device
        .vk_device
        .begin_command_buffer(command_buffer, &info)?;

    let render_area = vk::Rect2D::builder()
        .offset(vk::Offset2D::default())
        .extent(context.swapchain_extent);

    let color_clear_value = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: constants::CLEAR_COLOR,
        },
    };
    let depth_clear_value = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: constants::CLEAR_DEPTH,
            stencil: 0,
        },
    };

    let clear_values = [color_clear_value, depth_clear_value];
    let attachment_count = if depth_buffer { 2 } else { 1 };
    let info = vk::RenderPassBeginInfo::builder()
        .render_pass(context.render_pass)
        .framebuffer(context.framebuffers[image_index])
        .render_area(render_area)
        .clear_values(&clear_values[..attachment_count]);

    device
        .vk_device
        .cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);

    device.vk_device.cmd_bind_pipeline(
        command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        context.pipeline,
    );

    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(context.swapchain_extent.width as f32)
        .height(context.swapchain_extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);
    device
        .vk_device
        .cmd_set_viewport(command_buffer, 0, &[viewport]);
    device
        .vk_device
        .cmd_set_scissor(command_buffer, 0, &[render_area]);

    device.vk_device.cmd_bind_vertex_buffers(
        command_buffer,
        0,
        &[context.vertex_buffer.buffer],
        &[0],
    );
    device.vk_device.cmd_bind_index_buffer(
        command_buffer,
        context.index_buffer.buffer,
        0,
        vk::IndexType::UINT32,
    );
    device.vk_device.cmd_bind_descriptor_sets(
        command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        context.pipeline_layout,
        0,
        &[context.descriptor_sets[slot]],
        &[],
    );

    device
        .vk_device
        .cmd_draw_indexed(command_buffer, context.index_count, 1, 0, 0, 0);
    device.vk_device.cmd_end_render_pass(command_buffer);

    device.vk_device.end_command_buffer(command_buffer)?;

    Ok(())
}

pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
    if context.transfer_command_pool != context.command_pool {
        device
            .vk_device
            .destroy_command_pool(context.transfer_command_pool, None);
    }
    // Destroying the pool frees its buffers.
    device
        .vk_device
        .destroy_command_pool(context.command_pool, None);
    context.command_buffers.clear();
    context.command_pool = vk::CommandPool::null();
    context.transfer_command_pool = vk::CommandPool::null();
}
