use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::assets::UniformBufferObject;
use crate::error::CreationContext;

use super::context::VulkanContext;
use super::device::VulkanDevice;
use super::memory::MappedBuffer;
use super::pipeline::{SAMPLER_BINDING, UNIFORM_BINDING};

/// One persistently mapped uniform buffer per frame slot.
pub unsafe fn create_uniform_buffers(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    frames_in_flight: usize,
) -> Result<()> {
    for _ in 0..frames_in_flight {
        let buffer = MappedBuffer::new(
            device,
            context,
            UniformBufferObject::SIZE as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        context.uniform_buffers.push(buffer);
    }
    Ok(())
}

pub unsafe fn create_descriptor_pool(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    frames_in_flight: usize,
    texture_sampling: bool,
) -> Result<()> {
    let mut pool_sizes = vec![vk::DescriptorPoolSize::builder()
        .type_(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(frames_in_flight as u32)];
    if texture_sampling {
        pool_sizes.push(
            vk::DescriptorPoolSize::builder()
                .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(frames_in_flight as u32),
        );
    }

    let info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(frames_in_flight as u32);

    context.descriptor_pool = device
        .vk_device
        .create_descriptor_pool(&info, None)
        .creating("descriptor pool")?;

    Ok(())
}

/// Allocates one set per slot and points it at that slot's uniform buffer
/// and, when sampling, the shared texture.
pub unsafe fn create_descriptor_sets(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    texture_sampling: bool,
) -> Result<()> {
    let layouts = vec![context.descriptor_set_layout; context.uniform_buffers.len()];
    let info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(context.descriptor_pool)
        .set_layouts(&layouts);

    context.descriptor_sets = device
        .vk_device
        .allocate_descriptor_sets(&info)
        .creating("descriptor sets")?;

    for (set, uniform_buffer) in context.descriptor_sets.iter().zip(&context.uniform_buffers) {
        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(uniform_buffer.buffer.buffer)
            .offset(0)
            .range(UniformBufferObject::SIZE as vk::DeviceSize);

        let buffer_infos = &[buffer_info];
        let ubo_write = vk::WriteDescriptorSet::builder()
            .dst_set(*set)
            .dst_binding(UNIFORM_BINDING)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(buffer_infos);

        let image_info = vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(context.texture_image.view)
            .sampler(context.texture_sampler);

        let image_infos = &[image_info];
        let sampler_write = vk::WriteDescriptorSet::builder()
            .dst_set(*set)
            .dst_binding(SAMPLER_BINDING)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(image_infos);

        if texture_sampling {
            device.vk_device.update_descriptor_sets(
                &[ubo_write, sampler_write],
                &[] as &[vk::CopyDescriptorSet],
            );
        } else {
            device
                .vk_device
                .update_descriptor_sets(&[ubo_write], &[] as &[vk::CopyDescriptorSet]);
        }
    }

    Ok(())
}

/// Copies this frame's transforms into the slot's mapped uniform buffer.
pub unsafe fn write_uniforms(
    context: &mut VulkanContext,
    slot: usize,
    ubo: &UniformBufferObject,
) {
    let mapped = context.uniform_buffers[slot].bytes_mut();
    crate::assets::write_pod(mapped, std::slice::from_ref(ubo));
}

pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
    // Sets are freed with their pool.
    device
        .vk_device
        .destroy_descriptor_pool(context.descriptor_pool, None);
    context.descriptor_sets.clear();
    context
        .uniform_buffers
        .drain(..)
        .for_each(|mut b| b.destroy(device));
}
