use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::assets::TextureData;
use crate::error::{CreationContext, EngineError};

use super::constants;
use super::context::VulkanContext;
use super::device::VulkanDevice;
use super::instance::VulkanInstance;
use super::memory::{self, OneShotQueue};

/// An image, its allocation and its default view.
#[derive(Copy, Clone, Debug, Default)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl GpuImage {
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.destroy_image_view(self.view, None);
        device.vk_device.destroy_image(self.image, None);
        device.vk_device.free_memory(self.memory, None);
        *self = Self::default();
    }
}

/// Access masks and pipeline stages for one supported layout change.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The closed set of layout changes the renderer performs.
pub fn layout_transition(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<LayoutTransition, EngineError> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(LayoutTransition {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => {
            Ok(LayoutTransition {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            })
        }
        (from, to) => Err(EngineError::UnsupportedLayoutTransition { from, to }),
    }
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    format == vk::Format::D32_SFLOAT_S8_UINT || format == vk::Format::D24_UNORM_S8_UINT
}

fn aspect_for(format: vk::Format, layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if layout != vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::COLOR
    } else if has_stencil_component(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// First candidate whose optimal-tiling features include `features`.
pub fn first_supported_format(
    candidates: &[vk::Format],
    features: vk::FormatFeatureFlags,
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|format| properties(*format).optimal_tiling_features.contains(features))
}

pub unsafe fn find_depth_format(
    instance: &VulkanInstance,
    context: &VulkanContext,
) -> Result<vk::Format, EngineError> {
    first_supported_format(
        constants::DEPTH_FORMAT_CANDIDATES,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| {
            instance
                .vk_instance
                .get_physical_device_format_properties(context.physical_device, format)
        },
    )
    .ok_or(EngineError::NoSupportedDepthFormat)
}

pub unsafe fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspects: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspects)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::_2D)
        .format(format)
        .subresource_range(subresource_range);

    Ok(device
        .vk_device
        .create_image_view(&info, None)
        .creating("image view")?)
}

/// Creates a 2D device-local image with bound memory and no view yet.
pub unsafe fn create_image(
    device: &VulkanDevice,
    context: &VulkanContext,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    shared_with_transfer: bool,
) -> Result<GpuImage> {
    let families = &context.queue_families;
    let concurrent = shared_with_transfer && families.graphics != families.transfer;
    let family_indices = if concurrent {
        vec![families.graphics, families.transfer]
    } else {
        vec![]
    };

    let info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::_2D)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .samples(vk::SampleCountFlags::_1)
        .sharing_mode(if concurrent {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        })
        .queue_family_indices(&family_indices);

    let image = device
        .vk_device
        .create_image(&info, None)
        .creating("image")?;

    let requirements = device.vk_device.get_image_memory_requirements(image);
    let mut gpu_image = GpuImage {
        image,
        ..Default::default()
    };

    match memory::allocate_memory(
        device,
        context,
        requirements,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(memory) => gpu_image.memory = memory,
        Err(error) => {
            gpu_image.destroy(device);
            return Err(error);
        }
    }

    if let Err(code) = device
        .vk_device
        .bind_image_memory(image, gpu_image.memory, 0)
    {
        gpu_image.destroy(device);
        return Err(EngineError::Creation {
            what: "image memory binding",
            code,
        }
        .into());
    }

    Ok(gpu_image)
}

/// Records and submits a barrier moving `image` between two layouts.
pub unsafe fn transition_image_layout(
    device: &VulkanDevice,
    context: &VulkanContext,
    image: vk::Image,
    format: vk::Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let transition = layout_transition(old_layout, new_layout)?;

    let subresource = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspect_for(format, new_layout))
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource)
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access);

    memory::one_shot_commands(device, context, OneShotQueue::Graphics, |command_buffer| {
        device.vk_device.cmd_pipeline_barrier(
            command_buffer,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[] as &[vk::MemoryBarrier],
            &[] as &[vk::BufferMemoryBarrier],
            &[barrier],
        );
    })
}

pub unsafe fn copy_buffer_to_image(
    device: &VulkanDevice,
    context: &VulkanContext,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> Result<()> {
    let subresource = vk::ImageSubresourceLayers::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(subresource)
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    memory::one_shot_commands(device, context, OneShotQueue::Transfer, |command_buffer| {
        device.vk_device.cmd_copy_buffer_to_image(
            command_buffer,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    })
}

/// Uploads the RGBA8 texture and leaves it ready for fragment sampling.
pub unsafe fn create_texture_image(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    texture: &TextureData,
) -> Result<()> {
    let size = texture.byte_size() as vk::DeviceSize;
    let mut staging = memory::MappedBuffer::new(
        device,
        context,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    staging.bytes_mut().copy_from_slice(&texture.pixels);

    let extent = vk::Extent2D {
        width: texture.width,
        height: texture.height,
    };
    let staged = staging.buffer.buffer;
    let result = (|| -> Result<()> {
        context.texture_image = create_image(
            device,
            context,
            extent,
            constants::TEXTURE_FORMAT,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            true,
        )?;
        let image = context.texture_image.image;

        transition_image_layout(
            device,
            context,
            image,
            constants::TEXTURE_FORMAT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        copy_buffer_to_image(device, context, staged, image, texture.width, texture.height)?;
        transition_image_layout(
            device,
            context,
            image,
            constants::TEXTURE_FORMAT,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    })();

    staging.destroy(device);
    result?;

    context.texture_image.view = create_image_view(
        device,
        context.texture_image.image,
        constants::TEXTURE_FORMAT,
        vk::ImageAspectFlags::COLOR,
    )?;

    Ok(())
}

pub unsafe fn create_texture_sampler(
    device: &VulkanDevice,
    context: &mut VulkanContext,
) -> Result<()> {
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(context.max_sampler_anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    context.texture_sampler = device
        .vk_device
        .create_sampler(&info, None)
        .creating("texture sampler")?;

    Ok(())
}

/// Creates the depth attachment matching the current swapchain extent.
pub unsafe fn create_depth_objects(
    instance: &VulkanInstance,
    device: &VulkanDevice,
    context: &mut VulkanContext,
) -> Result<()> {
    let format = find_depth_format(instance, context)?;
    context.depth_format = format;

    context.depth_image = create_image(
        device,
        context,
        context.swapchain_extent,
        format,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        false,
    )?;

    context.depth_image.view = create_image_view(
        device,
        context.depth_image.image,
        format,
        vk::ImageAspectFlags::DEPTH,
    )?;

    transition_image_layout(
        device,
        context,
        context.depth_image.image,
        format,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    )
}
