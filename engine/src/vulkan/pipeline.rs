use std::mem::{offset_of, size_of};

use anyhow::{anyhow, Result};
use vulkanalia::bytecode::Bytecode;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::Handle;

use crate::assets::{ShaderSet, Vertex};
use crate::error::CreationContext;

use super::{context::VulkanContext, device::VulkanDevice};

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

pub fn vertex_binding_description() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)
        .build()
}

/// Position, color and texture coordinate at locations 0, 1 and 2.
pub fn vertex_attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
    let attribute = |location: u32, format: vk::Format, offset: usize| {
        vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(location)
            .format(format)
            .offset(offset as u32)
            .build()
    };

    [
        attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
        attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, tex_coord)),
    ]
}

/// Descriptor bindings for one frame slot. The sampler binding only exists
/// when texture sampling is enabled.
pub fn descriptor_bindings(texture_sampling: bool) -> Vec<vk::DescriptorSetLayoutBinding> {
    let mut bindings = vec![vk::DescriptorSetLayoutBinding::builder()
        .binding(UNIFORM_BINDING)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .build()];

    if texture_sampling {
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        );
    }

    bindings
}

/// Creates the descriptor set layout and the pipeline layout built on it.
/// Neither depends on the swapchain.
pub unsafe fn create_layouts(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    texture_sampling: bool,
) -> Result<()> {
    let bindings = descriptor_bindings(texture_sampling);
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    context.descriptor_set_layout = device
        .vk_device
        .create_descriptor_set_layout(&info, None)
        .creating("descriptor set layout")?;

    let set_layouts = &[context.descriptor_set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);

    context.pipeline_layout = device
        .vk_device
        .create_pipeline_layout(&layout_info, None)
        .creating("pipeline layout")?;

    Ok(())
}

pub unsafe fn create(
    device: &VulkanDevice,
    context: &mut VulkanContext,
    shaders: &ShaderSet,
    depth_buffer: bool,
) -> Result<()> {
    let vertex_shader_module = create_shader_module(device, &shaders.vertex)?;
    let fragment_shader_module = match create_shader_module(device, &shaders.fragment) {
        Ok(module) => module,
        Err(error) => {
            device
                .vk_device
                .destroy_shader_module(vertex_shader_module, None);
            return Err(error);
        }
    };

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vertex_shader_module)
        .name(b"main\0");

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(fragment_shader_module)
        .name(b"main\0");

    let binding_descriptions = &[vertex_binding_description()];
    let attribute_descriptions = vertex_attribute_descriptions();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are set per frame.
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(dynamic_states);

    // rasterizer
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    // multisampling
    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::_1);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(depth_buffer)
        .depth_write_enable(depth_buffer)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // color blending
    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::all())
        .blend_enable(false);

    let attachments = &[attachment];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(attachments)
        .blend_constants([0.0, 0.0, 0.0, 0.0]);

    let stages = &[vert_stage, frag_stage];
    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(context.pipeline_layout)
        .render_pass(context.render_pass)
        .subpass(0);

    let pipelines = device
        .vk_device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None);

    // destroy shader modules
    device
        .vk_device
        .destroy_shader_module(vertex_shader_module, None);
    device
        .vk_device
        .destroy_shader_module(fragment_shader_module, None);

    context.pipeline = pipelines.creating("graphics pipeline")?.0[0];

    Ok(())
}

unsafe fn create_shader_module(device: &VulkanDevice, bytecode: &[u8]) -> Result<vk::ShaderModule> {
    let bytecode = Bytecode::new(bytecode).map_err(|e| anyhow!("Invalid shader bytecode: {}", e))?;
    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(bytecode.code_size())
        .code(bytecode.code());

    Ok(device
        .vk_device
        .create_shader_module(&info, None)
        .creating("shader module")?)
}

/// Destroys the swapchain-dependent pipeline, keeping the layouts.
pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
    device.vk_device.destroy_pipeline(context.pipeline, None);
    context.pipeline = vk::Pipeline::null();
}

pub unsafe fn destroy_layouts(device: &VulkanDevice, context: &mut VulkanContext) {
    device
        .vk_device
        .destroy_pipeline_layout(context.pipeline_layout, None);
    device
        .vk_device
        .destroy_descriptor_set_layout(context.descriptor_set_layout, None);
}
