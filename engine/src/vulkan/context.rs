use vulkanalia::vk;

use super::device::QueueFamilyIndices;
use super::image::GpuImage;
use super::memory::{GpuBuffer, MappedBuffer};
use super::sync::FrameSlot;

/// The Vulkan handles shared by the renderer's subsystems.
///
/// Everything starts out null or empty, which every destroy call tolerates, so
/// a partially built context can be torn down the same way as a complete one.
#[derive(Clone, Debug, Default)]
pub struct VulkanContext {
    pub messenger: vk::DebugUtilsMessengerEXT,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub max_sampler_anisotropy: f32,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,

    // Swapchain
    pub swapchain_format: vk::Format,
    pub swapchain_extent: vk::Extent2D,
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,
    pub depth_format: vk::Format,
    pub depth_image: GpuImage,
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,

    // Pipeline
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,

    // Commands
    pub command_pool: vk::CommandPool,
    pub transfer_command_pool: vk::CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,

    // Resources
    pub vertex_buffer: GpuBuffer,
    pub index_buffer: GpuBuffer,
    pub index_count: u32,
    pub uniform_buffers: Vec<MappedBuffer>,
    pub texture_image: GpuImage,
    pub texture_sampler: vk::Sampler,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_sets: Vec<vk::DescriptorSet>,

    // Sync
    pub frames: Vec<FrameSlot>,
}
