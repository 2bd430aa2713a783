use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::loader::{LibloadingLoader, LIBRARY};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSwapchainExtension;

use crate::assets::{self, SceneAssets, ShaderSet, UniformBufferObject, Vertex};
use crate::config::EngineConfig;
use crate::frame::{Acquire, FrameBackend, Present};
use crate::hooks::Hooks;
use crate::renderer::SceneBackend;
use crate::window::{Extent, FramebufferSource, Window};

use context::VulkanContext;
use device::VulkanDevice;
use instance::VulkanInstance;

mod command_buffer;
mod constants;
mod context;
mod descriptor;
mod device;
mod framebuffer;
mod image;
mod instance;
mod memory;
mod pipeline;
mod render_pass;
pub(crate) mod swapchain;
mod sync;

pub use device::DeviceCandidate;

#[derive(Debug)]
pub struct VulkanRenderer {
    // Keeps the loaded Vulkan library alive.
    _entry: Entry,
    pub instance: VulkanInstance,
    pub device: VulkanDevice,
    context: VulkanContext,
    config: EngineConfig,
    shaders: ShaderSet,
}

impl VulkanRenderer {
    /// Builds every GPU object needed to draw `assets`. On failure whatever
    /// was created is destroyed before the error is returned.
    pub unsafe fn new(
        window: &Window,
        config: &EngineConfig,
        hooks: &mut Hooks,
        assets: &SceneAssets,
    ) -> Result<VulkanRenderer> {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;

        let mut context = VulkanContext::default();
        let mut instance = VulkanInstance::new(
            window.handle(),
            &entry,
            config,
            hooks.log_sink(),
            &mut context,
        )?;

        let device = match VulkanDevice::new(&entry, &instance, &mut context, hooks) {
            Ok(device) => device,
            Err(error) => {
                instance.destroy(&mut context);
                return Err(error);
            }
        };

        let mut renderer = VulkanRenderer {
            _entry: entry,
            instance,
            device,
            context,
            config: config.clone(),
            shaders: assets.shaders.clone(),
        };

        if let Err(error) = renderer.create_resources(window.framebuffer_extent(), assets) {
            error!("Renderer initialization failed; tearing down partial state.");
            renderer.destroy();
            return Err(error);
        }

        Ok(renderer)
    }

    unsafe fn create_resources(&mut self, framebuffer: Extent, assets: &SceneAssets) -> Result<()> {
        let frames_in_flight = self.config.frames_in_flight;
        let device = &self.device;
        let context = &mut self.context;

        command_buffer::create_command_pools(device, context)?;

        self.create_swapchain_objects(framebuffer)?;

        let device = &self.device;
        let context = &mut self.context;
        pipeline::create_layouts(device, context, self.config.texture_sampling)?;
        pipeline::create(device, context, &self.shaders, self.config.depth_buffer)?;

        if self.config.texture_sampling {
            if let Some(texture) = &assets.texture {
                image::create_texture_image(device, context, texture)?;
                image::create_texture_sampler(device, context)?;
            }
        }

        Self::upload_geometry(device, context, &assets.vertices, &assets.indices)?;

        descriptor::create_uniform_buffers(device, context, frames_in_flight)?;
        descriptor::create_descriptor_pool(
            device,
            context,
            frames_in_flight,
            self.config.texture_sampling,
        )?;
        descriptor::create_descriptor_sets(device, context, self.config.texture_sampling)?;
        command_buffer::create_command_buffers(device, context, frames_in_flight)?;
        sync::create_sync_objects(device, context, frames_in_flight)?;

        info!(
            "Renderer ready ({} frames in flight, depth {}, texture {}).",
            frames_in_flight, self.config.depth_buffer, self.config.texture_sampling
        );
        Ok(())
    }

    /// Swapchain, views, depth image, render pass and framebuffers.
    unsafe fn create_swapchain_objects(&mut self, framebuffer: Extent) -> Result<()> {
        let device = &self.device;
        let context = &mut self.context;

        swapchain::create(
            &self.instance,
            device,
            context,
            framebuffer,
            self.config.present_mode,
        )?;
        if self.config.depth_buffer {
            image::create_depth_objects(&self.instance, device, context)?;
        }
        render_pass::create(device, context, self.config.depth_buffer)?;
        framebuffer::create(device, context, self.config.depth_buffer)?;
        Ok(())
    }

    unsafe fn upload_geometry(
        device: &VulkanDevice,
        context: &mut VulkanContext,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<()> {
        let vertex_size = std::mem::size_of_val(vertices) as vk::DeviceSize;
        context.vertex_buffer = memory::create_device_local_buffer(
            device,
            context,
            vertex_size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            |mapped| assets::write_pod(mapped, vertices),
        )?;

        let index_size = std::mem::size_of_val(indices) as vk::DeviceSize;
        context.index_buffer = memory::create_device_local_buffer(
            device,
            context,
            index_size,
            vk::BufferUsageFlags::INDEX_BUFFER,
            |mapped| assets::write_pod(mapped, indices),
        )?;
        context.index_count = indices.len() as u32;

        debug!(
            "Uploaded {} vertices and {} indices.",
            vertices.len(),
            indices.len()
        );
        Ok(())
    }

    unsafe fn device_wait_idle(&self) -> Result<()> {
        self.device.vk_device.device_wait_idle()?;
        Ok(())
    }

    unsafe fn destroy_swapchain_objects(&mut self) {
        let device = &self.device;
        let context = &mut self.context;

        pipeline::destroy(device, context);
        framebuffer::destroy(device, context);
        render_pass::destroy(device, context);
        context.depth_image.destroy(device);
        swapchain::destroy(device, context);
    }

    /// Destroys everything in reverse creation order. Null handles left by a
    /// partial initialization are skipped by the driver.
    unsafe fn destroy(&mut self) {
        self.destroy_swapchain_objects();

        let device = &self.device;
        let context = &mut self.context;

        sync::destroy(device, context);
        descriptor::destroy(device, context);
        context.index_buffer.destroy(device);
        context.vertex_buffer.destroy(device);
        device
            .vk_device
            .destroy_sampler(context.texture_sampler, None);
        context.texture_image.destroy(device);
        pipeline::destroy_layouts(device, context);
        command_buffer::destroy(device, context);

        self.device.destroy();
        self.instance.destroy(&mut self.context);
        info!("Renderer destroyed.");
    }
}

impl FrameBackend for VulkanRenderer {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.context.frames[slot].in_flight;
        unsafe {
            self.device
                .vk_device
                .wait_for_fences(&[fence], true, u64::MAX)?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
        let result = unsafe {
            self.device.vk_device.acquire_next_image_khr(
                self.context.swapchain,
                u64::MAX,
                self.context.frames[slot].image_available,
                vk::Fence::default(),
            )
        };

        match result {
            Ok((image_index, _)) => Ok(Acquire::Ready(image_index)),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(code) => Err(anyhow!("Failed to acquire swapchain image: {}", code)),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .vk_device
                .reset_fences(&[self.context.frames[slot].in_flight])?;
            self.device.vk_device.reset_command_buffer(
                self.context.command_buffers[slot],
                vk::CommandBufferResetFlags::empty(),
            )?;
        }
        Ok(())
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        unsafe {
            command_buffer::record(
                &self.device,
                &self.context,
                slot,
                image_index as usize,
                self.config.depth_buffer,
            )
        }
    }

    fn write_uniforms(&mut self, slot: usize, ubo: &UniformBufferObject) -> Result<()> {
        unsafe { descriptor::write_uniforms(&mut self.context, slot, ubo) };
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.context.frames[slot];

        let wait_semaphores = &[frame.image_available];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[self.context.command_buffers[slot]];
        let signal_semaphores = &[frame.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.device.vk_device.queue_submit(
                self.context.graphics_queue,
                &[submit_info],
                frame.in_flight,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<Present> {
        let wait_semaphores = &[self.context.frames[slot].render_finished];
        let swapchains = &[self.context.swapchain];
        let image_indices = &[image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = unsafe {
            self.device
                .vk_device
                .queue_present_khr(self.context.present_queue, &present_info)
        };

        match result {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) => Ok(Present::Suboptimal),
            Ok(_) => Ok(Present::Optimal),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(code) => Err(anyhow!("Failed to present swapchain image: {}", code)),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device_wait_idle() }
    }

    fn destroy_swapchain(&mut self) {
        unsafe { self.destroy_swapchain_objects() }
    }

    fn create_swapchain(&mut self, framebuffer: Extent) -> Result<()> {
        unsafe {
            self.create_swapchain_objects(framebuffer)?;
            pipeline::create(
                &self.device,
                &mut self.context,
                &self.shaders,
                self.config.depth_buffer,
            )
        }
    }
}

impl SceneBackend for VulkanRenderer {
    fn extent(&self) -> Extent {
        Extent::new(
            self.context.swapchain_extent.width,
            self.context.swapchain_extent.height,
        )
    }

    /// Buffers are reallocated only when the byte size changes.
    fn replace_geometry(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<()> {
        assets::validate_geometry(vertices, indices)?;
        unsafe { self.device_wait_idle()? };

        let device = &self.device;
        let context = &mut self.context;

        let vertex_size = std::mem::size_of_val(vertices) as vk::DeviceSize;
        let index_size = std::mem::size_of_val(indices) as vk::DeviceSize;
        unsafe {
            if vertex_size != context.vertex_buffer.size || index_size != context.index_buffer.size {
                context.vertex_buffer.destroy(device);
                context.index_buffer.destroy(device);
                return Self::upload_geometry(device, context, vertices, indices);
            }

            memory::upload_via_staging(device, context, context.vertex_buffer.buffer, vertex_size, |mapped| {
                assets::write_pod(mapped, vertices)
            })?;
            memory::upload_via_staging(device, context, context.index_buffer.buffer, index_size, |mapped| {
                assets::write_pod(mapped, indices)
            })?;
        }
        context.index_count = indices.len() as u32;
        Ok(())
    }

    fn shutdown(&mut self) {
        unsafe {
            if let Err(error) = self.device_wait_idle() {
                warn!("Failed to wait for the device before shutdown: {}", error);
            }
            self.destroy();
        }
    }
}
