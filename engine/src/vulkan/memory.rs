use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::Handle;

use crate::error::{CreationContext, EngineError};

use super::context::VulkanContext;
use super::device::VulkanDevice;

/// A buffer and the allocation bound to it.
#[derive(Copy, Clone, Debug, Default)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.destroy_buffer(self.buffer, None);
        device.vk_device.free_memory(self.memory, None);
        *self = Self::default();
    }
}

/// A host-visible buffer that stays mapped for its whole lifetime.
#[derive(Clone, Debug)]
pub struct MappedBuffer {
    pub buffer: GpuBuffer,
    ptr: *mut u8,
}

impl MappedBuffer {
    pub unsafe fn new(
        device: &VulkanDevice,
        context: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let mut buffer = create_buffer(
            device,
            context,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        match device
            .vk_device
            .map_memory(buffer.memory, 0, size, vk::MemoryMapFlags::empty())
        {
            Ok(ptr) => Ok(Self {
                buffer,
                ptr: ptr.cast(),
            }),
            Err(code) => {
                buffer.destroy(device);
                Err(EngineError::Creation {
                    what: "memory mapping",
                    code,
                }
                .into())
            }
        }
    }

    /// The mapped bytes. Callers must not write while the GPU reads them.
    pub unsafe fn bytes_mut(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.buffer.size as usize)
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.unmap_memory(self.buffer.memory);
        self.buffer.destroy(device);
    }
}

/// Picks the first memory type allowed by `type_bits` whose properties
/// include all of `properties`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, EngineError> {
    (0..memory.memory_type_count)
        .find(|i| {
            let suitable = (type_bits & (1 << i)) != 0;
            let memory_type = memory.memory_types[*i as usize];
            suitable && memory_type.property_flags.contains(properties)
        })
        .ok_or(EngineError::NoSuitableMemoryType(properties))
}

/// Buffers touched by both the graphics and transfer queues are shared
/// concurrently when those are different families.
fn buffer_sharing(context: &VulkanContext) -> (vk::SharingMode, Vec<u32>) {
    let families = &context.queue_families;
    if families.graphics != families.transfer {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.transfer],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, vec![])
    }
}

pub unsafe fn allocate_memory(
    device: &VulkanDevice,
    context: &VulkanContext,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &context.memory_properties,
        requirements.memory_type_bits,
        properties,
    )?;

    let info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    Ok(device
        .vk_device
        .allocate_memory(&info, None)
        .creating("device memory")?)
}

pub unsafe fn create_buffer(
    device: &VulkanDevice,
    context: &VulkanContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer> {
    let (sharing_mode, families) = buffer_sharing(context);
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(sharing_mode)
        .queue_family_indices(&families);

    let buffer = device
        .vk_device
        .create_buffer(&buffer_info, None)
        .creating("buffer")?;

    let requirements = device.vk_device.get_buffer_memory_requirements(buffer);
    let memory = match allocate_memory(device, context, requirements, properties) {
        Ok(memory) => memory,
        Err(error) => {
            device.vk_device.destroy_buffer(buffer, None);
            return Err(error);
        }
    };

    let mut gpu_buffer = GpuBuffer {
        buffer,
        memory,
        size,
    };
    if let Err(code) = device.vk_device.bind_buffer_memory(buffer, memory, 0) {
        gpu_buffer.destroy(device);
        return Err(EngineError::Creation {
            what: "buffer memory binding",
            code,
        }
        .into());
    }

    Ok(gpu_buffer)
}

/// Which queue a one-shot command buffer is submitted to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OneShotQueue {
    Graphics,
    Transfer,
}

/// Records commands into a temporary buffer, submits them and waits for the
/// queue to drain before returning.
pub unsafe fn one_shot_commands(
    device: &VulkanDevice,
    context: &VulkanContext,
    queue: OneShotQueue,
    record: impl FnOnce(vk::CommandBuffer),
) -> Result<()> {
    let (pool, queue) = match queue {
        OneShotQueue::Graphics => (context.command_pool, context.graphics_queue),
        OneShotQueue::Transfer => (context.transfer_command_pool, context.transfer_queue),
    };

    let info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(pool)
        .command_buffer_count(1);

    let command_buffer = device.vk_device.allocate_command_buffers(&info)?[0];

    let result = (|| -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.vk_device.begin_command_buffer(command_buffer, &info)?;

        record(command_buffer);

        device.vk_device.end_command_buffer(command_buffer)?;

        let command_buffers = &[command_buffer];
        let info = vk::SubmitInfo::builder().command_buffers(command_buffers);
        device
            .vk_device
            .queue_submit(queue, &[info], vk::Fence::null())?;
        device.vk_device.queue_wait_idle(queue)?;
        Ok(())
    })();

    device
        .vk_device
        .free_command_buffers(pool, &[command_buffer]);

    result
}

/// The device steps a staged upload is made of.
pub trait StagingDevice {
    /// A host-visible buffer that lives for one upload.
    type Staging;
    /// The device-local buffer being filled.
    type Target: Copy;

    fn create_staging(&mut self, size: vk::DeviceSize) -> Result<Self::Staging>;
    fn mapped<'s>(&mut self, staging: &'s mut Self::Staging) -> &'s mut [u8];
    /// Copies `size` bytes and returns once the copy has completed.
    fn copy(
        &mut self,
        staging: &Self::Staging,
        destination: Self::Target,
        size: vk::DeviceSize,
    ) -> Result<()>;
    fn destroy_staging(&mut self, staging: Self::Staging);
}

/// Writes through a staging buffer, copies it into `destination` and
/// releases the staging buffer whether or not the copy succeeded.
pub fn stage_upload<D: StagingDevice>(
    device: &mut D,
    destination: D::Target,
    size: vk::DeviceSize,
    writer: impl FnOnce(&mut [u8]),
) -> Result<()> {
    let mut staging = device.create_staging(size)?;
    writer(device.mapped(&mut staging));
    let result = device.copy(&staging, destination, size);
    device.destroy_staging(staging);
    result
}

/// Staged uploads submitted to the transfer queue.
pub struct TransferQueue<'a> {
    device: &'a VulkanDevice,
    context: &'a VulkanContext,
}

impl<'a> TransferQueue<'a> {
    /// `context` must hold a live transfer queue and command pool.
    pub unsafe fn new(device: &'a VulkanDevice, context: &'a VulkanContext) -> Self {
        Self { device, context }
    }
}

impl StagingDevice for TransferQueue<'_> {
    type Staging = MappedBuffer;
    type Target = vk::Buffer;

    fn create_staging(&mut self, size: vk::DeviceSize) -> Result<MappedBuffer> {
        unsafe {
            MappedBuffer::new(
                self.device,
                self.context,
                size,
                vk::BufferUsageFlags::TRANSFER_SRC,
            )
        }
    }

    fn mapped<'s>(&mut self, staging: &'s mut MappedBuffer) -> &'s mut [u8] {
        unsafe { staging.bytes_mut() }
    }

    fn copy(
        &mut self,
        staging: &MappedBuffer,
        destination: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<()> {
        let device = self.device;
        unsafe {
            one_shot_commands(device, self.context, OneShotQueue::Transfer, |command_buffer| {
                let region = vk::BufferCopy::builder().size(size);
                device.vk_device.cmd_copy_buffer(
                    command_buffer,
                    staging.buffer.buffer,
                    destination,
                    &[region],
                );
            })
        }
    }

    fn destroy_staging(&mut self, mut staging: MappedBuffer) {
        unsafe { staging.destroy(self.device) }
    }
}

/// Fills a device-local buffer through a temporary host-visible one.
///
/// `writer` receives exactly `size` mapped bytes. The copy has completed on
/// the transfer queue by the time this returns.
pub unsafe fn upload_via_staging(
    device: &VulkanDevice,
    context: &VulkanContext,
    destination: vk::Buffer,
    size: vk::DeviceSize,
    writer: impl FnOnce(&mut [u8]),
) -> Result<()> {
    stage_upload(&mut TransferQueue::new(device, context), destination, size, writer)
}

/// Creates a device-local buffer and fills it via a staging buffer.
pub unsafe fn create_device_local_buffer(
    device: &VulkanDevice,
    context: &VulkanContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    writer: impl FnOnce(&mut [u8]),
) -> Result<GpuBuffer> {
    let mut buffer = create_buffer(
        device,
        context,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    if let Err(error) = upload_via_staging(device, context, buffer.buffer, size, writer) {
        buffer.destroy(device);
        return Err(error);
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::assets::{self, Vertex};

    /// Host memory standing in for device buffers.
    #[derive(Default)]
    struct HostMemory {
        buffers: Vec<Vec<u8>>,
        live_staging: usize,
        fail_copy: bool,
    }

    impl HostMemory {
        fn with_buffer(size: usize) -> Self {
            Self {
                buffers: vec![vec![0xAA; size]],
                ..Default::default()
            }
        }
    }

    impl StagingDevice for HostMemory {
        type Staging = Vec<u8>;
        type Target = usize;

        fn create_staging(&mut self, size: vk::DeviceSize) -> Result<Vec<u8>> {
            self.live_staging += 1;
            Ok(vec![0; size as usize])
        }

        fn mapped<'s>(&mut self, staging: &'s mut Vec<u8>) -> &'s mut [u8] {
            staging.as_mut_slice()
        }

        fn copy(&mut self, staging: &Vec<u8>, destination: usize, size: vk::DeviceSize) -> Result<()> {
            if self.fail_copy {
                return Err(anyhow!(vk::ErrorCode::DEVICE_LOST));
            }
            let size = size as usize;
            self.buffers[destination][..size].copy_from_slice(&staging[..size]);
            Ok(())
        }

        fn destroy_staging(&mut self, _: Vec<u8>) {
            self.live_staging -= 1;
        }
    }

    fn triangle() -> Vec<Vertex> {
        vec![
            Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0], [0.5, 0.0]),
            Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
        ]
    }

    #[test]
    fn staged_upload_reads_back_what_was_written() {
        let vertices = triangle();
        let size = std::mem::size_of_val(vertices.as_slice());
        let mut memory = HostMemory::with_buffer(size);

        stage_upload(&mut memory, 0, size as vk::DeviceSize, |mapped| {
            assets::write_pod(mapped, &vertices)
        })
        .unwrap();

        let stride = std::mem::size_of::<Vertex>();
        let read_back = memory.buffers[0]
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned::<Vertex>)
            .collect::<Vec<_>>();
        assert_eq!(read_back, vertices);
        assert_eq!(memory.live_staging, 0);
    }

    #[test]
    fn failed_copy_still_releases_staging() {
        let mut memory = HostMemory::with_buffer(16);
        memory.fail_copy = true;

        let result = stage_upload(&mut memory, 0, 16, |mapped| mapped.fill(1));

        assert!(result.is_err());
        assert_eq!(memory.live_staging, 0);
        assert!(memory.buffers[0].iter().all(|b| *b == 0xAA));
    }

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            properties.memory_types[i].property_flags = *flags;
        }
        properties
    }

    #[test]
    fn picks_first_type_with_all_properties() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&properties, 0b1111, wanted).unwrap(), 2);
        assert_eq!(
            find_memory_type(&properties, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn respects_allowed_type_bits() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        assert_eq!(
            find_memory_type(&properties, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
    }

    #[test]
    fn missing_memory_type_is_an_error() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let error =
            find_memory_type(&properties, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(
            error,
            EngineError::NoSuitableMemoryType(flags) if flags == vk::MemoryPropertyFlags::HOST_VISIBLE
        ));

        // Only a type excluded by the mask would have matched.
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert!(find_memory_type(&properties, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }
}
