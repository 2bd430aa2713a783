//! In-memory stand-ins for the GPU and the platform window.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use vulkanalia::vk;

use crate::assets::{UniformBufferObject, Vertex};
use crate::frame::{Acquire, FrameBackend, Present};
use crate::renderer::SceneBackend;
use crate::vulkan::swapchain::{choose_extent, choose_image_count, choose_surface_format};
use crate::window::{CursorMode, Extent, FramebufferSource, HostWindow};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Wait(usize),
    Acquire(usize),
    Reset(usize),
    Record(usize, u32),
    Uniforms(usize),
    Submit(usize),
    Present(usize, u32),
    WaitIdle,
    Destroy,
    Create(Extent),
    Geometry(usize, usize),
    Shutdown,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Shape {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

/// A device whose queue completes submissions only when the CPU waits.
///
/// The call log is shared so it can still be read after the engine has
/// consumed the device.
#[derive(Debug)]
pub struct MockGpu {
    pub fences: Vec<bool>,
    pub pending: VecDeque<usize>,
    pub max_in_flight: usize,
    pub acquire_script: VecDeque<Acquire>,
    pub present_script: VecDeque<Present>,
    pub image_count: u32,
    pub next_image: u32,
    pub shapes: Vec<Shape>,
    pub extent: Extent,
    pub fail_submit: bool,
    pub fail_present: bool,
    log: Rc<RefCell<Vec<Call>>>,
}

impl MockGpu {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            fences: vec![true; frames_in_flight],
            pending: VecDeque::new(),
            max_in_flight: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            image_count: 3,
            next_image: 0,
            shapes: Vec::new(),
            extent: Extent::new(800, 600),
            fail_submit: false,
            fail_present: false,
            log: Rc::default(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    pub fn call_log(&self) -> Rc<RefCell<Vec<Call>>> {
        Rc::clone(&self.log)
    }

    pub fn clear_calls(&mut self) {
        self.log.borrow_mut().clear();
    }

    pub fn in_flight(&self) -> usize {
        self.fences.iter().filter(|signaled| !**signaled).count()
    }

    fn push(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }
}

impl FrameBackend for MockGpu {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.push(Call::Wait(slot));
        while !self.fences[slot] {
            let done = self
                .pending
                .pop_front()
                .ok_or_else(|| anyhow!("fence {} never signals", slot))?;
            self.fences[done] = true;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
        self.push(Call::Acquire(slot));
        Ok(self.acquire_script.pop_front().unwrap_or_else(|| {
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Acquire::Ready(index)
        }))
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.push(Call::Reset(slot));
        assert!(self.fences[slot], "reset an unsignaled fence");
        self.fences[slot] = false;
        Ok(())
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        assert!(
            !self.pending.contains(&slot),
            "recorded slot {} while the GPU still owns it",
            slot
        );
        self.push(Call::Record(slot, image_index));
        Ok(())
    }

    fn write_uniforms(&mut self, slot: usize, _: &UniformBufferObject) -> Result<()> {
        assert!(!self.pending.contains(&slot));
        self.push(Call::Uniforms(slot));
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        if self.fail_submit {
            return Err(anyhow!(vk::ErrorCode::DEVICE_LOST));
        }
        self.push(Call::Submit(slot));
        self.pending.push_back(slot);
        self.max_in_flight = self.max_in_flight.max(self.in_flight());
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<Present> {
        self.push(Call::Present(slot, image_index));
        if self.fail_present {
            return Err(anyhow!(vk::ErrorCode::SURFACE_LOST_KHR));
        }
        Ok(self.present_script.pop_front().unwrap_or(Present::Optimal))
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.push(Call::WaitIdle);
        while let Some(done) = self.pending.pop_front() {
            self.fences[done] = true;
        }
        Ok(())
    }

    fn destroy_swapchain(&mut self) {
        assert!(self.pending.is_empty(), "destroyed swapchain while in use");
        self.push(Call::Destroy);
    }

    fn create_swapchain(&mut self, framebuffer: Extent) -> Result<()> {
        self.push(Call::Create(framebuffer));

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let shape = Shape {
            format: choose_surface_format(&formats).format,
            extent: choose_extent(&capabilities, framebuffer),
            image_count: choose_image_count(&capabilities),
        };
        self.image_count = shape.image_count;
        self.next_image = 0;
        self.extent = Extent::new(shape.extent.width, shape.extent.height);
        self.shapes.push(shape);
        Ok(())
    }
}

impl SceneBackend for MockGpu {
    fn extent(&self) -> Extent {
        self.extent
    }

    fn replace_geometry(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<()> {
        self.wait_idle()?;
        self.push(Call::Geometry(vertices.len(), indices.len()));
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.wait_idle().is_err() {
            return;
        }
        self.push(Call::Shutdown);
    }
}

/// A window that closes itself after a fixed number of event pumps.
#[derive(Debug)]
pub struct MockWindow {
    pub extent: Extent,
    pub restores: VecDeque<Extent>,
    pub waits: usize,
    pub close_after_waits: Option<usize>,
    pub polls: usize,
    pub close_after_polls: Option<usize>,
    pub resize: Option<(Extent, Extent)>,
}

impl MockWindow {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            restores: VecDeque::new(),
            waits: 0,
            close_after_waits: None,
            polls: 0,
            close_after_polls: None,
            resize: None,
        }
    }
}

impl FramebufferSource for MockWindow {
    fn framebuffer_extent(&self) -> Extent {
        self.extent
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        if let Some(extent) = self.restores.pop_front() {
            self.extent = extent;
        }
    }

    fn close_requested(&self) -> bool {
        self.close_after_waits.is_some_and(|n| self.waits >= n)
            || self.close_after_polls.is_some_and(|n| self.polls >= n)
    }
}

impl HostWindow for MockWindow {
    fn poll_events(&mut self) {
        self.polls += 1;
    }

    fn take_resize(&mut self) -> Option<(Extent, Extent)> {
        let resize = self.resize.take()?;
        self.extent = resize.1;
        Some(resize)
    }

    fn set_cursor(&self, _: CursorMode) {}
}
