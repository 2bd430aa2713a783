use anyhow::Result;

use crate::assets::{UniformBufferObject, Vertex};
use crate::frame::{FrameBackend, FrameOutcome, FrameScheduler};
use crate::window::{Extent, FramebufferSource};

/// What the run loop needs from a backend beyond the per-frame steps.
pub trait SceneBackend: FrameBackend {
    /// Extent of the live swapchain.
    fn extent(&self) -> Extent;

    /// Swaps in new geometry once the device is idle.
    fn replace_geometry(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<()>;

    /// Waits for the device, then destroys every GPU object.
    fn shutdown(&mut self);
}

/// A backend paired with the frame ring that drives it.
#[derive(Debug)]
pub struct Renderer<B> {
    backend: B,
    scheduler: FrameScheduler,
}

impl<B: SceneBackend> Renderer<B> {
    pub fn new(backend: B, frames_in_flight: usize) -> Self {
        Self {
            backend,
            scheduler: FrameScheduler::new(frames_in_flight),
        }
    }

    /// Renders one frame. `compose` fills the uniforms for the slot in use.
    pub fn draw_frame<W: FramebufferSource>(
        &mut self,
        window: &mut W,
        compose: impl FnOnce(usize) -> UniformBufferObject,
    ) -> Result<FrameOutcome> {
        self.scheduler.draw_frame(&mut self.backend, window, compose)
    }

    pub fn notify_resized(&mut self) {
        self.scheduler.notify_resized();
    }

    pub fn replace_geometry(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<()> {
        self.backend.replace_geometry(vertices, indices)
    }

    pub fn extent(&self) -> Extent {
        self.backend.extent()
    }

    pub fn shutdown(&mut self) {
        self.backend.shutdown();
    }
}
