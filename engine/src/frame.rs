//! The frames-in-flight ring.
//!
//! [`FrameScheduler`] owns the ordering of one frame: wait on the slot's
//! fence, acquire, record, write uniforms, submit, present, advance. The GPU
//! side of each step sits behind [`FrameBackend`] so the protocol can be driven
//! by a fake device in tests.

use anyhow::Result;
use log::*;

use crate::assets::UniformBufferObject;
use crate::window::{Extent, FramebufferSource};

/// Result of acquiring a presentable image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Acquire {
    Ready(u32),
    OutOfDate,
}

/// Result of handing an image back to the display.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Present {
    Optimal,
    Suboptimal,
    OutOfDate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the display and the swapchain is still current.
    Presented,
    /// The frame reached the display, then the swapchain was rebuilt.
    Recreated,
    /// Acquisition failed; nothing was submitted this frame.
    Skipped,
    /// The window closed while a rebuild waited for it to be restored.
    Closed,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// GPU operations the scheduler sequences. Fatal driver results are `Err`;
/// transient swapchain conditions come back as [`Acquire`] or [`Present`].
pub trait FrameBackend {
    /// Blocks until the slot's previous submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<Acquire>;
    /// Unsignals the slot's fence and resets its command buffer.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;
    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn write_uniforms(&mut self, slot: usize, ubo: &UniformBufferObject) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<Present>;
    fn wait_idle(&mut self) -> Result<()>;
    /// Destroys every extent-dependent object in reverse creation order.
    fn destroy_swapchain(&mut self);
    fn create_swapchain(&mut self, framebuffer: Extent) -> Result<()>;
}

#[derive(Debug)]
pub struct FrameScheduler {
    slots: Vec<SlotState>,
    current: usize,
    framebuffer_resized: bool,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: vec![SlotState::Idle; frames_in_flight.max(1)],
            current: 0,
            framebuffer_resized: false,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    /// Requests a swapchain rebuild after the next present.
    pub fn notify_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    /// Runs one frame. `compose` produces the uniforms for the slot about to
    /// be submitted and is only called once that slot is free.
    pub fn draw_frame<B, W>(
        &mut self,
        backend: &mut B,
        window: &mut W,
        compose: impl FnOnce(usize) -> UniformBufferObject,
    ) -> Result<FrameOutcome>
    where
        B: FrameBackend,
        W: FramebufferSource,
    {
        let slot = self.current;

        backend.wait_for_slot(slot)?;
        self.slots[slot] = SlotState::Acquiring;

        let image_index = match backend.acquire_image(slot)? {
            Acquire::Ready(index) => index,
            Acquire::OutOfDate => {
                // The fence is still signaled, so the slot stays reusable.
                debug!("Swapchain out of date during acquire; skipping frame.");
                self.slots[slot] = SlotState::Idle;
                return Ok(if self.recreate(backend, window)? {
                    FrameOutcome::Skipped
                } else {
                    FrameOutcome::Closed
                });
            }
        };

        backend.reset_slot(slot)?;
        self.slots[slot] = SlotState::Recording;
        backend.record_commands(slot, image_index)?;
        backend.write_uniforms(slot, &compose(slot))?;

        backend.submit(slot)?;
        self.slots[slot] = SlotState::Presenting;
        let presented = match backend.present(slot, image_index) {
            Ok(presented) => presented,
            Err(error) => {
                // The submission still owns the slot until its fence signals.
                self.slots[slot] = SlotState::Submitted;
                return Err(error);
            }
        };
        self.slots[slot] = SlotState::Idle;

        let resized = std::mem::take(&mut self.framebuffer_resized);
        let outcome = if resized || presented != Present::Optimal {
            debug!(
                "Rebuilding swapchain (present: {:?}, resized: {}).",
                presented, resized
            );
            if self.recreate(backend, window)? {
                FrameOutcome::Recreated
            } else {
                FrameOutcome::Closed
            }
        } else {
            FrameOutcome::Presented
        };

        self.current = (self.current + 1) % self.slots.len();
        Ok(outcome)
    }

    /// Rebuilds the swapchain for the window's current framebuffer.
    ///
    /// Blocks while the window is minimized. Returns `false` without touching
    /// the swapchain if the window was closed during that wait.
    pub fn recreate<B, W>(&mut self, backend: &mut B, window: &mut W) -> Result<bool>
    where
        B: FrameBackend,
        W: FramebufferSource,
    {
        let Some(extent) = wait_for_nonzero_extent(window) else {
            info!("Window closed while minimized; skipping swapchain rebuild.");
            return Ok(false);
        };

        backend.wait_idle()?;
        backend.destroy_swapchain();
        backend.create_swapchain(extent)?;
        self.framebuffer_resized = false;

        info!(
            "Recreated swapchain for {}x{} framebuffer.",
            extent.width, extent.height
        );
        Ok(true)
    }
}

fn wait_for_nonzero_extent<W: FramebufferSource>(window: &mut W) -> Option<Extent> {
    let mut extent = window.framebuffer_extent();
    if extent.is_zero() {
        debug!("Framebuffer is zero-sized; waiting for the window to be restored.");
    }
    while extent.is_zero() {
        if window.close_requested() {
            return None;
        }
        window.wait_events();
        extent = window.framebuffer_extent();
    }
    Some(extent)
}

#[cfg(test)]
mod tests {
    use vulkanalia::vk;

    use super::*;
    use crate::testing::{Call, MockGpu, MockWindow};

    fn draw(
        scheduler: &mut FrameScheduler,
        gpu: &mut MockGpu,
        window: &mut MockWindow,
    ) -> FrameOutcome {
        scheduler
            .draw_frame(gpu, window, |_| UniformBufferObject::default())
            .unwrap()
    }

    #[test]
    fn ring_never_exceeds_frames_in_flight() {
        for frames_in_flight in 1..=3 {
            let mut scheduler = FrameScheduler::new(frames_in_flight);
            let mut gpu = MockGpu::new(frames_in_flight);
            let mut window = MockWindow::new(Extent::new(800, 600));

            for _ in 0..20 {
                assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Presented);
                assert!(gpu.in_flight() <= frames_in_flight);
            }
            assert_eq!(gpu.max_in_flight, frames_in_flight);
        }
    }

    #[test]
    fn slots_advance_round_robin() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(800, 600));

        let mut visited = Vec::new();
        for _ in 0..5 {
            visited.push(scheduler.current());
            draw(&mut scheduler, &mut gpu, &mut window);
            assert_eq!(scheduler.state(visited[visited.len() - 1]), SlotState::Idle);
        }
        assert_eq!(visited, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn frame_steps_run_in_protocol_order() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(800, 600));

        draw(&mut scheduler, &mut gpu, &mut window);

        assert_eq!(
            gpu.calls(),
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Uniforms(0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn suboptimal_present_rebuilds_before_next_frame() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(800, 600));

        draw(&mut scheduler, &mut gpu, &mut window);
        gpu.present_script.push_back(Present::Suboptimal);
        gpu.clear_calls();

        assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Recreated);
        assert_eq!(scheduler.current(), 0);
        draw(&mut scheduler, &mut gpu, &mut window);

        let calls = gpu.calls();
        let present = calls
            .iter()
            .position(|c| *c == Call::Present(1, 1))
            .unwrap();
        let create = calls
            .iter()
            .position(|c| matches!(c, Call::Create(_)))
            .unwrap();
        let next_record = calls
            .iter()
            .position(|c| matches!(c, Call::Record(0, _)))
            .unwrap();
        assert!(present < create);
        assert!(create < next_record);
        assert_eq!(
            &calls[present + 1..create + 1],
            &[Call::WaitIdle, Call::Destroy, Call::Create(Extent::new(800, 600))]
        );
    }

    #[test]
    fn out_of_date_present_is_treated_as_suboptimal() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(800, 600));

        gpu.present_script.push_back(Present::OutOfDate);
        assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Recreated);
        assert_eq!(gpu.shapes.len(), 1);
    }

    #[test]
    fn resize_flag_triggers_single_rebuild() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(800, 600));

        window.extent = Extent::new(1280, 720);
        scheduler.notify_resized();

        assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Recreated);
        assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Presented);
        assert_eq!(gpu.shapes.len(), 1);
        assert_eq!(gpu.shapes[0].extent.width, 1280);
    }

    #[test]
    fn out_of_date_acquire_skips_frame_without_consuming_fence() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(800, 600));

        gpu.acquire_script.push_back(Acquire::OutOfDate);
        assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Skipped);

        assert!(!gpu.calls().iter().any(|c| matches!(c, Call::Reset(_) | Call::Submit(_))));
        assert!(gpu.fences[0]);
        assert_eq!(scheduler.current(), 0);
        assert_eq!(scheduler.state(0), SlotState::Idle);

        // The same slot is immediately usable again.
        for _ in 0..4 {
            assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Presented);
        }
    }

    #[test]
    fn recreate_blocks_while_minimized() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(0, 0));
        window
            .restores
            .extend([Extent::new(0, 0), Extent::new(0, 0), Extent::new(640, 480)]);

        assert!(scheduler.recreate(&mut gpu, &mut window).unwrap());

        assert_eq!(window.waits, 3);
        assert_eq!(
            gpu.calls(),
            vec![Call::WaitIdle, Call::Destroy, Call::Create(Extent::new(640, 480))]
        );
    }

    #[test]
    fn recreate_gives_up_when_closed_while_minimized() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(0, 0));
        window.close_after_waits = Some(2);

        assert!(!scheduler.recreate(&mut gpu, &mut window).unwrap());
        assert!(gpu.calls().is_empty());
    }

    #[test]
    fn repeated_recreate_yields_same_swapchain() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(1024, 768));

        scheduler.recreate(&mut gpu, &mut window).unwrap();
        scheduler.recreate(&mut gpu, &mut window).unwrap();

        assert_eq!(gpu.shapes.len(), 2);
        assert_eq!(gpu.shapes[0], gpu.shapes[1]);
        assert_eq!(gpu.shapes[0].image_count, 3);
        assert_eq!(gpu.shapes[0].format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn backend_errors_abort_the_frame() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        gpu.fail_submit = true;
        let mut window = MockWindow::new(Extent::new(800, 600));

        let result = scheduler.draw_frame(&mut gpu, &mut window, |_| UniformBufferObject::default());
        assert!(result.is_err());
        assert!(!gpu.calls().iter().any(|c| matches!(c, Call::Present(..))));
        assert_eq!(scheduler.state(0), SlotState::Recording);
    }

    #[test]
    fn failed_present_leaves_slot_owned_by_submission() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        gpu.fail_present = true;
        let mut window = MockWindow::new(Extent::new(800, 600));

        let result = scheduler.draw_frame(&mut gpu, &mut window, |_| UniformBufferObject::default());
        assert!(result.is_err());
        assert_eq!(scheduler.state(0), SlotState::Submitted);
        assert_eq!(gpu.in_flight(), 1);
        assert_eq!(scheduler.current(), 0);
    }

    #[test]
    fn rebuild_after_present_reports_close_while_minimized() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(0, 0));
        window.close_after_waits = Some(1);

        gpu.present_script.push_back(Present::Suboptimal);
        assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Closed);
        assert!(!gpu.calls().iter().any(|c| matches!(c, Call::Create(_))));
    }

    #[test]
    fn out_of_date_acquire_reports_close_while_minimized() {
        let mut scheduler = FrameScheduler::new(2);
        let mut gpu = MockGpu::new(2);
        let mut window = MockWindow::new(Extent::new(0, 0));
        window.close_after_waits = Some(1);

        gpu.acquire_script.push_back(Acquire::OutOfDate);
        assert_eq!(draw(&mut scheduler, &mut gpu, &mut window), FrameOutcome::Closed);
        assert!(gpu.shapes.is_empty());
        assert_eq!(scheduler.state(0), SlotState::Idle);
    }
}
