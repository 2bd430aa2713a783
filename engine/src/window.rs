use std::time::Duration;

use anyhow::Result;
use log::*;
use serde::{Deserialize, Serialize};
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{CursorGrabMode, Window as WinitWindow, WindowBuilder};

/// A width/height pair in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized framebuffer.
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<PhysicalSize<u32>> for Extent {
    fn from(size: PhysicalSize<u32>) -> Self {
        Self::new(size.width, size.height)
    }
}

/// The windowing surface as seen by swapchain recreation.
pub trait FramebufferSource {
    /// Current framebuffer size in pixels.
    fn framebuffer_extent(&self) -> Extent;

    /// Blocks until at least one window event has been processed.
    fn wait_events(&mut self);

    fn close_requested(&self) -> bool;
}

/// The platform window as the run loop and hooks see it.
pub trait HostWindow: FramebufferSource {
    /// Processes pending events without blocking.
    fn poll_events(&mut self);

    /// Returns the `(old, new)` framebuffer extents if a resize happened
    /// since the last call.
    fn take_resize(&mut self) -> Option<(Extent, Extent)>;

    fn set_cursor(&self, mode: CursorMode);

    /// The native window, when there is one.
    fn native(&self) -> Option<&WinitWindow> {
        None
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CursorMode {
    #[default]
    Normal,
    Hidden,
    /// Hidden and locked to the window, for mouse-look style input.
    Disabled,
}

#[derive(Debug, Default)]
struct WindowState {
    extent: Extent,
    resize: Option<(Extent, Extent)>,
    close_requested: bool,
}

/// The platform window and the event loop that feeds it.
#[derive(Debug)]
pub struct Window {
    event_loop: EventLoop<()>,
    window: WinitWindow,
    state: WindowState,
}

impl Window {
    pub fn new(title: &str, extent: Extent) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(LogicalSize::new(extent.width, extent.height))
            .build(&event_loop)?;

        let state = WindowState {
            extent: window.inner_size().into(),
            ..Default::default()
        };

        info!(
            "Created window `{}` ({}x{}).",
            title, state.extent.width, state.extent.height
        );

        Ok(Self {
            event_loop,
            window,
            state,
        })
    }

    /// The native window, for surface creation.
    pub fn handle(&self) -> &WinitWindow {
        &self.window
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        let state = &mut self.state;
        let status = self.event_loop.pump_events(timeout, |event, _| {
            if let Event::WindowEvent { event, .. } = event {
                match event {
                    WindowEvent::CloseRequested => state.close_requested = true,
                    WindowEvent::Resized(size) => {
                        let new: Extent = size.into();
                        if new != state.extent {
                            let old = state
                                .resize
                                .map(|(old, _)| old)
                                .unwrap_or(state.extent);
                            state.resize = Some((old, new));
                            state.extent = new;
                        }
                    }
                    _ => {}
                }
            }
        });

        if let PumpStatus::Exit(code) = status {
            debug!("Event loop exited with code {}.", code);
            self.state.close_requested = true;
        }
    }
}

impl FramebufferSource for Window {
    fn framebuffer_extent(&self) -> Extent {
        self.state.extent
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }
}

impl HostWindow for Window {
    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn take_resize(&mut self) -> Option<(Extent, Extent)> {
        self.state.resize.take()
    }

    fn set_cursor(&self, mode: CursorMode) {
        let (grab, visible) = match mode {
            CursorMode::Normal => (CursorGrabMode::None, true),
            CursorMode::Hidden => (CursorGrabMode::None, false),
            CursorMode::Disabled => (CursorGrabMode::Locked, false),
        };

        let grabbed = match self.window.set_cursor_grab(grab) {
            // Some platforms only support confining the cursor.
            Err(_) if grab == CursorGrabMode::Locked => {
                self.window.set_cursor_grab(CursorGrabMode::Confined)
            }
            result => result,
        };
        if let Err(error) = grabbed {
            warn!("Failed to set cursor grab mode {:?}: {}", mode, error);
        }
        self.window.set_cursor_visible(visible);
    }

    fn native(&self) -> Option<&WinitWindow> {
        Some(&self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_extent_in_either_axis() {
        assert!(Extent::new(0, 0).is_zero());
        assert!(Extent::new(800, 0).is_zero());
        assert!(Extent::new(0, 600).is_zero());
        assert!(!Extent::new(800, 600).is_zero());
    }

    #[test]
    fn converts_physical_size() {
        let extent: Extent = PhysicalSize::new(1280u32, 720u32).into();
        assert_eq!(extent, Extent::new(1280, 720));
    }
}
