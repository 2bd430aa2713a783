//! Typed lifecycle hooks.
//!
//! User code registers closures per lifecycle event before the engine runs.
//! Listeners of one event are called in registration order; a listener that
//! returns [`Propagation::Cancel`] stops the remaining listeners and the
//! cancellation is reported back to the engine, which treats it as a veto at
//! that point of the lifecycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::assets::{UniformBufferObject, Vertex};
use crate::config::Severity;
use crate::vulkan::DeviceCandidate;
use crate::window::{Extent, HostWindow};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Cancel,
}

impl Propagation {
    pub fn is_cancel(self) -> bool {
        self == Propagation::Cancel
    }
}

/// Read access to the running engine.
pub struct HookContext<'a> {
    pub window: &'a dyn HostWindow,
    pub extent: Extent,
    pub elapsed: Duration,
    pub frame: u64,
}

/// Passed to tick listeners once per loop iteration.
pub struct TickContext<'a> {
    pub window: &'a dyn HostWindow,
    pub extent: Extent,
    pub delta: f32,
    pub elapsed: Duration,
    pub frame: u64,
    geometry: Option<(Vec<Vertex>, Vec<u32>)>,
}

impl<'a> TickContext<'a> {
    pub(crate) fn new(
        window: &'a dyn HostWindow,
        extent: Extent,
        delta: f32,
        elapsed: Duration,
        frame: u64,
    ) -> Self {
        Self {
            window,
            extent,
            delta,
            elapsed,
            frame,
            geometry: None,
        }
    }

    /// Replaces the vertex and index buffers before this tick's frame is drawn.
    pub fn replace_geometry(&mut self, vertices: Vec<Vertex>, indices: Vec<u32>) {
        self.geometry = Some((vertices, indices));
    }

    pub(crate) fn into_geometry(self) -> Option<(Vec<Vertex>, Vec<u32>)> {
        self.geometry
    }
}

/// What a uniform-building listener knows about the frame being built.
#[derive(Copy, Clone, Debug)]
pub struct FrameInfo {
    pub extent: Extent,
    pub delta: f32,
    pub elapsed: f32,
    pub frame: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    General,
    Validation,
    Performance,
}

#[derive(Clone, Debug)]
pub struct DebugMessage {
    pub severity: Severity,
    pub kind: MessageKind,
    pub message: String,
}

type InitHook = Box<dyn FnMut(&dyn HostWindow) -> Propagation>;
type ContextHook = Box<dyn FnMut(&HookContext) -> Propagation>;
type TickHook = Box<dyn FnMut(&mut TickContext) -> Propagation>;
type UniformHook = Box<dyn FnMut(&FrameInfo, &mut UniformBufferObject) -> Propagation>;
type RateDeviceHook = Box<dyn FnMut(&DeviceCandidate, u32) -> u32>;
type ResizeHook = Box<dyn FnMut(Extent, Extent)>;
type CleanupHook = Box<dyn FnMut()>;

/// Diagnostic listener; called from whichever thread the driver reports on.
pub type LogHook = Arc<dyn Fn(&DebugMessage) -> Propagation + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    before_init: Vec<InitHook>,
    after_init: Vec<ContextHook>,
    tick: Vec<TickHook>,
    build_uniforms: Vec<UniformHook>,
    rate_device: Vec<RateDeviceHook>,
    resize: Vec<ResizeHook>,
    cleanup: Vec<CleanupHook>,
    log: Vec<LogHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_init", &self.before_init.len())
            .field("after_init", &self.after_init.len())
            .field("tick", &self.tick.len())
            .field("build_uniforms", &self.build_uniforms.len())
            .field("rate_device", &self.rate_device.len())
            .field("resize", &self.resize.len())
            .field("cleanup", &self.cleanup.len())
            .field("log", &self.log.len())
            .finish()
    }
}

fn dispatch<T: ?Sized>(hooks: &mut [Box<T>], mut call: impl FnMut(&mut T) -> Propagation) -> Propagation {
    for hook in hooks.iter_mut() {
        if call(hook).is_cancel() {
            return Propagation::Cancel;
        }
    }
    Propagation::Continue
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs before any GPU object exists. Cancel aborts startup.
    pub fn on_before_init(
        &mut self,
        hook: impl FnMut(&dyn HostWindow) -> Propagation + 'static,
    ) -> &mut Self {
        self.before_init.push(Box::new(hook));
        self
    }

    /// Runs once the renderer is fully initialized. Cancel shuts down.
    pub fn on_after_init(
        &mut self,
        hook: impl FnMut(&HookContext) -> Propagation + 'static,
    ) -> &mut Self {
        self.after_init.push(Box::new(hook));
        self
    }

    /// Runs every loop iteration before drawing. Cancel skips the frame.
    pub fn on_tick(&mut self, hook: impl FnMut(&mut TickContext) -> Propagation + 'static) -> &mut Self {
        self.tick.push(Box::new(hook));
        self
    }

    pub fn on_build_uniforms(
        &mut self,
        hook: impl FnMut(&FrameInfo, &mut UniformBufferObject) -> Propagation + 'static,
    ) -> &mut Self {
        self.build_uniforms.push(Box::new(hook));
        self
    }

    /// Receives each eligible device with its current score and returns the
    /// new one. Devices that fail the built-in checks stay at zero.
    pub fn on_rate_device(
        &mut self,
        hook: impl FnMut(&DeviceCandidate, u32) -> u32 + 'static,
    ) -> &mut Self {
        self.rate_device.push(Box::new(hook));
        self
    }

    pub fn on_resize(&mut self, hook: impl FnMut(Extent, Extent) + 'static) -> &mut Self {
        self.resize.push(Box::new(hook));
        self
    }

    pub fn on_cleanup(&mut self, hook: impl FnMut() + 'static) -> &mut Self {
        self.cleanup.push(Box::new(hook));
        self
    }

    /// Cancel suppresses the engine's own log output for the message.
    pub fn on_log(
        &mut self,
        hook: impl Fn(&DebugMessage) -> Propagation + Send + Sync + 'static,
    ) -> &mut Self {
        self.log.push(Arc::new(hook));
        self
    }

    pub(crate) fn fire_before_init(&mut self, window: &dyn HostWindow) -> Propagation {
        dispatch(&mut self.before_init, |hook| hook(window))
    }

    pub(crate) fn fire_after_init(&mut self, context: &HookContext) -> Propagation {
        dispatch(&mut self.after_init, |hook| hook(context))
    }

    pub(crate) fn fire_tick(&mut self, context: &mut TickContext) -> Propagation {
        dispatch(&mut self.tick, |hook| hook(context))
    }

    pub(crate) fn fire_build_uniforms(&mut self, info: &FrameInfo, ubo: &mut UniformBufferObject) -> Propagation {
        dispatch(&mut self.build_uniforms, |hook| hook(info, ubo))
    }

    pub(crate) fn rate_device(&mut self, candidate: &DeviceCandidate, score: u32) -> u32 {
        self.rate_device
            .iter_mut()
            .fold(score, |score, hook| hook(candidate, score))
    }

    pub(crate) fn fire_resize(&mut self, old: Extent, new: Extent) {
        self.resize.iter_mut().for_each(|hook| hook(old, new));
    }

    pub(crate) fn fire_cleanup(&mut self) {
        self.cleanup.iter_mut().for_each(|hook| hook());
    }

    /// A shareable handle to the log listeners for the debug messenger.
    pub(crate) fn log_sink(&self) -> Vec<LogHook> {
        self.log.clone()
    }
}

/// Offers a message to each log listener in turn.
pub(crate) fn fire_log(hooks: &[LogHook], message: &DebugMessage) -> Propagation {
    for hook in hooks {
        if hook(message).is_cancel() {
            return Propagation::Cancel;
        }
    }
    Propagation::Continue
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn info() -> FrameInfo {
        FrameInfo {
            extent: Extent::new(800, 600),
            delta: 0.016,
            elapsed: 1.0,
            frame: 3,
        }
    }

    #[test]
    fn uniform_listeners_run_in_registration_order() {
        let mut hooks = Hooks::new();
        hooks
            .on_build_uniforms(|_, ubo| {
                ubo.model[0][0] = 2.0;
                Propagation::Continue
            })
            .on_build_uniforms(|_, ubo| {
                ubo.model[0][0] *= 3.0;
                Propagation::Continue
            });

        let mut ubo = UniformBufferObject::default();
        assert_eq!(hooks.fire_build_uniforms(&info(), &mut ubo), Propagation::Continue);
        assert_eq!(ubo.model[0][0], 6.0);
    }

    #[test]
    fn cancel_stops_later_listeners() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut hooks = Hooks::new();

        let first = calls.clone();
        hooks.on_build_uniforms(move |_, _| {
            first.borrow_mut().push("first");
            Propagation::Cancel
        });
        let second = calls.clone();
        hooks.on_build_uniforms(move |_, _| {
            second.borrow_mut().push("second");
            Propagation::Continue
        });

        let mut ubo = UniformBufferObject::default();
        assert!(hooks.fire_build_uniforms(&info(), &mut ubo).is_cancel());
        assert_eq!(*calls.borrow(), vec!["first"]);
    }

    #[test]
    fn no_listeners_means_continue() {
        let mut hooks = Hooks::new();
        let mut ubo = UniformBufferObject::default();
        assert_eq!(hooks.fire_build_uniforms(&info(), &mut ubo), Propagation::Continue);
        assert_eq!(ubo, UniformBufferObject::default());
    }

    #[test]
    fn rate_device_listeners_chain_scores() {
        let mut hooks = Hooks::new();
        hooks
            .on_rate_device(|_, score| score + 10)
            .on_rate_device(|candidate, score| {
                if candidate.name.contains("Software") {
                    0
                } else {
                    score * 2
                }
            });

        let mut candidate = DeviceCandidate::default();
        candidate.name = "Discrete".to_string();
        assert_eq!(hooks.rate_device(&candidate, 1), 22);

        candidate.name = "Software Rasterizer".to_string();
        assert_eq!(hooks.rate_device(&candidate, 1), 0);
    }

    #[test]
    fn log_cancel_suppresses_remaining_listeners() {
        let mut hooks = Hooks::new();
        hooks
            .on_log(|message| {
                if message.kind == MessageKind::Performance {
                    Propagation::Cancel
                } else {
                    Propagation::Continue
                }
            })
            .on_log(|_| Propagation::Continue);

        let sink = hooks.log_sink();
        let message = DebugMessage {
            severity: Severity::Warning,
            kind: MessageKind::Performance,
            message: "slow path".to_string(),
        };
        assert!(fire_log(&sink, &message).is_cancel());

        let message = DebugMessage {
            kind: MessageKind::Validation,
            ..message
        };
        assert!(!fire_log(&sink, &message).is_cancel());
    }

    #[test]
    fn resize_and_cleanup_reach_every_listener() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut hooks = Hooks::new();
        for _ in 0..2 {
            let seen = seen.clone();
            hooks.on_resize(move |old, new| seen.borrow_mut().push((old, new)));
        }
        hooks.fire_resize(Extent::new(800, 600), Extent::new(1024, 768));
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(seen.borrow()[0], (Extent::new(800, 600), Extent::new(1024, 768)));

        let cleaned = Rc::new(RefCell::new(0));
        let counter = cleaned.clone();
        hooks.on_cleanup(move || *counter.borrow_mut() += 1);
        hooks.fire_cleanup();
        assert_eq!(*cleaned.borrow(), 1);
    }
}
