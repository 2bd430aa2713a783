//! A Vulkan presentation engine.
//!
//! [`Engine`] owns a window and a renderer for the duration of [`Engine::run`].
//! Application code supplies [`SceneAssets`] up front and steers each frame
//! through the closures registered on [`Hooks`].

use anyhow::{Context, Result};
use log::*;

use frame::FrameOutcome;
use renderer::{Renderer, SceneBackend};
use timer::FrameTimer;
use vulkan::VulkanRenderer;

pub mod assets;
pub mod config;
pub mod error;
pub mod frame;
pub mod hooks;
mod renderer;
#[cfg(test)]
mod testing;
pub mod timer;
mod vulkan;
pub mod window;

pub use assets::{SceneAssets, ShaderSet, TextureData, UniformBufferObject, Vertex};
pub use config::{ConfigError, EngineConfig, PresentModePreference, Severity};
pub use error::EngineError;
pub use hooks::{
    DebugMessage, FrameInfo, HookContext, Hooks, LogHook, MessageKind, Propagation, TickContext,
};
pub use vulkan::DeviceCandidate;
pub use window::{CursorMode, Extent, FramebufferSource, HostWindow, Window};

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    hooks: Hooks,
}

impl Engine {
    pub fn new(config: EngineConfig, hooks: Hooks) -> Result<Engine> {
        config.validate().context("Rejected engine configuration")?;
        Ok(Engine { config, hooks })
    }

    /// Opens the window, builds the renderer and draws until the window is
    /// closed. A hook veto during startup ends the run with `Ok(())`.
    pub fn run(&mut self, initial_extent: Extent, assets: SceneAssets) -> Result<()> {
        assets.validate(self.config.texture_sampling)?;

        let mut window = Window::new(&self.config.title, initial_extent)?;
        self.drive(&mut window, |window, config, hooks| unsafe {
            VulkanRenderer::new(window, config, hooks, &assets)
        })
    }

    /// Runs the lifecycle on an open window. Cleanup listeners fire exactly
    /// once however the lifecycle ends.
    fn drive<W, B>(
        &mut self,
        window: &mut W,
        create: impl FnOnce(&W, &EngineConfig, &mut Hooks) -> Result<B>,
    ) -> Result<()>
    where
        W: HostWindow,
        B: SceneBackend,
    {
        let result = self.lifecycle(window, create);
        self.hooks.fire_cleanup();
        result
    }

    fn lifecycle<W, B>(
        &mut self,
        window: &mut W,
        create: impl FnOnce(&W, &EngineConfig, &mut Hooks) -> Result<B>,
    ) -> Result<()>
    where
        W: HostWindow,
        B: SceneBackend,
    {
        if self.hooks.fire_before_init(&*window).is_cancel() {
            info!("Startup cancelled before initialization.");
            return Ok(());
        }

        let backend = create(window, &self.config, &mut self.hooks)?;
        let mut renderer = Renderer::new(backend, self.config.frames_in_flight);
        let mut timer = FrameTimer::new(self.config.show_fps);

        let context = HookContext {
            window: &*window,
            extent: renderer.extent(),
            elapsed: timer.elapsed(),
            frame: timer.frame_count(),
        };
        let result = if self.hooks.fire_after_init(&context).is_cancel() {
            info!("Startup cancelled after initialization.");
            Ok(())
        } else {
            info!("Entering main loop.");
            self.main_loop(window, &mut renderer, &mut timer)
        };

        renderer.shutdown();
        info!("Shut down after {} frames.", timer.frame_count());
        result
    }

    fn main_loop<W, B>(
        &mut self,
        window: &mut W,
        renderer: &mut Renderer<B>,
        timer: &mut FrameTimer,
    ) -> Result<()>
    where
        W: HostWindow,
        B: SceneBackend,
    {
        loop {
            window.poll_events();
            if window.close_requested() {
                return Ok(());
            }

            if let Some((old, new)) = window.take_resize() {
                debug!(
                    "Framebuffer resized {}x{} -> {}x{}.",
                    old.width, old.height, new.width, new.height
                );
                self.hooks.fire_resize(old, new);
                renderer.notify_resized();
            }

            timer.tick();

            let mut tick = TickContext::new(
                &*window,
                renderer.extent(),
                timer.delta(),
                timer.elapsed(),
                timer.frame_count(),
            );
            let propagation = self.hooks.fire_tick(&mut tick);
            if let Some((vertices, indices)) = tick.into_geometry() {
                renderer
                    .replace_geometry(&vertices, &indices)
                    .context("Failed to replace scene geometry")?;
            }
            if propagation.is_cancel() {
                continue;
            }

            let info = FrameInfo {
                extent: renderer.extent(),
                delta: timer.delta(),
                elapsed: timer.elapsed().as_secs_f32(),
                frame: timer.frame_count(),
            };
            let hooks = &mut self.hooks;
            let outcome = renderer.draw_frame(window, |_| {
                let mut ubo = UniformBufferObject::default();
                hooks.fire_build_uniforms(&info, &mut ubo);
                ubo
            })?;
            match outcome {
                FrameOutcome::Presented => {}
                FrameOutcome::Closed => return Ok(()),
                other => trace!("Frame {} {:?}.", info.frame, other),
            }
        }
    }
}
