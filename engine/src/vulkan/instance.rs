use std::collections::HashSet;
use std::ffi::CStr;
use std::os::raw::c_void;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{ExtDebugUtilsExtension, KhrSurfaceExtension};
use vulkanalia::window as vk_window;
use winit::window::Window;

use crate::config::{EngineConfig, Severity};
use crate::error::CreationContext;
use crate::hooks::{self, DebugMessage, LogHook, MessageKind, Propagation};

use super::constants;
use super::context::VulkanContext;

/// State the debug messenger reads on every validation message.
struct MessengerState {
    hooks: Vec<LogHook>,
    threshold: Severity,
}

pub struct VulkanInstance {
    pub vk_instance: Instance,
    pub validation: bool,
    // Boxed so its address stays fixed while the messenger points at it.
    messenger_state: Option<Box<MessengerState>>,
}

impl std::fmt::Debug for VulkanInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanInstance")
            .field("vk_instance", &self.vk_instance.handle())
            .field("validation", &self.validation)
            .finish()
    }
}

impl VulkanInstance {
    pub unsafe fn new(
        window: &Window,
        entry: &Entry,
        config: &EngineConfig,
        log_hooks: Vec<LogHook>,
        context: &mut VulkanContext,
    ) -> Result<VulkanInstance> {
        // Application Info
        let application_info = vk::ApplicationInfo::builder()
            .application_name(b"Lockstep\0")
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(b"Lockstep\0")
            .engine_version(vk::make_version(1, 0, 0))
            .api_version(vk::make_version(1, 0, 0));

        // Layers
        let available_layers = entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|l| l.layer_name)
            .collect::<HashSet<_>>();

        let validation =
            config.validation && available_layers.contains(&constants::VALIDATION_LAYER);
        if config.validation && !validation {
            warn!("Validation layer requested but not supported; continuing without it.");
        }

        let layers = if validation {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        // Extensions
        let mut extensions = vk_window::get_required_instance_extensions(window)
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        let flags = if cfg!(target_os = "macos")
            && entry.version()? >= constants::PORTABILITY_MACOS_VERSION
        {
            info!("Enabling extensions for macOS portability.");
            extensions.push(
                vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION
                    .name
                    .as_ptr(),
            );
            extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        if validation {
            extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
        }

        let mut messenger_state = validation.then(|| {
            Box::new(MessengerState {
                hooks: log_hooks,
                threshold: config.validation_severity,
            })
        });
        let user_data = messenger_state
            .as_mut()
            .map_or(std::ptr::null_mut(), |state| {
                (state.as_mut() as *mut MessengerState).cast::<c_void>()
            });

        // Create
        let mut info = vk::InstanceCreateInfo::builder()
            .application_info(&application_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .flags(flags);

        let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .user_callback(Some(debug_callback));
        debug_info.user_data = user_data;

        if validation {
            info = info.push_next(&mut debug_info);
        }

        let instance = entry
            .create_instance(&info, None)
            .creating("instance")?;

        let mut vulkan_instance = VulkanInstance {
            vk_instance: instance,
            validation,
            messenger_state,
        };

        // Messenger and surface
        let created = (|| -> Result<()> {
            if validation {
                context.messenger = vulkan_instance
                    .vk_instance
                    .create_debug_utils_messenger_ext(&debug_info, None)
                    .creating("debug messenger")?;
            }
            context.surface =
                vk_window::create_surface(&vulkan_instance.vk_instance, window, window)
                    .creating("window surface")?;
            Ok(())
        })();

        if let Err(error) = created {
            vulkan_instance.destroy(context);
            return Err(error);
        }

        Ok(vulkan_instance)
    }

    pub unsafe fn destroy(&mut self, context: &mut VulkanContext) {
        self.vk_instance.destroy_surface_khr(context.surface, None);
        if self.validation {
            self.vk_instance
                .destroy_debug_utils_messenger_ext(context.messenger, None);
        }
        self.vk_instance.destroy_instance(None);
        self.messenger_state = None;
    }
}

fn severity_of(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Severity {
    if flags >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        Severity::Error
    } else if flags >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        Severity::Warning
    } else if flags >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        Severity::Info
    } else {
        Severity::Verbose
    }
}

fn kind_of(flags: vk::DebugUtilsMessageTypeFlagsEXT) -> MessageKind {
    if flags.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        MessageKind::Validation
    } else if flags.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        MessageKind::Performance
    } else {
        MessageKind::General
    }
}

/// Offers a message to the log hooks, then logs it unless one cancelled.
fn report(message: DebugMessage, hooks: &[LogHook], threshold: Severity) {
    if message.severity < threshold {
        return;
    }
    if hooks::fire_log(hooks, &message) == Propagation::Cancel {
        return;
    }

    let DebugMessage {
        severity,
        kind,
        message,
    } = message;
    match severity {
        Severity::Error => error!("({:?}) {}", kind, message),
        Severity::Warning => warn!("({:?}) {}", kind, message),
        Severity::Info => debug!("({:?}) {}", kind, message),
        Severity::Verbose => trace!("({:?}) {}", kind, message),
    }
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    let data = unsafe { *data };
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

    let message = DebugMessage {
        severity: severity_of(severity),
        kind: kind_of(type_),
        message: message.into_owned(),
    };

    // Messages emitted during instance creation and destruction also carry
    // the state pointer, which outlives the instance.
    match unsafe { user_data.cast::<MessengerState>().as_ref() } {
        Some(state) => report(message, &state.hooks, state.threshold),
        None => report(message, &[], Severity::Verbose),
    }

    vk::FALSE
}
