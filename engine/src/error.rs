use thiserror::Error;
use vulkanalia::vk;

/// Unrecoverable engine failures.
///
/// These abort the run loop; whatever was constructed so far is torn down and
/// the error is handed back to the caller of [`crate::Engine::run`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to find a suitable GPU.")]
    NoSuitableGpu,
    #[error("Failed to find a memory type with properties {0:?}.")]
    NoSuitableMemoryType(vk::MemoryPropertyFlags),
    #[error("Unsupported image layout transition {from:?} -> {to:?}.")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
    #[error("Failed to find a supported depth format.")]
    NoSupportedDepthFormat,
    #[error("Missing required queue family: {0}.")]
    MissingQueueFamily(&'static str),
    #[error("Invalid scene assets: {0}")]
    InvalidAssets(String),
    #[error("Failed to create {what}: {code}.")]
    Creation {
        what: &'static str,
        code: vk::ErrorCode,
    },
}

/// Attaches the name of the rejected creation call to a driver error.
pub trait CreationContext<T> {
    fn creating(self, what: &'static str) -> Result<T, EngineError>;
}

impl<T> CreationContext<T> for Result<T, vk::ErrorCode> {
    fn creating(self, what: &'static str) -> Result<T, EngineError> {
        self.map_err(|code| EngineError::Creation { what, code })
    }
}
