//! GPU error types.

use ash::vk;
use cadence_core::{DeviceLossReason, ShaderModel};
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// The device was removed or reset. The only error routed to recovery.
    #[error("GPU {0}")]
    DeviceLost(DeviceLossReason),

    /// No adapter can create a device at the minimum feature level.
    #[error("No suitable graphics adapter found")]
    NoSuitableAdapter,

    /// The device's shader capability is below the engine's minimum.
    #[error("Shader model {found} is below the required {required}")]
    ShaderModelUnsupported {
        required: ShaderModel,
        found: ShaderModel,
    },

    /// The fence wait handle could not be created.
    #[error("Fence wait handle creation failed: {0}")]
    WaitHandleCreation(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Rebuilding the device after a loss failed.
    #[error("Device recovery failed: {0}")]
    RecoveryFailed(Box<GpuError>),

    /// No window has been attached to the pipeline.
    #[error("No window attached")]
    NoWindow,

    /// The device is permanently unavailable after a failed recovery.
    #[error("GPU device is unavailable")]
    DeviceUnavailable,

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid renderer configuration.
    #[error(transparent)]
    Config(#[from] cadence_core::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// The loss reason when this error reports a removed or reset device.
    pub const fn device_lost_reason(&self) -> Option<DeviceLossReason> {
        match self {
            Self::DeviceLost(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Whether this error reports a removed or reset device.
    pub const fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }

    /// Whether this error describes an environment the engine cannot run on.
    ///
    /// Fatal errors are never retried.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoSuitableAdapter
                | Self::ShaderModelUnsupported { .. }
                | Self::WaitHandleCreation(_)
                | Self::RecoveryFailed(_)
                | Self::DeviceUnavailable
                | Self::Config(_)
        )
    }
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost(DeviceLossReason::Removed),
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::DeviceLost(DeviceLossReason::Reset),
            other => Self::Vulkan(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_codes_are_distinguished() {
        assert_eq!(
            GpuError::from(vk::Result::ERROR_DEVICE_LOST),
            GpuError::DeviceLost(DeviceLossReason::Removed)
        );
        assert_eq!(
            GpuError::from(vk::Result::ERROR_SURFACE_LOST_KHR),
            GpuError::DeviceLost(DeviceLossReason::Reset)
        );
        assert_eq!(
            GpuError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        );
    }

    #[test]
    fn classification() {
        let lost = GpuError::DeviceLost(DeviceLossReason::Reset);
        assert!(lost.is_device_lost());
        assert!(!lost.is_fatal());
        assert_eq!(lost.device_lost_reason(), Some(DeviceLossReason::Reset));

        assert!(GpuError::NoSuitableAdapter.is_fatal());
        assert!(GpuError::RecoveryFailed(Box::new(lost)).is_fatal());
        assert!(!GpuError::NoWindow.is_fatal());
    }
}
