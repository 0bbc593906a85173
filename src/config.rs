//! Renderer-creation-time configuration (§10.3). Not a file-backed configuration layer —
//! a plain struct the host passes to `Renderer::new`, mirroring how the underlying Vulkan
//! wrapper's `DeviceShared::new` takes its few parameters directly rather than reading
//! them from disk.

use ash::vk;

#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Number of virtual frames kept in flight (the spec's "N ... chosen at renderer
    /// creation", §3 "Virtual frame"). Must be at least 1; 2 or 3 are the common choices.
    pub frames_in_flight: usize,
    /// Wait-credit capacity seeded onto every dependency-object signal when it is prepared
    /// (§4.4 "Wait credit"). Bounds how many catches may observe one semaphore signal
    /// before the backing sync object is considered used up and returned to the pool.
    pub wait_credit_capacity: u32,
    /// Requested swapchain present mode; falls back to `FIFO` if the surface does not
    /// support it (every Vulkan-conformant surface supports `FIFO`).
    pub present_mode: vk::PresentModeKHR,
    /// Enables the `VK_LAYER_KHRONOS_validation` layer and a debug-utils messenger.
    pub enable_validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            wait_credit_capacity: 1,
            present_mode: vk::PresentModeKHR::FIFO,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_conservative() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
    }
}
