//! Minimal external-collaborator stand-ins (§10.4). The pipeline cache and descriptor pool
//! are genuinely external to this core (the shader/technique and recorder layers own their
//! real design); these wrap just enough of `vk::PipelineCache`/`vk::DescriptorPool` to give
//! the frame executor's `submit` step something concrete to flush.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::vulkan::device::DeviceShared;

/// A collaborator the executor can best-effort flush at the end of `submit` (§4.5 step 6).
pub trait FlushableCache {
    fn flush(&mut self) -> Result<()>;
}

/// Wraps `VkPipelineCache` creation/merge; does not implement the keyed `get`/`warmup`
/// lookup protocol from §6 (that belongs to the shader/technique layer).
pub struct PipelineCacheHandle {
    device: Arc<DeviceShared>,
    raw: vk::PipelineCache,
}

impl PipelineCacheHandle {
    pub fn new(device: Arc<DeviceShared>) -> Result<Self> {
        let create_info = vk::PipelineCacheCreateInfo::default();
        let raw = unsafe { device.raw.create_pipeline_cache(&create_info, None)? };
        Ok(Self { device, raw })
    }

    pub fn raw(&self) -> vk::PipelineCache {
        self.raw
    }

    pub fn merge(&mut self, others: &[vk::PipelineCache]) -> Result<()> {
        if others.is_empty() {
            return Ok(());
        }
        unsafe { self.device.raw.merge_pipeline_caches(self.raw, others)? };
        Ok(())
    }
}

impl FlushableCache for PipelineCacheHandle {
    /// No-op: the core has no on-disk cache format (§6 "no persisted on-disk layout").
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for PipelineCacheHandle {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_pipeline_cache(self.raw, None) };
    }
}

/// Wraps a single growable `VkDescriptorPool`. Does not implement per-recorder
/// `sub`/`unsub` isolation (§6) beyond the `reset()`/`flush()` shape the executor calls.
pub struct DescriptorPoolHandle {
    device: Arc<DeviceShared>,
    raw: vk::DescriptorPool,
}

impl DescriptorPoolHandle {
    pub fn new(device: Arc<DeviceShared>, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let raw = unsafe { device.raw.create_descriptor_pool(&create_info, None)? };
        Ok(Self { device, raw })
    }

    pub fn raw(&self) -> vk::DescriptorPool {
        self.raw
    }

    /// Called when a swapchain `resize` flag is observed (§4.2 "a resize flag must
    /// trigger a pool reset").
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .raw
                .reset_descriptor_pool(self.raw, vk::DescriptorPoolResetFlags::empty())?
        };
        Ok(())
    }
}

impl FlushableCache for DescriptorPoolHandle {
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for DescriptorPoolHandle {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_descriptor_pool(self.raw, None) };
    }
}
