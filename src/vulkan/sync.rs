use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use super::device::DeviceShared;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SemaphoreType {
    Binary,
    Timeline,
}

pub(crate) struct Semaphore {
    device: Arc<DeviceShared>,
    pub(crate) raw: vk::Semaphore,
    pub(crate) semaphore_type: SemaphoreType,
}

impl Semaphore {
    pub(crate) fn new(device: Arc<DeviceShared>, semaphore_type: SemaphoreType) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();

        let mut semaphore_type_info =
            vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::BINARY);
        if semaphore_type == SemaphoreType::Timeline {
            semaphore_type_info = semaphore_type_info.semaphore_type(vk::SemaphoreType::TIMELINE);
        }
        let semaphore_info = semaphore_info.push_next(&mut semaphore_type_info);

        let raw = unsafe { device.raw.create_semaphore(&semaphore_info, None)? };

        Ok(Self {
            device,
            raw,
            semaphore_type,
        })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_semaphore(self.raw, None);
        }
    }
}

/// RAII wrapper around a `VkFence`, always created signaled so the first `sync` on a
/// freshly acquired frame does not block.
pub(crate) struct Fence {
    device: Arc<DeviceShared>,
    pub(crate) raw: vk::Fence,
}

impl Fence {
    pub(crate) fn new(device: Arc<DeviceShared>) -> Result<Self> {
        let create_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let raw = unsafe { device.raw.create_fence(&create_info, None)? };

        Ok(Self { device, raw })
    }

    pub(crate) fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .raw
                .wait_for_fences(&[self.raw], true, u64::MAX)?;
        }
        Ok(())
    }

    pub(crate) fn reset(&self) -> Result<()> {
        unsafe {
            self.device.raw.reset_fences(&[self.raw])?;
        }
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_fence(self.raw, None);
        }
    }
}
