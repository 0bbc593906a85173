//! Swapchain coordinator (Component B, §4.2). Owns one `vulkan::swapchain::Swapchain` per
//! window and reports recreate-flags instead of silently recreating in place — the caller
//! (the frame executor) decides what a `resize`/`reformat` means for its own state
//! (descriptor pool, render-pass cache).

use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use bitflags::bitflags;

use crate::vulkan::device::DeviceShared;
use crate::vulkan::swapchain::Swapchain;

bitflags! {
    /// Transient-recreate signal carried as data rather than as an error (§7, §10.2):
    /// `RECREATE` is always accompanied by at least one of `RESIZE`/`REFORMAT`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RecreateFlags: u8 {
        const RECREATE = 1 << 0;
        const RESIZE   = 1 << 1;
        const REFORMAT = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub usize);

struct WindowEntry {
    swapchain: Swapchain,
    generation: u64,
    retired: Vec<Swapchain>,
}

/// Coordinates acquire/present/purge across every registered window surface.
pub struct SwapchainCoordinator {
    device: Arc<DeviceShared>,
    present_mode: vk::PresentModeKHR,
    windows: Vec<WindowEntry>,
}

impl SwapchainCoordinator {
    pub fn new(device: Arc<DeviceShared>, present_mode: vk::PresentModeKHR) -> Result<Self> {
        let swapchain = Swapchain::new(device.clone(), present_mode)?;
        Ok(Self {
            device,
            present_mode,
            windows: vec![WindowEntry {
                swapchain,
                generation: 0,
                retired: Vec::new(),
            }],
        })
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn image_count(&self, window: WindowId) -> usize {
        self.windows[window.0].swapchain.image_count()
    }

    pub fn surface_format(&self, window: WindowId) -> vk::Format {
        self.windows[window.0].swapchain.surface_format.format
    }

    pub fn extent(&self, window: WindowId) -> vk::Extent2D {
        self.windows[window.0].swapchain.extent
    }

    pub fn image_view(&self, window: WindowId, image_index: u32) -> vk::ImageView {
        self.windows[window.0].swapchain.image_view_raw(image_index)
    }

    pub fn image(&self, window: WindowId, image_index: u32) -> vk::Image {
        self.windows[window.0].swapchain.image_raw(image_index)
    }

    /// Acquires the next image for `window`. Returns `None` if the surface is unusable
    /// even after one recreate attempt (the spec's `NO_IMAGE` sentinel).
    pub fn acquire(&mut self, window: WindowId, available_sem: vk::Semaphore) -> Result<(Option<u32>, RecreateFlags)> {
        let format_before = self.windows[window.0].swapchain.surface_format.format;

        match self.windows[window.0].swapchain.acquire_next_image(available_sem) {
            Ok((image_index, suboptimal)) => {
                let flags = if suboptimal {
                    RecreateFlags::RECREATE | RecreateFlags::RESIZE
                } else {
                    RecreateFlags::empty()
                };
                Ok((Some(image_index), flags))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.recreate_window(window)?;
                let format_after = self.windows[window.0].swapchain.surface_format.format;
                let mut flags = RecreateFlags::RECREATE | RecreateFlags::RESIZE;
                if format_after != format_before {
                    flags |= RecreateFlags::REFORMAT;
                }

                match self.windows[window.0]
                    .swapchain
                    .acquire_next_image(available_sem)
                {
                    Ok((image_index, _)) => Ok((Some(image_index), flags)),
                    Err(_) => Ok((None, flags)),
                }
            }
            Err(other) => Err(anyhow::anyhow!("swapchain acquire failed: {other:?}")),
        }
    }

    /// Presents `image_index` on every listed window, waiting on a single `rendered_sem`.
    /// Never panics: a per-surface present failure sets that surface's flag and the others
    /// still get their own `present_one` call.
    pub fn present(
        &mut self,
        queue: vk::Queue,
        rendered_sem: vk::Semaphore,
        windows: &[WindowId],
        indices: &[u32],
    ) -> Vec<RecreateFlags> {
        windows
            .iter()
            .zip(indices.iter())
            .map(|(&window, &index)| self.present_one(queue, rendered_sem, window, index))
            .collect()
    }

    fn present_one(
        &mut self,
        queue: vk::Queue,
        rendered_sem: vk::Semaphore,
        window: WindowId,
        index: u32,
    ) -> RecreateFlags {
        match self.windows[window.0]
            .swapchain
            .queue_present(queue, index, &[rendered_sem])
        {
            Ok(suboptimal) => {
                if suboptimal {
                    RecreateFlags::RECREATE | RecreateFlags::RESIZE
                } else {
                    RecreateFlags::empty()
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => RecreateFlags::RECREATE | RecreateFlags::RESIZE,
            Err(other) => {
                log::warn!("present failed on window {}: {other:?}", window.0);
                RecreateFlags::RECREATE | RecreateFlags::RESIZE
            }
        }
    }

    /// Drops swapchains retired by a prior recreate. Only safe to call once every frame in
    /// flight has been synced (the frame executor calls this after `sync_all_frames`).
    pub fn purge(&mut self, window: WindowId) {
        self.windows[window.0].retired.clear();
    }

    fn recreate_window(&mut self, window: WindowId) -> Result<()> {
        log::debug!("recreating swapchain for window {}", window.0);
        let new_swapchain = Swapchain::new(self.device.clone(), self.present_mode)?;
        let entry = &mut self.windows[window.0];
        let old = std::mem::replace(&mut entry.swapchain, new_swapchain);
        entry.retired.push(old);
        entry.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recreate_flag_implies_another_bit_by_construction() {
        let both = RecreateFlags::RECREATE | RecreateFlags::RESIZE;
        assert!(both.contains(RecreateFlags::RECREATE));
        assert!(both.contains(RecreateFlags::RESIZE));
        assert!(!both.contains(RecreateFlags::REFORMAT));
    }
}
