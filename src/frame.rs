//! Virtual-frame ring (Component F, §3). Owns per-frame-slot command pools/buffers for the
//! graphics and compute halves, their fences, the "rendered" signal semaphore, and a
//! growable vector of per-window acquire semaphores.

use std::sync::Arc;

use anyhow::Result;
use bitflags::bitflags;

use crate::config::RendererConfig;
use crate::recorder::Recorder;
use crate::vulkan::command::{CommandBuffer, CommandBufferManager};
use crate::vulkan::device::DeviceShared;
use crate::vulkan::sync::{Fence, Semaphore, SemaphoreType};

bitflags! {
    /// Which half(s) of a frame were actually submitted this round (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubmittedMask: u8 {
        const GRAPHICS = 1 << 0;
        const COMPUTE  = 1 << 1;
    }
}

/// One window's acquire state, living on the frame that acquired it (§3 "Virtual frame").
pub struct WindowSync {
    pub available_semaphore: Arc<Semaphore>,
    pub image_index: Option<u32>,
}

pub struct FrameSlot {
    pub fence_graphics: Fence,
    pub fence_compute: Fence,
    pub rendered_semaphore: Arc<Semaphore>,
    pub window_syncs: Vec<WindowSync>,
    pub submitted: SubmittedMask,
}

impl FrameSlot {
    fn new(device: Arc<DeviceShared>) -> Result<Self> {
        Ok(Self {
            fence_graphics: Fence::new(device.clone())?,
            fence_compute: Fence::new(device.clone())?,
            rendered_semaphore: Arc::new(Semaphore::new(device, SemaphoreType::Binary)?),
            window_syncs: Vec::new(),
            submitted: SubmittedMask::empty(),
        })
    }
}

/// A FIFO ring of `frames_in_flight` slots, addressed by a stable index in `[0, N)` (§3).
pub struct FrameRing {
    device: Arc<DeviceShared>,
    slots: Vec<FrameSlot>,
    graphics_commands: CommandBufferManager,
    compute_commands: CommandBufferManager,
    current: usize,
}

impl FrameRing {
    pub fn new(device: Arc<DeviceShared>, config: &RendererConfig) -> Result<Self> {
        let n = config.frames_in_flight as u32;
        let graphics_commands =
            CommandBufferManager::new(device.clone(), device.queue_graphics.family_index, n)?;
        let compute_commands =
            CommandBufferManager::new(device.clone(), device.queue_compute.family_index, n)?;

        let slots = (0..n)
            .map(|_| FrameSlot::new(device.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device,
            slots,
            graphics_commands,
            compute_commands,
            current: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_slot_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    pub fn graphics_command_buffer(&self) -> CommandBuffer {
        self.graphics_commands.command_buffer_at(self.current)
    }

    pub fn compute_command_buffer(&self) -> CommandBuffer {
        self.compute_commands.command_buffer_at(self.current)
    }

    pub fn reset_graphics_pool(&mut self) -> Result<()> {
        self.graphics_commands.reset_pool(self.current)
    }

    pub fn reset_compute_pool(&mut self) -> Result<()> {
        self.compute_commands.reset_pool(self.current)
    }

    /// Grows or shrinks the current slot's window-sync array to match `window_count`,
    /// allocating missing image-available semaphores (§4.5 `acquire` step 1).
    pub fn ensure_window_syncs(&mut self, window_count: usize) -> Result<()> {
        let device = self.device.clone();
        let slot = self.current_slot_mut();
        slot.window_syncs.truncate(window_count);
        while slot.window_syncs.len() < window_count {
            slot.window_syncs.push(WindowSync {
                available_semaphore: Arc::new(Semaphore::new(device.clone(), SemaphoreType::Binary)?),
                image_index: None,
            });
        }
        Ok(())
    }

    /// Waits on whichever fence(s) `submitted` actually set (§4.5 `sync`, §8 property 2:
    /// a frame's resources may not be reused until its fences are observed signaled). When
    /// `reset`, also resets those fences, the command pools, and every active recorder's
    /// pool (§4.5 "sync(frame, reset)").
    pub fn sync(&mut self, reset: bool, recorders: &mut [&mut dyn Recorder]) -> Result<()> {
        let slot = self.current_slot_mut();
        if slot.submitted.contains(SubmittedMask::GRAPHICS) {
            slot.fence_graphics.wait()?;
        }
        if slot.submitted.contains(SubmittedMask::COMPUTE) {
            slot.fence_compute.wait()?;
        }
        if reset {
            if slot.submitted.contains(SubmittedMask::GRAPHICS) {
                slot.fence_graphics.reset()?;
            }
            if slot.submitted.contains(SubmittedMask::COMPUTE) {
                slot.fence_compute.reset()?;
            }
            slot.submitted = SubmittedMask::empty();
            self.reset_graphics_pool()?;
            self.reset_compute_pool()?;
            for recorder in recorders {
                recorder.reset()?;
            }
        }
        Ok(())
    }

    /// Waits on every frame's fences, used before a recreate (§4.5 `acquire` step 3).
    pub fn sync_all(&mut self) -> Result<()> {
        let saved = self.current;
        for index in 0..self.slots.len() {
            self.current = index;
            self.sync(false, &mut [])?;
        }
        self.current = saved;
        Ok(())
    }

    /// Per-frame teardown: sync without reset, then let `FrameSlot`'s `Drop` impls destroy
    /// the semaphores and fences (§4.5 `clear`).
    pub fn clear_current(&mut self) -> Result<()> {
        self.sync(false, &mut [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submitted_mask_tracks_both_halves_independently() {
        let mut mask = SubmittedMask::empty();
        mask |= SubmittedMask::GRAPHICS;
        assert!(mask.contains(SubmittedMask::GRAPHICS));
        assert!(!mask.contains(SubmittedMask::COMPUTE));
        mask |= SubmittedMask::COMPUTE;
        assert_eq!(mask, SubmittedMask::GRAPHICS | SubmittedMask::COMPUTE);
    }
}
