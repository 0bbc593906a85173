//! Attachment registry (Component A, §4.1). Typed slots holding either a window backing
//! or a plain image allocation, indexed by a stable `AttachmentIndex`.

use std::sync::Arc;

use anyhow::{bail, Result};
use ash::vk;

use crate::swapchain::{RecreateFlags, WindowId};
use crate::vulkan::resource::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentIndex(pub usize);

pub enum AttachmentSlot {
    Empty,
    Window {
        window: WindowId,
        format: vk::Format,
        extent: vk::Extent2D,
        /// Accumulates recreate-flags reported by the swapchain coordinator's `acquire`
        /// until the next frame's warmup consumes and clears them.
        recreate_flags: RecreateFlags,
    },
    Image {
        image: Arc<Image>,
        mip_levels: u32,
        layer_count: u32,
    },
}

impl AttachmentSlot {
    pub fn is_empty(&self) -> bool {
        matches!(self, AttachmentSlot::Empty)
    }

    pub fn format(&self) -> Option<vk::Format> {
        match self {
            AttachmentSlot::Empty => None,
            AttachmentSlot::Window { format, .. } => Some(*format),
            AttachmentSlot::Image { image, .. } => Some(image.format),
        }
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        match self {
            AttachmentSlot::Empty => None,
            AttachmentSlot::Window { extent, .. } => Some(*extent),
            AttachmentSlot::Image { image, .. } => Some(vk::Extent2D {
                width: image.extent.width,
                height: image.extent.height,
            }),
        }
    }
}

/// Owns every attachment slot. Mutation outside of a frame is unrestricted; while a frame
/// is recording, only a window slot's recreate-flag accumulator may be OR-ed (§4.1).
pub struct AttachmentRegistry {
    slots: Vec<AttachmentSlot>,
    recording: bool,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            recording: false,
        }
    }

    pub(crate) fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn add_slot(&mut self, slot: AttachmentSlot) -> Result<AttachmentIndex> {
        if self.recording {
            bail!("cannot add attachment slots while a frame is recording");
        }
        self.slots.push(slot);
        Ok(AttachmentIndex(self.slots.len() - 1))
    }

    pub fn replace_slot(&mut self, index: AttachmentIndex, slot: AttachmentSlot) -> Result<()> {
        if self.recording {
            bail!("cannot replace attachment slot {} while a frame is recording", index.0);
        }
        self.slots[index.0] = slot;
        Ok(())
    }

    /// OR's `flags` into a window slot's recreate-flag accumulator. Allowed even while
    /// recording, since this is the one mutation §4.1 explicitly permits mid-frame.
    pub fn or_window_recreate_flags(&mut self, index: AttachmentIndex, flags: RecreateFlags) {
        if let AttachmentSlot::Window { recreate_flags, .. } = &mut self.slots[index.0] {
            *recreate_flags |= flags;
        }
    }

    /// Reads and clears a window slot's accumulated recreate-flags.
    pub fn take_window_recreate_flags(&mut self, index: AttachmentIndex) -> RecreateFlags {
        match &mut self.slots[index.0] {
            AttachmentSlot::Window { recreate_flags, .. } => std::mem::take(recreate_flags),
            _ => RecreateFlags::empty(),
        }
    }

    pub fn get(&self, index: AttachmentIndex) -> &AttachmentSlot {
        &self.slots[index.0]
    }

    pub fn is_empty(&self, index: AttachmentIndex) -> bool {
        self.slots[index.0].is_empty()
    }

    pub fn enumerate(&self) -> impl Iterator<Item = (AttachmentIndex, &AttachmentSlot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (AttachmentIndex(i), slot))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty_registry(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for AttachmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_slots_while_recording_is_rejected() {
        let mut registry = AttachmentRegistry::new();
        registry.set_recording(true);
        let result = registry.add_slot(AttachmentSlot::Empty);
        assert!(result.is_err());
    }

    #[test]
    fn window_recreate_flags_accumulate_and_can_be_taken_while_recording() {
        let mut registry = AttachmentRegistry::new();
        registry
            .add_slot(AttachmentSlot::Window {
                window: WindowId(0),
                format: ash::vk::Format::B8G8R8A8_UNORM,
                extent: ash::vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                recreate_flags: RecreateFlags::empty(),
            })
            .unwrap();
        registry.set_recording(true);

        registry.or_window_recreate_flags(AttachmentIndex(0), RecreateFlags::RECREATE | RecreateFlags::RESIZE);
        let flags = registry.take_window_recreate_flags(AttachmentIndex(0));
        assert!(flags.contains(RecreateFlags::RECREATE));
        assert!(flags.contains(RecreateFlags::RESIZE));

        let flags_after = registry.take_window_recreate_flags(AttachmentIndex(0));
        assert!(flags_after.is_empty());
    }

    #[test]
    fn empty_slot_reports_is_empty() {
        let mut registry = AttachmentRegistry::new();
        let index = registry.add_slot(AttachmentSlot::Empty).unwrap();
        assert!(registry.is_empty(index));
    }
}
