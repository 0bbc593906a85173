//! Thin, idiomatic wrappers around the raw Vulkan (ash) API. Everything above this module
//! operates in terms of these types and never touches `ash::vk` handles directly except
//! when deriving barriers.

pub(crate) mod command;
pub(crate) mod device;
pub(crate) mod instance;
pub(crate) mod queue;
pub mod resource;
pub(crate) mod surface;
pub(crate) mod swapchain;
pub(crate) mod sync;

pub(crate) use device::DeviceShared;
pub(crate) use instance::{
    QUEUE_FAMILY_INDEX_COMPUTE, QUEUE_FAMILY_INDEX_GRAPHICS, QUEUE_FAMILY_INDEX_PRESENT,
    QUEUE_FAMILY_INDEX_TRANSFER,
};
pub(crate) use queue::{Queue, QueueSubmitSemaphoreDescriptor};
pub(crate) use sync::{Fence, Semaphore, SemaphoreType};
