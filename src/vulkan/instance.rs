use std::ffi::{c_void, CStr, CString};

use anyhow::Result;
use ash::ext::debug_utils;
use ash::vk;
use raw_window_handle::RawDisplayHandle;

use super::surface::Surface;

pub(crate) struct Instance {
    pub(crate) entry: ash::Entry,
    pub(crate) raw: ash::Instance,
    debug_utils: debug_utils::Instance,
    debug_utils_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    pub(crate) fn new(display_handle: RawDisplayHandle, enable_validation: bool) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let app_name = CString::new("forge").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .api_version(vk::API_VERSION_1_3);

        let mut extension_names =
            ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        if enable_validation {
            extension_names.push(debug_utils::NAME.as_ptr());
        }

        let layer_strings = if enable_validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            Vec::new()
        };
        let layer_names: Vec<*const i8> =
            layer_strings.iter().map(|c_str| c_str.as_ptr()).collect();

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let raw = unsafe { entry.create_instance(&instance_info, None)? };

        let debug_utils = debug_utils::Instance::new(&entry, &raw);
        let debug_utils_messenger = if enable_validation {
            let debug_utils_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .flags(vk::DebugUtilsMessengerCreateFlagsEXT::empty())
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_utils_callback));
            Some(unsafe { debug_utils.create_debug_utils_messenger(&debug_utils_info, None)? })
        } else {
            None
        };

        Ok(Self {
            entry,
            raw,
            debug_utils,
            debug_utils_messenger,
        })
    }

    pub(crate) fn get_physical_devices(&self, surface: &Surface) -> Result<Vec<PhysicalDevice>> {
        let physical_devices = unsafe { self.raw.enumerate_physical_devices()? };
        physical_devices
            .into_iter()
            .map(|phys_device| {
                PhysicalDevice::new_from_vulkan_handle(&self.raw, surface, phys_device)
            })
            .collect::<Result<_>>()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::trace!("instance dropped");
        unsafe {
            if let Some(messenger) = self.debug_utils_messenger {
                self.debug_utils
                    .destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_utils_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let severity = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => "[verbose]",
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => "[warning]",
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => "[error]",
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => "[info]",
        _ => "[unknown]",
    };
    let types = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[general]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[validation]",
        _ => "[unknown]",
    };
    let message = CStr::from_ptr((*p_callback_data).p_message);
    log::debug!("[vk debug]{}{}{:?}", severity, types, message);

    vk::FALSE
}

#[derive(Debug, Clone)]
pub(crate) struct PhysicalDevice {
    pub(crate) raw: vk::PhysicalDevice,
    pub(crate) name: String,
    device_type: vk::PhysicalDeviceType,
    _limits: vk::PhysicalDeviceLimits,
    _properties: vk::PhysicalDeviceProperties,
    pub(crate) queue_families: Vec<QueueFamily>,
    _supported_extensions: Vec<String>,
}

impl PhysicalDevice {
    fn new_from_vulkan_handle(
        instance: &ash::Instance,
        surface: &Surface,
        raw: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(raw) };
        let name = unsafe {
            CStr::from_ptr(properties.device_name.as_ptr())
                .to_str()
                .unwrap()
                .to_owned()
        };
        let device_type = properties.device_type;
        let limits = properties.limits;

        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(raw) };
        let queue_families = queue_family_properties
            .into_iter()
            .enumerate()
            .map(|(index, prop)| {
                let present_support = unsafe {
                    surface.loader.get_physical_device_surface_support(
                        raw,
                        index as _,
                        surface.raw,
                    )?
                };
                Ok(QueueFamily::new(index as _, prop, present_support))
            })
            .collect::<Result<_>>()?;

        let extension_properties = unsafe { instance.enumerate_device_extension_properties(raw)? };
        let supported_extensions = extension_properties
            .into_iter()
            .map(|prop| {
                let name = unsafe { CStr::from_ptr(prop.extension_name.as_ptr()) };
                name.to_str().unwrap().to_owned()
            })
            .collect();

        Ok(Self {
            raw,
            name,
            device_type,
            _limits: limits,
            _properties: properties,
            queue_families,
            _supported_extensions: supported_extensions,
        })
    }
}

/// Selects the first discrete GPU found from the list of physical devices.
pub(crate) fn select_discrete_gpu(devices: &[PhysicalDevice]) -> Result<PhysicalDevice> {
    let device = devices
        .iter()
        .find(|device| device.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
        .ok_or_else(|| anyhow::anyhow!("discrete GPU not found"))?;

    Ok(device.clone())
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueFamily {
    pub(crate) index: u32,
    properties: vk::QueueFamilyProperties,
    pub(crate) supports_present: bool,
}

impl QueueFamily {
    fn new(index: u32, properties: vk::QueueFamilyProperties, supports_present: bool) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    fn supports_graphics(&self) -> bool {
        self.properties
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS)
    }

    fn supports_compute(&self) -> bool {
        self.properties
            .queue_flags
            .contains(vk::QueueFlags::COMPUTE)
    }

    fn supports_transfer(&self) -> bool {
        self.properties
            .queue_flags
            .contains(vk::QueueFlags::TRANSFER)
    }
}

pub(crate) const QUEUE_FAMILY_INDEX_GRAPHICS: usize = 0;
pub(crate) const QUEUE_FAMILY_INDEX_PRESENT: usize = 1;
pub(crate) const QUEUE_FAMILY_INDEX_COMPUTE: usize = 2;
pub(crate) const QUEUE_FAMILY_INDEX_TRANSFER: usize = 3;

/// Selects separate queue family indices for graphics, compute, and transfer functionality.
/// Returns 4 entries in this order: graphics, present, compute and transfer.
///
/// Falls back to sharing the graphics family for compute when the device exposes no
/// dedicated async-compute family, so the async-compute pass type degrades to running
/// serialized on the graphics family rather than failing device selection.
pub(crate) fn select_queue_families(device: &PhysicalDevice) -> Vec<QueueFamily> {
    let mut graphics = None;
    let mut present = None;
    let mut compute = None;
    let mut transfer = None;

    for family in device
        .queue_families
        .iter()
        .filter(|family| family.properties.queue_count > 0)
    {
        if family.supports_graphics() && graphics.is_none() {
            graphics = Some(*family);
            assert!(family.supports_present);
            present = Some(*family);
        } else if family.supports_compute() && compute.is_none() {
            compute = Some(*family);
        } else if family.supports_transfer() && !family.supports_compute() && transfer.is_none() {
            transfer = Some(*family);
        }
    }

    let graphics = graphics.expect("device must expose a graphics queue family");
    let present = present.unwrap_or(graphics);
    let compute = compute.unwrap_or(graphics);
    let transfer = transfer.unwrap_or(compute);

    vec![graphics, present, compute, transfer]
}
