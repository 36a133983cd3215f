// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use prism_render::RenderConfig;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

/// Instance-scoped objects. Dropping destroys the surface, the debug
/// messenger and then the instance, so the logical device must go first.
pub struct VkInstance {
    pub(crate) entry: Entry,
    pub(crate) raw: ash::Instance,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VkInstance {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        config: &RenderConfig,
    ) -> Result<Self> {
        // STRICT ORDER:
        // 1) Instance with WSI (+ debug utils when validating)
        // 2) Debug messenger
        // 3) Surface FROM THIS INSTANCE; device selection tests present support against it
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))
            .context("Get display handle failed")?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))
            .context("Get window handle failed")?
            .as_raw();

        let entry = unsafe { Entry::load() }.context("Load Vulkan loader failed")?;
        let validation = config.features.validation() && unsafe { layer_available(&entry) };

        let raw = unsafe { create_instance(&entry, dh, config, validation) }
            .context("Create Vulkan instance failed")?;
        let surface_loader = surface::Instance::new(&entry, &raw);

        let mut this = Self {
            entry,
            raw,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
            debug: None,
        };

        if validation {
            this.debug = Some(
                unsafe { create_debug_messenger(&this.entry, &this.raw) }
                    .context("Create debug messenger failed")?,
            );
            info!("validation layer enabled");
        }

        this.surface = unsafe { ash_window::create_surface(&this.entry, &this.raw, dh, wh, None) }
            .context("Create window surface failed")?;

        Ok(this)
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for VkInstance {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

unsafe fn layer_available(entry: &Entry) -> bool {
    let found = entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().map_or(false, |n| n == VALIDATION_LAYER));
    if !found {
        warn!(
            "{} requested but not installed; continuing without validation",
            VALIDATION_LAYER.to_string_lossy()
        );
    }
    found
}

fn pack_version((major, minor, patch): (u32, u32, u32)) -> u32 {
    vk::make_api_version(0, major, minor, patch)
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    config: &RenderConfig,
    validation: bool,
) -> Result<ash::Instance> {
    let app_name =
        CString::new(config.app_name.as_str()).context("Application name contains a NUL byte")?;
    let engine_name =
        CString::new(config.engine_name.as_str()).context("Engine name contains a NUL byte")?;
    let api = config.features.min_api_version();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: pack_version(config.app_version),
        p_engine_name: engine_name.as_ptr(),
        engine_version: pack_version(config.engine_version),
        api_version: vk::make_api_version(0, api.major, api.minor, 0),
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("Query required surface extensions failed")?
        .to_vec();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }

    let layers: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    Ok(entry.create_instance(&create_info, None)?)
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader.create_debug_utils_messenger(&ci, None)?;
    Ok((loader, messenger))
}
