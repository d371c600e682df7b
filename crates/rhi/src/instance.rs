//! Vulkan instance management.
//!
//! This module handles VkInstance creation, the extension and layer checks
//! that gate it, and the validation-layer debug messenger.
//!
//! # Example
//!
//! ```no_run
//! use triangle_rhi::instance::Instance;
//!
//! // Surface extensions normally come from the platform window.
//! let instance = Instance::new(cfg!(debug_assertions), &[])?;
//! let entry = instance.entry();
//! # Ok::<(), triangle_rhi::RhiError>(())
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, trace, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

const APPLICATION_NAME: &CStr = c"Hello Triangle";
const ENGINE_NAME: &CStr = c"No Engine";

/// Vulkan instance wrapper with optional validation layer support.
///
/// Dropping the instance destroys the debug messenger first, then the
/// instance itself. Every object created from it must be gone by then.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Debug utils extension loader (only present when validation is enabled)
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger handle (only present when validation is enabled)
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - Enables the Khronos validation layer and debug messenger
    /// * `surface_extensions` - Platform surface extensions reported by the window system
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the Vulkan library cannot be loaded
    /// - a required extension is not supported ([`RhiError::MissingExtensions`])
    /// - validation is requested but the layer is missing ([`RhiError::MissingLayers`])
    /// - instance or debug messenger creation fails
    pub fn new(enable_validation: bool, surface_extensions: &[*const c_char]) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let mut extensions = surface_extensions.to_vec();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        #[cfg(target_os = "macos")]
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());

        check_instance_extensions(&entry, &extensions)?;

        let layers = if enable_validation {
            check_validation_layer(&entry)?;
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            Vec::new()
        };

        let app_info = vk::ApplicationInfo::default()
            .application_name(APPLICATION_NAME)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let flags = if cfg!(target_os = "macos") {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        // Chained so that instance creation and destruction are covered too.
        let mut messenger_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if enable_validation {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!("Vulkan instance created (API version 1.1)");

        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = match unsafe {
                debug_utils.create_debug_utils_messenger(&debug_messenger_create_info(), None)
            } {
                Ok(messenger) => messenger,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            };
            info!("Validation layers enabled");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Returns the names in `required` that do not appear in `available`.
///
/// Order follows `required`, so error messages list names the way they were
/// requested.
pub fn missing_names(available: &[&CStr], required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn check_instance_extensions(entry: &Entry, extensions: &[*const c_char]) -> RhiResult<()> {
    let properties = unsafe { entry.enumerate_instance_extension_properties(None)? };
    let available: Vec<&CStr> = properties
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .collect();

    // SAFETY: every pointer comes from a `&'static CStr` constant.
    let required: Vec<&CStr> = extensions
        .iter()
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
        .collect();

    let missing = missing_names(&available, &required);
    if !missing.is_empty() {
        error!("Unsupported instance extensions: {:?}", missing);
        return Err(RhiError::MissingExtensions(missing));
    }

    debug!("All {} instance extensions supported", required.len());
    Ok(())
}

fn check_validation_layer(entry: &Entry) -> RhiResult<()> {
    let properties = unsafe { entry.enumerate_instance_layer_properties()? };
    let available: Vec<&CStr> = properties
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .collect();

    let missing = missing_names(&available, &[VALIDATION_LAYER_NAME]);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RhiError::MissingLayers(missing))
    }
}

fn debug_messenger_create_info<'a>() -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
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
        .pfn_user_callback(Some(debug_callback))
}

/// Routes validation-layer messages into `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid callback data pointer or null.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[Vulkan {kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[Vulkan {kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[Vulkan {kind}] {message}"),
        _ => trace!("[Vulkan {kind}] {message}"),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_names_empty_when_all_present() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xlib_surface", c"VK_EXT_debug_utils"];
        let required = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];
        assert!(missing_names(&available, &required).is_empty());
    }

    #[test]
    fn test_missing_names_preserves_request_order() {
        let available = [c"VK_KHR_surface"];
        let required = [c"VK_EXT_debug_utils", c"VK_KHR_surface", c"VK_KHR_wayland_surface"];
        assert_eq!(
            missing_names(&available, &required),
            vec!["VK_EXT_debug_utils", "VK_KHR_wayland_surface"]
        );
    }

    #[test]
    fn test_missing_names_nothing_available() {
        assert_eq!(
            missing_names(&[], &[VALIDATION_LAYER_NAME]),
            vec!["VK_LAYER_KHRONOS_validation"]
        );
    }

    #[test]
    fn test_debug_messenger_severities() {
        let info = debug_messenger_create_info();
        assert!(info.message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
        assert!(info.message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
        assert!(info.message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
        assert!(!info.message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(info.pfn_user_callback.is_some());
    }

    #[test]
    fn test_instance_creation_without_validation() {
        // Needs a Vulkan loader and driver; skipped otherwise.
        match Instance::new(false, &[]) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(e) => eprintln!("Skipping test: {e}"),
        }
    }
}
