//! Window enumeration and screen capture.
//!
//! This module provides the capture provider: window listing in desktop
//! z-order plus raster snapshots of windows, regions, and the full screen.
//! Capture calls are synchronous and return whatever is currently on screen.

use crate::types::{EngineError, Frame, Rect, WindowHandle, WindowId};
use image::{DynamicImage, RgbaImage};
use tracing::{debug, trace};

#[cfg(target_os = "macos")]
mod platform {
    use super::*;
    use core_foundation::array::CFArray;
    use core_foundation::base::{CFType, TCFType};
    use core_foundation::dictionary::CFDictionary;
    use core_foundation::number::CFNumber;
    use core_foundation::string::CFString;
    use core_graphics::display::{CGDisplayBounds, CGMainDisplayID};
    use core_graphics::geometry::{CGPoint, CGRect, CGSize};
    use core_graphics::image::CGImage;
    use core_graphics::window::{
        kCGNullWindowID, kCGWindowImageBestResolution, kCGWindowImageBoundsIgnoreFraming,
        kCGWindowListExcludeDesktopElements, kCGWindowListOptionIncludingWindow,
        kCGWindowListOptionOnScreenOnly, CGWindowListCopyWindowInfo, CGWindowListCreateImage,
    };
    use foreign_types_shared::ForeignType;

    /// Enumerate visible windows, front to back
    pub fn list_windows() -> Vec<WindowHandle> {
        let options = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;

        let window_list: CFArray<CFDictionary<CFString, CFType>> = unsafe {
            let list_ref = CGWindowListCopyWindowInfo(options, kCGNullWindowID);
            if list_ref.is_null() {
                return vec![];
            }
            CFArray::wrap_under_create_rule(list_ref)
        };

        let mut windows = Vec::new();

        // The window list is ordered front-to-back; the first normal window
        // is the one with keyboard focus.
        for i in 0..window_list.len() {
            if let Some(dict) = window_list.get(i) {
                if let Some(mut window) = parse_window_dict(&dict) {
                    window.z_order = windows.len() as u32;
                    window.is_active = windows.is_empty();
                    windows.push(window);
                }
            }
        }

        windows
    }

    fn parse_window_dict(dict: &CFDictionary<CFString, CFType>) -> Option<WindowHandle> {
        let window_id = get_dict_number(dict, "kCGWindowNumber")? as WindowId;
        let pid = get_dict_number(dict, "kCGWindowOwnerPID")? as u32;

        // Skip menu bars, docks, overlays
        let layer = get_dict_number(dict, "kCGWindowLayer").unwrap_or(0);
        if layer != 0 {
            return None;
        }

        let bounds = get_window_bounds(dict)?;

        // Skip tiny windows (tooltips, popups)
        if bounds.width < 50 || bounds.height < 50 {
            return None;
        }

        let title = get_dict_string(dict, "kCGWindowName").unwrap_or_default();
        let app_name = get_dict_string(dict, "kCGWindowOwnerName").unwrap_or_default();

        Some(WindowHandle {
            id: window_id,
            title,
            app_name,
            pid,
            bounds,
            is_active: false,
            z_order: 0,
        })
    }

    fn get_dict_number(dict: &CFDictionary<CFString, CFType>, key: &str) -> Option<i64> {
        let cf_key = CFString::new(key);
        dict.find(&cf_key).and_then(|value| {
            if value.type_of() == CFNumber::type_id() {
                let num: CFNumber =
                    unsafe { CFNumber::wrap_under_get_rule(value.as_CFTypeRef() as *const _) };
                num.to_i64()
            } else {
                None
            }
        })
    }

    fn get_dict_string(dict: &CFDictionary<CFString, CFType>, key: &str) -> Option<String> {
        let cf_key = CFString::new(key);
        dict.find(&cf_key).and_then(|value| {
            if value.type_of() == CFString::type_id() {
                let s: CFString =
                    unsafe { CFString::wrap_under_get_rule(value.as_CFTypeRef() as *const _) };
                Some(s.to_string())
            } else {
                None
            }
        })
    }

    fn get_window_bounds(dict: &CFDictionary<CFString, CFType>) -> Option<Rect> {
        let cf_key = CFString::new("kCGWindowBounds");
        let bounds_value = dict.find(&cf_key)?;

        if bounds_value.type_of() != CFDictionary::<CFString, CFType>::type_id() {
            return None;
        }

        let bounds: CFDictionary<CFString, CFType> = unsafe {
            CFDictionary::wrap_under_get_rule(bounds_value.as_CFTypeRef() as *const _)
        };

        let x = get_dict_number_f64(&bounds, "X")? as i32;
        let y = get_dict_number_f64(&bounds, "Y")? as i32;
        let width = get_dict_number_f64(&bounds, "Width")? as u32;
        let height = get_dict_number_f64(&bounds, "Height")? as u32;

        Some(Rect::new(x, y, width, height))
    }

    fn get_dict_number_f64(dict: &CFDictionary<CFString, CFType>, key: &str) -> Option<f64> {
        let cf_key = CFString::new(key);
        dict.find(&cf_key).and_then(|value| {
            if value.type_of() == CFNumber::type_id() {
                let num: CFNumber =
                    unsafe { CFNumber::wrap_under_get_rule(value.as_CFTypeRef() as *const _) };
                num.to_f64()
            } else {
                None
            }
        })
    }

    /// Capture a specific window by ID
    pub fn capture_window(window_id: WindowId, bounds: &Rect) -> Option<RgbaImage> {
        let rect = CGRect::new(
            &CGPoint::new(bounds.x as f64, bounds.y as f64),
            &CGSize::new(bounds.width as f64, bounds.height as f64),
        );

        let options = kCGWindowImageBoundsIgnoreFraming | kCGWindowImageBestResolution;

        let cg_image: CGImage = unsafe {
            let image_ref = CGWindowListCreateImage(
                rect,
                kCGWindowListOptionIncludingWindow,
                window_id as u32,
                options,
            );
            if image_ref.is_null() {
                return None;
            }
            CGImage::from_ptr(image_ref)
        };

        convert_cgimage_to_rgba(&cg_image)
    }

    /// Capture an arbitrary desktop region
    pub fn capture_region(region: &Rect) -> Option<RgbaImage> {
        let rect = CGRect::new(
            &CGPoint::new(region.x as f64, region.y as f64),
            &CGSize::new(region.width as f64, region.height as f64),
        );

        let cg_image: CGImage = unsafe {
            let image_ref = CGWindowListCreateImage(
                rect,
                0, // kCGWindowListOptionAll
                0, // kCGNullWindowID
                kCGWindowImageBestResolution,
            );
            if image_ref.is_null() {
                return None;
            }
            CGImage::from_ptr(image_ref)
        };

        convert_cgimage_to_rgba(&cg_image)
    }

    /// Bounds of the main display in desktop coordinates
    pub fn main_display_bounds() -> Rect {
        let bounds = unsafe { CGDisplayBounds(CGMainDisplayID()) };
        Rect::new(
            bounds.origin.x as i32,
            bounds.origin.y as i32,
            bounds.size.width as u32,
            bounds.size.height as u32,
        )
    }

    /// Convert CGImage to the image crate's RgbaImage
    fn convert_cgimage_to_rgba(cg_image: &CGImage) -> Option<RgbaImage> {
        let width = cg_image.width();
        let height = cg_image.height();
        let bytes_per_row = cg_image.bytes_per_row();
        let bits_per_pixel = cg_image.bits_per_pixel();

        let data = cg_image.data();
        let bytes = data.bytes();

        if bytes.is_empty() {
            return None;
        }

        // CGImage is typically BGRA on macOS
        let mut rgba_data = Vec::with_capacity(width * height * 4);

        for y in 0..height {
            let row_start = y * bytes_per_row;
            for x in 0..width {
                let pixel_start = row_start + x * (bits_per_pixel / 8);
                if pixel_start + 3 < bytes.len() {
                    let b = bytes[pixel_start];
                    let g = bytes[pixel_start + 1];
                    let r = bytes[pixel_start + 2];
                    let a = bytes[pixel_start + 3];
                    rgba_data.extend_from_slice(&[r, g, b, a]);
                }
            }
        }

        RgbaImage::from_raw(width as u32, height as u32, rgba_data)
    }
}

#[cfg(not(target_os = "macos"))]
mod platform {
    use super::*;

    pub fn list_windows() -> Vec<WindowHandle> {
        vec![]
    }

    pub fn capture_window(_window_id: WindowId, _bounds: &Rect) -> Option<RgbaImage> {
        None
    }

    pub fn capture_region(_region: &Rect) -> Option<RgbaImage> {
        None
    }

    pub fn main_display_bounds() -> Rect {
        Rect::default()
    }
}

/// Window enumeration and raster capture.
///
/// Capture calls fail with [`EngineError::Capture`] when the target window
/// has closed between enumeration and capture; callers treat that as
/// "entity vanished", not fatal.
pub trait CaptureProvider: Send + Sync {
    /// All visible windows in desktop z-order, front to back
    fn list_windows(&self) -> Result<Vec<WindowHandle>, EngineError>;

    /// The window with keyboard focus, if any
    fn active_window(&self) -> Result<Option<WindowHandle>, EngineError> {
        Ok(self.list_windows()?.into_iter().find(|w| w.is_active))
    }

    /// Snapshot a single window
    fn capture_window(&self, window: &WindowHandle) -> Result<Frame, EngineError>;

    /// Snapshot an arbitrary desktop region
    fn capture_region(&self, region: Rect) -> Result<Frame, EngineError>;

    /// Snapshot the entire main display
    fn capture_full_screen(&self) -> Result<Frame, EngineError>;
}

/// OS-backed capture provider
pub struct SystemCapture;

impl SystemCapture {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureProvider for SystemCapture {
    fn list_windows(&self) -> Result<Vec<WindowHandle>, EngineError> {
        let windows = platform::list_windows();
        debug!("Enumerated {} windows", windows.len());
        Ok(windows)
    }

    fn capture_window(&self, window: &WindowHandle) -> Result<Frame, EngineError> {
        trace!("Capturing window {} ({})", window.id, window.title);

        match platform::capture_window(window.id, &window.bounds) {
            Some(image) => Ok(Frame::new(DynamicImage::ImageRgba8(image), window.bounds)),
            None => Err(EngineError::Capture(format!(
                "window {} ({}) is no longer capturable",
                window.id, window.title
            ))),
        }
    }

    fn capture_region(&self, region: Rect) -> Result<Frame, EngineError> {
        if region.area() == 0 {
            return Err(EngineError::Capture("empty capture region".to_string()));
        }

        match platform::capture_region(&region) {
            Some(image) => Ok(Frame::new(DynamicImage::ImageRgba8(image), region)),
            None => Err(EngineError::Capture(format!(
                "region {:?} could not be captured",
                region
            ))),
        }
    }

    fn capture_full_screen(&self) -> Result<Frame, EngineError> {
        let bounds = platform::main_display_bounds();
        self.capture_region(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_region_rejected() {
        let provider = SystemCapture::new();
        let err = provider.capture_region(Rect::default()).unwrap_err();
        assert!(matches!(err, EngineError::Capture(_)));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_stub_platform_lists_nothing() {
        let provider = SystemCapture::new();
        assert!(provider.list_windows().unwrap().is_empty());
        assert!(provider.active_window().unwrap().is_none());
    }
}
