//! winit window and Vulkan surface creation.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use umbra_core::{Error, Result};

/// A `VkSurfaceKHR` destroyed when dropped. Must be dropped before the
/// instance that created it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface from the same instance
        // as `loader`; this is the only place it is destroyed.
        unsafe { self.loader.destroy_surface(self.handle, None) };
        tracing::debug!("Vulkan surface destroyed");
    }
}

pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);
        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;
        tracing::info!("Window created: {}x{}", width, height);
        Ok(Self {
            window: Arc::new(window),
        })
    }

    /// Current drawable size in physical pixels. Either side may be zero
    /// while minimized.
    pub fn inner_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    pub fn required_extensions(&self) -> Result<&'static [*const c_char]> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("failed to get display handle: {e}")))?;
        ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| Error::Vulkan(format!("failed to enumerate surface extensions: {e}")))
    }

    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("failed to get display handle: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("failed to get window handle: {e}")))?;

        // SAFETY: entry and instance are live, and the raw handles come from a
        // window that outlives the surface (the app drops the engine first).
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display.as_raw(), window.as_raw(), None)
                .map_err(|e| Error::Vulkan(format!("failed to create Vulkan surface: {e}")))?
        };
        let loader = ash::khr::surface::Instance::new(entry, instance);
        tracing::info!("Vulkan surface created");
        Ok(Surface { handle, loader })
    }
}
