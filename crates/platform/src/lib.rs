//! Platform layer: winit window, Vulkan surface and input context.

mod input;
mod window;

pub use input::{InputContext, KeyCode, MouseButton};
pub use window::{Surface, Window};

pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
