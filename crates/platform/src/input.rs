//! Keyboard and mouse state passed explicitly into the per-frame update.
//!
//! The application owns one [`InputContext`], feeds it window events, hands
//! a shared reference to the engine each frame and then calls
//! [`InputContext::end_frame`] to clear per-frame deltas.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn from_winit(button: winit::event::MouseButton) -> Option<Self> {
        match button {
            winit::event::MouseButton::Left => Some(MouseButton::Left),
            winit::event::MouseButton::Right => Some(MouseButton::Right),
            winit::event::MouseButton::Middle => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct InputContext {
    pressed_keys: HashSet<KeyCode>,
    just_pressed_keys: HashSet<KeyCode>,
    pressed_buttons: HashSet<MouseButton>,
    /// `None` until the first cursor event, so the first move yields no delta.
    cursor: Option<(f32, f32)>,
    mouse_delta: (f32, f32),
}

impl InputContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears edge-triggered state. Call after the frame consumed the input.
    pub fn end_frame(&mut self) {
        self.just_pressed_keys.clear();
        self.mouse_delta = (0.0, 0.0);
    }

    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
        }
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    pub fn on_mouse_pressed(&mut self, button: MouseButton) {
        self.pressed_buttons.insert(button);
    }

    pub fn on_mouse_released(&mut self, button: MouseButton) {
        self.pressed_buttons.remove(&button);
    }

    /// Accumulates cursor travel since the last [`end_frame`](Self::end_frame).
    pub fn on_cursor_moved(&mut self, x: f32, y: f32) {
        if let Some((old_x, old_y)) = self.cursor {
            self.mouse_delta.0 += x - old_x;
            self.mouse_delta.1 += y - old_y;
        }
        self.cursor = Some((x, y));
    }

    /// Drops all held keys and buttons, e.g. when the window loses focus.
    pub fn clear(&mut self) {
        self.pressed_keys.clear();
        self.pressed_buttons.clear();
        self.cursor = None;
        self.end_frame();
    }

    #[inline]
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    #[inline]
    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    #[inline]
    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.pressed_buttons.contains(&button)
    }

    #[inline]
    pub fn mouse_delta(&self) -> (f32, f32) {
        self.mouse_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_edges() {
        let mut input = InputContext::new();
        input.on_key_pressed(KeyCode::KeyW);
        assert!(input.is_key_pressed(KeyCode::KeyW));
        assert!(input.is_key_just_pressed(KeyCode::KeyW));

        input.end_frame();
        // Held, but no longer a fresh press.
        input.on_key_pressed(KeyCode::KeyW);
        assert!(input.is_key_pressed(KeyCode::KeyW));
        assert!(!input.is_key_just_pressed(KeyCode::KeyW));

        input.on_key_released(KeyCode::KeyW);
        assert!(!input.is_key_pressed(KeyCode::KeyW));
    }

    #[test]
    fn mouse_delta_accumulates_until_end_frame() {
        let mut input = InputContext::new();
        input.on_cursor_moved(100.0, 100.0);
        assert_eq!(input.mouse_delta(), (0.0, 0.0));

        input.on_cursor_moved(110.0, 95.0);
        input.on_cursor_moved(115.0, 90.0);
        assert_eq!(input.mouse_delta(), (15.0, -10.0));

        input.end_frame();
        assert_eq!(input.mouse_delta(), (0.0, 0.0));
    }

    #[test]
    fn clear_releases_everything() {
        let mut input = InputContext::new();
        input.on_key_pressed(KeyCode::Space);
        input.on_mouse_pressed(MouseButton::Right);
        input.clear();
        assert!(!input.is_key_pressed(KeyCode::Space));
        assert!(!input.is_mouse_pressed(MouseButton::Right));
    }

    #[test]
    fn unknown_winit_buttons_are_ignored() {
        assert_eq!(
            MouseButton::from_winit(winit::event::MouseButton::Back),
            None
        );
        assert_eq!(
            MouseButton::from_winit(winit::event::MouseButton::Right),
            Some(MouseButton::Right)
        );
    }
}
