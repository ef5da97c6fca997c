//! Key state polling for the Wayland screen.
//!
//! The outer screen layer expects a key-state object it can ask for the
//! active modifiers, the keyboard group, the currently pressed keys and the
//! key map.  None of that is observable through libei, so [`WaylandKeyState`]
//! answers every query with an empty default.

use tracing::debug;

/// Bit mask of active modifier keys.
pub type KeyModifierMask = u32;

/// A synthetic keystroke requested by the outer key-state machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keystroke {
    /// Platform key button (evdev code).
    pub button: u16,
    pub press: bool,
    /// `true` for auto-repeat strokes.
    pub repeat: bool,
}

/// Capability interface the screen exposes for keyboard state.
pub trait KeyStatePoller: Send {
    /// Synthesizes Ctrl+Alt+Del.  Returns `false` to let the keys pass
    /// through unchanged.
    fn fake_ctrl_alt_del(&mut self) -> bool;

    fn poll_active_modifiers(&self) -> KeyModifierMask;

    fn poll_active_group(&self) -> i32;

    /// Returns the buttons that are currently held down.
    fn poll_pressed_keys(&self) -> Vec<u16>;

    /// Rebuilds the key map from the platform keymap.
    fn update_key_map(&mut self);

    fn fake_key(&mut self, keystroke: Keystroke);
}

/// Key state for the libei backend.  Every query returns an empty default.
#[derive(Debug, Default)]
pub struct WaylandKeyState;

impl WaylandKeyState {
    pub fn new() -> Self {
        Self
    }
}

impl KeyStatePoller for WaylandKeyState {
    fn fake_ctrl_alt_del(&mut self) -> bool {
        debug!("fake_ctrl_alt_del: not available on this backend");
        false
    }

    fn poll_active_modifiers(&self) -> KeyModifierMask {
        debug!("poll_active_modifiers: not available on this backend");
        0
    }

    fn poll_active_group(&self) -> i32 {
        debug!("poll_active_group: not available on this backend");
        0
    }

    fn poll_pressed_keys(&self) -> Vec<u16> {
        debug!("poll_pressed_keys: not available on this backend");
        Vec::new()
    }

    fn update_key_map(&mut self) {
        debug!("update_key_map: not available on this backend");
    }

    fn fake_key(&mut self, keystroke: Keystroke) {
        debug!(?keystroke, "fake_key: not available on this backend");
    }
}
