//! Application layer use cases for the libei backend.
//!
//! # What use cases does the backend have?
//!
//! - **`device_lifecycle`** – Consumes libei notifications, binds the first
//!   seat, creates and configures the virtual pointer/keyboard device, and
//!   injects pointer input once the compositor resumes the device.  The
//!   actual protocol calls go through an [`device_lifecycle::EiContext`]
//!   implementation injected at construction time.
//!
//! - **`screen_shape`** – The source of the desktop rectangle used to set the
//!   absolute pointer range.
//!
//! - **`key_state`** – The keyboard-state capability interface expected by the
//!   outer screen layer, with the empty-default Wayland implementation.

pub mod device_lifecycle;
pub mod key_state;
pub mod screen_shape;
