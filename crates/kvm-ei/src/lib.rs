//! kvm-ei library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does kvm-ei do? (for beginners)
//!
//! On X11 a KVM client injects forwarded keyboard and mouse events with
//! XTest.  Wayland compositors do not allow that: a client may only inject
//! input through the *emulated input* protocol, libei, after the compositor
//! (usually via the remote-desktop portal) has granted it a seat.
//!
//! kvm-ei is the Wayland backend of the client:
//!
//! 1. Connects to the compositor's EIS server, through the portal if
//!    possible and through the raw socket otherwise.
//! 2. Waits for the compositor to announce a seat, then creates one virtual
//!    device with pointer, absolute pointer, and keyboard capabilities, sized
//!    to the desktop.
//! 3. Injects pointer motion and buttons once the compositor resumes the
//!    device.
//! 4. Wakes the application's single event loop both for libei traffic and
//!    for custom events queued by other threads, using one `poll(2)` call
//!    over the libei socket and a self-pipe.
//!
//! If the compositor removes the device or seat, suspends the device, or
//! disconnects, the session is over: the backend reports a fault and rejects
//! further injection.

/// Domain layer: seat/device handles, libei notifications, geometry.
pub mod domain;

/// Application layer: device lifecycle, key state, and screen shape use cases.
pub mod application;

/// Infrastructure layer: event queue, libei connection, config, screen facade.
pub mod infrastructure;
