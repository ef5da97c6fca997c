//! Domain types shared by the application and infrastructure layers.
//!
//! # What lives here?
//!
//! - **`ei`** – The vocabulary of the libei emulated-input protocol as this
//!   crate sees it: reference-counted [`ei::Seat`] and [`ei::Device`] handles,
//!   the device capabilities we request, and the [`ei::EiEvent`] notifications
//!   the compositor sends us.
//!
//! - **`geometry`** – The [`geometry::ScreenShape`] rectangle used to configure
//!   the absolute pointer range of the virtual device.
//!
//! Nothing in this module performs I/O.

pub mod ei;
pub mod geometry;
