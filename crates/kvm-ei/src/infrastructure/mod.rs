//! Infrastructure layer for the libei backend.
//!
//! Contains the OS-facing adapters: the `poll(2)`-based event queue, the
//! libei connection, configuration loading, and the screen facade that ties
//! them together.
//!
//! **Dependency rule**: this layer may depend on `application` and `domain`,
//! but MUST NOT be imported by them.
//!
//! # Sub-modules
//!
//! - **`config`** – TOML configuration with serde defaults.
//!
//! - **`ei`** – the `EiConnector` seam, the portal-then-socket connection
//!   policy, and an in-process mock context that exposes a real pollable
//!   descriptor.
//!
//! - **`event_queue`** – the generic `EventQueue` and the libei polling
//!   backend (`EiEventQueueBuffer`) built on a self-pipe.
//!
//! - **`screen`** – `WaylandScreen`, the secondary-screen facade.

pub mod config;
pub mod ei;
pub mod event_queue;
pub mod screen;
