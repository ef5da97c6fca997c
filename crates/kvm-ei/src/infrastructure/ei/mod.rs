//! Establishing a libei protocol context.
//!
//! # Transports (for beginners)
//!
//! A libei client can reach the compositor's EIS server in two ways:
//!
//! | Transport | How it works                                                  |
//! |-----------|---------------------------------------------------------------|
//! | Portal    | Ask `org.freedesktop.portal.RemoteDesktop` over D-Bus; the    |
//! |           | user confirms, and the portal hands back a connected socket.  |
//! | Socket    | Connect directly to a Unix socket (`$LIBEI_SOCKET` or an      |
//! |           | explicit path).  Typical for nested compositors and testing.  |
//!
//! The portal is preferred because it works inside sandboxes and lets the
//! user approve the session.  When it is unavailable the bridge falls back to
//! the raw socket.  [`connect_with_fallback`] implements that policy on top
//! of any [`EiConnector`]: [`reis::ReisConnector`] for a real compositor, or
//! [`mock::MockEiConnector`] in tests.

pub mod mock;
pub mod reis;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::application::device_lifecycle::EiContext;
use crate::infrastructure::config::EiConfig;

/// Environment variable naming the EIS socket when no path is configured.
pub const LIBEI_SOCKET_ENV: &str = "LIBEI_SOCKET";

/// The way a context reached the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Portal,
    Socket,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Portal => f.write_str("portal"),
            Transport::Socket => f.write_str("socket"),
        }
    }
}

/// Error type for context setup.
#[derive(Debug, Error)]
pub enum EiError {
    /// The transport could not be used.
    #[error("libei {transport} backend unavailable: {reason}")]
    Unavailable { transport: Transport, reason: String },

    #[error("I/O error while setting up libei context: {0}")]
    Io(#[from] std::io::Error),

    /// A system call needed by the context failed.
    #[error("system error while setting up libei context: {0}")]
    Sys(#[from] nix::Error),
}

/// Creates protocol contexts over a specific transport.
pub trait EiConnector {
    /// Connects through the remote-desktop portal.
    ///
    /// # Errors
    ///
    /// Returns [`EiError`] if the portal is missing or refuses the session.
    fn connect_portal(&self, client_name: &str) -> Result<Arc<dyn EiContext>, EiError>;

    /// Connects to an EIS socket.  `None` means the connector's own default.
    ///
    /// # Errors
    ///
    /// Returns [`EiError`] if the socket cannot be reached.
    fn connect_socket(
        &self,
        client_name: &str,
        socket_path: Option<&Path>,
    ) -> Result<Arc<dyn EiContext>, EiError>;
}

/// Connects using the portal first and the socket second.
///
/// The socket path is `config.socket_path`, else `$LIBEI_SOCKET`, else the
/// connector's default.
///
/// # Errors
///
/// Returns the socket transport's error when both transports fail.
pub fn connect_with_fallback(
    connector: &dyn EiConnector,
    config: &EiConfig,
) -> Result<(Arc<dyn EiContext>, Transport), EiError> {
    if config.use_portal {
        match connector.connect_portal(&config.client_name) {
            Ok(context) => {
                info!("connected to EIS through the remote-desktop portal");
                return Ok((context, Transport::Portal));
            }
            Err(e) => info!("failed to use libei portal ({e}), falling back to socket"),
        }
    }

    let socket_path = resolve_socket_path(config.socket_path.as_deref());
    match connector.connect_socket(&config.client_name, socket_path.as_deref()) {
        Ok(context) => {
            info!(socket = ?socket_path, "connected to EIS socket");
            Ok((context, Transport::Socket))
        }
        Err(e) => {
            warn!("libei socket backend failed: {e}");
            Err(e)
        }
    }
}

fn resolve_socket_path(configured: Option<&Path>) -> Option<PathBuf> {
    configured
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(LIBEI_SOCKET_ENV).map(PathBuf::from))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
