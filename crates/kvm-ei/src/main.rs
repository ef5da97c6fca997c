//! kvm-ei entry point.
//!
//! Loads the configuration, builds the libei screen on top of a shared
//! [`EventQueue`], and runs the blocking event loop until Ctrl+C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  ├─ load_config()              -- TOML file + CLI overrides
//!  ├─ WaylandScreen::new()       -- connect, install handler + buffer
//!  ├─ heartbeat task (tokio)     -- producer: EventQueue::add_event every second
//!  ├─ Ctrl-C task (tokio)        -- ShutdownSignal::request + wake
//!  └─ spawn_blocking(run loop)   -- consumer: EventQueue::run
//! ```
//!
//! # Compositor connector
//!
//! By default the screen connects to the compositor's EIS server through
//! [`ReisConnector`] (socket from `--socket`, `[ei].socket_path` or
//! `$LIBEI_SOCKET`).  With `--simulate` the in-process `MockEiConnector`
//! plays the compositor instead: it announces a seat at startup and resumes
//! the virtual device on the first heartbeat, so the whole lifecycle can be
//! watched with `RUST_LOG=kvm_ei=debug` without a Wayland session.
//!
//! # Usage
//!
//! ```text
//! kvm-ei [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   Config file [default: ~/.config/kvm-ei/config.toml]
//!   --socket    <PATH>   EIS socket, overrides [ei].socket_path
//!   --log-level <LEVEL>  Log filter when RUST_LOG is unset
//!   --simulate           Use the in-process simulated compositor
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use kvm_ei::application::device_lifecycle::LifecycleState;
use kvm_ei::application::screen_shape::FixedScreenShape;
use kvm_ei::infrastructure::config::{load_config, BridgeConfig};
use kvm_ei::infrastructure::ei::mock::{MockEiConnector, MockEiContext};
use kvm_ei::infrastructure::ei::reis::ReisConnector;
use kvm_ei::infrastructure::ei::EiConnector;
use kvm_ei::infrastructure::event_queue::{EventQueue, ShutdownSignal, UserEventHandler};
use kvm_ei::infrastructure::screen::WaylandScreen;

/// User event queued by the heartbeat task.
const HEARTBEAT_EVENT: u32 = 1;
/// User event queued by the Ctrl-C task to wake an indefinite wait.
const SHUTDOWN_EVENT: u32 = 2;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Wayland input backend for KVM-Over-IP.
#[derive(Debug, Parser)]
#[command(
    name = "kvm-ei",
    about = "Inject forwarded input on Wayland through libei",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "KVM_EI_CONFIG")]
    config: Option<PathBuf>,

    /// EIS socket to connect to when the portal is unavailable.
    #[arg(long, env = "KVM_EI_SOCKET")]
    socket: Option<PathBuf>,

    /// `tracing` filter used when `RUST_LOG` is unset (e.g. `debug`).
    #[arg(long, env = "KVM_EI_LOG_LEVEL")]
    log_level: Option<String>,

    /// Run against an in-process simulated compositor instead of EIS.
    #[arg(long, env = "KVM_EI_SIMULATE")]
    simulate: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply_overrides(&self, config: &mut BridgeConfig) {
        if let Some(socket) = &self.socket {
            config.ei.socket_path = Some(socket.clone());
        }
        if let Some(level) = &self.log_level {
            config.bridge.log_level = level.clone();
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.bridge.log_level)),
        )
        .init();

    info!(
        "kvm-ei starting: {}x{} desktop, client {:?}",
        config.screen.width, config.screen.height, config.ei.client_name
    );

    let shutdown = ShutdownSignal::new();
    let events = Arc::new(EventQueue::new(shutdown.clone()));

    // ── Screen ────────────────────────────────────────────────────────────────
    let simulated = cli.simulate.then(MockEiConnector::default);
    let reis = ReisConnector::new();
    let connector: &dyn EiConnector = match &simulated {
        Some(mock) => {
            info!("using the simulated compositor");
            mock
        }
        None => &reis,
    };
    // The EI handshake blocks on the socket.
    let screen = tokio::task::block_in_place(|| {
        WaylandScreen::new(
            false,
            Arc::clone(&events),
            connector,
            &config.ei,
            Arc::new(FixedScreenShape::new(config.screen)),
        )
    })
    .context("failed to set up the libei screen")?;
    let screen = Arc::new(screen);

    let compositor = match &simulated {
        Some(mock) => {
            let compositor = mock
                .context()
                .context("connector returned no compositor context")?;
            compositor.announce_seat("seat0");
            Some(compositor)
        }
        None => None,
    };
    events.adopt_user_handler(user_event_handler(compositor));

    // ── Heartbeat producer ────────────────────────────────────────────────────
    let heartbeat_events = Arc::clone(&events);
    let heartbeat_screen = Arc::clone(&screen);
    let heartbeat = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut centred = false;
        loop {
            interval.tick().await;
            if !heartbeat_events.add_event(HEARTBEAT_EVENT) {
                warn!("failed to queue heartbeat");
            }
            if !centred && heartbeat_screen.lifecycle_state() == LifecycleState::DeviceUsable {
                let (x, y) = heartbeat_screen.get_cursor_pos();
                match heartbeat_screen.fake_mouse_move(x, y) {
                    Ok(()) => info!("virtual pointer centred at ({x}, {y})"),
                    Err(e) => warn!("could not centre pointer: {e}"),
                }
                centred = true;
            }
        }
    });

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let signal_events = Arc::clone(&events);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                shutdown.request();
                signal_events.add_event(SHUTDOWN_EVENT);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Event loop ────────────────────────────────────────────────────────────
    let loop_events = Arc::clone(&events);
    let timeout_ms = config.bridge.wait_timeout_ms;
    let outcome = tokio::task::spawn_blocking(move || loop_events.run(timeout_ms))
        .await
        .context("event loop task panicked")?;

    heartbeat.abort();
    // The task holds a screen reference; wait for it so teardown runs here.
    let _ = heartbeat.await;
    drop(screen);

    outcome.context("event loop stopped with an error")?;
    info!("kvm-ei stopped");
    Ok(())
}

/// Handles the binary's own user events.  A simulated compositor resumes
/// the virtual device on the first heartbeat.
fn user_event_handler(compositor: Option<Arc<MockEiContext>>) -> UserEventHandler {
    let mut pending_resume = compositor;
    Box::new(move |id| match id {
        HEARTBEAT_EVENT => {
            trace!("heartbeat");
            if let Some(compositor) = &pending_resume {
                if let Some(device) = compositor.resume_last_device() {
                    debug!("simulated compositor resumed device {:?}", device.name());
                    pending_resume = None;
                }
            }
        }
        SHUTDOWN_EVENT => debug!("shutdown wake-up"),
        other => debug!("unhandled user event {other}"),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
