//! In-process stand-in for a libei context and its connector.
//!
//! # Why a mock context?
//!
//! A real libei context needs a running compositor with an EIS server (or a
//! remote-desktop portal) and actually injects input into the session.  The
//! `MockEiContext` instead:
//!
//! - Exposes a real, pollable file descriptor (the read end of a
//!   [`SelfPipe`]) so the event queue buffer can block in `poll(2)` on it
//!   exactly as it would on a libei socket.
//! - Lets tests (and the binary's `--simulate` mode) play the compositor's
//!   role by pushing [`EiEvent`]s with [`MockEiContext::push_event`].
//! - Records every device command so assertions can check exactly what would
//!   have been sent to the compositor.
//!
//! # Delivery model
//!
//! Pushed events are *incoming*: they make the descriptor readable but are
//! not yet visible through `get_event`.  `dispatch` moves them into the
//! *buffered* queue, mirroring libei where `ei_dispatch` reads the socket and
//! `ei_get_event` returns what was read.
//!
//! # Usage in tests
//!
//! ```ignore
//! let context = Arc::new(MockEiContext::new()?);
//! let seat = context.announce_seat("seat0");
//! // ... run the event loop ...
//! assert!(context.commands().contains(&DeviceCommand::Add { device_id: 1 }));
//! ```

use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{EiConnector, EiError, Transport};
use crate::application::device_lifecycle::EiContext;
use crate::domain::ei::{Device, DeviceCapability, EiEvent, Seat};
use crate::infrastructure::event_queue::self_pipe::SelfPipe;

/// A command the bridge issued to the compositor.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Create {
        device_id: u64,
        seat_id: u64,
        name: String,
    },
    ConfigureCapability {
        device_id: u64,
        capability: DeviceCapability,
    },
    ConfigureRange {
        device_id: u64,
        width: u32,
        height: u32,
    },
    Add {
        device_id: u64,
    },
    PointerMotionAbsolute {
        device_id: u64,
        x: f64,
        y: f64,
    },
    PointerMotion {
        device_id: u64,
        dx: f64,
        dy: f64,
    },
    Button {
        device_id: u64,
        button: u32,
        pressed: bool,
    },
}

impl DeviceCommand {
    /// `true` for commands that inject input (as opposed to device setup).
    pub fn is_injection(&self) -> bool {
        matches!(
            self,
            DeviceCommand::PointerMotionAbsolute { .. }
                | DeviceCommand::PointerMotion { .. }
                | DeviceCommand::Button { .. }
        )
    }
}

/// A recording libei context backed by a self-pipe.
#[derive(Debug)]
pub struct MockEiContext {
    wake: SelfPipe,
    incoming: Mutex<VecDeque<EiEvent>>,
    buffered: Mutex<VecDeque<EiEvent>>,
    commands: Mutex<Vec<DeviceCommand>>,
    /// Handles the "compositor" keeps, as a real EIS server would.
    devices: Mutex<Vec<Device>>,
    next_id: AtomicU64,
    dispatches: AtomicUsize,
}

impl MockEiContext {
    /// Creates an idle context.
    ///
    /// # Errors
    ///
    /// Returns the `errno` if the backing pipe cannot be created.
    pub fn new() -> nix::Result<Self> {
        Ok(Self {
            wake: SelfPipe::new()?,
            incoming: Mutex::new(VecDeque::new()),
            buffered: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            devices: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dispatches: AtomicUsize::new(0),
        })
    }

    /// Delivers `event` as if the compositor had sent it.  Makes the
    /// descriptor readable.
    pub fn push_event(&self, event: EiEvent) {
        debug!(kind = event.kind(), "mock compositor sends event");
        lock(&self.incoming).push_back(event);
        self.wake.notify();
    }

    /// Announces a new seat and returns it.
    pub fn announce_seat(&self, name: &str) -> Seat {
        let seat = Seat::new(self.allocate_id(), name);
        self.push_event(EiEvent::SeatAdded(seat.clone()));
        seat
    }

    /// Sends `DeviceAdded` followed by `DeviceResumed` for the most recently
    /// created device.  Returns that device, or `None` if none was created.
    pub fn resume_last_device(&self) -> Option<Device> {
        let device = lock(&self.devices).last().cloned()?;
        self.push_event(EiEvent::DeviceAdded(device.clone()));
        self.push_event(EiEvent::DeviceResumed(device.clone()));
        Some(device)
    }

    /// Every command issued so far, in order.
    pub fn commands(&self) -> Vec<DeviceCommand> {
        lock(&self.commands).clone()
    }

    /// Only the input-injection commands.
    pub fn injections(&self) -> Vec<DeviceCommand> {
        lock(&self.commands)
            .iter()
            .filter(|c| c.is_injection())
            .cloned()
            .collect()
    }

    /// Devices created through `device_new`.
    pub fn created_devices(&self) -> Vec<Device> {
        lock(&self.devices).clone()
    }

    /// How many times `dispatch` ran.
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn record(&self, command: DeviceCommand) {
        lock(&self.commands).push(command);
    }
}

impl AsFd for MockEiContext {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.wake.read_fd()
    }
}

impl EiContext for MockEiContext {
    fn dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.wake.drain();
        let mut incoming = lock(&self.incoming);
        lock(&self.buffered).extend(incoming.drain(..));
    }

    fn get_event(&self) -> Option<EiEvent> {
        lock(&self.buffered).pop_front()
    }

    fn has_pending_event(&self) -> bool {
        !lock(&self.buffered).is_empty()
    }

    fn device_new(&self, seat: &Seat, name: &str) -> Device {
        let device = Device::new(self.allocate_id(), name, seat.id());
        self.record(DeviceCommand::Create {
            device_id: device.id(),
            seat_id: seat.id(),
            name: name.to_string(),
        });
        lock(&self.devices).push(device.clone());
        device
    }

    fn device_configure_capability(&self, device: &Device, capability: DeviceCapability) {
        self.record(DeviceCommand::ConfigureCapability {
            device_id: device.id(),
            capability,
        });
    }

    fn device_configure_pointer_range(&self, device: &Device, width: u32, height: u32) {
        self.record(DeviceCommand::ConfigureRange {
            device_id: device.id(),
            width,
            height,
        });
    }

    fn device_add(&self, device: &Device) {
        self.record(DeviceCommand::Add {
            device_id: device.id(),
        });
    }

    fn pointer_motion_absolute(&self, device: &Device, x: f64, y: f64) {
        self.record(DeviceCommand::PointerMotionAbsolute {
            device_id: device.id(),
            x,
            y,
        });
    }

    fn pointer_motion(&self, device: &Device, dx: f64, dy: f64) {
        self.record(DeviceCommand::PointerMotion {
            device_id: device.id(),
            dx,
            dy,
        });
    }

    fn pointer_button(&self, device: &Device, button: u32, pressed: bool) {
        self.record(DeviceCommand::Button {
            device_id: device.id(),
            button,
            pressed,
        });
    }
}

/// Connector that hands out one shared [`MockEiContext`].
///
/// `portal_available` / `socket_available` choose which transports succeed.
#[derive(Debug)]
pub struct MockEiConnector {
    pub portal_available: bool,
    pub socket_available: bool,
    context: Mutex<Option<Arc<MockEiContext>>>,
    attempts: Mutex<Vec<Transport>>,
    last_socket_path: Mutex<Option<PathBuf>>,
}

impl MockEiConnector {
    pub fn new(portal_available: bool, socket_available: bool) -> Self {
        Self {
            portal_available,
            socket_available,
            context: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            last_socket_path: Mutex::new(None),
        }
    }

    /// The context handed out by the last successful connect.
    pub fn context(&self) -> Option<Arc<MockEiContext>> {
        lock(&self.context).clone()
    }

    /// Transports tried, in order.
    pub fn attempts(&self) -> Vec<Transport> {
        lock(&self.attempts).clone()
    }

    pub fn last_socket_path(&self) -> Option<PathBuf> {
        lock(&self.last_socket_path).clone()
    }

    fn connect(&self, transport: Transport, available: bool) -> Result<Arc<dyn EiContext>, EiError> {
        lock(&self.attempts).push(transport);
        if !available {
            return Err(EiError::Unavailable {
                transport,
                reason: "disabled in mock connector".to_string(),
            });
        }
        let context = Arc::new(MockEiContext::new()?);
        *lock(&self.context) = Some(Arc::clone(&context));
        Ok(context)
    }
}

impl Default for MockEiConnector {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl EiConnector for MockEiConnector {
    fn connect_portal(&self, client_name: &str) -> Result<Arc<dyn EiContext>, EiError> {
        debug!(client_name, "mock portal connect");
        self.connect(Transport::Portal, self.portal_available)
    }

    fn connect_socket(
        &self,
        client_name: &str,
        socket_path: Option<&Path>,
    ) -> Result<Arc<dyn EiContext>, EiError> {
        debug!(client_name, ?socket_path, "mock socket connect");
        *lock(&self.last_socket_path) = socket_path.map(Path::to_path_buf);
        self.connect(Transport::Socket, self.socket_available)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
