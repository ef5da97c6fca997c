//! libei client context over the `reis` protocol implementation.
//!
//! # How the EI protocol maps onto [`EiContext`] (for beginners)
//!
//! The bridge's device lifecycle speaks in libei's vocabulary: create a
//! device on a seat, configure its capabilities, add it, wait for the
//! compositor to resume it.  On the wire the EI protocol works slightly
//! differently:
//!
//! 1. After the handshake the server announces seats (`ei_seat`), each with
//!    a set of capability bits (`ei_pointer`, `ei_keyboard`, ...).
//! 2. The client *binds* the capabilities it wants on a seat.
//! 3. The server then creates one or more `ei_device` objects on that seat,
//!    describes them (name, interfaces, regions) and finally resumes them.
//!
//! [`ReisContext`] bridges the two: `device_add` turns the configured
//! capabilities into an `ei_seat.bind`, and every server device created on
//! that seat afterwards is reported under the single [`Device`] handle the
//! controller created.  Injection picks the server device that carries the
//! interface the request needs.
//!
//! # Transports
//!
//! [`ReisConnector`] connects to an EIS Unix socket.  The remote-desktop
//! portal handoff needs a D-Bus session client this crate does not carry, so
//! `connect_portal` always reports [`EiError::Unavailable`] and
//! [`super::connect_with_fallback`] moves on to the socket.

use std::collections::{HashMap, VecDeque};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::time::{clock_gettime, ClockId};
use ::reis::ei;
use ::reis::handshake::ei_handshake_blocking;
use ::reis::PendingRequestResult;
use tracing::{debug, info, trace, warn};

use super::{EiConnector, EiError, Transport};
use crate::application::device_lifecycle::EiContext;
use crate::domain::ei::{Device, DeviceCapability, EiEvent, Seat};

/// Directory relative `$LIBEI_SOCKET` names are resolved against.
const RUNTIME_DIR_ENV: &str = "XDG_RUNTIME_DIR";

const POINTER: &str = "ei_pointer";
const POINTER_ABSOLUTE: &str = "ei_pointer_absolute";
const BUTTON: &str = "ei_button";
const SCROLL: &str = "ei_scroll";
const KEYBOARD: &str = "ei_keyboard";

/// EI interfaces that provide a capability.
fn interfaces_for(capability: DeviceCapability) -> &'static [&'static str] {
    match capability {
        DeviceCapability::Pointer => &[POINTER, BUTTON, SCROLL],
        DeviceCapability::PointerAbsolute => &[POINTER_ABSOLUTE],
        DeviceCapability::Keyboard => &[KEYBOARD],
    }
}

/// Combines the seat's capability bits for the requested interfaces.
fn bind_mask(seat_capabilities: &HashMap<String, u64>, interfaces: &[&str]) -> u64 {
    interfaces
        .iter()
        .filter_map(|interface| seat_capabilities.get(*interface))
        .fold(0, |mask, bits| mask | bits)
}

/// Resolves a socket name the way libei does: relative names live in
/// `$XDG_RUNTIME_DIR`.
fn resolve_in_runtime_dir(path: &Path, runtime_dir: Option<&Path>) -> Option<PathBuf> {
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        runtime_dir.map(|dir| dir.join(path))
    }
}

/// `CLOCK_MONOTONIC` in microseconds, the timebase of `ei_device.frame`.
fn now_micros() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => {
            let secs = u64::try_from(ts.tv_sec()).unwrap_or(0);
            let nanos = u64::try_from(ts.tv_nsec()).unwrap_or(0);
            secs * 1_000_000 + nanos / 1_000
        }
        Err(e) => {
            warn!("clock_gettime failed: {e}");
            0
        }
    }
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// Connects to a compositor's EIS server over a Unix socket.
#[derive(Debug, Default)]
pub struct ReisConnector;

impl ReisConnector {
    pub fn new() -> Self {
        Self
    }
}

impl EiConnector for ReisConnector {
    fn connect_portal(&self, _client_name: &str) -> Result<Arc<dyn EiContext>, EiError> {
        Err(EiError::Unavailable {
            transport: Transport::Portal,
            reason: "no D-Bus portal client available".to_string(),
        })
    }

    fn connect_socket(
        &self,
        client_name: &str,
        socket_path: Option<&Path>,
    ) -> Result<Arc<dyn EiContext>, EiError> {
        let unavailable = |reason: String| EiError::Unavailable {
            transport: Transport::Socket,
            reason,
        };

        let configured = socket_path.ok_or_else(|| {
            unavailable(format!(
                "no socket configured and ${} is unset",
                super::LIBEI_SOCKET_ENV
            ))
        })?;
        let runtime_dir = std::env::var_os(RUNTIME_DIR_ENV).map(PathBuf::from);
        let path = resolve_in_runtime_dir(configured, runtime_dir.as_deref()).ok_or_else(|| {
            unavailable(format!(
                "relative socket {} needs ${RUNTIME_DIR_ENV}",
                configured.display()
            ))
        })?;

        debug!(socket = %path.display(), "connecting to EIS");
        let stream = UnixStream::connect(&path)
            .map_err(|e| unavailable(format!("{}: {e}", path.display())))?;
        let context = ReisContext::handshake(stream, client_name)?;
        Ok(Arc::new(context))
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// A sender-type EI client connection.
pub struct ReisContext {
    /// Duplicate of the connection's descriptor, used only for `poll(2)`.
    poll_stream: UnixStream,
    inner: Mutex<Inner>,
}

/// A device the controller asked for, waiting for (or served by) server devices.
struct DeviceRequest {
    handle: Device,
    seat_id: u64,
    interfaces: Vec<&'static str>,
    range: Option<(u32, u32)>,
}

struct SeatEntry {
    proxy: ei::Seat,
    name: Option<String>,
    capabilities: HashMap<String, u64>,
    /// Set once the seat description is complete and announced.
    handle: Option<Seat>,
}

#[derive(Default)]
struct ServerDevice {
    seat_id: Option<u64>,
    name: Option<String>,
    owner: Option<Device>,
    pointer: Option<ei::Pointer>,
    pointer_absolute: Option<ei::PointerAbsolute>,
    button: Option<ei::Button>,
    resumed: bool,
    emulating: bool,
}

struct Inner {
    context: ei::Context,
    last_serial: u32,
    sequence: u32,
    next_id: u64,
    disconnected: bool,
    seats: HashMap<ei::Seat, SeatEntry>,
    devices: HashMap<ei::Device, ServerDevice>,
    requests: Vec<DeviceRequest>,
    events: VecDeque<EiEvent>,
}

impl ReisContext {
    /// Performs the sender handshake on `stream`.
    ///
    /// # Errors
    ///
    /// [`EiError::Unavailable`] if the server rejects the handshake, and
    /// [`EiError::Io`] if the descriptor cannot be duplicated.
    pub fn handshake(stream: UnixStream, client_name: &str) -> Result<Self, EiError> {
        let poll_stream = stream.try_clone()?;
        let context = ei::Context::new(stream)?;
        let response =
            ei_handshake_blocking(&context, client_name, ei::handshake::ContextType::Sender)
                .map_err(|e| EiError::Unavailable {
                    transport: Transport::Socket,
                    reason: format!("EI handshake failed: {e:?}"),
                })?;
        poll_stream.set_nonblocking(true)?;
        info!(serial = response.serial, "EI handshake complete");

        let mut inner = Inner {
            context,
            last_serial: response.serial,
            sequence: 0,
            next_id: 1,
            disconnected: false,
            seats: HashMap::new(),
            devices: HashMap::new(),
            requests: Vec::new(),
            events: VecDeque::new(),
        };
        inner.events.push_back(EiEvent::Connect);
        // The handshake may already have read the first seat announcements.
        inner.drain_pending();

        Ok(Self {
            poll_stream,
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsFd for ReisContext {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.poll_stream.as_fd()
    }
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn flush(&self) {
        if let Err(e) = self.context.flush() {
            warn!("failed to flush EI requests: {e}");
        }
    }

    fn disconnect(&mut self) {
        if !self.disconnected {
            self.disconnected = true;
            self.events.push_back(EiEvent::Disconnect);
        }
    }

    fn read(&mut self) {
        match self.context.read() {
            Ok(0) => {
                info!("EIS server closed the connection");
                self.disconnect();
            }
            Ok(n) => trace!("read {n} byte(s) from EIS"),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                warn!("failed to read from EIS: {e}");
                self.disconnect();
            }
        }
    }

    fn drain_pending(&mut self) {
        while let Some(pending) = self.context.pending_event() {
            match pending {
                PendingRequestResult::Request(event) => self.handle_event(event),
                PendingRequestResult::ParseError(e) => {
                    warn!("failed to parse EI event: {e:?}");
                    self.disconnect();
                }
                PendingRequestResult::InvalidObject(id) => {
                    debug!("EI event for unknown object {id}");
                }
            }
        }
    }

    fn handle_event(&mut self, event: ei::Event) {
        match event {
            ei::Event::Connection(_, event) => self.handle_connection_event(event),
            ei::Event::Seat(seat, event) => self.handle_seat_event(seat, event),
            ei::Event::Device(device, event) => self.handle_device_event(device, event),
            _ => trace!("ignoring EI event"),
        }
    }

    fn handle_connection_event(&mut self, event: ei::connection::Event) {
        match event {
            ei::connection::Event::Seat { seat } => {
                self.seats.insert(
                    seat.clone(),
                    SeatEntry {
                        proxy: seat,
                        name: None,
                        capabilities: HashMap::new(),
                        handle: None,
                    },
                );
            }
            ei::connection::Event::Ping { ping } => {
                ping.done(0);
                self.flush();
            }
            ei::connection::Event::Disconnected { .. } => {
                info!("EIS server disconnected the client");
                self.disconnect();
            }
            _ => trace!("ignoring connection event"),
        }
    }

    fn handle_seat_event(&mut self, seat: ei::Seat, event: ei::seat::Event) {
        let next_id = self.next_id;
        let Some(entry) = self.seats.get_mut(&seat) else {
            debug!("event for unknown seat");
            return;
        };
        match event {
            ei::seat::Event::Name { name } => entry.name = Some(name),
            ei::seat::Event::Capability { mask, interface } => {
                entry.capabilities.insert(interface, mask);
            }
            ei::seat::Event::Done => {
                let name = entry.name.clone().unwrap_or_else(|| "seat".to_string());
                let handle = Seat::new(next_id, name);
                debug!(seat = ?handle, capabilities = ?entry.capabilities, "seat announced");
                entry.handle = Some(handle.clone());
                self.next_id += 1;
                self.events.push_back(EiEvent::SeatAdded(handle));
            }
            ei::seat::Event::Device { device } => {
                let seat_id = entry.handle.as_ref().map(Seat::id);
                self.devices.insert(
                    device,
                    ServerDevice {
                        seat_id,
                        ..ServerDevice::default()
                    },
                );
            }
            ei::seat::Event::Destroyed { serial } => {
                self.last_serial = serial;
                if let Some(entry) = self.seats.remove(&seat) {
                    if let Some(handle) = entry.handle {
                        self.events.push_back(EiEvent::SeatRemoved(handle));
                    }
                }
            }
            _ => trace!("ignoring seat event"),
        }
    }

    fn handle_device_event(&mut self, device: ei::Device, event: ei::device::Event) {
        if let ei::device::Event::Destroyed { serial } = event {
            self.last_serial = serial;
            if let Some(owner) = self.devices.remove(&device).and_then(|d| d.owner) {
                self.events.push_back(EiEvent::DeviceRemoved(owner));
            }
            return;
        }

        let Some(entry) = self.devices.get_mut(&device) else {
            debug!("event for unknown device");
            return;
        };
        match event {
            ei::device::Event::Name { name } => entry.name = Some(name),
            ei::device::Event::Interface { object } => {
                let interface = object.interface().to_string();
                match interface.as_str() {
                    POINTER => entry.pointer = object.downcast(),
                    POINTER_ABSOLUTE => entry.pointer_absolute = object.downcast(),
                    BUTTON => entry.button = object.downcast(),
                    _ => trace!(%interface, "device interface not used for injection"),
                }
            }
            ei::device::Event::Done => {
                let owner = self
                    .requests
                    .iter()
                    .find(|request| Some(request.seat_id) == entry.seat_id)
                    .map(|request| request.handle.clone());
                match owner {
                    Some(handle) => {
                        debug!(server_name = ?entry.name, "server device serves {:?}", handle.name());
                        entry.owner = Some(handle.clone());
                        self.events.push_back(EiEvent::DeviceAdded(handle));
                    }
                    None => debug!(server_name = ?entry.name, "server device without a request"),
                }
            }
            ei::device::Event::Resumed { serial } => {
                self.last_serial = serial;
                entry.resumed = true;
                if let Some(owner) = entry.owner.clone() {
                    self.events.push_back(EiEvent::DeviceResumed(owner));
                }
            }
            ei::device::Event::Paused { serial } => {
                self.last_serial = serial;
                entry.resumed = false;
                entry.emulating = false;
                if let Some(owner) = entry.owner.clone() {
                    self.events.push_back(EiEvent::DeviceSuspended(owner));
                }
            }
            _ => trace!("ignoring device event"),
        }
    }

    /// Finds a resumed server device of `owner` accepted by `select`, starts
    /// emulating on it if needed and runs `emit` followed by a frame.
    fn emulate<T>(
        &mut self,
        owner: &Device,
        what: &str,
        select: impl Fn(&ServerDevice) -> Option<T>,
        emit: impl FnOnce(T),
    ) {
        let serial = self.last_serial;
        let found = self.devices.iter_mut().find_map(|(proxy, entry)| {
            let owned = entry.owner.as_ref().map(Device::id) == Some(owner.id());
            if !owned || !entry.resumed {
                return None;
            }
            select(entry).map(|interface| (proxy, entry, interface))
        });
        let Some((proxy, entry, interface)) = found else {
            warn!("no resumed server device offers {what} for {:?}", owner.name());
            return;
        };

        if !entry.emulating {
            self.sequence = self.sequence.wrapping_add(1);
            proxy.start_emulating(serial, self.sequence);
            entry.emulating = true;
        }
        emit(interface);
        proxy.frame(serial, now_micros());
        self.flush();
    }
}

impl EiContext for ReisContext {
    fn dispatch(&self) {
        let mut inner = self.lock();
        if inner.disconnected {
            return;
        }
        inner.read();
        inner.drain_pending();
    }

    fn get_event(&self) -> Option<EiEvent> {
        self.lock().events.pop_front()
    }

    fn has_pending_event(&self) -> bool {
        !self.lock().events.is_empty()
    }

    fn device_new(&self, seat: &Seat, name: &str) -> Device {
        let mut inner = self.lock();
        let device = Device::new(inner.allocate_id(), name, seat.id());
        inner.requests.push(DeviceRequest {
            handle: device.clone(),
            seat_id: seat.id(),
            interfaces: Vec::new(),
            range: None,
        });
        device
    }

    fn device_configure_capability(&self, device: &Device, capability: DeviceCapability) {
        let mut inner = self.lock();
        if let Some(request) = inner.requests.iter_mut().find(|r| r.handle == *device) {
            request.interfaces.extend_from_slice(interfaces_for(capability));
        }
    }

    fn device_configure_pointer_range(&self, device: &Device, width: u32, height: u32) {
        let mut inner = self.lock();
        if let Some(request) = inner.requests.iter_mut().find(|r| r.handle == *device) {
            // The server owns device regions; the range is kept for diagnostics.
            request.range = Some((width, height));
        }
    }

    fn device_add(&self, device: &Device) {
        let inner = self.lock();
        let Some(request) = inner.requests.iter().find(|r| r.handle == *device) else {
            warn!("device_add for unknown device {:?}", device.name());
            return;
        };
        let Some(seat) = inner
            .seats
            .values()
            .find(|seat| seat.handle.as_ref().map(Seat::id) == Some(request.seat_id))
        else {
            warn!("seat of device {:?} is gone", device.name());
            return;
        };

        let mask = bind_mask(&seat.capabilities, &request.interfaces);
        if mask == 0 {
            warn!(
                "seat {:?} offers none of {:?}",
                seat.name, request.interfaces
            );
            return;
        }
        info!(
            range = ?request.range,
            "binding seat {:?} (mask {mask:#x}) for {:?}",
            seat.name,
            device.name()
        );
        seat.proxy.bind(mask);
        inner.flush();
    }

    fn pointer_motion_absolute(&self, device: &Device, x: f64, y: f64) {
        self.lock().emulate(
            device,
            POINTER_ABSOLUTE,
            |d| d.pointer_absolute.clone(),
            |pointer| pointer.motion_absolute(x as f32, y as f32),
        );
    }

    fn pointer_motion(&self, device: &Device, dx: f64, dy: f64) {
        self.lock().emulate(
            device,
            POINTER,
            |d| d.pointer.clone(),
            |pointer| pointer.motion_relative(dx as f32, dy as f32),
        );
    }

    fn pointer_button(&self, device: &Device, button: u32, pressed: bool) {
        let state = if pressed {
            ei::button::ButtonState::Press
        } else {
            ei::button::ButtonState::Released
        };
        self.lock().emulate(
            device,
            BUTTON,
            |d| d.button.clone(),
            |proxy| proxy.button(button, state),
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
