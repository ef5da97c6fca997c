//! Generic event queue and its pluggable polling backend.
//!
//! # How the pieces fit together (for beginners)
//!
//! ```text
//!  producer threads                        consumer thread
//!  ────────────────                        ───────────────
//!  EventQueue::add_event(id) ──┐           EventQueue::run()
//!                              │             └─ process_once()
//!                              ▼                  ├─ buffer.wait_for_event()   (blocks in poll)
//!              EventQueueBuffer::add_event        ├─ buffer.get_event()        (user first, then system)
//!              (queue id + write wake byte)       └─ dispatch to handler
//! ```
//!
//! [`EventQueue`] knows nothing about libei.  It owns an
//! [`EventQueueBuffer`] (the polling backend), a handler for *system* events
//! (events that originate from the platform, here libei notifications) and a
//! handler for *user* events (opaque ids queued by producer threads).  The
//! libei-specific backend is [`ei_buffer::EiEventQueueBuffer`].
//!
//! # Cancellation
//!
//! The consumer loop can be asked to stop through a [`ShutdownSignal`].  The
//! buffer checks it immediately before and immediately after blocking; a
//! request made while the thread is blocked takes effect when the wait
//! returns (wakeup or timeout).

pub mod custom_events;
pub mod ei_buffer;
pub mod self_pipe;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::application::device_lifecycle::SessionFault;
use crate::domain::ei::EiEvent;

/// Errors produced by a polling backend.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The owning thread was asked to stop.
    #[error("event wait cancelled by shutdown request")]
    Cancelled,
    /// `poll(2)` failed with something other than `EINTR`.
    #[error("poll failed: {0}")]
    Poll(#[source] nix::Error),
}

/// Errors produced by [`EventQueue::process_once`] and [`EventQueue::run`].
#[derive(Debug, Error)]
pub enum EventQueueError {
    #[error("no event queue buffer installed")]
    NoBuffer,
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// A system event handler reported that the input session is dead.
    #[error("input session fault: {0}")]
    Session(#[from] SessionFault),
}

/// Cooperative stop flag shared between the consumer loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every holder of this signal to stop.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Opaque identity of an event recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventTarget(u64);

impl EventTarget {
    /// Target that receives all platform-originated events.
    pub const SYSTEM: EventTarget = EventTarget(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// A system event: a libei notification addressed to a target.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    target: EventTarget,
    payload: EiEvent,
}

impl Event {
    /// Wraps a libei notification for delivery to `target`.
    pub fn system(target: EventTarget, payload: EiEvent) -> Self {
        Self { target, payload }
    }

    pub fn target(&self) -> EventTarget {
        self.target
    }

    pub fn payload(&self) -> &EiEvent {
        &self.payload
    }

    pub fn into_payload(self) -> EiEvent {
        self.payload
    }
}

/// An event removed from a buffer, tagged by origin.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedEvent {
    /// A custom id queued through `add_event`.
    User(u32),
    /// A notification from the platform event source.
    System(Event),
}

/// Placeholder timer token.
///
/// Buffers hand these out so the generic queue's timer calls succeed, but no
/// buffer in this crate ever fires them.
#[derive(Debug, PartialEq, Eq)]
pub struct EventQueueTimer {
    duration: Duration,
    one_shot: bool,
}

impl EventQueueTimer {
    pub fn new(duration: Duration, one_shot: bool) -> Self {
        Self { duration, one_shot }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }
}

/// Polling backend plugged into an [`EventQueue`].
///
/// `add_event` may be called from any thread while another thread is blocked
/// in `wait_for_event`; every other method is called by the consumer thread.
pub trait EventQueueBuffer: Send + Sync {
    /// Called once when the buffer is installed.
    fn init(&self) {}

    /// Blocks until an event source is ready or `timeout_ms` elapses.
    /// A negative timeout waits forever.
    ///
    /// # Errors
    ///
    /// [`BufferError::Cancelled`] if shutdown was requested before or during
    /// the wait; [`BufferError::Poll`] if the wait primitive failed.
    fn wait_for_event(&self, timeout_ms: f64) -> Result<(), BufferError>;

    /// Removes the next event, user events first.
    fn get_event(&self) -> Option<QueuedEvent>;

    /// Queues a user event id and wakes the consumer.
    fn add_event(&self, id: u32) -> bool;

    /// `true` if `get_event` would return `None`.  Never consumes.
    fn is_empty(&self) -> bool;

    fn new_timer(&self, duration: Duration, one_shot: bool) -> EventQueueTimer;

    fn delete_timer(&self, timer: EventQueueTimer);
}

/// Handler for system events.  An error ends the consumer loop.
pub type SystemEventHandler = Box<dyn FnMut(Event) -> Result<(), SessionFault> + Send>;

/// Handler for user event ids.
pub type UserEventHandler = Box<dyn FnMut(u32) + Send>;

/// The generic event queue.
///
/// Shared as `Arc<EventQueue>`: the consumer thread runs [`EventQueue::run`]
/// while producers call [`EventQueue::add_event`] and the screen installs or
/// removes its buffer and handler.
pub struct EventQueue {
    system_target: EventTarget,
    shutdown: ShutdownSignal,
    buffer: Mutex<Option<Arc<dyn EventQueueBuffer>>>,
    system_handler: Mutex<Option<SystemEventHandler>>,
    user_handler: Mutex<Option<UserEventHandler>>,
}

impl EventQueue {
    /// Creates an empty queue that stops when `shutdown` is requested.
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            system_target: EventTarget::SYSTEM,
            shutdown,
            buffer: Mutex::new(None),
            system_handler: Mutex::new(None),
            user_handler: Mutex::new(None),
        }
    }

    /// The target system events are addressed to.
    pub fn system_target(&self) -> EventTarget {
        self.system_target
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Installs (or, with `None`, removes) the polling backend.  Returns the
    /// previously installed buffer.
    pub fn adopt_buffer(
        &self,
        buffer: Option<Arc<dyn EventQueueBuffer>>,
    ) -> Option<Arc<dyn EventQueueBuffer>> {
        if let Some(buffer) = &buffer {
            buffer.init();
        }
        std::mem::replace(&mut *lock(&self.buffer), buffer)
    }

    pub fn has_buffer(&self) -> bool {
        lock(&self.buffer).is_some()
    }

    /// Installs the system event handler, replacing any previous one.
    pub fn adopt_system_handler(&self, handler: SystemEventHandler) {
        *lock(&self.system_handler) = Some(handler);
    }

    /// Removes the system event handler.  Blocks while a dispatch is running.
    pub fn remove_system_handler(&self) {
        *lock(&self.system_handler) = None;
    }

    pub fn has_system_handler(&self) -> bool {
        lock(&self.system_handler).is_some()
    }

    /// Installs the user event handler, replacing any previous one.
    pub fn adopt_user_handler(&self, handler: UserEventHandler) {
        *lock(&self.user_handler) = Some(handler);
    }

    /// Queues a user event id.  Returns `false` when no buffer is installed
    /// or the buffer could not signal the wakeup.
    pub fn add_event(&self, id: u32) -> bool {
        match self.current_buffer() {
            Some(buffer) => buffer.add_event(id),
            None => {
                debug!("dropping user event {id}: no buffer installed");
                false
            }
        }
    }

    /// Creates a timer through the installed buffer.
    pub fn new_timer(&self, duration: Duration, one_shot: bool) -> Option<EventQueueTimer> {
        self.current_buffer()
            .map(|buffer| buffer.new_timer(duration, one_shot))
    }

    pub fn delete_timer(&self, timer: EventQueueTimer) {
        if let Some(buffer) = self.current_buffer() {
            buffer.delete_timer(timer);
        }
    }

    /// Waits once for events and dispatches every event that is available.
    ///
    /// Returns the number of events dispatched (zero after a timeout).
    ///
    /// # Errors
    ///
    /// - [`EventQueueError::NoBuffer`] if no buffer is installed.
    /// - [`EventQueueError::Buffer`] if the wait was cancelled or failed.
    /// - [`EventQueueError::Session`] if the system handler reported a fault.
    pub fn process_once(&self, timeout_ms: f64) -> Result<usize, EventQueueError> {
        let buffer = self.current_buffer().ok_or(EventQueueError::NoBuffer)?;
        buffer.wait_for_event(timeout_ms)?;

        let mut dispatched = 0;
        while let Some(event) = buffer.get_event() {
            self.dispatch(event)?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Runs the consumer loop until shutdown is requested or the buffer is
    /// uninstalled (the owning screen was torn down).
    ///
    /// # Errors
    ///
    /// Returns the first error other than a cancelled wait or a missing
    /// buffer, most notably [`EventQueueError::Session`] when the input
    /// session dies.
    pub fn run(&self, timeout_ms: f64) -> Result<(), EventQueueError> {
        debug!("event loop started");
        while !self.shutdown.is_requested() {
            match self.process_once(timeout_ms) {
                Ok(_) => {}
                Err(EventQueueError::Buffer(BufferError::Cancelled)) => break,
                Err(EventQueueError::NoBuffer) => {
                    debug!("event queue buffer uninstalled, leaving the loop");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        debug!("event loop stopped");
        Ok(())
    }

    fn current_buffer(&self) -> Option<Arc<dyn EventQueueBuffer>> {
        lock(&self.buffer).clone()
    }

    fn dispatch(&self, event: QueuedEvent) -> Result<(), SessionFault> {
        match event {
            QueuedEvent::User(id) => {
                match lock(&self.user_handler).as_mut() {
                    Some(handler) => handler(id),
                    None => trace!("no handler for user event {id}"),
                }
                Ok(())
            }
            QueuedEvent::System(event) => match lock(&self.system_handler).as_mut() {
                Some(handler) => handler(event),
                None => {
                    trace!("no handler for system event {}", event.payload().kind());
                    Ok(())
                }
            },
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
