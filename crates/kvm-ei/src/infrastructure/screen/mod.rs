//! `WaylandScreen`: the secondary-screen facade for the libei backend.
//!
//! # What does the facade do? (for beginners)
//!
//! The rest of a KVM client talks to "a screen": it asks for the screen's
//! shape, moves the cursor, presses buttons, and so on.  On Wayland, input can
//! only be injected through the compositor's emulated-input protocol (libei),
//! so this facade wires three pieces together:
//!
//! 1. A libei context, obtained through the portal or the raw socket.
//! 2. A [`DeviceLifecycleController`] that creates the virtual device once a
//!    seat appears and tracks whether it is usable.
//! 3. An [`EiEventQueueBuffer`] installed as the [`EventQueue`]'s polling
//!    backend, so the application's event loop wakes up for libei traffic.
//!
//! Everything a desktop screen would normally support but libei cannot
//! provide (clipboard, cursor queries, hot keys, screensaver) is answered
//! with a harmless default and a debug trace.
//!
//! # Teardown order
//!
//! `Drop` uninstalls the polling backend, then the system event handler,
//! then releases the controller's seat and device, and only then lets the
//! context go.  No callback can observe a half-released controller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::device_lifecycle::{
    DeviceLifecycleController, EiContext, InjectionError, LifecycleState, SessionFault,
};
use crate::application::key_state::{KeyModifierMask, KeyStatePoller, WaylandKeyState};
use crate::application::screen_shape::ScreenShapeSource;
use crate::domain::geometry::ScreenShape;
use crate::infrastructure::config::EiConfig;
use crate::infrastructure::ei::{connect_with_fallback, EiConnector, EiError, Transport};
use crate::infrastructure::event_queue::ei_buffer::EiEventQueueBuffer;
use crate::infrastructure::event_queue::{Event, EventQueue, EventQueueBuffer};

/// Clipboard selector (`0` = clipboard, `1` = primary selection).
pub type ClipboardId = u8;

/// Error type for [`WaylandScreen::new`].
#[derive(Debug, Error)]
pub enum SetupError {
    /// The libei backend can only act as a secondary (controlled) screen.
    #[error("the libei backend cannot be used as the primary screen")]
    PrimaryUnsupported,

    #[error("failed to connect to the compositor: {0}")]
    Backend(#[from] EiError),

    /// The event buffer's self-pipe could not be created.
    #[error("failed to create event buffer pipe: {0}")]
    Pipe(#[source] nix::Error),
}

/// The Wayland secondary screen.
pub struct WaylandScreen {
    events: Arc<EventQueue>,
    context: Arc<dyn EiContext>,
    transport: Transport,
    controller: Arc<Mutex<DeviceLifecycleController>>,
    shape: Arc<dyn ScreenShapeSource>,
    key_state: WaylandKeyState,
}

impl WaylandScreen {
    /// Connects to the compositor and hooks libei into `events`.
    ///
    /// # Errors
    ///
    /// - [`SetupError::PrimaryUnsupported`] if `is_primary` is `true`.
    /// - [`SetupError::Backend`] if neither the portal nor the socket works.
    /// - [`SetupError::Pipe`] if the event buffer cannot be created.
    ///
    /// Nothing is installed into `events` unless construction succeeds.
    pub fn new(
        is_primary: bool,
        events: Arc<EventQueue>,
        connector: &dyn EiConnector,
        config: &EiConfig,
        shape: Arc<dyn ScreenShapeSource>,
    ) -> Result<Self, SetupError> {
        if is_primary {
            return Err(SetupError::PrimaryUnsupported);
        }

        let (context, transport) = connect_with_fallback(connector, config)?;

        let controller = Arc::new(Mutex::new(DeviceLifecycleController::new(
            Arc::clone(&context),
            Arc::clone(&shape),
            config.device_name.clone(),
        )));

        let buffer = EiEventQueueBuffer::new(
            Arc::clone(&context),
            events.system_target(),
            events.shutdown_signal(),
        )
        .map_err(SetupError::Pipe)?;

        let handler_controller = Arc::clone(&controller);
        let handler_context = Arc::clone(&context);
        events.adopt_system_handler(Box::new(move |event: Event| {
            handle_system_event(&handler_controller, handler_context.as_ref(), event)
        }));
        events.adopt_buffer(Some(Arc::new(buffer) as Arc<dyn EventQueueBuffer>));

        info!(%transport, "libei screen ready; waiting for a seat");
        Ok(Self {
            events,
            context,
            transport,
            controller,
            shape,
            key_state: WaylandKeyState::new(),
        })
    }

    /// The transport the context was obtained through.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        lock(&self.controller).state()
    }

    pub fn is_faulted(&self) -> bool {
        self.lifecycle_state() == LifecycleState::Faulted
    }

    /// The fault that ended the session, if any.
    pub fn fault(&self) -> Option<SessionFault> {
        lock(&self.controller).fault().cloned()
    }

    // ── Injection ─────────────────────────────────────────────────────────────

    /// Moves the cursor to absolute desktop coordinates.
    ///
    /// # Errors
    ///
    /// [`InjectionError::DeviceNotReady`] unless the virtual device is usable.
    pub fn fake_mouse_move(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        lock(&self.controller).move_pointer_absolute(x, y)
    }

    /// Moves the cursor by a relative delta.
    ///
    /// # Errors
    ///
    /// [`InjectionError::DeviceNotReady`] unless the virtual device is usable.
    pub fn fake_mouse_relative_move(&self, dx: i32, dy: i32) -> Result<(), InjectionError> {
        lock(&self.controller).move_pointer_relative(dx, dy)
    }

    /// Presses or releases a pointer button (evdev code).
    ///
    /// # Errors
    ///
    /// [`InjectionError::DeviceNotReady`] unless the virtual device is usable.
    pub fn fake_mouse_button(&self, button: u32, pressed: bool) -> Result<(), InjectionError> {
        lock(&self.controller).set_button(button, pressed)
    }

    // ── Stubs ─────────────────────────────────────────────────────────────────

    pub fn get_clipboard(&self, id: ClipboardId) -> bool {
        debug!(id, "get_clipboard: not supported");
        false
    }

    pub fn set_clipboard(&self, id: ClipboardId, data: Option<&str>) -> bool {
        debug!(id, has_data = data.is_some(), "set_clipboard: not supported");
        false
    }

    pub fn check_clipboards(&self) {
        debug!("check_clipboards: not supported");
    }

    /// The desktop rectangle from the shape source.
    pub fn get_shape(&self) -> ScreenShape {
        let shape = self.shape.shape();
        debug!(?shape, "get_shape");
        shape
    }

    /// The cursor position cannot be read back through libei; reports the
    /// centre of the desktop.
    pub fn get_cursor_pos(&self) -> (i32, i32) {
        let pos = self.shape.shape().center();
        debug!(?pos, "get_cursor_pos: reporting desktop centre");
        pos
    }

    pub fn get_cursor_center(&self) -> (i32, i32) {
        debug!("get_cursor_center");
        (0, 0)
    }

    pub fn reconfigure(&mut self, active_sides: u32) {
        debug!(active_sides, "reconfigure");
    }

    pub fn warp_cursor(&mut self, x: i32, y: i32) {
        debug!(x, y, "warp_cursor: not supported");
    }

    /// Hot keys are not available; always returns id `0`.
    pub fn register_hot_key(&mut self, key: u32, mask: KeyModifierMask) -> u32 {
        debug!(key, mask, "register_hot_key: not supported");
        0
    }

    pub fn unregister_hot_key(&mut self, id: u32) {
        debug!(id, "unregister_hot_key: not supported");
    }

    pub fn fake_input_begin(&mut self) {
        debug!("fake_input_begin");
    }

    pub fn fake_input_end(&mut self) {
        debug!("fake_input_end");
    }

    pub fn get_jump_zone_size(&self) -> i32 {
        debug!("get_jump_zone_size");
        1
    }

    /// Button state is not observable; always `None`.
    pub fn is_any_mouse_button_down(&self) -> Option<u32> {
        debug!("is_any_mouse_button_down: not observable");
        None
    }

    pub fn fake_mouse_wheel(&self, x_delta: i32, y_delta: i32) {
        debug!(x_delta, y_delta, "fake_mouse_wheel: not supported");
    }

    pub fn enable(&mut self) {
        debug!("enable");
    }

    pub fn disable(&mut self) {
        debug!("disable");
    }

    pub fn enter(&mut self) {
        debug!("enter");
    }

    pub fn leave(&mut self) -> bool {
        debug!("leave");
        true
    }

    pub fn open_screensaver(&mut self, notify: bool) {
        debug!(notify, "open_screensaver: not supported");
    }

    pub fn close_screensaver(&mut self) {
        debug!("close_screensaver: not supported");
    }

    pub fn screensaver(&mut self, activate: bool) {
        debug!(activate, "screensaver: not supported");
    }

    pub fn reset_options(&mut self) {
        debug!("reset_options");
    }

    pub fn set_options(&mut self, options: &[u32]) {
        debug!(count = options.len(), "set_options");
    }

    pub fn set_sequence_number(&mut self, seq: u32) {
        debug!(seq, "set_sequence_number");
    }

    /// Always `false`: construction rejects primary screens.
    pub fn is_primary(&self) -> bool {
        false
    }

    pub fn key_state(&mut self) -> &mut dyn KeyStatePoller {
        &mut self.key_state
    }
}

impl Drop for WaylandScreen {
    fn drop(&mut self) {
        self.events.adopt_buffer(None);
        self.events.remove_system_handler();
        lock(&self.controller).release();
        debug!(
            "libei screen torn down ({} context reference(s) left)",
            Arc::strong_count(&self.context)
        );
    }
}

/// Applies `event` and then every protocol event already buffered behind it.
///
/// One wake may correspond to several buffered notifications; draining here
/// keeps the controller lock held for the whole batch.
fn handle_system_event(
    controller: &Mutex<DeviceLifecycleController>,
    context: &dyn EiContext,
    event: Event,
) -> Result<(), SessionFault> {
    let mut controller = lock(controller);
    controller.process_event(event.into_payload())?;
    while let Some(next) = context.get_event() {
        if let Err(fault) = controller.process_event(next) {
            warn!("stopping event drain: {fault}");
            return Err(fault);
        }
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::screen_shape::FixedScreenShape;
    use crate::domain::ei::EiEvent;
    use crate::infrastructure::ei::mock::{DeviceCommand, MockEiConnector, MockEiContext};
    use crate::infrastructure::event_queue::ShutdownSignal;

    struct Fixture {
        events: Arc<EventQueue>,
        connector: MockEiConnector,
        screen: WaylandScreen,
    }

    impl Fixture {
        fn new() -> Self {
            let events = Arc::new(EventQueue::new(ShutdownSignal::new()));
            let connector = MockEiConnector::default();
            let screen = WaylandScreen::new(
                false,
                Arc::clone(&events),
                &connector,
                &EiConfig::default(),
                Arc::new(FixedScreenShape::default()),
            )
            .expect("screen");
            Self {
                events,
                connector,
                screen,
            }
        }

        fn context(&self) -> Arc<MockEiContext> {
            self.connector.context().expect("connected")
        }

        fn make_usable(&self) {
            let context = self.context();
            context.announce_seat("seat0");
            self.events.process_once(1000.0).expect("seat");
            context.resume_last_device().expect("device created");
            self.events.process_once(1000.0).expect("resume");
        }
    }

    #[test]
    fn test_primary_screen_is_rejected() {
        // Arrange
        let events = Arc::new(EventQueue::new(ShutdownSignal::new()));
        let connector = MockEiConnector::default();

        // Act
        let result = WaylandScreen::new(
            true,
            Arc::clone(&events),
            &connector,
            &EiConfig::default(),
            Arc::new(FixedScreenShape::default()),
        );

        // Assert
        assert!(matches!(result, Err(SetupError::PrimaryUnsupported)));
        assert!(connector.attempts().is_empty());
        assert!(!events.has_buffer());
    }

    #[test]
    fn test_backend_failure_installs_nothing() {
        // Arrange
        let events = Arc::new(EventQueue::new(ShutdownSignal::new()));
        let connector = MockEiConnector::new(false, false);

        // Act
        let result = WaylandScreen::new(
            false,
            Arc::clone(&events),
            &connector,
            &EiConfig::default(),
            Arc::new(FixedScreenShape::default()),
        );

        // Assert
        assert!(matches!(result, Err(SetupError::Backend(_))));
        assert!(!events.has_buffer());
        assert!(!events.has_system_handler());
    }

    #[test]
    fn test_construction_installs_buffer_and_handler() {
        let fixture = Fixture::new();
        assert!(fixture.events.has_buffer());
        assert!(fixture.events.has_system_handler());
        assert_eq!(fixture.screen.transport(), Transport::Portal);
        assert_eq!(fixture.screen.lifecycle_state(), LifecycleState::NoSeat);
    }

    #[test]
    fn test_constructed_screen_is_secondary() {
        let fixture = Fixture::new();
        assert!(!fixture.screen.is_primary());
    }

    #[test]
    fn test_handler_drains_every_buffered_notification() {
        // Arrange
        let fixture = Fixture::new();
        let context = fixture.context();
        context.push_event(EiEvent::Connect);
        context.announce_seat("seat0");

        // Act
        let dispatched = fixture.events.process_once(1000.0).unwrap();

        // Assert: the handler consumed the seat event behind Connect itself.
        assert_eq!(dispatched, 1);
        assert_eq!(fixture.screen.lifecycle_state(), LifecycleState::DeviceCreated);
    }

    #[test]
    fn test_fake_mouse_move_reaches_context_once_usable() {
        // Arrange
        let fixture = Fixture::new();
        fixture.make_usable();

        // Act
        fixture.screen.fake_mouse_move(10, 20).unwrap();
        fixture.screen.fake_mouse_relative_move(-1, 2).unwrap();
        fixture.screen.fake_mouse_button(272, true).unwrap();

        // Assert
        let device_id = fixture.context().created_devices()[0].id();
        assert_eq!(
            fixture.context().injections(),
            vec![
                DeviceCommand::PointerMotionAbsolute {
                    device_id,
                    x: 10.0,
                    y: 20.0
                },
                DeviceCommand::PointerMotion {
                    device_id,
                    dx: -1.0,
                    dy: 2.0
                },
                DeviceCommand::Button {
                    device_id,
                    button: 272,
                    pressed: true
                },
            ]
        );
    }

    #[test]
    fn test_fake_mouse_move_before_seat_is_rejected() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.screen.fake_mouse_move(1, 1),
            Err(InjectionError::DeviceNotReady(LifecycleState::NoSeat))
        );
        assert!(fixture.context().injections().is_empty());
    }

    #[test]
    fn test_disconnect_faults_screen() {
        // Arrange
        let fixture = Fixture::new();
        fixture.make_usable();
        fixture.context().push_event(EiEvent::Disconnect);

        // Act
        let result = fixture.events.process_once(1000.0);

        // Assert
        assert!(result.is_err());
        assert!(fixture.screen.is_faulted());
        assert_eq!(fixture.screen.fault(), Some(SessionFault::Disconnected));
    }

    #[test]
    fn test_drop_uninstalls_buffer_and_handler() {
        // Arrange
        let fixture = Fixture::new();
        let Fixture {
            events,
            connector,
            screen,
        } = fixture;

        // Act
        drop(screen);

        // Assert
        assert!(!events.has_buffer());
        assert!(!events.has_system_handler());
        let context = connector.context().unwrap();
        assert_eq!(Arc::strong_count(&context), 2, "connector and this test only");
    }

    #[test]
    fn test_stub_surface_returns_defaults() {
        // Arrange
        let mut fixture = Fixture::new();
        let screen = &mut fixture.screen;

        // Act / Assert
        assert!(!screen.get_clipboard(0));
        assert!(!screen.set_clipboard(0, Some("text")));
        screen.check_clipboards();
        assert_eq!(screen.get_shape(), ScreenShape::new(0, 0, 1920, 1080));
        assert_eq!(screen.get_cursor_pos(), (960, 540));
        assert_eq!(screen.get_cursor_center(), (0, 0));
        assert_eq!(screen.register_hot_key(1, 0), 0);
        screen.unregister_hot_key(0);
        assert_eq!(screen.get_jump_zone_size(), 1);
        assert_eq!(screen.is_any_mouse_button_down(), None);
        screen.fake_mouse_wheel(0, 120);
        screen.enter();
        assert!(screen.leave());
        screen.screensaver(true);
        screen.set_options(&[1, 2]);
        assert!(!screen.is_primary());
        assert_eq!(screen.key_state().poll_active_modifiers(), 0);
        assert!(screen.key_state().poll_pressed_keys().is_empty());
    }
}
