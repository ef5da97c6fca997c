//! DeviceLifecycleController: tracks seat/device attach state and injects input.
//!
//! This use case consumes libei notifications one at a time and drives the
//! small state machine below.  It delegates every protocol call to an
//! [`EiContext`] trait object, so the same logic runs against the real
//! compositor connection and against the in-process mock used in tests.
//!
//! ```text
//!  NoSeat ──seat-added──▶ SeatKnown ──(device created)──▶ DeviceCreated
//!                                                             │
//!                                                       device-resumed
//!                                                             ▼
//!  Faulted ◀──removed / suspended / disconnect── (any) ── DeviceUsable
//! ```
//!
//! `Faulted` is terminal: the compositor revoked the session and the only
//! recovery is to tear the whole backend down and build a new one, which is
//! the owning application's decision.

use std::os::fd::AsFd;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::screen_shape::ScreenShapeSource;
use crate::domain::ei::{Device, DeviceCapability, EiEvent, Seat};

/// A session-ending notification from the compositor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFault {
    #[error("device {0:?} was removed by the compositor")]
    DeviceRemoved(String),
    #[error("seat {0:?} was removed by the compositor")]
    SeatRemoved(String),
    #[error("device {0:?} was suspended by the compositor")]
    DeviceSuspended(String),
    #[error("the compositor closed the emulated-input session")]
    Disconnected,
}

/// Error returned by injection calls made while no device is usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectionError {
    #[error("no usable input device (lifecycle state: {0:?})")]
    DeviceNotReady(LifecycleState),
}

/// Position of the controller in the seat/device lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No seat has been announced yet.
    NoSeat,
    /// A seat is bound; the device is being set up.
    SeatKnown,
    /// The device was created and added; waiting for the compositor to resume it.
    DeviceCreated,
    /// The device is resumed and accepts injected input.
    DeviceUsable,
    /// The session was revoked.  Terminal.
    Faulted,
}

/// The protocol context consumed by this crate.
///
/// Mirrors the subset of the libei client API the bridge needs.  The context
/// is shared (`Arc<dyn EiContext>`) between the event buffer, which waits on
/// its descriptor and dispatches it, and the controller, which issues device
/// commands.
pub trait EiContext: AsFd + Send + Sync {
    /// Reads everything pending on the descriptor and buffers the resulting
    /// events for [`EiContext::get_event`].
    fn dispatch(&self);

    /// Removes and returns the next buffered event.
    fn get_event(&self) -> Option<EiEvent>;

    /// Returns `true` if [`EiContext::get_event`] would return an event.
    /// Never consumes.
    fn has_pending_event(&self) -> bool;

    /// Creates a new, not yet added, device on `seat`.
    fn device_new(&self, seat: &Seat, name: &str) -> Device;

    /// Requests a capability for a device that has not been added yet.
    fn device_configure_capability(&self, device: &Device, capability: DeviceCapability);

    /// Sets the absolute pointer range for a device that has not been added yet.
    fn device_configure_pointer_range(&self, device: &Device, width: u32, height: u32);

    /// Submits the configured device to the compositor.
    fn device_add(&self, device: &Device);

    /// Moves the pointer to absolute coordinates.
    fn pointer_motion_absolute(&self, device: &Device, x: f64, y: f64);

    /// Moves the pointer by a relative delta.
    fn pointer_motion(&self, device: &Device, dx: f64, dy: f64);

    /// Presses or releases a pointer button.
    fn pointer_button(&self, device: &Device, button: u32, pressed: bool);
}

/// The device lifecycle use case.
pub struct DeviceLifecycleController {
    context: Arc<dyn EiContext>,
    shape: Arc<dyn ScreenShapeSource>,
    device_name: String,
    state: LifecycleState,
    seat: Option<Seat>,
    /// Identity of the device we created and are waiting to see resumed.
    created_device_id: Option<u64>,
    /// Reference used for injection; only set while `DeviceUsable`.
    device: Option<Device>,
    fault: Option<SessionFault>,
}

impl DeviceLifecycleController {
    /// Creates a controller in the `NoSeat` state.
    pub fn new(
        context: Arc<dyn EiContext>,
        shape: Arc<dyn ScreenShapeSource>,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            context,
            shape,
            device_name: device_name.into(),
            state: LifecycleState::NoSeat,
            seat: None,
            created_device_id: None,
            device: None,
            fault: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The bound seat, if any.
    pub fn seat(&self) -> Option<&Seat> {
        self.seat.as_ref()
    }

    /// The usable device, if any.
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// The fault that moved the controller to `Faulted`, if any.
    pub fn fault(&self) -> Option<&SessionFault> {
        self.fault.as_ref()
    }

    /// Applies one notification to the state machine.
    ///
    /// # Errors
    ///
    /// Returns the [`SessionFault`] when the notification revokes the session,
    /// and returns the same fault again for every notification processed
    /// after that.
    pub fn process_event(&mut self, event: EiEvent) -> Result<(), SessionFault> {
        if let Some(fault) = &self.fault {
            debug!("ignoring {} after session fault", event.kind());
            return Err(fault.clone());
        }

        match event {
            EiEvent::SeatAdded(seat) => {
                self.on_seat_added(seat);
                Ok(())
            }
            EiEvent::DeviceResumed(device) => {
                self.on_device_resumed(device);
                Ok(())
            }
            EiEvent::Connect => {
                debug!("emulated-input session connected");
                Ok(())
            }
            EiEvent::DeviceAdded(device) => {
                debug!("device {:?} added", device.name());
                Ok(())
            }
            EiEvent::DeviceRemoved(device) => {
                Err(self.enter_fault(SessionFault::DeviceRemoved(device.name().to_string())))
            }
            EiEvent::SeatRemoved(seat) => {
                Err(self.enter_fault(SessionFault::SeatRemoved(seat.name().to_string())))
            }
            EiEvent::DeviceSuspended(device) => {
                Err(self.enter_fault(SessionFault::DeviceSuspended(device.name().to_string())))
            }
            EiEvent::Disconnect => Err(self.enter_fault(SessionFault::Disconnected)),
        }
    }

    fn on_seat_added(&mut self, seat: Seat) {
        if self.state != LifecycleState::NoSeat {
            debug!(
                "ignoring additional seat {:?}; already bound to {:?}",
                seat.name(),
                self.seat.as_ref().map(Seat::name)
            );
            return;
        }

        info!("using seat {:?}", seat.name());
        self.state = LifecycleState::SeatKnown;

        let device = self.context.device_new(&seat, &self.device_name);
        for capability in DeviceCapability::VIRTUAL_INPUT {
            self.context.device_configure_capability(&device, capability);
        }
        let shape = self.shape.shape();
        self.context
            .device_configure_pointer_range(&device, shape.width, shape.height);
        self.context.device_add(&device);

        debug!(
            "created device {:?} ({}x{}) on seat {:?}",
            device.name(),
            shape.width,
            shape.height,
            seat.name()
        );
        self.created_device_id = Some(device.id());
        self.seat = Some(seat);
        self.state = LifecycleState::DeviceCreated;
    }

    fn on_device_resumed(&mut self, device: Device) {
        if self.created_device_id != Some(device.id()) {
            warn!(
                "ignoring resume of device {:?} that this client did not create",
                device.name()
            );
            return;
        }
        match self.state {
            LifecycleState::DeviceCreated => {
                info!("device {:?} is available", device.name());
                self.device = Some(device);
                self.state = LifecycleState::DeviceUsable;
            }
            LifecycleState::DeviceUsable => {
                debug!("device {:?} resumed again", device.name());
            }
            other => {
                warn!("unexpected device resume in state {other:?}");
            }
        }
    }

    fn enter_fault(&mut self, fault: SessionFault) -> SessionFault {
        warn!("emulated-input session fault: {fault}");
        self.device = None;
        self.created_device_id = None;
        self.state = LifecycleState::Faulted;
        self.fault = Some(fault.clone());
        fault
    }

    fn usable_device(&self) -> Result<&Device, InjectionError> {
        match (&self.state, &self.device) {
            (LifecycleState::DeviceUsable, Some(device)) => Ok(device),
            _ => Err(InjectionError::DeviceNotReady(self.state)),
        }
    }

    /// Moves the pointer to absolute desktop coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`InjectionError::DeviceNotReady`] unless the device is usable.
    pub fn move_pointer_absolute(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        let device = self.usable_device()?;
        self.context
            .pointer_motion_absolute(device, f64::from(x), f64::from(y));
        Ok(())
    }

    /// Moves the pointer by a relative delta.
    ///
    /// # Errors
    ///
    /// Returns [`InjectionError::DeviceNotReady`] unless the device is usable.
    pub fn move_pointer_relative(&self, dx: i32, dy: i32) -> Result<(), InjectionError> {
        let device = self.usable_device()?;
        self.context
            .pointer_motion(device, f64::from(dx), f64::from(dy));
        Ok(())
    }

    /// Presses or releases a pointer button.
    ///
    /// # Errors
    ///
    /// Returns [`InjectionError::DeviceNotReady`] unless the device is usable.
    pub fn set_button(&self, button: u32, pressed: bool) -> Result<(), InjectionError> {
        let device = self.usable_device()?;
        self.context.pointer_button(device, button, pressed);
        Ok(())
    }

    /// Releases the device and seat references (in that order).
    ///
    /// A faulted controller stays faulted; otherwise it returns to `NoSeat`.
    pub fn release(&mut self) {
        self.device = None;
        self.created_device_id = None;
        self.seat = None;
        if self.state != LifecycleState::Faulted {
            self.state = LifecycleState::NoSeat;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::screen_shape::{FixedScreenShape, MockScreenShapeSource};
    use crate::domain::geometry::ScreenShape;
    use std::fs::File;
    use std::os::fd::BorrowedFd;
    use std::sync::Mutex;

    // ── Recording context ─────────────────────────────────────────────────────

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        New(u64),
        Capability(DeviceCapability),
        Range(u32, u32),
        Add(u64),
        Absolute(f64, f64),
        Relative(f64, f64),
        Button(u32, bool),
    }

    struct RecordingContext {
        null: File,
        calls: Mutex<Vec<Call>>,
        next_device_id: Mutex<u64>,
    }

    impl RecordingContext {
        fn new() -> Self {
            Self {
                null: File::open("/dev/null").unwrap(),
                calls: Mutex::new(Vec::new()),
                next_device_id: Mutex::new(100),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AsFd for RecordingContext {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.null.as_fd()
        }
    }

    impl EiContext for RecordingContext {
        fn dispatch(&self) {}

        fn get_event(&self) -> Option<EiEvent> {
            None
        }

        fn has_pending_event(&self) -> bool {
            false
        }

        fn device_new(&self, seat: &Seat, name: &str) -> Device {
            let mut next = self.next_device_id.lock().unwrap();
            let id = *next;
            *next += 1;
            self.calls.lock().unwrap().push(Call::New(seat.id()));
            Device::new(id, name, seat.id())
        }

        fn device_configure_capability(&self, _: &Device, capability: DeviceCapability) {
            self.calls.lock().unwrap().push(Call::Capability(capability));
        }

        fn device_configure_pointer_range(&self, _: &Device, width: u32, height: u32) {
            self.calls.lock().unwrap().push(Call::Range(width, height));
        }

        fn device_add(&self, device: &Device) {
            self.calls.lock().unwrap().push(Call::Add(device.id()));
        }

        fn pointer_motion_absolute(&self, _: &Device, x: f64, y: f64) {
            self.calls.lock().unwrap().push(Call::Absolute(x, y));
        }

        fn pointer_motion(&self, _: &Device, dx: f64, dy: f64) {
            self.calls.lock().unwrap().push(Call::Relative(dx, dy));
        }

        fn pointer_button(&self, _: &Device, button: u32, pressed: bool) {
            self.calls.lock().unwrap().push(Call::Button(button, pressed));
        }
    }

    fn make_controller() -> (DeviceLifecycleController, Arc<RecordingContext>) {
        let context = Arc::new(RecordingContext::new());
        let controller = DeviceLifecycleController::new(
            Arc::clone(&context) as Arc<dyn EiContext>,
            Arc::new(FixedScreenShape::default()),
            "test device",
        );
        (controller, context)
    }

    /// Drives the controller to `DeviceUsable` and returns the resumed device.
    fn make_usable(controller: &mut DeviceLifecycleController) -> Device {
        let seat = Seat::new(1, "seat0");
        controller.process_event(EiEvent::SeatAdded(seat)).unwrap();
        // RecordingContext hands out ids starting at 100.
        let device = Device::new(100, "test device", 1);
        controller
            .process_event(EiEvent::DeviceResumed(device.clone()))
            .unwrap();
        device
    }

    // ── Seat binding ──────────────────────────────────────────────────────────

    #[test]
    fn test_new_controller_starts_without_seat() {
        let (controller, _) = make_controller();
        assert_eq!(controller.state(), LifecycleState::NoSeat);
        assert!(controller.seat().is_none());
        assert!(controller.device().is_none());
    }

    #[test]
    fn test_seat_added_creates_and_configures_device() {
        // Arrange
        let (mut controller, ctx) = make_controller();

        // Act
        controller
            .process_event(EiEvent::SeatAdded(Seat::new(1, "seat0")))
            .unwrap();

        // Assert
        assert_eq!(controller.state(), LifecycleState::DeviceCreated);
        assert_eq!(
            ctx.calls(),
            vec![
                Call::New(1),
                Call::Capability(DeviceCapability::Pointer),
                Call::Capability(DeviceCapability::PointerAbsolute),
                Call::Capability(DeviceCapability::Keyboard),
                Call::Range(1920, 1080),
                Call::Add(100),
            ]
        );
    }

    #[test]
    fn test_seat_added_acquires_seat_reference() {
        // Arrange
        let (mut controller, _) = make_controller();
        let seat = Seat::new(1, "seat0");

        // Act
        controller.process_event(EiEvent::SeatAdded(seat.clone())).unwrap();

        // Assert – one reference held here, one by the controller
        assert_eq!(seat.ref_count(), 2);
        assert_eq!(controller.seat(), Some(&seat));
    }

    #[test]
    fn test_second_seat_added_is_ignored() {
        // Arrange
        let (mut controller, ctx) = make_controller();
        let first = Seat::new(1, "seat0");
        let second = Seat::new(2, "seat1");
        controller.process_event(EiEvent::SeatAdded(first.clone())).unwrap();
        let calls_before = ctx.calls().len();

        // Act
        controller
            .process_event(EiEvent::SeatAdded(second.clone()))
            .unwrap();

        // Assert
        assert_eq!(ctx.calls().len(), calls_before, "no device creation");
        assert_eq!(second.ref_count(), 1, "second seat not retained");
        assert_eq!(first.ref_count(), 2);
        assert_eq!(controller.seat().map(Seat::id), Some(1));
        assert_eq!(controller.state(), LifecycleState::DeviceCreated);
    }

    #[test]
    fn test_pointer_range_comes_from_shape_source() {
        // Arrange
        let ctx = Arc::new(RecordingContext::new());
        let mut shape = MockScreenShapeSource::new();
        shape
            .expect_shape()
            .times(1)
            .return_const(ScreenShape::new(0, 0, 2560, 1440));
        let mut controller = DeviceLifecycleController::new(
            Arc::clone(&ctx) as Arc<dyn EiContext>,
            Arc::new(shape),
            "test device",
        );

        // Act
        controller
            .process_event(EiEvent::SeatAdded(Seat::new(1, "seat0")))
            .unwrap();

        // Assert
        assert!(ctx.calls().contains(&Call::Range(2560, 1440)));
    }

    // ── Device resume ─────────────────────────────────────────────────────────

    #[test]
    fn test_device_resumed_makes_device_usable() {
        // Arrange
        let (mut controller, _) = make_controller();

        // Act
        let device = make_usable(&mut controller);

        // Assert
        assert_eq!(controller.state(), LifecycleState::DeviceUsable);
        assert_eq!(controller.device(), Some(&device));
        assert_eq!(device.ref_count(), 2);
    }

    #[test]
    fn test_device_resumed_for_unknown_device_is_ignored() {
        // Arrange
        let (mut controller, _) = make_controller();
        controller
            .process_event(EiEvent::SeatAdded(Seat::new(1, "seat0")))
            .unwrap();

        // Act
        controller
            .process_event(EiEvent::DeviceResumed(Device::new(999, "foreign", 1)))
            .unwrap();

        // Assert
        assert_eq!(controller.state(), LifecycleState::DeviceCreated);
        assert!(controller.device().is_none());
    }

    #[test]
    fn test_device_resumed_before_seat_is_ignored() {
        let (mut controller, _) = make_controller();
        controller
            .process_event(EiEvent::DeviceResumed(Device::new(100, "early", 1)))
            .unwrap();
        assert_eq!(controller.state(), LifecycleState::NoSeat);
    }

    #[test]
    fn test_device_added_and_connect_are_informational() {
        // Arrange
        let (mut controller, ctx) = make_controller();
        controller
            .process_event(EiEvent::SeatAdded(Seat::new(1, "seat0")))
            .unwrap();
        let calls_before = ctx.calls().len();

        // Act
        controller.process_event(EiEvent::Connect).unwrap();
        controller
            .process_event(EiEvent::DeviceAdded(Device::new(100, "test device", 1)))
            .unwrap();

        // Assert
        assert_eq!(controller.state(), LifecycleState::DeviceCreated);
        assert_eq!(ctx.calls().len(), calls_before);
    }

    // ── Injection ─────────────────────────────────────────────────────────────

    #[test]
    fn test_injection_issues_commands_when_usable() {
        // Arrange
        let (mut controller, ctx) = make_controller();
        make_usable(&mut controller);
        let setup_calls = ctx.calls().len();

        // Act
        controller.move_pointer_absolute(960, 540).unwrap();
        controller.move_pointer_relative(-5, 12).unwrap();
        controller.set_button(1, true).unwrap();
        controller.set_button(1, false).unwrap();

        // Assert
        assert_eq!(
            ctx.calls()[setup_calls..].to_vec(),
            vec![
                Call::Absolute(960.0, 540.0),
                Call::Relative(-5.0, 12.0),
                Call::Button(1, true),
                Call::Button(1, false),
            ]
        );
    }

    #[test]
    fn test_injection_before_resume_is_rejected() {
        // Arrange
        let (mut controller, ctx) = make_controller();
        controller
            .process_event(EiEvent::SeatAdded(Seat::new(1, "seat0")))
            .unwrap();
        let calls_before = ctx.calls().len();

        // Act
        let result = controller.move_pointer_absolute(10, 10);

        // Assert
        assert_eq!(
            result,
            Err(InjectionError::DeviceNotReady(LifecycleState::DeviceCreated))
        );
        assert_eq!(ctx.calls().len(), calls_before);
    }

    // ── Faults ────────────────────────────────────────────────────────────────

    #[test]
    fn test_every_revoking_notification_faults_the_session() {
        let seat = Seat::new(1, "seat0");
        let device = Device::new(100, "test device", 1);
        let cases = [
            (
                EiEvent::DeviceRemoved(device.clone()),
                SessionFault::DeviceRemoved("test device".into()),
            ),
            (
                EiEvent::SeatRemoved(seat),
                SessionFault::SeatRemoved("seat0".into()),
            ),
            (
                EiEvent::DeviceSuspended(device),
                SessionFault::DeviceSuspended("test device".into()),
            ),
            (EiEvent::Disconnect, SessionFault::Disconnected),
        ];

        for (event, expected) in cases {
            let (mut controller, _) = make_controller();
            make_usable(&mut controller);

            let result = controller.process_event(event);

            assert_eq!(result, Err(expected.clone()));
            assert_eq!(controller.state(), LifecycleState::Faulted);
            assert_eq!(controller.fault(), Some(&expected));
        }
    }

    #[test]
    fn test_fault_releases_device_and_rejects_injection() {
        // Arrange
        let (mut controller, ctx) = make_controller();
        let device = make_usable(&mut controller);
        let calls_before = ctx.calls().len();

        // Act
        let _ = controller.process_event(EiEvent::DeviceSuspended(device.clone()));

        // Assert
        assert_eq!(device.ref_count(), 1, "controller released the device");
        assert_eq!(
            controller.move_pointer_absolute(1, 1),
            Err(InjectionError::DeviceNotReady(LifecycleState::Faulted))
        );
        assert_eq!(
            controller.set_button(1, true),
            Err(InjectionError::DeviceNotReady(LifecycleState::Faulted))
        );
        assert_eq!(ctx.calls().len(), calls_before);
    }

    #[test]
    fn test_faulted_state_is_terminal() {
        // Arrange
        let (mut controller, _) = make_controller();
        let device = make_usable(&mut controller);
        let _ = controller.process_event(EiEvent::Disconnect);

        // Act – a later resume must not revive the device
        let result = controller.process_event(EiEvent::DeviceResumed(device));

        // Assert
        assert_eq!(result, Err(SessionFault::Disconnected));
        assert_eq!(controller.state(), LifecycleState::Faulted);
        assert!(controller.device().is_none());
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    #[test]
    fn test_release_drops_seat_and_device_references() {
        // Arrange
        let (mut controller, _) = make_controller();
        let device = make_usable(&mut controller);
        let seat = controller.seat().cloned().unwrap();
        assert_eq!(seat.ref_count(), 2);

        // Act
        controller.release();

        // Assert
        assert_eq!(seat.ref_count(), 1);
        assert_eq!(device.ref_count(), 1);
        assert_eq!(controller.state(), LifecycleState::NoSeat);
    }

    #[test]
    fn test_release_keeps_faulted_state() {
        let (mut controller, _) = make_controller();
        make_usable(&mut controller);
        let _ = controller.process_event(EiEvent::Disconnect);

        controller.release();

        assert_eq!(controller.state(), LifecycleState::Faulted);
    }
}
