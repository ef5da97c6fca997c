//! libei protocol vocabulary: seats, devices, capabilities and events.
//!
//! # What is libei? (for beginners)
//!
//! On Wayland a client cannot simply call an "inject key press" API the way
//! XTest allows on X11.  Instead the compositor exposes an *EIS* (emulated
//! input server) endpoint, and clients speak the *EI* protocol to it:
//!
//! 1. The compositor announces one or more **seats** (a seat is the set of
//!    input devices that belong to one user session).
//! 2. The client creates a virtual **device** on a seat and tells the
//!    compositor which capabilities it needs (relative pointer, absolute
//!    pointer, keyboard, ...).
//! 3. The compositor *resumes* the device once it is willing to accept input
//!    from it.  Only then may the client send motion/button/key events.
//! 4. At any time the compositor may suspend or remove the device or seat, or
//!    drop the connection entirely.
//!
//! # Reference counting
//!
//! Seats and devices are owned by the protocol context, but the client keeps
//! references to the ones it uses.  [`Seat`] and [`Device`] model that with an
//! `Arc`: cloning a handle acquires a reference, dropping it releases the
//! reference.  Because `Drop` runs exactly once per clone, a reference can
//! never be released twice.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
struct SeatInfo {
    id: u64,
    name: String,
}

/// A reference-counted handle to a compositor seat.
#[derive(Clone, PartialEq, Eq)]
pub struct Seat(Arc<SeatInfo>);

impl Seat {
    /// Creates the first reference to a seat.  Called by the protocol context.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self(Arc::new(SeatInfo {
            id,
            name: name.into(),
        }))
    }

    /// Protocol-assigned identity of the seat.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Human-readable seat name (e.g. `"seat0"`).
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Number of live references to this seat across the whole process.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seat")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct DeviceInfo {
    id: u64,
    name: String,
    seat_id: u64,
}

/// A reference-counted handle to a virtual input device.
#[derive(Clone, PartialEq, Eq)]
pub struct Device(Arc<DeviceInfo>);

impl Device {
    /// Creates the first reference to a device.  Called by the protocol context.
    pub fn new(id: u64, name: impl Into<String>, seat_id: u64) -> Self {
        Self(Arc::new(DeviceInfo {
            id,
            name: name.into(),
            seat_id,
        }))
    }

    /// Protocol-assigned identity of the device.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Device name as advertised to the compositor.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Identity of the seat the device was created on.
    pub fn seat_id(&self) -> u64 {
        self.0.seat_id
    }

    /// Number of live references to this device across the whole process.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("seat_id", &self.0.seat_id)
            .finish()
    }
}

/// Capabilities a virtual device can request from the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCapability {
    /// Relative pointer motion and buttons.
    Pointer,
    /// Absolute pointer motion within a configured range.
    PointerAbsolute,
    /// Key events.
    Keyboard,
}

impl DeviceCapability {
    /// The capability set requested for the bridge's virtual device.
    pub const VIRTUAL_INPUT: [DeviceCapability; 3] = [
        DeviceCapability::Pointer,
        DeviceCapability::PointerAbsolute,
        DeviceCapability::Keyboard,
    ];
}

/// A notification received from the compositor.
#[derive(Debug, Clone, PartialEq)]
pub enum EiEvent {
    /// The handshake completed and the server accepted the client.
    Connect,
    /// The server closed the session.
    Disconnect,
    /// A seat became available.
    SeatAdded(Seat),
    /// A seat was withdrawn.
    SeatRemoved(Seat),
    /// A device we created was accepted by the server.
    DeviceAdded(Device),
    /// A device was removed by the server.
    DeviceRemoved(Device),
    /// A device may now be used for emulation.
    DeviceResumed(Device),
    /// A device may no longer be used for emulation.
    DeviceSuspended(Device),
}

impl EiEvent {
    /// Short lowercase name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            EiEvent::Connect => "connect",
            EiEvent::Disconnect => "disconnect",
            EiEvent::SeatAdded(_) => "seat-added",
            EiEvent::SeatRemoved(_) => "seat-removed",
            EiEvent::DeviceAdded(_) => "device-added",
            EiEvent::DeviceRemoved(_) => "device-removed",
            EiEvent::DeviceResumed(_) => "device-resumed",
            EiEvent::DeviceSuspended(_) => "device-suspended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_clone_acquires_and_drop_releases_reference() {
        // Arrange
        let seat = Seat::new(1, "seat0");
        assert_eq!(seat.ref_count(), 1);

        // Act
        let acquired = seat.clone();

        // Assert
        assert_eq!(seat.ref_count(), 2);
        drop(acquired);
        assert_eq!(seat.ref_count(), 1);
    }

    #[test]
    fn test_device_accessors_return_construction_values() {
        let device = Device::new(7, "virtual pointer", 1);
        assert_eq!(device.id(), 7);
        assert_eq!(device.name(), "virtual pointer");
        assert_eq!(device.seat_id(), 1);
    }

    #[test]
    fn test_event_kind_names_are_distinct() {
        let seat = Seat::new(1, "seat0");
        let device = Device::new(2, "dev", 1);
        let events = [
            EiEvent::Connect,
            EiEvent::Disconnect,
            EiEvent::SeatAdded(seat.clone()),
            EiEvent::SeatRemoved(seat),
            EiEvent::DeviceAdded(device.clone()),
            EiEvent::DeviceRemoved(device.clone()),
            EiEvent::DeviceResumed(device.clone()),
            EiEvent::DeviceSuspended(device),
        ];
        let mut kinds: Vec<&str> = events.iter().map(EiEvent::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), events.len());
    }
}
