//! Event queue buffer that multiplexes the libei socket with a self-pipe.
//!
//! # Why two descriptors?
//!
//! The consumer thread must wake up for two unrelated reasons:
//!
//! 1. The compositor sent libei protocol data (the context's descriptor
//!    became readable).
//! 2. Another thread queued a custom event through `add_event`.
//!
//! `poll(2)` can wait on both at once.  Reason 2 is turned into a readable
//! descriptor with a [`SelfPipe`].
//!
//! # Ordering policy
//!
//! [`EiEventQueueBuffer::get_event`] always returns queued custom events
//! before libei events.  If producers queue custom events faster than the
//! consumer drains them, libei events wait indefinitely.  That starvation is
//! accepted: custom events are rare control messages in practice.

use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace};

use super::custom_events::CustomEventQueue;
use super::self_pipe::SelfPipe;
use super::{
    BufferError, Event, EventQueueBuffer, EventQueueTimer, EventTarget, QueuedEvent,
    ShutdownSignal,
};
use crate::application::device_lifecycle::EiContext;

const EI_FD: usize = 0;
const PIPE_FD: usize = 1;

/// The libei event source multiplexer.
///
/// Holds a shared reference to the protocol context (released when the
/// buffer is dropped) and owns both ends of its self-pipe.
pub struct EiEventQueueBuffer {
    context: Arc<dyn EiContext>,
    system_target: EventTarget,
    shutdown: ShutdownSignal,
    pipe: Arc<SelfPipe>,
    custom: CustomEventQueue,
}

impl EiEventQueueBuffer {
    /// Creates the buffer and its self-pipe.
    ///
    /// # Errors
    ///
    /// Returns the `errno` if the pipe cannot be created or configured.
    pub fn new(
        context: Arc<dyn EiContext>,
        system_target: EventTarget,
        shutdown: ShutdownSignal,
    ) -> nix::Result<Self> {
        let pipe = Arc::new(SelfPipe::new()?);
        let custom = CustomEventQueue::new(Arc::clone(&pipe));
        Ok(Self {
            context,
            system_target,
            shutdown,
            pipe,
            custom,
        })
    }

    fn check_cancelled(&self) -> Result<(), BufferError> {
        if self.shutdown.is_requested() {
            Err(BufferError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Polls both descriptors.  Returns `(ei_ready, pipe_ready)`.
    fn poll_sources(&self, timeout: PollTimeout) -> Result<(bool, bool), BufferError> {
        let mut fds = [
            PollFd::new(self.context.as_fd(), PollFlags::POLLIN),
            PollFd::new(self.pipe.read_fd(), PollFlags::POLLIN),
        ];
        match poll(&mut fds, timeout) {
            Ok(0) => Ok((false, false)),
            Ok(_) => Ok((is_ready(&fds[EI_FD]), is_ready(&fds[PIPE_FD]))),
            // A signal interrupted the wait; treat it like a timeout.
            Err(Errno::EINTR) => Ok((false, false)),
            Err(e) => Err(BufferError::Poll(e)),
        }
    }
}

/// Hang-up and error count as ready so that dispatch observes the disconnect.
fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|revents| {
        revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// Converts a millisecond timeout to `poll`'s integer milliseconds.
///
/// `None` means wait forever (negative or NaN input).  Fractions round up so
/// that a short positive timeout never degrades into a busy loop.
pub(crate) fn timeout_millis(timeout_ms: f64) -> Option<i32> {
    if timeout_ms.is_nan() || timeout_ms < 0.0 {
        return None;
    }
    let ms = timeout_ms.ceil();
    if ms >= f64::from(i32::MAX) {
        Some(i32::MAX)
    } else {
        // In range [0, i32::MAX) after the checks above.
        Some(ms as i32)
    }
}

impl EventQueueBuffer for EiEventQueueBuffer {
    fn wait_for_event(&self, timeout_ms: f64) -> Result<(), BufferError> {
        self.check_cancelled()?;

        let timeout = match timeout_millis(timeout_ms) {
            None => PollTimeout::NONE,
            Some(ms) => PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX),
        };
        let (ei_ready, pipe_ready) = self.poll_sources(timeout)?;

        if ei_ready {
            trace!("libei descriptor ready; dispatching");
            self.context.dispatch();
        }
        if pipe_ready {
            let discarded = self.pipe.drain();
            trace!("drained {discarded} wake byte(s)");
        }

        self.check_cancelled()
    }

    fn get_event(&self) -> Option<QueuedEvent> {
        if let Some(id) = self.custom.pop() {
            return Some(QueuedEvent::User(id));
        }
        self.context
            .get_event()
            .map(|event| QueuedEvent::System(Event::system(self.system_target, event)))
    }

    fn add_event(&self, id: u32) -> bool {
        self.custom.push(id)
    }

    fn is_empty(&self) -> bool {
        self.custom.is_empty() && !self.context.has_pending_event()
    }

    fn new_timer(&self, duration: Duration, one_shot: bool) -> EventQueueTimer {
        debug!(?duration, one_shot, "timers are not supported by the libei buffer");
        EventQueueTimer::new(duration, one_shot)
    }

    fn delete_timer(&self, timer: EventQueueTimer) {
        drop(timer);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ei::{EiEvent, Seat};
    use crate::infrastructure::ei::mock::MockEiContext;
    use std::time::Instant;

    fn make_buffer() -> (EiEventQueueBuffer, Arc<MockEiContext>, ShutdownSignal) {
        let context = Arc::new(MockEiContext::new().expect("mock context"));
        let shutdown = ShutdownSignal::new();
        let buffer = EiEventQueueBuffer::new(
            Arc::clone(&context) as Arc<dyn EiContext>,
            EventTarget::SYSTEM,
            shutdown.clone(),
        )
        .expect("buffer");
        (buffer, context, shutdown)
    }

    // ── Timeout conversion ────────────────────────────────────────────────────

    #[test]
    fn test_negative_timeout_waits_forever() {
        assert_eq!(timeout_millis(-1.0), None);
        assert_eq!(timeout_millis(-0.001), None);
        assert_eq!(timeout_millis(f64::NAN), None);
    }

    #[test]
    fn test_fractional_timeout_rounds_up() {
        assert_eq!(timeout_millis(0.0), Some(0));
        assert_eq!(timeout_millis(0.2), Some(1));
        assert_eq!(timeout_millis(250.0), Some(250));
    }

    #[test]
    fn test_huge_timeout_is_clamped() {
        assert_eq!(timeout_millis(1e12), Some(i32::MAX));
        assert_eq!(timeout_millis(f64::INFINITY), Some(i32::MAX));
    }

    // ── Waiting ───────────────────────────────────────────────────────────────

    #[test]
    fn test_wait_times_out_with_nothing_ready() {
        // Arrange
        let (buffer, _, _) = make_buffer();

        // Act
        let started = Instant::now();
        buffer.wait_for_event(20.0).expect("timeout is not an error");

        // Assert
        assert!(started.elapsed() >= Duration::from_millis(15));
        assert!(buffer.is_empty());
        assert!(buffer.get_event().is_none());
    }

    #[test]
    fn test_wait_returns_immediately_when_cancelled() {
        // Arrange
        let (buffer, _, shutdown) = make_buffer();
        shutdown.request();

        // Act
        let result = buffer.wait_for_event(-1.0);

        // Assert
        assert!(matches!(result, Err(BufferError::Cancelled)));
    }

    #[test]
    fn test_add_event_wakes_wait_and_is_returned_as_user_event() {
        // Arrange
        let (buffer, _, _) = make_buffer();
        assert!(buffer.add_event(42));

        // Act
        buffer.wait_for_event(1000.0).unwrap();

        // Assert
        assert_eq!(buffer.get_event(), Some(QueuedEvent::User(42)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ei_readiness_triggers_dispatch() {
        // Arrange
        let (buffer, context, _) = make_buffer();
        context.push_event(EiEvent::Connect);
        assert!(buffer.is_empty(), "nothing buffered before dispatch");

        // Act
        buffer.wait_for_event(1000.0).unwrap();

        // Assert
        assert!(!buffer.is_empty());
        assert_eq!(
            buffer.get_event(),
            Some(QueuedEvent::System(Event::system(
                EventTarget::SYSTEM,
                EiEvent::Connect
            )))
        );
    }

    #[test]
    fn test_custom_events_take_priority_over_ei_events() {
        // Arrange
        let (buffer, context, _) = make_buffer();
        context.push_event(EiEvent::SeatAdded(Seat::new(1, "seat0")));
        buffer.add_event(1);
        buffer.add_event(2);

        // Act
        buffer.wait_for_event(1000.0).unwrap();
        let first = buffer.get_event();
        let second = buffer.get_event();
        let third = buffer.get_event();

        // Assert
        assert_eq!(first, Some(QueuedEvent::User(1)));
        assert_eq!(second, Some(QueuedEvent::User(2)));
        assert!(matches!(third, Some(QueuedEvent::System(_))));
    }

    #[test]
    fn test_is_empty_does_not_consume() {
        // Arrange
        let (buffer, context, _) = make_buffer();
        context.push_event(EiEvent::Connect);
        buffer.wait_for_event(1000.0).unwrap();

        // Act
        let results: Vec<bool> = (0..5).map(|_| buffer.is_empty()).collect();

        // Assert
        assert_eq!(results, vec![false; 5]);
        assert!(buffer.get_event().is_some());
        assert!(buffer.is_empty());
    }
}
