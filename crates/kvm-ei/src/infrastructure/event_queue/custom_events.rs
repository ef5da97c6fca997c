//! FIFO of custom event ids paired with a self-pipe wakeup.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::self_pipe::SelfPipe;

/// Ordered queue of opaque `u32` event ids.
///
/// Every [`CustomEventQueue::push`] is followed by exactly one wake write on
/// the shared [`SelfPipe`], so a consumer blocked on the pipe's read end
/// wakes at least once per push (several pushes may coalesce into one
/// wakeup; the consumer compensates by always checking the queue).
#[derive(Debug)]
pub struct CustomEventQueue {
    ids: Mutex<VecDeque<u32>>,
    pipe: Arc<SelfPipe>,
}

impl CustomEventQueue {
    pub fn new(pipe: Arc<SelfPipe>) -> Self {
        Self {
            ids: Mutex::new(VecDeque::new()),
            pipe,
        }
    }

    /// Appends `id` and tickles the pipe.
    ///
    /// Returns `false` only if the wake write failed for a reason other than a
    /// full pipe.  The id stays queued either way.
    pub fn push(&self, id: u32) -> bool {
        self.lock().push_back(id);
        self.pipe.notify()
    }

    /// Removes the oldest id.
    pub fn pop(&self) -> Option<u32> {
        self.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<u32>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_queue() -> (CustomEventQueue, Arc<SelfPipe>) {
        let pipe = Arc::new(SelfPipe::new().expect("pipe"));
        (CustomEventQueue::new(Arc::clone(&pipe)), pipe)
    }

    #[test]
    fn test_pop_returns_ids_in_push_order() {
        // Arrange
        let (queue, _) = make_queue();

        // Act
        for id in [7, 3, 9] {
            assert!(queue.push(id));
        }

        // Assert
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(9));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_each_push_writes_one_wake_byte() {
        // Arrange
        let (queue, pipe) = make_queue();

        // Act
        queue.push(1);
        queue.push(2);

        // Assert
        assert_eq!(pipe.drain(), 2);
        assert_eq!(queue.len(), 2, "draining the pipe leaves ids queued");
    }

    #[test]
    fn test_concurrent_producers_lose_no_ids() {
        // Arrange
        let (queue, _) = make_queue();
        let queue = Arc::new(queue);

        // Act
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let q = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        q.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Assert
        assert_eq!(queue.len(), 1000);
    }
}
