//! Non-blocking self-pipe used to wake a thread blocked in `poll(2)`.
//!
//! # What is the self-pipe trick? (for beginners)
//!
//! The consumer thread sleeps in `poll()` waiting for the libei socket to
//! become readable.  A producer on another thread sometimes needs to wake it
//! up early (because it queued a custom event).  Threads cannot "interrupt" a
//! `poll()` directly, but they can make one of the polled descriptors
//! readable.  So the consumer also polls the read end of a private pipe, and
//! producers write a single byte to the write end.
//!
//! Both ends are `O_NONBLOCK`:
//!
//! - A producer never blocks, even if nobody drains the pipe for a while.  A
//!   full pipe (`EAGAIN`) already guarantees the reader will wake, so the
//!   write is simply skipped.
//! - The reader can drain "everything currently available" by reading until
//!   `EAGAIN` without risking a block.
//!
//! The byte content is meaningless; only the transition to readable matters.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd;
use tracing::warn;

const WAKE_BYTE: &[u8] = b"!";

/// Both ends of a non-blocking pipe.  Closed when dropped.
#[derive(Debug)]
pub struct SelfPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl SelfPipe {
    /// Creates the pipe and switches both ends to non-blocking, close-on-exec.
    ///
    /// # Errors
    ///
    /// Returns the `errno` of the failing `pipe`/`fcntl` call.
    pub fn new() -> nix::Result<Self> {
        let (read, write) = unistd::pipe()?;
        configure(&read)?;
        configure(&write)?;
        Ok(Self { read, write })
    }

    /// The read end, for registration with `poll`.
    pub fn read_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }

    /// Writes one wake byte.
    ///
    /// Returns `true` when the reader is guaranteed to observe the pipe as
    /// readable (the byte was written, or the pipe is already full).
    pub fn notify(&self) -> bool {
        loop {
            match unistd::write(&self.write, WAKE_BYTE) {
                Ok(_) | Err(Errno::EAGAIN) => return true,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("self-pipe write failed: {e}");
                    return false;
                }
            }
        }
    }

    /// Reads and discards every byte currently in the pipe.
    ///
    /// Returns the number of bytes discarded.
    pub fn drain(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match unistd::read(self.read.as_raw_fd(), &mut buf) {
                Ok(0) | Err(Errno::EAGAIN) => return total,
                Ok(n) => total += n,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("self-pipe read failed: {e}");
                    return total;
                }
            }
        }
    }
}

fn configure(fd: &OwnedFd) -> nix::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    fcntl(raw, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}
